//! Classification prompts
//!
//! The user prompt is a slot template. Parsing validates it once up front;
//! rendering substitutes values exactly once, so braces inside a video
//! title or description are never read as slots.

use std::fs;
use std::path::Path;

use crate::error::{FavError, Result};

/// System prompt for collection classification
pub const CLASSIFY_SYSTEM_PROMPT: &str = r#"You are a classification assistant for a video favorites library. Your task is to place each video into exactly one of the user's collections.

RULES:
1. Answer with ONE collection name copied exactly from the list you are given
2. Output the name only: no quotes, numbering, punctuation or explanation
3. Never invent a collection that is not in the list
4. If nothing fits well, still choose the closest collection from the list"#;

/// Default user prompt
pub const DEFAULT_USER_TEMPLATE: &str = r#"Pick the best collection for this video.

TITLE: {title}
DESCRIPTION: {description}

COLLECTIONS (answer with one of these names exactly):
{categories}"#;

const EMPTY_DESCRIPTION: &str = "(no description)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Title,
    Description,
    Categories,
}

impl Slot {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "title" => Some(Self::Title),
            "description" => Some(Self::Description),
            "categories" => Some(Self::Categories),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(Slot),
}

/// A validated user-prompt template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parse `{slot}` placeholders; `{{` and `}}` are literal braces.
    ///
    /// Fails on unknown slots, unbalanced braces, or a template without
    /// `{categories}`.
    pub fn parse(source: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for n in chars.by_ref() {
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        name.push(n);
                    }
                    if !closed {
                        return Err(template_error(format!("unclosed slot '{{{}'", name)));
                    }
                    let slot = Slot::from_name(name.trim()).ok_or_else(|| {
                        template_error(format!(
                            "unknown slot '{{{}}}' (expected title, description or categories)",
                            name
                        ))
                    })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Slot(slot));
                }
                '}' => return Err(template_error("unmatched '}' (write '}}' for a literal brace)")),
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        if !segments.contains(&Segment::Slot(Slot::Categories)) {
            return Err(template_error("template must include the {categories} slot"));
        }

        Ok(Self { segments })
    }

    pub fn builtin() -> Result<Self> {
        Self::parse(DEFAULT_USER_TEMPLATE)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path).map_err(|e| {
            FavError::config(format!("Failed to read prompt template {}: {}", path.display(), e))
        })?;
        Self::parse(&source)
    }

    /// Custom template file if given, otherwise the built-in one
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let template = Self::from_file(p)?;
                tracing::info!(path = %p.display(), "Using custom prompt template");
                Ok(template)
            }
            None => Self::builtin(),
        }
    }

    pub fn render(
        &self,
        title: &str,
        description: &str,
        categories: &[String],
        max_description_chars: usize,
    ) -> String {
        let description = truncate_chars(description.trim(), max_description_chars);
        let description = if description.is_empty() {
            EMPTY_DESCRIPTION.to_string()
        } else {
            description
        };
        let categories = categories
            .iter()
            .map(|c| format!("- {}", c))
            .collect::<Vec<_>>()
            .join("\n");

        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(Slot::Title) => out.push_str(title.trim()),
                Segment::Slot(Slot::Description) => out.push_str(&description),
                Segment::Slot(Slot::Categories) => out.push_str(&categories),
            }
        }
        out
    }
}

fn template_error(message: impl Into<String>) -> FavError {
    FavError::Template {
        message: message.into(),
    }
}

/// Truncate to at most `max` characters, marking the cut with "..."
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max).collect();
    cut.push_str("...");
    cut
}
