//! Constrained-choice classification
//!
//! The model is asked to pick one collection from an explicit list. Its
//! answer is accepted only if it names one of them exactly (after trimming
//! and ignoring case), and the canonical spelling from the list is what
//! gets recorded. Anything else is `Unresolved`, never an error.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::client::{CompletionBackend, CompletionRequest};
use super::prompts::{PromptTemplate, CLASSIFY_SYSTEM_PROMPT};
use crate::cancel::CancelFlag;
use crate::config::ClassifierConfig;
use crate::error::FavError;
use crate::platform::VideoItem;
use crate::retry::{with_backoff, with_backoff_until, RetryPolicy};

pub const REASON_CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "category", rename_all = "snake_case")]
pub enum Assignment {
    /// Canonical name of one of the allowed categories
    Resolved(String),
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub video_id: u64,
    pub assigned: Assignment,
    /// Model answer as received, when there was one
    pub raw_model_text: Option<String>,
    /// Why the result is unresolved
    pub reason: Option<String>,
}

impl ClassificationResult {
    fn unresolved(video_id: u64, raw: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            video_id,
            assigned: Assignment::Unresolved,
            raw_model_text: raw,
            reason: Some(reason.into()),
        }
    }

    pub fn category(&self) -> Option<&str> {
        match &self.assigned {
            Assignment::Resolved(name) => Some(name),
            Assignment::Unresolved => None,
        }
    }
}

/// Canonical allowed name equal to `answer` after trimming and case folding
pub fn match_category(answer: &str, allowed: &[String]) -> Option<String> {
    let wanted = answer.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    allowed
        .iter()
        .find(|name| name.trim().to_lowercase() == wanted)
        .cloned()
}

fn should_retry(err: &FavError) -> bool {
    err.is_transient() || matches!(err, FavError::AiAuth { .. })
}

pub struct Classifier {
    backend: Arc<dyn CompletionBackend>,
    template: PromptTemplate,
    config: ClassifierConfig,
    retry: RetryPolicy,
}

impl Classifier {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        template: PromptTemplate,
        config: ClassifierConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            template,
            config,
            retry,
        }
    }

    pub fn workers(&self) -> usize {
        self.config.workers.max(1)
    }

    fn request_for(&self, item: &VideoItem, allowed: &[String]) -> CompletionRequest {
        CompletionRequest {
            system: CLASSIFY_SYSTEM_PROMPT.to_string(),
            user: self.template.render(
                &item.title,
                &item.description,
                allowed,
                self.config.max_description_chars,
            ),
            temperature: self.config.temperature,
        }
    }

    /// Classify one item into one of `allowed`
    pub async fn classify(&self, item: &VideoItem, allowed: &[String]) -> ClassificationResult {
        self.classify_inner(item, allowed, None).await
    }

    async fn classify_inner(
        &self,
        item: &VideoItem,
        allowed: &[String],
        cancel: Option<&CancelFlag>,
    ) -> ClassificationResult {
        let request = self.request_for(item, allowed);
        let backend = &self.backend;
        let request = &request;
        let complete = move || async move { backend.complete(request).await };

        let answer = match cancel {
            Some(cancel) => {
                with_backoff_until("classify", &self.retry, cancel, should_retry, complete).await
            }
            None => with_backoff("classify", &self.retry, should_retry, complete).await,
        };

        let raw = match answer {
            Ok(raw) => raw,
            Err(FavError::Cancelled) => {
                tracing::debug!(video_id = item.video_id, "Classification cancelled");
                return ClassificationResult::unresolved(item.video_id, None, REASON_CANCELLED);
            }
            Err(e) => {
                tracing::warn!(video_id = item.video_id, error = %e, "Classification failed");
                return ClassificationResult::unresolved(item.video_id, None, e.to_string());
            }
        };

        match match_category(&raw, allowed) {
            Some(category) => {
                tracing::debug!(video_id = item.video_id, %category, "Classified");
                ClassificationResult {
                    video_id: item.video_id,
                    assigned: Assignment::Resolved(category),
                    raw_model_text: Some(raw),
                    reason: None,
                }
            }
            None => {
                let reason = if raw.trim().is_empty() {
                    "model returned an empty answer".to_string()
                } else {
                    format!("model answer {:?} is not one of the allowed collections", raw.trim())
                };
                tracing::info!(video_id = item.video_id, answer = %raw, "Unresolved classification");
                ClassificationResult::unresolved(item.video_id, Some(raw), reason)
            }
        }
    }

    /// Classify every item with at most `workers` requests in flight.
    ///
    /// Returns exactly one result per item, in input order. Once `cancel` is
    /// set no new request starts and requests still retrying stop; those
    /// items come back unresolved with reason "cancelled". `on_result` sees
    /// each result as it completes.
    pub async fn classify_all(
        &self,
        items: &[VideoItem],
        allowed: &[String],
        cancel: &CancelFlag,
        on_result: &(dyn Fn(usize, &ClassificationResult) + Sync),
    ) -> Vec<ClassificationResult> {
        let semaphore = Arc::new(Semaphore::new(self.workers()));
        let mut pending = FuturesUnordered::new();

        for (index, item) in items.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            pending.push(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) if !cancel.is_cancelled() => {
                        self.classify_inner(item, allowed, Some(cancel)).await
                    }
                    _ => ClassificationResult::unresolved(item.video_id, None, REASON_CANCELLED),
                };
                (index, result)
            });
        }

        let mut results: Vec<Option<ClassificationResult>> = vec![None; items.len()];
        let mut completed = 0;

        while let Some((index, result)) = pending.next().await {
            on_result(index, &result);
            results[index] = Some(result);
            completed += 1;
            tracing::debug!(completed, total = items.len(), "Classification progress");
        }

        results
            .into_iter()
            .zip(items)
            .map(|(r, item)| {
                r.unwrap_or_else(|| {
                    ClassificationResult::unresolved(item.video_id, None, "missing result")
                })
            })
            .collect()
    }
}
