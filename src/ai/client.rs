use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::AiSettings;
use crate::error::{FavError, Result};

/// One system + user exchange
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
}

/// A chat-completion model; returns the raw text of the first choice
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// API error response
#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Category names are short; a small cap keeps a chatty model cheap
const MAX_ANSWER_TOKENS: u32 = 64;

/// OpenAI-compatible `/chat/completions` client
pub struct OpenAiBackend {
    client: Client,
    settings: AiSettings,
}

impl OpenAiBackend {
    pub fn new(client: Client, settings: AiSettings) -> Self {
        Self { client, settings }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }
}

/// Map a failed completion status onto the error taxonomy
fn error_for_status(status: StatusCode, body: &str, retry_after: Option<Duration>) -> FavError {
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>()));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FavError::AiAuth { message },
        StatusCode::TOO_MANY_REQUESTS => FavError::RateLimited { message, retry_after },
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => FavError::network(message),
        s => FavError::Api {
            code: i64::from(s.as_u16()),
            message,
        },
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = ApiRequest {
            model: &self.settings.model_name,
            messages: vec![
                Message {
                    role: "system",
                    content: &request.system,
                },
                Message {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: MAX_ANSWER_TOKENS,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| FavError::network(format!("Completion request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let error_text = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, &error_text, retry_after));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| FavError::parse(format!("Failed to parse completion: {}", e)))?;

        Ok(completion_text(api_response))
    }
}

/// Content of the first choice, untouched
fn completion_text(response: ApiResponse) -> String {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default()
}
