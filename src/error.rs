//! Error taxonomy shared by every layer of the pipeline.
//!
//! Per-item failures are caught by the orchestrator and turned into
//! `MoveOutcome`s; only session-establishment and configuration errors
//! travel all the way up to the CLI.

use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum FavError {
    /// Platform session missing, expired or rejected
    #[error("Not authenticated: {message}")]
    Auth { message: String },

    /// AI endpoint rejected the configured API key
    #[error("AI endpoint rejected credentials: {message}")]
    AiAuth { message: String },

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Platform error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("QR code expired before the login was confirmed; run `favsort login` to get a new one")]
    ChallengeExpired,

    #[error("Login was rejected: {reason}")]
    ChallengeRejected { reason: String },

    #[error("Login timed out after {0:?} without confirmation")]
    LoginTimedOut(Duration),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid prompt template: {message}")]
    Template { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Unexpected response: {message}")]
    Parse { message: String },

    /// The run was cancelled while this operation waited
    #[error("Cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, FavError>;

impl FavError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network { .. })
    }

    /// Platform session is no longer usable
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Short machine-readable label, used in logs and progress events
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::AiAuth { .. } => "ai_auth",
            Self::RateLimited { .. } => "rate_limited",
            Self::NotFound { .. } => "not_found",
            Self::Network { .. } => "network",
            Self::Api { .. } => "api",
            Self::ChallengeExpired => "challenge_expired",
            Self::ChallengeRejected { .. } => "challenge_rejected",
            Self::LoginTimedOut(_) => "login_timed_out",
            Self::Config { .. } => "config",
            Self::Template { .. } => "template",
            Self::Storage { .. } => "storage",
            Self::Parse { .. } => "parse",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<reqwest::Error> for FavError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::parse(err.to_string())
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FavError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse(err.to_string())
    }
}

impl From<std::io::Error> for FavError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<FavError> for String {
    fn from(err: FavError) -> Self {
        err.to_string()
    }
}
