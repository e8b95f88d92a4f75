//! Runtime configuration
//!
//! Knobs come from `FAVSORT_*` environment variables (a `.env` file is
//! loaded at startup by `dotenvy`) layered over the defaults below. AI
//! endpoint settings come from `OPENAI_*` variables, then the saved
//! `ai_config.json`, then the keychain for the API key.

use crate::ai::credentials::CredentialManager;
use crate::error::{FavError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Largest page size the favorites listing endpoint accepts
pub const MAX_PAGE_SIZE: u32 = 20;

/// Application config directory (`~/.config/favsort` on Linux)
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("favsort")
}

#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Items requested per listing page
    pub page_size: u32,
    /// Hard stop on listing pages per collection
    pub max_pages: u32,
    pub request_timeout: Duration,
    /// Pause between consecutive move calls
    pub move_interval: Duration,
    /// Sliding-window cap on write calls per account
    pub moves_per_minute: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_pages: 100,
            request_timeout: Duration::from_secs(30),
            move_interval: Duration::from_millis(500),
            moves_per_minute: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Concurrent classification requests
    pub workers: usize,
    pub max_description_chars: usize,
    pub temperature: f32,
    /// Custom prompt template file
    pub prompt_template: Option<PathBuf>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_description_chars: 500,
            temperature: 0.0,
            prompt_template: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(180),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub platform: PlatformConfig,
    pub classifier: ClassifierConfig,
    pub auth: AuthConfig,
    pub retry: RetryPolicy,
    /// Collection title that receives unresolved items instead of skipping them
    pub fallback_collection: Option<String>,
}

impl AppConfig {
    /// Build config from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup (lets tests avoid touching process env)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |name: &str| lookup(&format!("FAVSORT_{}", name));

        if let Some(v) = parse_var::<u32>(&get, "PAGE_SIZE")? {
            config.platform.page_size = v;
        }
        if let Some(v) = parse_var::<u32>(&get, "MAX_PAGES")? {
            config.platform.max_pages = v;
        }
        if let Some(v) = parse_var::<u64>(&get, "TIMEOUT_SECS")? {
            config.platform.request_timeout = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64>(&get, "MOVE_INTERVAL_MS")? {
            config.platform.move_interval = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<usize>(&get, "MOVES_PER_MINUTE")? {
            config.platform.moves_per_minute = v;
        }
        if let Some(v) = parse_var::<u32>(&get, "MAX_RETRIES")? {
            config.retry.max_retries = v;
        }
        if let Some(v) = parse_var::<u64>(&get, "BACKOFF_BASE_MS")? {
            config.retry.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<u64>(&get, "BACKOFF_MAX_MS")? {
            config.retry.max_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse_var::<usize>(&get, "WORKERS")? {
            config.classifier.workers = v;
        }
        if let Some(v) = parse_var::<u64>(&get, "POLL_INTERVAL_SECS")? {
            config.auth.poll_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64>(&get, "LOGIN_TIMEOUT_SECS")? {
            config.auth.timeout = Duration::from_secs(v);
        }
        if let Some(path) = get("PROMPT_TEMPLATE").filter(|s| !s.trim().is_empty()) {
            config.classifier.prompt_template = Some(PathBuf::from(path));
        }
        config.fallback_collection = get("FALLBACK_COLLECTION")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.platform.page_size == 0 || self.platform.page_size > MAX_PAGE_SIZE {
            return Err(FavError::config(format!(
                "page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.platform.page_size
            )));
        }
        if self.platform.max_pages == 0 {
            return Err(FavError::config("max pages must be at least 1"));
        }
        if self.classifier.workers == 0 {
            return Err(FavError::config("classifier workers must be at least 1"));
        }
        if self.platform.moves_per_minute == 0 {
            return Err(FavError::config("moves per minute must be at least 1"));
        }
        if self.auth.poll_interval.is_zero() {
            return Err(FavError::config("login poll interval must be non-zero"));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(FavError::config("backoff base delay exceeds max delay"));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(get: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>> {
    match get(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            FavError::config(format!("FAVSORT_{} has an invalid value: {:?}", name, raw))
        }),
    }
}

/// Settings for the OpenAI-compatible completion endpoint
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiSettings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model_name: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model_name: default_model(),
        }
    }
}

impl std::fmt::Debug for AiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiSettings")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model_name", &self.model_name)
            .finish()
    }
}

impl AiSettings {
    /// Path of the saved settings file
    pub fn default_path() -> PathBuf {
        config_dir().join("ai_config.json")
    }

    /// Load the settings file, if present
    pub fn load_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| FavError::storage(format!("Failed to read {}: {}", path.display(), e)))?;
        let settings = serde_json::from_str(&raw).map_err(|e| {
            FavError::config(format!("Invalid AI settings in {}: {}", path.display(), e))
        })?;
        Ok(Some(settings))
    }

    /// Persist settings (without the key if it lives in the keychain)
    pub fn save_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .map_err(|e| FavError::storage(format!("Failed to write {}: {}", path.display(), e)))?;
        tracing::info!(path = %path.display(), "Saved AI settings");
        Ok(())
    }

    /// Resolve settings: env vars, then settings file, then keychain for the key
    pub fn resolve(path: &Path) -> Result<Self> {
        let mut settings = Self::load_file(path)?.unwrap_or_default();

        settings.apply_overrides(|key| std::env::var(key).ok());

        if settings.api_key.is_empty() {
            if let Ok(key) = CredentialManager::get_api_key() {
                settings.api_key = key;
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(key) = non_empty("OPENAI_API_KEY") {
            self.api_key = key;
        }
        if let Some(url) = non_empty("OPENAI_BASE_URL") {
            self.base_url = url;
        }
        if let Some(model) = non_empty("OPENAI_MODEL") {
            self.model_name = model;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(FavError::config(
                "No AI API key configured (set OPENAI_API_KEY or run `favsort set-key`)",
            ));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(FavError::config(format!(
                "AI base URL must be http(s): {}",
                self.base_url
            )));
        }
        if self.model_name.trim().is_empty() {
            return Err(FavError::config("AI model name is empty"));
        }
        Ok(())
    }
}
