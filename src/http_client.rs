//! Shared HTTP client construction
//!
//! One client per remote surface, built once per run and shared by every
//! request against it so TLS sessions and pooled connections are reused.
//!
//! - Platform client: browser-like headers (the favorites API rejects bare
//!   clients), short timeout, small pool since writes are serialized.
//! - AI client: longer timeout for completions, pool sized for the
//!   classifier worker count.

use crate::error::{FavError, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ORIGIN, REFERER};
use reqwest::Client;
use std::time::Duration;

pub const PLATFORM_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Client for the favorites and passport APIs
pub fn platform_client(timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
    headers.insert(ORIGIN, HeaderValue::from_static("https://www.bilibili.com"));
    headers.insert(REFERER, HeaderValue::from_static("https://www.bilibili.com/"));

    Client::builder()
        .user_agent(PLATFORM_USER_AGENT)
        .default_headers(headers)
        .timeout(timeout)
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .map_err(|e| FavError::config(format!("Failed to create platform HTTP client: {}", e)))
}

/// Client for the OpenAI-compatible completion endpoint
pub fn ai_client(timeout: Duration, workers: usize) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(workers.max(1))
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .build()
        .map_err(|e| FavError::config(format!("Failed to create AI HTTP client: {}", e)))
}
