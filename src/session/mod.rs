//! Session Store
//!
//! Holds the authenticated platform identity for the lifetime of a run.
//! Single writer (the login handshake), many readers (every platform call).
//!
//! ## Concurrency
//! The session lives behind a `tokio::sync::RwLock` as an `Arc<Session>`.
//! Readers take a snapshot (the `Arc` plus a generation number) and never
//! hold the lock across a network call. A refresh swaps the whole `Arc`
//! under the write lock, so no request can observe a half-updated session.
//!
//! Invalidation is generation-checked: a request that started with an old
//! session and failed after a refresh must not invalidate the new one.

pub mod credentials;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{FavError, Result};

pub use credentials::{session_from_env, CredentialStore, FileCredentialStore, COOKIE_ENV};

pub const SESSION_COOKIE: &str = "SESSDATA";
pub const CSRF_COOKIE: &str = "bili_jct";
pub const USER_ID_COOKIE: &str = "DedeUserID";

static COOKIE_PAIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|;)\s*([A-Za-z0-9_\-]+)=([^;]*)").expect("valid cookie regex"));

/// Authenticated platform identity
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// SESSDATA cookie
    pub session_token: String,
    /// bili_jct cookie, sent as `csrf` on every write
    pub csrf_token: String,
    /// DedeUserID cookie
    pub user_id: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("session_token", &"<redacted>")
            .field("csrf_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Session {
    pub fn new(
        session_token: impl Into<String>,
        csrf_token: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            session_token: session_token.into(),
            csrf_token: csrf_token.into(),
            user_id: user_id.into(),
            expires_at: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Cookie header value for authenticated requests
    pub fn cookie_header(&self) -> String {
        format!(
            "{}={}; {}={}; {}={}",
            SESSION_COOKIE,
            self.session_token,
            CSRF_COOKIE,
            self.csrf_token,
            USER_ID_COOKIE,
            self.user_id
        )
    }

    /// Build a session from a browser-style `name=value; name=value` cookie string
    pub fn from_cookie_str(cookie: &str) -> Option<Self> {
        Self::from_pairs(&parse_cookie_pairs(cookie))
    }

    /// Build a session from `Set-Cookie` header values.
    ///
    /// The `Expires` attribute of the session cookie, when present and
    /// parseable, becomes `expires_at`.
    pub fn from_set_cookies<'a, I>(headers: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut pairs = HashMap::new();
        let mut expires_at = None;

        for header in headers {
            let mut parts = header.split(';');
            let Some((name, value)) = parts.next().and_then(|kv| kv.trim().split_once('=')) else {
                continue;
            };
            if name == SESSION_COOKIE {
                expires_at = parts
                    .filter_map(|attr| attr.trim().split_once('='))
                    .find(|(k, _)| k.eq_ignore_ascii_case("expires"))
                    .and_then(|(_, v)| DateTime::parse_from_rfc2822(v.trim()).ok())
                    .map(|dt| dt.with_timezone(&Utc));
            }
            pairs.insert(name.to_string(), value.to_string());
        }

        let mut session = Self::from_pairs(&pairs)?;
        session.expires_at = expires_at;
        Some(session)
    }

    fn from_pairs(pairs: &HashMap<String, String>) -> Option<Self> {
        let field = |name: &str| pairs.get(name).filter(|v| !v.is_empty()).cloned();
        Some(Self::new(
            field(SESSION_COOKIE)?,
            field(CSRF_COOKIE)?,
            field(USER_ID_COOKIE)?,
        ))
    }
}

/// Split a cookie string into name/value pairs
pub fn parse_cookie_pairs(cookie: &str) -> HashMap<String, String> {
    COOKIE_PAIR
        .captures_iter(cookie)
        .map(|c| (c[1].to_string(), c[2].trim().to_string()))
        .collect()
}

/// Validity of the stored session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No login has happened yet
    Absent,
    Valid,
    /// The cookie's expiry has passed
    Expired,
    /// The platform rejected the session
    Invalidated,
}

/// Session plus the generation it was read at
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session: Arc<Session>,
    pub generation: u64,
}

#[derive(Debug)]
struct Slot {
    session: Option<Arc<Session>>,
    generation: u64,
    invalidated: bool,
}

/// Shared handle to the current session; clone the surrounding `Arc` to share
#[derive(Debug)]
pub struct SessionStore {
    inner: RwLock<Slot>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Slot {
                session: None,
                generation: 0,
                invalidated: false,
            }),
        }
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            inner: RwLock::new(Slot {
                session: Some(Arc::new(session)),
                generation: 1,
                invalidated: false,
            }),
        }
    }

    pub async fn state(&self) -> SessionState {
        let slot = self.inner.read().await;
        match &slot.session {
            None => SessionState::Absent,
            Some(_) if slot.invalidated => SessionState::Invalidated,
            Some(s) if s.is_expired_at(Utc::now()) => SessionState::Expired,
            Some(_) => SessionState::Valid,
        }
    }

    /// Snapshot of the session if it is currently usable
    pub async fn current(&self) -> Option<SessionSnapshot> {
        let slot = self.inner.read().await;
        match &slot.session {
            Some(s) if !slot.invalidated && !s.is_expired_at(Utc::now()) => Some(SessionSnapshot {
                session: Arc::clone(s),
                generation: slot.generation,
            }),
            _ => None,
        }
    }

    /// Like `current`, but a missing or unusable session is an `Auth` error
    pub async fn require(&self) -> Result<SessionSnapshot> {
        match self.current().await {
            Some(snapshot) => Ok(snapshot),
            None => Err(FavError::auth(match self.state().await {
                SessionState::Absent => "no session; log in first",
                SessionState::Expired => "session cookie has expired",
                _ => "session was rejected by the platform",
            })),
        }
    }

    /// Install a freshly authenticated session; returns its generation
    pub async fn replace(&self, session: Session) -> u64 {
        let mut slot = self.inner.write().await;
        slot.generation += 1;
        slot.session = Some(Arc::new(session));
        slot.invalidated = false;
        tracing::info!(generation = slot.generation, "Session refreshed");
        slot.generation
    }

    /// Mark the session invalid, but only if it is still the one read at `generation`.
    ///
    /// Returns `true` if this call invalidated it.
    pub async fn invalidate(&self, generation: u64) -> bool {
        let mut slot = self.inner.write().await;
        if slot.generation != generation || slot.session.is_none() || slot.invalidated {
            return false;
        }
        slot.invalidated = true;
        tracing::warn!(generation, "Session invalidated by platform response");
        true
    }

    pub async fn clear(&self) {
        let mut slot = self.inner.write().await;
        slot.generation += 1;
        slot.session = None;
        slot.invalidated = false;
    }
}
