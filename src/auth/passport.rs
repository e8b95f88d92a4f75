//! Bilibili passport QR-login endpoints

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::SET_COOKIE;
use reqwest::Client;
use serde::Deserialize;

use super::{Challenge, PollStatus, QrLoginApi};
use crate::error::{FavError, Result};
use crate::platform::bili::{error_for_status, Envelope};
use crate::session::{parse_cookie_pairs, Session, CSRF_COOKIE, SESSION_COOKIE, USER_ID_COOKIE};

pub const PASSPORT_BASE: &str = "https://passport.bilibili.com";

const CODE_CONFIRMED: i64 = 0;
const CODE_EXPIRED: i64 = 86038;
const CODE_SCANNED: i64 = 86090;
const CODE_NOT_SCANNED: i64 = 86101;

#[derive(Debug, Deserialize)]
struct GenerateData {
    url: String,
    qrcode_key: String,
}

#[derive(Debug, Deserialize)]
struct PollData {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    /// Cross-domain redirect carrying the cookies as query parameters
    #[serde(default)]
    url: String,
}

pub struct PassportApi {
    http: Client,
    base_url: String,
}

impl PassportApi {
    pub fn new(http: Client) -> Self {
        Self::with_base_url(http, PASSPORT_BASE)
    }

    pub fn with_base_url(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl QrLoginApi for PassportApi {
    async fn issue_challenge(&self) -> Result<Challenge> {
        let response = self
            .http
            .get(format!("{}/x/passport-login/web/qrcode/generate", self.base_url))
            .query(&[("source", "main-fe-header"), ("go_url", "https://www.bilibili.com/")])
            .send()
            .await?;
        if let Some(err) = error_for_status(response.status(), None) {
            return Err(err);
        }

        let envelope: Envelope<GenerateData> = response.json().await?;
        let data = envelope
            .into_result()?
            .ok_or_else(|| FavError::parse("QR generate response has no data"))?;
        if data.qrcode_key.is_empty() || data.url.is_empty() {
            return Err(FavError::parse("QR generate response is missing key or url"));
        }

        Ok(Challenge {
            key: data.qrcode_key,
            url: data.url,
        })
    }

    async fn poll(&self, key: &str) -> Result<PollStatus> {
        let response = self
            .http
            .get(format!("{}/x/passport-login/web/qrcode/poll", self.base_url))
            .query(&[("qrcode_key", key), ("source", "main-fe-header")])
            .send()
            .await?;
        if let Some(err) = error_for_status(response.status(), None) {
            return Err(err);
        }

        let set_cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect();
        let envelope: Envelope<PollData> = response.json().await?;

        interpret_poll(envelope, &set_cookies)
    }
}

/// Turn a poll response into a `PollStatus`.
///
/// A non-zero outer code means the platform refused the challenge itself.
/// Unknown inner codes are treated as still pending.
fn interpret_poll(envelope: Envelope<PollData>, set_cookies: &[String]) -> Result<PollStatus> {
    if envelope.code != 0 {
        return Ok(PollStatus::Rejected(if envelope.message.is_empty() {
            format!("platform code {}", envelope.code)
        } else {
            envelope.message
        }));
    }
    let data = envelope
        .data
        .ok_or_else(|| FavError::parse("QR poll response has no data"))?;

    match data.code {
        CODE_CONFIRMED => {
            let session = Session::from_set_cookies(set_cookies.iter().map(String::as_str))
                .or_else(|| session_from_redirect(&data.url))
                .ok_or_else(|| FavError::parse("login confirmed but no credentials were returned"))?;
            Ok(PollStatus::Confirmed(session))
        }
        CODE_NOT_SCANNED => Ok(PollStatus::Pending),
        CODE_SCANNED => Ok(PollStatus::Scanned),
        CODE_EXPIRED => Ok(PollStatus::Expired),
        other => {
            tracing::debug!(code = other, message = %data.message, "Unknown QR poll code, still waiting");
            Ok(PollStatus::Pending)
        }
    }
}

/// Credentials from the redirect URL's query string (values kept URL-encoded, as cookies are)
fn session_from_redirect(url: &str) -> Option<Session> {
    let query = url.split_once('?')?.1;
    let joined = query.replace('&', "; ");
    let pairs = parse_cookie_pairs(&joined);

    let mut session = Session::new(
        pairs.get(SESSION_COOKIE)?.clone(),
        pairs.get(CSRF_COOKIE)?.clone(),
        pairs.get(USER_ID_COOKIE)?.clone(),
    );
    session.expires_at = pairs
        .get("Expires")
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));
    Some(session)
}
