//! QR-code login handshake
//!
//! Drives the scan-to-login flow as an explicit state machine:
//!
//! ```text
//! Idle -> ChallengeIssued -> Polling -> Confirmed
//!                                    -> Expired
//!                                    -> Rejected
//!                                    -> TimedOut
//! ```
//!
//! `LoginState::advance` is pure so every transition can be tested without
//! a network. Waiting goes through the `Clock` trait, which lets tests
//! replay long poll sequences instantly.

pub mod passport;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cancel::CancelFlag;
use crate::config::AuthConfig;
use crate::error::{FavError, Result};
use crate::session::{CredentialStore, Session, SessionStore};

/// A login challenge the user scans with the mobile app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Opaque key used to poll this challenge
    pub key: String,
    /// Payload to render as a QR code
    pub url: String,
}

/// Platform answer to a single poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// Not scanned yet
    Pending,
    /// Scanned, waiting for confirmation on the device
    Scanned,
    Confirmed(Session),
    Expired,
    Rejected(String),
}

/// Raw QR-login endpoints
#[async_trait]
pub trait QrLoginApi: Send + Sync {
    async fn issue_challenge(&self) -> Result<Challenge>;
    async fn poll(&self, key: &str) -> Result<PollStatus>;
}

/// Time source for polling
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time backed by the tokio timer
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoginState {
    Idle,
    ChallengeIssued(Challenge),
    Polling { challenge: Challenge, scanned: bool },
    Confirmed(Session),
    Expired,
    Rejected(String),
    TimedOut,
}

impl LoginState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Confirmed(_) | Self::Expired | Self::Rejected(_) | Self::TimedOut
        )
    }

    /// Record a freshly issued challenge. Only valid from `Idle`.
    pub fn issue(self, challenge: Challenge) -> Self {
        match self {
            Self::Idle => Self::ChallengeIssued(challenge),
            other => other,
        }
    }

    /// Apply one poll result. Terminal states and `Idle` ignore input.
    pub fn advance(self, status: PollStatus) -> Self {
        let challenge = match self {
            Self::ChallengeIssued(c) | Self::Polling { challenge: c, .. } => c,
            other => return other,
        };

        match status {
            PollStatus::Pending => Self::Polling {
                challenge,
                scanned: false,
            },
            PollStatus::Scanned => Self::Polling {
                challenge,
                scanned: true,
            },
            PollStatus::Confirmed(session) => Self::Confirmed(session),
            PollStatus::Expired => Self::Expired,
            PollStatus::Rejected(reason) => Self::Rejected(reason),
        }
    }

    /// Deadline passed without a terminal answer
    pub fn time_out(self) -> Self {
        if self.is_terminal() {
            self
        } else {
            Self::TimedOut
        }
    }
}

/// Anything that can produce a fresh platform session
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Obtain a new session and install it in `store`
    async fn authenticate(&self, store: &SessionStore) -> Result<Session>;
}

pub type LoginObserver = Arc<dyn Fn(&LoginState) + Send + Sync>;

/// Polling QR login against a `QrLoginApi`
pub struct QrLogin {
    api: Arc<dyn QrLoginApi>,
    credentials: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    config: AuthConfig,
    observer: Option<LoginObserver>,
    cancel: CancelFlag,
}

impl QrLogin {
    pub fn new(
        api: Arc<dyn QrLoginApi>,
        credentials: Arc<dyn CredentialStore>,
        config: AuthConfig,
    ) -> Self {
        Self {
            api,
            credentials,
            clock: Arc::new(TokioClock),
            config,
            observer: None,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Called on every state change; the CLI uses it to show the QR payload
    pub fn with_observer(mut self, observer: LoginObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Stop polling with `FavError::Cancelled` once `cancel` is set
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    fn notify(&self, state: &LoginState) {
        if let Some(observer) = &self.observer {
            observer(state);
        }
    }

    /// Run the full handshake. On success the session is in `store` and persisted.
    pub async fn login(&self, store: &SessionStore) -> Result<Session> {
        let challenge = self.api.issue_challenge().await?;
        tracing::info!("QR login challenge issued");

        let mut state = LoginState::Idle.issue(challenge.clone());
        self.notify(&state);

        let deadline = self.clock.now() + self.config.timeout;

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("QR login cancelled");
                return Err(FavError::Cancelled);
            }
            if self.clock.now() >= deadline {
                state = state.time_out();
                self.notify(&state);
                tracing::warn!(timeout = ?self.config.timeout, "QR login timed out");
                return Err(FavError::LoginTimedOut(self.config.timeout));
            }

            match self.api.poll(&challenge.key).await {
                Ok(status) => {
                    let next = state.clone().advance(status);
                    if next != state {
                        self.notify(&next);
                    }
                    state = next;
                }
                Err(e) if e.is_transient() || matches!(e, FavError::Parse { .. }) => {
                    tracing::warn!(error = %e, "Login poll failed, will retry");
                }
                Err(e) => return Err(e),
            }

            match &state {
                LoginState::Confirmed(session) => {
                    store.replace(session.clone()).await;
                    if let Err(e) = self.credentials.save(session) {
                        tracing::warn!(error = %e, "Logged in but could not persist session");
                    }
                    tracing::info!(user_id = %session.user_id, "QR login confirmed");
                    return Ok(session.clone());
                }
                LoginState::Expired => return Err(FavError::ChallengeExpired),
                LoginState::Rejected(reason) => {
                    return Err(FavError::ChallengeRejected {
                        reason: reason.clone(),
                    })
                }
                _ => {}
            }

            let remaining = deadline.saturating_duration_since(self.clock.now());
            if !remaining.is_zero() {
                tokio::select! {
                    _ = self.clock.sleep(self.config.poll_interval.min(remaining)) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
        }
    }
}

#[async_trait]
impl Authenticator for QrLogin {
    async fn authenticate(&self, store: &SessionStore) -> Result<Session> {
        self.login(store).await
    }
}
