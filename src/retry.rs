//! Bounded exponential backoff for transient failures.
//!
//! Shared by the platform client (moves, listings) and the classifier
//! (completion requests). Only errors for which the caller-supplied
//! predicate returns `true` are retried; everything else is surfaced
//! immediately.

use crate::cancel::CancelFlag;
use crate::error::{FavError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without sleeping (tests)
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): base * 2^(retry-1), capped
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error,
/// or the policy's retry budget is spent.
///
/// A `retry_after` hint on a rate-limit error overrides the computed delay
/// (still capped by `max_delay`).
pub async fn with_backoff<F, Fut, T, P>(
    operation_name: &str,
    policy: &RetryPolicy,
    should_retry: P,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&FavError) -> bool,
{
    retry_loop(operation_name, policy, None, should_retry, operation).await
}

/// `with_backoff` that gives up with `FavError::Cancelled` once `cancel` is
/// set. The flag is checked before every attempt; an attempt or a backoff
/// sleep in progress is dropped. A result that arrives before the flag is
/// noticed is still returned.
pub async fn with_backoff_until<F, Fut, T, P>(
    operation_name: &str,
    policy: &RetryPolicy,
    cancel: &CancelFlag,
    should_retry: P,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&FavError) -> bool,
{
    retry_loop(operation_name, policy, Some(cancel), should_retry, operation).await
}

async fn retry_loop<F, Fut, T, P>(
    operation_name: &str,
    policy: &RetryPolicy,
    cancel: Option<&CancelFlag>,
    should_retry: P,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&FavError) -> bool,
{
    let mut retries = 0;

    loop {
        let attempt = match cancel {
            Some(flag) if flag.is_cancelled() => {
                debug!(operation = operation_name, retries, "Cancelled before attempt");
                return Err(FavError::Cancelled);
            }
            Some(flag) => tokio::select! {
                biased;
                result = operation() => result,
                _ = flag.cancelled() => Err(FavError::Cancelled),
            },
            None => operation().await,
        };

        match attempt {
            Ok(value) => {
                if retries > 0 {
                    debug!(operation = operation_name, retries, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(FavError::Cancelled) => return Err(FavError::Cancelled),
            Err(err) if should_retry(&err) && retries < policy.max_retries => {
                retries += 1;
                let delay = match &err {
                    FavError::RateLimited {
                        retry_after: Some(hint),
                        ..
                    } => (*hint).min(policy.max_delay),
                    _ => policy.delay_for(retries),
                };
                warn!(
                    operation = operation_name,
                    attempt = retries,
                    max = policy.max_retries,
                    error = %err,
                    ?delay,
                    "Transient failure, backing off"
                );
                match cancel {
                    Some(flag) if flag.is_cancelled() => return Err(FavError::Cancelled),
                    Some(flag) if !delay.is_zero() => {
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = flag.cancelled() => return Err(FavError::Cancelled),
                        }
                    }
                    _ if !delay.is_zero() => tokio::time::sleep(delay).await,
                    _ => {}
                }
            }
            Err(err) => {
                if retries > 0 {
                    warn!(
                        operation = operation_name,
                        retries,
                        error = %err,
                        "Giving up"
                    );
                }
                return Err(err);
            }
        }
    }
}
