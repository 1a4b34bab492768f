//! Bounded startup retry.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::error::DaemonError;
use crate::paths::{MAX_RETRY, RETRY_DELAY};

/// How many times to try and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_RETRY, RETRY_DELAY)
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` tries have failed.
///
/// Sleeps `policy.delay` between attempts, never after the last one.
pub async fn with_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, DaemonError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        tracing::info!(target_name = label, attempt, "connecting");
        match op().await {
            Ok(value) => {
                tracing::info!(target_name = label, attempt, "connected");
                return Ok(value);
            }
            Err(err) if attempt < attempts => {
                tracing::warn!(
                    target_name = label,
                    attempt,
                    max_attempts = attempts,
                    error = %err,
                    "connection attempt failed; retrying in {:?}",
                    policy.delay,
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::error!(
                    target_name = label,
                    attempts,
                    error = %err,
                    "giving up after final connection attempt",
                );
                return Err(DaemonError::ConnectFailed {
                    label: label.to_owned(),
                    attempts,
                    last_error: err.to_string(),
                });
            }
        }
    }
}
