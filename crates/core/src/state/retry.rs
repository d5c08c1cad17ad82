//! # Storage Retry Layer
//!
//! Wraps persistence calls with bounded exponential backoff plus jitter.
//! Only transient engine errors (SQLite busy/locked) are retried; logic
//! errors and constraint violations surface on the first attempt.
//!
//! Callers pick the failure policy: read paths usually degrade to defaults
//! after exhaustion, write paths that later steps depend on propagate.

use std::time::Duration;

use thiserror::Error;

/// How a storage operation ultimately failed
#[derive(Debug, Error)]
pub enum StoreError {
    /// A transient failure that survived every retry attempt
    #[error("storage still unavailable after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
    /// Not retryable; surfaced on the first occurrence
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

/// Backoff schedule for transient storage failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry; doubles each attempt
    pub base_delay: Duration,
    /// Upper bound of the random jitter added to every delay
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the given zero-based failed attempt:
    /// `base * 2^attempt` plus jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt) + self.jitter()
    }

    fn jitter(&self) -> Duration {
        let bound = self.max_jitter.as_millis() as u64;
        if bound == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand_u64() % (bound + 1))
    }
}

/// Retry `op` under the default policy
pub async fn with_retry<T, F>(op: F) -> Result<T, StoreError>
where
    F: FnMut() -> anyhow::Result<T>,
{
    with_retry_policy(RetryPolicy::default(), op).await
}

/// Retry `op` under an explicit policy. The operation is synchronous (the
/// managers are plain rusqlite calls); only the backoff sleeps are async.
pub async fn with_retry_policy<T, F>(policy: RetryPolicy, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> anyhow::Result<T>,
{
    let mut attempt: u32 = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(StoreError::Exhausted {
                        attempts: attempt,
                        source: err,
                    });
                }
                let delay = policy.delay_for(attempt - 1);
                tracing::warn!(
                    "Transient storage error on attempt {}, retrying in {:?}: {:#}",
                    attempt,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(StoreError::Fatal(err)),
        }
    }
}

/// Whether the error chain bottoms out in a retryable SQLite condition.
/// Busy and locked are the embedded-engine analogues of a dropped
/// connection or an exhausted pool; everything else is treated as fatal.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<rusqlite::Error>()
            .map(|e| {
                matches!(
                    e.sqlite_error_code(),
                    Some(rusqlite::ErrorCode::DatabaseBusy)
                        | Some(rusqlite::ErrorCode::DatabaseLocked)
                )
            })
            .unwrap_or(false)
    })
}

/// Simple random number (not cryptographic)
fn rand_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish()
}
