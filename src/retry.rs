// src/retry.rs
//
// Bounded retry with classified early exit.
// Shared by initial serial acquisition and reconnection so both follow the
// same attempt budget and backoff.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// How many times to try and how long to wait between tries.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub attempts: u32,
    /// Delay after a retryable failure.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 6,
            delay: Duration::from_millis(1200),
        }
    }
}

/// Outcome of a single attempt.
pub enum Attempt<T, E> {
    /// Succeeded, stop retrying.
    Done(T),
    /// Failed, worth another try after the delay.
    Retry(E),
    /// Failed in a way retrying cannot fix.
    Abort(E),
}

/// Why the retry loop stopped without a value.
#[derive(Debug, PartialEq)]
pub enum RetryError<E> {
    /// Every attempt returned `Retry`; carries the last error.
    Exhausted { attempts: u32, last: E },
    /// An attempt returned `Abort`.
    Aborted(E),
    /// The cancellation token fired between attempts.
    Cancelled,
}

/// Run `op` up to `policy.attempts` times.
///
/// `op` receives the 1-based attempt number. No delay follows the final
/// attempt.
pub async fn retry_bounded<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(RetryError::Cancelled);
        }
        match op(attempt).await {
            Attempt::Done(value) => return Ok(value),
            Attempt::Abort(err) => return Err(RetryError::Aborted(err)),
            Attempt::Retry(err) => {
                if attempt >= attempts {
                    return Err(RetryError::Exhausted {
                        attempts,
                        last: err,
                    });
                }
                if !pause(policy.delay, cancel).await {
                    return Err(RetryError::Cancelled);
                }
                attempt += 1;
            }
        }
    }
}

/// Sleep for `delay`, waking early if `cancel` fires. Returns false when cancelled.
pub(crate) async fn pause(delay: Duration, cancel: Option<&CancellationToken>) -> bool {
    let Some(cancel) = cancel else {
        tokio::time::sleep(delay).await;
        return true;
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
