//! Bounded exponential backoff for transient remote failures.

use crate::error::{Result, SyncError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        RetryPolicy {
            max_retries,
            ..RetryPolicy::default()
        }
    }

    /// Delay before retry number `attempt` (0-based): exponential growth,
    /// capped, with up to 50% random jitter so stalled workers do not
    /// retry in lockstep against a rate limiter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_ceiling = (exp.as_millis() / 2) as u64;
        let jitter = if jitter_ceiling == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ceiling)
        };
        exp + Duration::from_millis(jitter)
    }
}

/// Run `op`, retrying transient failures within the policy's budget.
/// Cancellation during a backoff wait aborts with `Cancelled`; an in-flight
/// call is never interrupted.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    what,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    _ = sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };

        // Jitter adds at most 50% on top of the exponential component.
        assert!(policy.delay_for(0) >= Duration::from_millis(100));
        assert!(policy.delay_for(0) <= Duration::from_millis(150));
        assert!(policy.delay_for(3) >= Duration::from_millis(800));
        assert!(policy.delay_for(10) <= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result = with_retry(&fast_policy(3), &cancel, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(SyncError::TransientFetch("rate limited".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<()> = with_retry(&fast_policy(2), &cancel, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SyncError::TransientFetch("still down".into())) }
        })
        .await;

        assert!(matches!(result, Err(SyncError::TransientFetch(_))));
        // Initial attempt plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: Result<()> = with_retry(&fast_policy(3), &cancel, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SyncError::NotFound("gone".into())) }
        })
        .await;

        assert!(matches!(result, Err(SyncError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<()> = with_retry(&fast_policy(3), &cancel, "test", || async {
            Err(SyncError::TransientFetch("down".into()))
        })
        .await;

        assert!(matches!(result, Err(SyncError::Cancelled)));
    }
}
