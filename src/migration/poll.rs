//! Bounded polling
//!
//! Fixed-interval waits with a deadline and a cancellation token. A check
//! that errors is logged and tried again on the next tick; only the deadline
//! or the token ends the wait early.

use crate::config::PollPolicy;
use crate::error::{Error, Result};
use std::future::Future;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

/// Poll `check` until it returns `Ok(true)`
///
/// Returns [`Error::Timeout`] once `policy.timeout` has elapsed and
/// [`Error::Cancelled`] as soon as `cancel` fires.
pub async fn poll_until<F, Fut>(
    policy: &PollPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled {
                operation: operation.to_string(),
            });
        }

        attempt += 1;
        match check().await {
            Ok(true) => return Ok(()),
            Ok(false) => {
                trace!(operation = %operation, attempt = attempt, "Condition not met yet");
            }
            Err(e) => {
                warn!(
                    operation = %operation,
                    attempt = attempt,
                    transient = e.is_transient(),
                    error = %e,
                    "Check failed, retrying"
                );
            }
        }

        let waited = start.elapsed();
        if waited >= policy.timeout {
            return Err(Error::Timeout {
                operation: operation.to_string(),
                waited,
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled {
                    operation: operation.to_string(),
                });
            }
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn fast() -> PollPolicy {
        PollPolicy::new(Duration::from_millis(1), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_succeeds_after_some_checks() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let result = poll_until(&fast(), &CancellationToken::new(), "op", || {
            let c = c.clone();
            async move { Ok(c.fetch_add(1, Ordering::SeqCst) >= 2) }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_errors_are_retried() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let result = poll_until(&fast(), &CancellationToken::new(), "op", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::Cluster {
                        operation: "get".into(),
                        reason: "connection reset".into(),
                    })
                } else {
                    Ok(true)
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let policy = PollPolicy::new(Duration::from_secs(5), Duration::from_secs(30));
        let result = poll_until(&policy, &CancellationToken::new(), "bind", || async {
            Ok(false)
        })
        .await;

        assert_matches!(result, Err(Error::Timeout { ref operation, waited })
            if operation == "bind" && waited >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_cancelled() {
        let cancel = CancellationToken::new();
        let policy = PollPolicy::new(Duration::from_secs(60), Duration::from_secs(600));
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = poll_until(&policy, &cancel, "drain", || async { Ok(false) }).await;
        assert_matches!(result, Err(Error::Cancelled { .. }));
    }
}
