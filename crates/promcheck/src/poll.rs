//! Bounded polling with a fixed interval and a fixed deadline.
//!
//! There are no per-call deadlines; a check is retried until it settles or
//! the deadline passes, and the last observed state becomes the result.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::{PromCheckError, Result};

/// Outcome of one polling attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// Condition satisfied
    Done(T),
    /// Not yet; carries a description of what was observed
    Retry(String),
}

/// Run `check` immediately, then every `interval`, until it returns
/// [`Attempt::Done`] or `timeout` elapses.
///
/// Errors from `check` abort the loop. On timeout the description of the
/// last attempt is carried in [`PromCheckError::Timeout`].
pub async fn poll_immediate<T, F, Fut>(
    interval: Duration,
    timeout: Duration,
    what: &str,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Attempt<T>>>,
{
    let deadline = Instant::now() + timeout;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match check().await? {
            Attempt::Done(value) => return Ok(value),
            Attempt::Retry(observed) => {
                if Instant::now() + interval > deadline {
                    return Err(PromCheckError::Timeout {
                        what: format!("{what}: {observed}"),
                        secs: timeout.as_secs(),
                    });
                }
                debug!("{what} not satisfied (attempt {attempt}): {observed}. Retrying in {interval:?}...");
                tokio::time::sleep(interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_done_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let value = poll_immediate(Duration::from_secs(10), Duration::from_secs(120), "thing", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                Ok(if n >= 3 {
                    Attempt::Done(n)
                } else {
                    Attempt::Retry(format!("attempt {n}"))
                })
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_last_state() {
        let calls = AtomicU32::new(0);
        let err = poll_immediate::<(), _, _>(
            Duration::from_secs(10),
            Duration::from_secs(30),
            "targets",
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Ok(Attempt::Retry(format!("missing {n}"))) }
            },
        )
        .await
        .unwrap_err();

        // attempts at t=0,10,20,30
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            PromCheckError::Timeout { what, secs } => {
                assert_eq!(what, "targets: missing 4");
                assert_eq!(secs, 30);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_abort_immediately() {
        let calls = AtomicU32::new(0);
        let err = poll_immediate::<(), _, _>(Duration::from_secs(1), Duration::from_secs(60), "x", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PromCheckError::Config("boom".into())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PromCheckError::Config(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
