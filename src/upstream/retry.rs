use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

use crate::errors::FetchError;

/// Run a fetch up to `attempts` times with exponentially growing delays.
///
/// Used by the catalog and schedule refresh paths; the update poll loop
/// instead retries forever at its own fixed cadence and never calls this.
pub async fn retry_with_backoff<T, F, Fut>(
    attempts: u32,
    initial_delay: Duration,
    operation: &str,
    mut fetch: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let attempts = attempts.max(1);
    let mut delay = initial_delay;

    for attempt in 1..=attempts {
        match fetch().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(
                    operation,
                    attempt,
                    attempts,
                    transient = e.is_transient(),
                    error = %e,
                    "Fetch failed, backing off"
                );
                sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(e) => return Err(e),
        }
    }

    unreachable!("loop returns on the final attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(3, Duration::from_millis(10), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(FetchError::transient("http://u", "connection refused"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_bounded_attempts() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_with_backoff(3, Duration::from_millis(10), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::malformed("http://u", "too short")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let result = retry_with_backoff(0, Duration::from_millis(1), "test", || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
