use std::future::Future;
use std::time::Duration;

use daytrader_core::{EngineError, Result};

/// Retries `op` on transient broker errors with exponential backoff
/// (0.5 s, 1 s, 2 s, 4 s). Permanent errors return immediately.
pub async fn with_backoff<T, F, Fut>(max_attempts: u32, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = Duration::from_millis(500);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, %err, "Transient broker error, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
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

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_backoff(4, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(EngineError::TransientBroker("503".to_string()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_fails_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff(4, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::PermanentBroker("rejected".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff(4, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::TransientBroker("timeout".to_string()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
