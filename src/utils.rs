use std::fmt::Display;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use tokio::fs;
use tokio::time::sleep;

use crate::error::Result;

/// Asynchronously ensures that a directory exists, creating it if it does not.
/// This function is idempotent.
pub async fn ensure_directory_exists<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if !path.exists() {
        fs::create_dir_all(path).await?;
        debug!("Created directory at {:?}", path);
    }
    Ok(())
}

/// Runs `op` up to `attempts` times, sleeping `delay` between failures.
/// Returns the first success or the last error.
pub async fn retry_with_delay<T, E, F, Fut>(attempts: u32, delay: Duration, mut op: F) -> std::result::Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut last_err = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!("Attempt {}/{} failed: {}", attempt, attempts, err);
                last_err = Some(err);
                if attempt < attempts {
                    sleep(delay).await;
                }
            }
        }
    }
    // attempts >= 1, so at least one error was recorded
    Err(last_err.expect("retry_with_delay called with zero attempts"))
}

/// Polls `cond` up to `attempts` times with `delay` spacing. Returns true as
/// soon as the condition holds, false if the budget runs out.
pub async fn settle<F, Fut>(attempts: u32, delay: Duration, mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for attempt in 0..attempts {
        if cond().await {
            return true;
        }
        if attempt + 1 < attempts {
            sleep(delay).await;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_returns_first_success() {
        let calls = AtomicU32::new(0);
        let result: std::result::Result<u32, String> =
            retry_with_delay(5, Duration::from_millis(1), || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(format!("fail {}", n))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_surfaces_last_error() {
        let result: std::result::Result<(), String> =
            retry_with_delay(2, Duration::from_millis(1), || async {
                Err("nope".to_string())
            })
            .await;
        assert_eq!(result.unwrap_err(), "nope");
    }

    #[tokio::test]
    async fn settle_times_out() {
        assert!(!settle(3, Duration::from_millis(1), || async { false }).await);
        assert!(settle(3, Duration::from_millis(1), || async { true }).await);
    }
}
