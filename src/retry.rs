use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Retry a fallible async operation with a fixed delay between attempts.
///
/// `retries` is the number of re-attempts after the first try, so the
/// operation runs at most `retries + 1` times. The last error is returned
/// once the attempts are exhausted.
pub async fn retry_with_delay<T, F, Fut>(
    mut operation: F,
    retries: usize,
    delay: Duration,
    what: &str,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt > retries {
                    warn!("{what} failed after {attempt} attempt(s): {e:#}");
                    return Err(e);
                }
                warn!("{what} failed (attempt {attempt}/{retries}), retrying in {delay:?}: {e:#}");
                sleep(delay).await;
            }
        }
    }
}
