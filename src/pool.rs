use anyhow::{Result, ensure};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Run `operation` over every item with at most `limit` in flight.
///
/// Results come back in the original input order, not completion order. The
/// first item error fails the whole call, but only after every in-flight
/// future has finished.
pub async fn process_with_concurrency<T, R, F, Fut>(
    items: Vec<T>,
    limit: usize,
    operation: F,
) -> Result<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    ensure!(limit > 0, "concurrency limit must be greater than 0");

    let semaphore = Arc::new(Semaphore::new(limit));
    let mut handles = Vec::with_capacity(items.len());

    for item in items {
        let permit = semaphore.clone().acquire_owned().await?;
        let future = operation(item);
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            future.await
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    let mut first_error = None;
    for handle in handles {
        match handle.await? {
            Ok(result) => results.push(result),
            Err(e) => {
                let _ = first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(results),
    }
}
