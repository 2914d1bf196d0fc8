use std::future::Future;

use futures::future::join_all;

/// Split rows into fixed-size batches, preserving input order across the
/// concatenation of the output.
pub fn chunk<T>(rows: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    assert!(batch_size > 0, "batch_size must be positive");
    let mut batches = Vec::with_capacity(rows.len().div_ceil(batch_size));
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        batches.push(rows.by_ref().take(batch_size).collect());
    }
    batches
}

/// Run batches through `f`, at most `max_concurrent` in flight. Batches in a
/// window start together and are awaited as a barrier before the next window
/// starts; a slow batch therefore stalls the window behind it. Completion
/// order across windows is not an ordering guarantee: callers must re-sort
/// the flattened output by the row index carried in each item.
pub async fn process_batches_parallel<T, R, F, Fut>(
    batches: Vec<Vec<T>>,
    f: F,
    max_concurrent: usize,
) -> Vec<R>
where
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = Vec<R>>,
{
    assert!(max_concurrent > 0, "max_concurrent must be positive");
    let mut results = Vec::new();
    let mut batches = batches.into_iter().peekable();
    while batches.peek().is_some() {
        let window: Vec<_> = batches.by_ref().take(max_concurrent).map(&f).collect();
        for batch_result in join_all(window).await {
            results.extend(batch_result);
        }
    }
    results
}
