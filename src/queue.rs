//! Bounded-concurrency batch execution with per-item failure isolation.
//!
//! [`batch_process`] drives an arbitrary unit of work over a sequence of
//! items: up to `concurrency` workers run at once, each optionally
//! gated by a shared [`RateLimiter`], and a failing item produces one
//! [`BatchError`] without cancelling sibling work or the batch as a
//! whole. Successes are returned in the original input order regardless
//! of completion order; completions are buffered by input index, never
//! appended as they finish.
//!
//! [`batch_process_grouped`] adds super-batching for providers that
//! expose a true multi-item call: items are grouped into sequential
//! batches, each group is attempted through the batch worker first, and
//! a failed group falls back to per-item execution so one bad item does
//! not lose the whole group.
//!
//! Progress is reported after each completed item (success or failure)
//! as a consistent [`BatchProgress`] snapshot, delivered in completion
//! order. Cancellation stops dispatch of new work; in-flight items
//! finish and everything collected so far is returned.

use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};
use crate::rate_limit::RateLimiter;

/// Callback invoked with a progress snapshot after each completed item.
///
/// Called while the progress counters are locked, so it must be cheap
/// and must not call back into the queue.
pub type ProgressFn = Arc<dyn Fn(&BatchProgress) + Send + Sync>;

/// Counters describing a batch in flight.
///
/// `completed`, `total`, and `failed` are monotonic; `in_flight` rises
/// and falls as workers start and finish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub completed: usize,
    pub total: usize,
    pub failed: usize,
    pub in_flight: usize,
}

/// One failed unit of work: collected, never thrown mid-batch.
#[derive(Debug)]
pub struct BatchError<T> {
    /// Position of the failed item in the input sequence.
    pub item_index: usize,
    /// The input that failed, echoed back for the caller.
    pub input: T,
    pub error: Error,
}

/// Outcome of a batch run, distinguishing partial success from total
/// failure.
#[derive(Debug)]
pub struct BatchProcessResult<T, R> {
    /// Successful outputs, in the original input order.
    pub results: Vec<R>,
    /// One entry per failed item, ordered by `item_index`.
    pub errors: Vec<BatchError<T>>,
    /// Final progress snapshot.
    pub progress: BatchProgress,
}

/// Options controlling batch execution.
#[derive(Clone)]
pub struct BatchOptions {
    /// Maximum number of concurrently executing workers. Zero is a
    /// configuration error.
    pub concurrency: usize,
    /// Group size for [`batch_process_grouped`]. `Some(0)` is a
    /// configuration error; `None` means one group per call.
    pub batch_size: Option<usize>,
    /// Shared limiter; when set, every provider call first acquires a
    /// token.
    pub rate_limiter: Option<Arc<RateLimiter>>,
    /// Progress callback.
    pub on_progress: Option<ProgressFn>,
    /// Cooperative cancellation: no new work is dispatched after the
    /// token is cancelled; in-flight work finishes.
    pub cancel: Option<CancellationToken>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_size: None,
            rate_limiter: None,
            on_progress: None,
            cancel: None,
        }
    }
}

impl std::fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("concurrency", &self.concurrency)
            .field("batch_size", &self.batch_size)
            .field("rate_limiter", &self.rate_limiter.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

impl BatchOptions {
    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be > 0".to_string()));
        }
        if self.batch_size == Some(0) {
            return Err(Error::Config("batch_size must be > 0".to_string()));
        }
        Ok(())
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.is_cancelled())
    }
}

/// Serialized progress counters plus the user callback.
struct ProgressTracker {
    inner: Mutex<BatchProgress>,
    on_progress: Option<ProgressFn>,
}

impl ProgressTracker {
    fn new(total: usize, on_progress: Option<ProgressFn>) -> Self {
        Self {
            inner: Mutex::new(BatchProgress {
                total,
                ..BatchProgress::default()
            }),
            on_progress,
        }
    }

    fn started(&self) {
        self.inner.lock().unwrap().in_flight += 1;
    }

    /// Undo `started` for items whose batch call failed and will be
    /// re-dispatched individually.
    fn rollback(&self, n: usize) {
        self.inner.lock().unwrap().in_flight -= n;
    }

    fn completed(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.in_flight -= 1;
        guard.completed += 1;
        if let Some(cb) = &self.on_progress {
            cb(&guard);
        }
    }

    fn failed(&self) {
        let mut guard = self.inner.lock().unwrap();
        guard.in_flight -= 1;
        guard.failed += 1;
        if let Some(cb) = &self.on_progress {
            cb(&guard);
        }
    }

    fn snapshot(&self) -> BatchProgress {
        self.inner.lock().unwrap().clone()
    }
}

/// Shared buffers completions are written into, indexed by input
/// position.
struct CompletionBuffers<T, R> {
    results: Mutex<Vec<Option<R>>>,
    errors: Mutex<Vec<BatchError<T>>>,
}

/// Run `worker` over `items` with bounded concurrency.
///
/// See the module docs for the ordering, isolation, progress, and
/// cancellation contracts.
///
/// # Errors
///
/// Only configuration errors are returned as `Err`; per-item failures
/// are collected in [`BatchProcessResult::errors`].
pub async fn batch_process<T, R, F, Fut>(
    items: Vec<T>,
    worker: F,
    options: &BatchOptions,
) -> Result<BatchProcessResult<T, R>>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    options.validate()?;

    let total = items.len();
    let tracker = Arc::new(ProgressTracker::new(total, options.on_progress.clone()));
    let buffers = Arc::new(CompletionBuffers {
        results: Mutex::new((0..total).map(|_| None).collect()),
        errors: Mutex::new(Vec::new()),
    });

    let indexed: Vec<(usize, T)> = items.into_iter().enumerate().collect();
    run_individual(indexed, worker, options, tracker.clone(), buffers.clone()).await;

    Ok(assemble(tracker, buffers))
}

/// Run items in sequential groups, preferring a multi-item batch call.
///
/// Groups of `batch_size` items (all items when `batch_size` is `None`)
/// are fully drained one after another. Each group of more than one item
/// is first attempted through `batch_worker` (one rate-limiter token,
/// one provider call); if that call fails, every item in the group is
/// retried individually through `item_worker` under the configured
/// concurrency. Single-item groups go straight to `item_worker`.
pub async fn batch_process_grouped<T, R, FB, FutB, F, Fut>(
    items: Vec<T>,
    batch_worker: FB,
    item_worker: F,
    options: &BatchOptions,
) -> Result<BatchProcessResult<T, R>>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    FB: Fn(Vec<T>) -> FutB,
    FutB: Future<Output = Result<Vec<R>>>,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    options.validate()?;

    let total = items.len();
    let group_size = options.batch_size.unwrap_or(total.max(1));
    let tracker = Arc::new(ProgressTracker::new(total, options.on_progress.clone()));
    let buffers = Arc::new(CompletionBuffers {
        results: Mutex::new((0..total).map(|_| None).collect()),
        errors: Mutex::new(Vec::new()),
    });

    let indexed: Vec<(usize, T)> = items.into_iter().enumerate().collect();

    for group in indexed.chunks(group_size) {
        if options.cancelled() {
            break;
        }

        if group.len() == 1 {
            run_individual(
                group.to_vec(),
                item_worker.clone(),
                options,
                tracker.clone(),
                buffers.clone(),
            )
            .await;
            continue;
        }

        if let Some(limiter) = &options.rate_limiter {
            limiter.acquire().await;
        }
        for _ in group {
            tracker.started();
        }

        let inputs: Vec<T> = group.iter().map(|(_, item)| item.clone()).collect();
        match batch_worker(inputs).await {
            Ok(outputs) if outputs.len() == group.len() => {
                let mut results = buffers.results.lock().unwrap();
                for ((idx, _), output) in group.iter().zip(outputs) {
                    results[*idx] = Some(output);
                }
                drop(results);
                for _ in group {
                    tracker.completed();
                }
            }
            Ok(outputs) => {
                warn!(
                    expected = group.len(),
                    got = outputs.len(),
                    "batch call returned wrong arity, retrying items individually"
                );
                tracker.rollback(group.len());
                run_individual(
                    group.to_vec(),
                    item_worker.clone(),
                    options,
                    tracker.clone(),
                    buffers.clone(),
                )
                .await;
            }
            Err(err) => {
                warn!(error = %err, "batch call failed, retrying items individually");
                tracker.rollback(group.len());
                run_individual(
                    group.to_vec(),
                    item_worker.clone(),
                    options,
                    tracker.clone(),
                    buffers.clone(),
                )
                .await;
            }
        }
    }

    Ok(assemble(tracker, buffers))
}

/// Dispatch indexed items to `worker` behind a semaphore of
/// `options.concurrency` permits and drain every spawned task.
async fn run_individual<T, R, F, Fut>(
    indexed: Vec<(usize, T)>,
    worker: F,
    options: &BatchOptions,
    tracker: Arc<ProgressTracker>,
    buffers: Arc<CompletionBuffers<T, R>>,
) where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(options.concurrency));
    let mut tasks: JoinSet<()> = JoinSet::new();

    for (idx, item) in indexed {
        if options.cancelled() {
            break;
        }

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed");
        tracker.started();

        let worker = worker.clone();
        let limiter = options.rate_limiter.clone();
        let tracker = tracker.clone();
        let buffers = buffers.clone();

        tasks.spawn(async move {
            if let Some(limiter) = &limiter {
                limiter.acquire().await;
            }
            match worker(item.clone()).await {
                Ok(output) => {
                    buffers.results.lock().unwrap()[idx] = Some(output);
                    tracker.completed();
                }
                Err(error) => {
                    buffers.errors.lock().unwrap().push(BatchError {
                        item_index: idx,
                        input: item,
                        error,
                    });
                    tracker.failed();
                }
            }
            drop(permit);
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            warn!(error = %err, "batch worker task aborted");
        }
    }
}

fn assemble<T, R>(
    tracker: Arc<ProgressTracker>,
    buffers: Arc<CompletionBuffers<T, R>>,
) -> BatchProcessResult<T, R> {
    let buffers = Arc::into_inner(buffers).expect("all workers have finished");
    let results = buffers
        .results
        .into_inner()
        .unwrap()
        .into_iter()
        .flatten()
        .collect();
    let mut errors: Vec<BatchError<T>> = buffers.errors.into_inner().unwrap();
    errors.sort_by_key(|e| e.item_index);

    BatchProcessResult {
        results,
        errors,
        progress: tracker.snapshot(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, Duration};

    fn options(concurrency: usize) -> BatchOptions {
        BatchOptions {
            concurrency,
            ..BatchOptions::default()
        }
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_config_error() {
        let result =
            batch_process(vec![1], |n: i32| async move { Ok(n) }, &options(0)).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_results_preserve_input_order() {
        // Earlier items sleep longer, so completion order is reversed.
        let items = vec![4u64, 3, 2, 1];
        let result = batch_process(
            items,
            |n: u64| async move {
                sleep(Duration::from_millis(n * 10)).await;
                Ok(n * 100)
            },
            &options(4),
        )
        .await
        .unwrap();

        assert_eq!(result.results, vec![400, 300, 200, 100]);
        assert!(result.errors.is_empty());
        assert_eq!(result.progress.completed, 4);
        assert_eq!(result.progress.in_flight, 0);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_ordered() {
        let items = vec!["a", "b", "c", "d"];
        let result = batch_process(
            items,
            |s: &'static str| async move {
                match s {
                    "b" | "d" => Err(Error::Provider(format!("boom {s}"))),
                    other => Ok(other.to_uppercase()),
                }
            },
            &options(2),
        )
        .await
        .unwrap();

        assert_eq!(result.results, vec!["A".to_string(), "C".to_string()]);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].item_index, 1);
        assert_eq!(result.errors[0].input, "b");
        assert_eq!(result.errors[1].item_index, 3);
        assert_eq!(result.errors[1].input, "d");
        assert_eq!(result.progress.completed, 2);
        assert_eq!(result.progress.failed, 2);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let c = current.clone();
        let p = peak.clone();
        let result = batch_process(
            (0..20).collect::<Vec<u32>>(),
            move |_n: u32| {
                let current = c.clone();
                let peak = p.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(5)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            &options(3),
        )
        .await
        .unwrap();

        assert_eq!(result.progress.completed, 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_progress_reported_per_item() {
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let sink = snapshots.clone();
        let mut opts = options(2);
        opts.on_progress = Some(Arc::new(move |p: &BatchProgress| {
            sink.lock().unwrap().push(p.clone());
        }));

        batch_process(
            vec![1u32, 2, 3],
            |n: u32| async move {
                if n == 2 {
                    Err(Error::Provider("nope".to_string()))
                } else {
                    Ok(n)
                }
            },
            &opts,
        )
        .await
        .unwrap();

        let snapshots = snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 3);
        let last = snapshots.last().unwrap();
        assert_eq!(last.completed + last.failed, 3);
        assert_eq!(last.failed, 1);
        assert_eq!(last.total, 3);
    }

    #[tokio::test]
    async fn test_cancellation_stops_dispatch() {
        let cancel = CancellationToken::new();
        let mut opts = options(1);
        opts.cancel = Some(cancel.clone());

        let processed = Arc::new(AtomicUsize::new(0));
        let seen = processed.clone();
        let token = cancel.clone();
        let result = batch_process(
            (0..10).collect::<Vec<u32>>(),
            move |n: u32| {
                let seen = seen.clone();
                let token = token.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    if n == 2 {
                        token.cancel();
                    }
                    Ok(n)
                }
            },
            &opts,
        )
        .await
        .unwrap();

        // Item 2 cancels; with concurrency 1 at most one extra item was
        // already dispatched before the flag was observed.
        assert!(result.results.len() < 10);
        assert!(processed.load(Ordering::SeqCst) < 10);
        assert_eq!(result.progress.total, 10);
    }

    #[tokio::test]
    async fn test_grouped_prefers_batch_call() {
        let batch_calls = Arc::new(AtomicUsize::new(0));
        let item_calls = Arc::new(AtomicUsize::new(0));

        let mut opts = options(2);
        opts.batch_size = Some(3);

        let bc = batch_calls.clone();
        let ic = item_calls.clone();
        let result = batch_process_grouped(
            (0..7).collect::<Vec<u32>>(),
            |group: Vec<u32>| {
                let bc = bc.clone();
                async move {
                    bc.fetch_add(1, Ordering::SeqCst);
                    Ok(group.iter().map(|n| n * 10).collect())
                }
            },
            move |n: u32| {
                let ic = ic.clone();
                async move {
                    ic.fetch_add(1, Ordering::SeqCst);
                    Ok(n * 10)
                }
            },
            &opts,
        )
        .await
        .unwrap();

        assert_eq!(result.results, (0..7).map(|n| n * 10).collect::<Vec<_>>());
        // Groups [0,1,2] and [3,4,5] go through the batch call; the
        // trailing singleton [6] uses the per-item path.
        assert_eq!(batch_calls.load(Ordering::SeqCst), 2);
        assert_eq!(item_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_grouped_batch_failure_falls_back_per_item() {
        let mut opts = options(2);
        opts.batch_size = Some(4);

        let result = batch_process_grouped(
            vec!["ok1", "bad", "ok2", "ok3"],
            |_group: Vec<&'static str>| async move {
                Err::<Vec<String>, _>(Error::Provider("batch rejected".to_string()))
            },
            |s: &'static str| async move {
                if s == "bad" {
                    Err(Error::Provider("still bad".to_string()))
                } else {
                    Ok(s.to_uppercase())
                }
            },
            &opts,
        )
        .await
        .unwrap();

        // One poisoned item costs one error, not the whole group.
        assert_eq!(result.results, vec!["OK1".to_string(), "OK2".to_string(), "OK3".to_string()]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].input, "bad");
        assert_eq!(result.progress.completed, 3);
        assert_eq!(result.progress.failed, 1);
        assert_eq!(result.progress.in_flight, 0);
    }
}
