use crate::error::ScanError;
use std::collections::VecDeque;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, info_span, warn, Instrument, Span};

pub const DEFAULT_MAX_CONCURRENT_WORKERS: usize = 50;

/// Counters describing one completed [`WorkerPool::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Workers started: `min(concurrency, items)`.
    pub workers: usize,
    /// Items whose result was delivered.
    pub processed: usize,
    /// Items whose work errored or panicked and were reported as `false`.
    pub failed: usize,
}

/// One-shot, bounded-concurrency fan-out over a fixed set of items.
///
/// Each worker claims one pending item at a time from a shared queue, runs
/// the work function on it and hands the outcome to the result callback.
/// Workers exit once the queue is empty; `run` returns after every worker
/// has finished.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: usize,
    span: Span,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Result<Self, ScanError> {
        Self::with_span(concurrency, info_span!("worker_pool"))
    }

    pub fn with_span(concurrency: usize, span: Span) -> Result<Self, ScanError> {
        if concurrency == 0 {
            return Err(ScanError::InvalidInput(
                "concurrency must be at least 1".into(),
            ));
        }
        Ok(Self { concurrency, span })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Process every item exactly once.
    ///
    /// A work future that returns `Err` or panics is reported to `on_result`
    /// as `false`; the error is logged and never returned. `on_result` is
    /// called from whichever worker finished the item, so it must be safe to
    /// call concurrently.
    pub async fn run<I, W, Fut, E, R>(&self, items: Vec<I>, work: W, on_result: R) -> PoolStats
    where
        I: Clone + Debug + Send + 'static,
        W: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, E>> + Send + 'static,
        E: Display + Send + 'static,
        R: Fn(I, bool) + Send + Sync + 'static,
    {
        let workers = self.concurrency.min(items.len());
        if workers == 0 {
            debug!(parent: &self.span, "no items, nothing to do");
            return PoolStats::default();
        }
        debug!(parent: &self.span, items = items.len(), workers, "starting workers");

        let queue = Arc::new(Mutex::new(VecDeque::from(items)));
        let work = Arc::new(work);
        let on_result = Arc::new(on_result);
        let processed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        let mut set = JoinSet::new();
        for id in 0..workers {
            let queue = queue.clone();
            let work = work.clone();
            let on_result = on_result.clone();
            let processed = processed.clone();
            let failed = failed.clone();

            set.spawn(
                async move {
                    while let Some(item) = claim(&queue) {
                        let ok = run_one(work.clone(), item.clone(), &failed).await;
                        on_result(item, ok);
                        processed.fetch_add(1, Ordering::Relaxed);
                    }
                    debug!("queue drained, worker stopping");
                }
                .instrument(info_span!(parent: &self.span, "worker", id)),
            );
        }

        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                warn!(parent: &self.span, error = %e, "worker ended abnormally");
            }
        }

        PoolStats {
            workers,
            processed: processed.load(Ordering::Relaxed),
            failed: failed.load(Ordering::Relaxed),
        }
    }
}

/// Pop the next pending item. The lock is never held across an await.
fn claim<I>(queue: &Mutex<VecDeque<I>>) -> Option<I> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
}

/// Run the work for one item in its own task so a panic is contained,
/// whether it comes from calling `work` or from polling its future.
async fn run_one<I, W, Fut, E>(work: Arc<W>, item: I, failed: &AtomicUsize) -> bool
where
    I: Debug + Send + 'static,
    W: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let label = format!("{item:?}");
    let mut task = JoinSet::new();
    task.spawn(async move { work(item).await }.in_current_span());
    match task.join_next().await {
        Some(Ok(Ok(result))) => result,
        Some(Ok(Err(e))) => {
            failed.fetch_add(1, Ordering::Relaxed);
            debug!(item = %label, error = %e, "task failed");
            false
        }
        Some(Err(e)) => {
            failed.fetch_add(1, Ordering::Relaxed);
            debug!(item = %label, error = %e, "task panicked");
            false
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    type Calls = Arc<Mutex<Vec<(String, bool)>>>;

    fn recorder() -> (Calls, impl Fn(String, bool) + Send + Sync + 'static) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        (calls, move |item, ok| sink.lock().unwrap().push((item, ok)))
    }

    fn items(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("item{i}")).collect()
    }

    #[test]
    fn zero_concurrency_is_invalid() {
        assert!(matches!(WorkerPool::new(0), Err(ScanError::InvalidInput(_))));
        assert_eq!(WorkerPool::new(3).unwrap().concurrency(), 3);
    }

    #[tokio::test]
    async fn no_items_starts_no_workers() {
        let (calls, on_result) = recorder();
        let work_calls = Arc::new(AtomicUsize::new(0));
        let wc = work_calls.clone();
        let stats = WorkerPool::new(3)
            .unwrap()
            .run(
                Vec::<String>::new(),
                move |_item| {
                    wc.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, String>(true) }
                },
                on_result,
            )
            .await;
        assert_eq!(stats, PoolStats::default());
        assert_eq!(work_calls.load(Ordering::SeqCst), 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn every_item_processed_exactly_once() {
        for (n, concurrency) in [(1, 3), (3, 3), (25, 4), (7, 50)] {
            let (calls, on_result) = recorder();
            let seen = Arc::new(Mutex::new(HashMap::<String, usize>::new()));
            let s = seen.clone();
            let stats = WorkerPool::new(concurrency)
                .unwrap()
                .run(
                    items(n),
                    move |item: String| {
                        *s.lock().unwrap().entry(item).or_default() += 1;
                        async { Ok::<_, String>(true) }
                    },
                    on_result,
                )
                .await;

            assert_eq!(stats.workers, concurrency.min(n));
            assert_eq!(stats.processed, n);
            assert_eq!(stats.failed, 0);
            let seen = seen.lock().unwrap();
            assert_eq!(seen.len(), n);
            assert!(seen.values().all(|&c| c == 1));
            let calls = calls.lock().unwrap();
            assert_eq!(calls.len(), n);
            for item in items(n) {
                assert!(calls.contains(&(item, true)));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_work_never_exceeds_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (calls, on_result) = recorder();
        let (f, p) = (in_flight.clone(), peak.clone());
        WorkerPool::new(3)
            .unwrap()
            .run(
                items(10),
                move |_item| {
                    let (f, p) = (f.clone(), p.clone());
                    async move {
                        let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                        p.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        f.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, String>(false)
                    }
                },
                on_result,
            )
            .await;
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
        assert_eq!(calls.lock().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn errors_and_panics_become_false() {
        let (calls, on_result) = recorder();
        let stats = WorkerPool::new(2)
            .unwrap()
            .run(
                vec!["ok".to_string(), "err".to_string(), "boom".to_string()],
                |item: String| async move {
                    match item.as_str() {
                        "ok" => Ok(true),
                        "err" => Err("Test exception".to_string()),
                        _ => panic!("worker blew up"),
                    }
                },
                on_result,
            )
            .await;

        assert_eq!(stats.processed, 3);
        assert_eq!(stats.failed, 2);
        let mut calls = calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                ("boom".to_string(), false),
                ("err".to_string(), false),
                ("ok".to_string(), true),
            ]
        );
    }

    #[tokio::test]
    async fn work_that_panics_before_returning_a_future_loses_nothing() {
        let (calls, on_result) = recorder();
        let stats = WorkerPool::new(1)
            .unwrap()
            .run(
                items(4),
                |item: String| {
                    if item == "item1" {
                        panic!("work blew up before its future existed");
                    }
                    async { Ok::<_, String>(true) }
                },
                on_result,
            )
            .await;

        assert_eq!(stats.workers, 1);
        assert_eq!(stats.processed, 4);
        assert_eq!(stats.failed, 1);
        let mut calls = calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                ("item0".to_string(), true),
                ("item1".to_string(), false),
                ("item2".to_string(), true),
                ("item3".to_string(), true),
            ]
        );
    }
}
