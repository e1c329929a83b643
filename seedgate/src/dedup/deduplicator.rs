//! Fan-in deduplication of concurrent calculation requests.
//!
//! Every caller registers a subscription keyed by a fresh request id under
//! its input, then waits on a single-use result channel. A background
//! scheduler picks the input with the largest subscriber set
//! (popularity-first), runs one backend calculation at a time, and publishes
//! the result to every subscriber of that input.
//!
//! # Subscription protocol
//!
//! Each subscription is a `oneshot` channel: receiving a value means the
//! result was delivered, a closed-empty channel means the calculation was
//! abandoned. Unsubscribing drops the sender without a value. When the last
//! subscriber of the input currently being calculated unsubscribes, the
//! in-flight backend call is cancelled.

use crate::calc::{CalcError, Calculator};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The input currently being calculated and the handle that aborts it.
struct InFlight {
    input: u64,
    cancel: CancellationToken,
}

/// Two-level subscription table: input, then request id.
#[derive(Default)]
struct SubscriptionTable {
    subscribers: HashMap<u64, HashMap<u64, oneshot::Sender<i64>>>,
    current: Option<InFlight>,
}

impl SubscriptionTable {
    /// Returns the input with the most subscribers; ties break to the
    /// smallest input so one scan is deterministic.
    fn most_subscribed(&self) -> Option<u64> {
        self.subscribers
            .iter()
            .max_by(|(input_a, subs_a), (input_b, subs_b)| {
                subs_a
                    .len()
                    .cmp(&subs_b.len())
                    .then_with(|| input_b.cmp(input_a))
            })
            .map(|(input, _)| *input)
    }

    /// Delivers `value` to every subscriber of `input` and drops the input.
    /// Returns the number of subscribers that were still listening.
    fn publish(&mut self, input: u64, value: i64) -> usize {
        let Some(subs) = self.subscribers.remove(&input) else {
            return 0;
        };

        let mut delivered = 0;
        for (_, tx) in subs {
            if tx.send(value).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Drops every remaining subscription for `input` without a value,
    /// signalling abandonment.
    fn unsubscribe_all(&mut self, input: u64) {
        self.subscribers.remove(&input);
    }
}

/// Statistics for monitoring deduplication effectiveness.
#[derive(Debug, Default, Clone)]
pub struct DedupStats {
    /// Total requests received.
    pub total_requests: u64,
    /// Requests that joined an existing subscriber set.
    pub deduplicated_requests: u64,
    /// Backend calculations started.
    pub backend_calls: u64,
}

impl DedupStats {
    /// Returns the deduplication ratio (0.0 to 1.0).
    pub fn dedup_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.deduplicated_requests as f64 / self.total_requests as f64
        }
    }
}

/// Per-seed fan-in deduplicator with a popularity-first scheduler.
pub struct RequestDeduplicator {
    seed: u64,
    backend: Arc<dyn Calculator>,
    next_req_id: AtomicU64,
    tick: Duration,
    shutdown: CancellationToken,
    /// Raised when an input's subscriber set becomes non-empty.
    wake: Notify,
    table: Mutex<SubscriptionTable>,
    total_requests: AtomicU64,
    deduplicated_requests: AtomicU64,
    backend_calls: AtomicU64,
}

impl RequestDeduplicator {
    /// Creates a deduplicator for `seed` over the given backend.
    ///
    /// The scheduler must be started exactly once with [`start`](Self::start).
    pub fn new(seed: u64, backend: Arc<dyn Calculator>, tick: Duration) -> Self {
        Self {
            seed,
            backend,
            next_req_id: AtomicU64::new(0),
            tick,
            shutdown: CancellationToken::new(),
            wake: Notify::new(),
            table: Mutex::new(SubscriptionTable::default()),
            total_requests: AtomicU64::new(0),
            deduplicated_requests: AtomicU64::new(0),
            backend_calls: AtomicU64::new(0),
        }
    }

    /// Spawns the background scheduler. Call exactly once per deduplicator.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let dedup = Arc::clone(self);
        tokio::spawn(async move { dedup.run().await })
    }

    /// Subscribes the caller to a calculation of `input` and waits for the
    /// result.
    ///
    /// Returns [`CalcError::Cancelled`] when the caller's token fires first,
    /// [`CalcError::Abandoned`] when the backend calculation for this input
    /// failed, and [`CalcError::Shutdown`] when the deduplicator closes while
    /// the caller is waiting.
    pub async fn calculate(&self, cancel: &CancellationToken, input: u64) -> Result<i64, CalcError> {
        if self.shutdown.is_cancelled() {
            return Err(CalcError::Shutdown);
        }

        let req_id = self.next_req_id.fetch_add(1, Ordering::Relaxed) + 1;
        let rx = self.subscribe(input, req_id);

        tokio::select! {
            _ = cancel.cancelled() => {
                self.unsubscribe(input, req_id);
                Err(CalcError::Cancelled { input, req_id })
            }
            _ = self.shutdown.cancelled() => {
                self.unsubscribe(input, req_id);
                Err(CalcError::Shutdown)
            }
            result = rx => match result {
                Ok(value) => Ok(value),
                Err(_) => Err(CalcError::Abandoned(input)),
            }
        }
    }

    /// Stops the scheduler and closes the backend.
    pub async fn close(&self) -> Result<(), CalcError> {
        self.shutdown.cancel();
        self.backend.close().await?;

        info!(seed = self.seed, "deduplicator closed");
        Ok(())
    }

    /// Returns a snapshot of the current statistics.
    pub fn stats(&self) -> DedupStats {
        DedupStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            deduplicated_requests: self.deduplicated_requests.load(Ordering::Relaxed),
            backend_calls: self.backend_calls.load(Ordering::Relaxed),
        }
    }

    /// Logs current statistics.
    pub fn log_stats(&self) {
        let stats = self.stats();

        info!(
            seed = self.seed,
            total_requests = stats.total_requests,
            deduplicated = stats.deduplicated_requests,
            backend_calls = stats.backend_calls,
            dedup_ratio = format!("{:.1}%", stats.dedup_ratio() * 100.0),
            "request deduplication statistics"
        );
    }

    fn subscribe(&self, input: u64, req_id: u64) -> oneshot::Receiver<i64> {
        let (tx, rx) = oneshot::channel();

        let mut table = self.table.lock().unwrap();
        let subs = table.subscribers.entry(input).or_default();
        let first = subs.is_empty();
        subs.insert(req_id, tx);

        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if first {
            self.wake.notify_one();
        } else {
            self.deduplicated_requests.fetch_add(1, Ordering::Relaxed);
        }

        rx
    }

    fn unsubscribe(&self, input: u64, req_id: u64) {
        let mut table = self.table.lock().unwrap();

        let Some(subs) = table.subscribers.get_mut(&input) else {
            return;
        };
        subs.remove(&req_id);

        if subs.is_empty() {
            table.subscribers.remove(&input);
            // Abort the in-flight calculation once nobody wants its result.
            if let Some(current) = &table.current {
                if current.input == input {
                    debug!(
                        seed = self.seed,
                        input, "last subscriber left, aborting in-flight calculation"
                    );
                    current.cancel.cancel();
                }
            }
        }
    }

    /// The scheduler loop: wakes on its tick or on a new subscriber set,
    /// then services the subscription table until it is empty.
    async fn run(self: Arc<Self>) {
        let mut tick = tokio::time::interval(self.tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!(seed = self.seed, "scheduler stopped");
                    return;
                }
                _ = tick.tick() => {}
                _ = self.wake.notified() => {}
            }

            let mut serviced = false;
            while !self.shutdown.is_cancelled() && self.service_next().await {
                serviced = true;
            }
            if serviced {
                self.log_stats();
            }
        }
    }

    /// Calculates the most subscribed input, if any. Returns whether an
    /// input was serviced.
    async fn service_next(&self) -> bool {
        let (input, calc_cancel) = {
            let mut table = self.table.lock().unwrap();
            let Some(input) = table.most_subscribed() else {
                return false;
            };
            let cancel = CancellationToken::new();
            table.current = Some(InFlight {
                input,
                cancel: cancel.clone(),
            });
            (input, cancel)
        };

        self.backend_calls.fetch_add(1, Ordering::Relaxed);
        debug!(seed = self.seed, input, "calculating next input");
        let result = self.backend.calculate(&calc_cancel, input).await;

        let mut table = self.table.lock().unwrap();
        table.current = None;
        match result {
            Ok(value) => {
                let delivered = table.publish(input, value);
                debug!(
                    seed = self.seed,
                    input, value, delivered, "published result to subscribers"
                );
            }
            Err(err) => {
                warn!(
                    seed = self.seed,
                    input,
                    error = %err,
                    "cannot calculate input, abandoning its subscribers"
                );
                table.unsubscribe_all(input);
            }
        }
        true
    }
}

#[async_trait]
impl Calculator for RequestDeduplicator {
    async fn calculate(&self, cancel: &CancellationToken, input: u64) -> Result<i64, CalcError> {
        self.calculate(cancel, input).await
    }

    async fn close(&self) -> Result<(), CalcError> {
        self.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerError;
    use std::sync::atomic::AtomicUsize;

    /// Mock backend answering with `result_fn(input)` after `delay`.
    ///
    /// Respects the per-calculation cancellation token the way a real worker
    /// session does: an aborted call returns an HTTP-style error.
    struct MockBackend {
        result_fn: fn(u64) -> i64,
        delay: Duration,
        calls: AtomicUsize,
        completed: AtomicUsize,
        aborted: AtomicUsize,
        inputs: Mutex<Vec<u64>>,
    }

    impl MockBackend {
        fn new(result_fn: fn(u64) -> i64, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                result_fn,
                delay,
                calls: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                aborted: AtomicUsize::new(0),
                inputs: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Calculator for MockBackend {
        async fn calculate(&self, cancel: &CancellationToken, input: u64) -> Result<i64, CalcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inputs.lock().unwrap().push(input);

            tokio::select! {
                _ = cancel.cancelled() => {
                    self.aborted.fetch_add(1, Ordering::SeqCst);
                    return Err(CalcError::Worker(WorkerError::Http(
                        "request canceled".to_string(),
                    )));
                }
                _ = tokio::time::sleep(self.delay) => {}
            }

            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok((self.result_fn)(input))
        }

        async fn close(&self) -> Result<(), CalcError> {
            Ok(())
        }
    }

    /// Backend that always fails.
    struct FailingBackend;

    #[async_trait]
    impl Calculator for FailingBackend {
        async fn calculate(
            &self,
            _cancel: &CancellationToken,
            input: u64,
        ) -> Result<i64, CalcError> {
            Err(CalcError::Worker(WorkerError::Http(format!(
                "cannot calculate input {}",
                input
            ))))
        }

        async fn close(&self) -> Result<(), CalcError> {
            Ok(())
        }
    }

    fn test_deduplicator(backend: Arc<dyn Calculator>) -> Arc<RequestDeduplicator> {
        Arc::new(RequestDeduplicator::new(
            1,
            backend,
            Duration::from_millis(50),
        ))
    }

    #[tokio::test]
    async fn test_single_request() {
        let backend = MockBackend::new(|_| 1, Duration::ZERO);
        let dedup = test_deduplicator(backend.clone());
        dedup.start();

        let result = dedup.calculate(&CancellationToken::new(), 1).await.unwrap();

        assert_eq!(result, 1);
        assert_eq!(backend.completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_1000_concurrent_requests_over_5_inputs() {
        let backend = MockBackend::new(|input| input as i64, Duration::ZERO);
        let dedup = test_deduplicator(backend.clone());

        // Subscribe everyone before the scheduler runs so each distinct
        // input is calculated exactly once.
        let mut handles = Vec::new();
        for i in 0..1000u64 {
            let d = Arc::clone(&dedup);
            handles.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                (i % 5, d.calculate(&cancel, i % 5).await)
            }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        dedup.start();

        let results: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        for (input, result) in results {
            assert_eq!(result.unwrap(), input as i64);
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 5);

        let stats = dedup.stats();
        assert_eq!(stats.total_requests, 1000);
        assert_eq!(stats.deduplicated_requests, 995);
        assert_eq!(stats.backend_calls, 5);
    }

    #[tokio::test]
    async fn test_1000_requests_with_half_cancelled() {
        let backend = MockBackend::new(|_| 1, Duration::from_millis(20));
        let dedup = test_deduplicator(backend.clone());
        dedup.start();

        let mut handles = Vec::new();
        for i in 0..1000u64 {
            let d = Arc::clone(&dedup);
            handles.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                if i % 2 == 0 {
                    cancel.cancel();
                }
                (i, d.calculate(&cancel, 1).await)
            }));
        }

        let results: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        for (i, result) in results {
            if i % 2 == 0 {
                let err = result.unwrap_err();
                assert!(err.to_string().contains("request was canceled"));
            } else {
                assert_eq!(result.unwrap(), 1);
            }
        }
    }

    #[tokio::test]
    async fn test_all_callers_cancelled_completes_no_backend_call() {
        let backend = MockBackend::new(|_| 1, Duration::from_secs(10));
        let dedup = test_deduplicator(backend.clone());
        dedup.start();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let d = Arc::clone(&dedup);
            handles.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                cancel.cancel();
                d.calculate(&cancel, 1).await
            }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(err.to_string().contains("request was canceled"));
        }
        assert_eq!(backend.completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_popularity_first_ordering() {
        let backend = MockBackend::new(|input| input as i64, Duration::ZERO);
        let dedup = test_deduplicator(backend.clone());

        // 3 subscribers for input 20, 2 for input 30, 1 for input 10.
        let mut handles = Vec::new();
        for input in [20u64, 20, 20, 30, 30, 10] {
            let d = Arc::clone(&dedup);
            handles.push(tokio::spawn(async move {
                d.calculate(&CancellationToken::new(), input).await
            }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        dedup.start();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(*backend.inputs.lock().unwrap(), vec![20, 30, 10]);
    }

    #[tokio::test]
    async fn test_popularity_tie_breaks_to_smallest_input() {
        let mut table = SubscriptionTable::default();
        for input in [7u64, 3, 5] {
            let (tx, _rx) = oneshot::channel();
            table.subscribers.entry(input).or_default().insert(1, tx);
        }

        assert_eq!(table.most_subscribed(), Some(3));
    }

    #[tokio::test]
    async fn test_backend_failure_abandons_subscribers() {
        let dedup = test_deduplicator(Arc::new(FailingBackend));
        dedup.start();

        let first_cancel = CancellationToken::new();
        let second_cancel = CancellationToken::new();
        let first = dedup.calculate(&first_cancel, 4);
        let second = dedup.calculate(&second_cancel, 4);
        let (first, second) = tokio::join!(first, second);

        assert!(matches!(first.unwrap_err(), CalcError::Abandoned(4)));
        assert!(matches!(second.unwrap_err(), CalcError::Abandoned(4)));

        // The failed input was dropped from the table.
        assert!(dedup.table.lock().unwrap().subscribers.is_empty());
    }

    #[tokio::test]
    async fn test_last_unsubscribe_aborts_in_flight_calculation() {
        let backend = MockBackend::new(|_| 1, Duration::from_secs(60));
        let dedup = test_deduplicator(backend.clone());
        dedup.start();

        let cancel = CancellationToken::new();
        let caller = {
            let d = Arc::clone(&dedup);
            let cancel = cancel.clone();
            tokio::spawn(async move { d.calculate(&cancel, 1).await })
        };

        // Wait until the backend call is in flight.
        tokio::time::timeout(Duration::from_secs(5), async {
            while backend.calls.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("backend call should start");

        cancel.cancel();

        let err = caller.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("request was canceled"));

        // The scheduler's backend call observes the abort promptly.
        tokio::time::timeout(Duration::from_secs(5), async {
            while backend.aborted.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("in-flight calculation should be aborted");
        assert_eq!(backend.completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_calculate_after_close_is_shutdown_error() {
        let backend = MockBackend::new(|_| 1, Duration::ZERO);
        let dedup = test_deduplicator(backend);
        dedup.start();

        dedup.close().await.unwrap();

        let err = dedup
            .calculate(&CancellationToken::new(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CalcError::Shutdown));
    }

    #[tokio::test]
    async fn test_close_releases_waiting_caller() {
        // A backend slow enough that the caller is still waiting at close.
        let backend = MockBackend::new(|_| 1, Duration::from_secs(60));
        let dedup = test_deduplicator(backend);
        dedup.start();

        let caller = {
            let d = Arc::clone(&dedup);
            tokio::spawn(async move { d.calculate(&CancellationToken::new(), 1).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        dedup.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), caller)
            .await
            .expect("caller should be released by close")
            .unwrap();
        assert!(matches!(result.unwrap_err(), CalcError::Shutdown));
    }

    #[tokio::test]
    async fn test_dedup_stats_ratio() {
        let stats = DedupStats {
            total_requests: 4,
            deduplicated_requests: 3,
            backend_calls: 1,
        };
        assert!((stats.dedup_ratio() - 0.75).abs() < 0.001);

        assert_eq!(DedupStats::default().dedup_ratio(), 0.0);
    }
}
