// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Recognition worker pool.
//
// Recognizer contexts are expensive to build, so the pool keeps them keyed by
// language and hands out exclusive handles. Acquisition never queues: it
// reuses an idle worker, creates one below the cap, evicts an idle worker of
// another language, or fails with `CapacityExceeded`. Handles return their
// worker on drop. A background sweeper terminates workers left idle too long.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use image::DynamicImage;
use labelscan_core::config::PoolConfig;
use labelscan_core::error::{Result, ScanError};
use labelscan_core::types::RecognitionMode;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::backend::{Clock, RawRecognition, RecognizerFactory, SystemClock, TextRecognizer};

/// Identifier of a pooled worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkerId(pub u64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

struct Slot {
    language: String,
    recognizer: Arc<dyn TextRecognizer>,
    busy: bool,
    last_used_at: Instant,
    consecutive_timeouts: u32,
}

#[derive(Default)]
struct PoolState {
    slots: HashMap<WorkerId, Slot>,
    /// Workers being built right now; they count against the cap.
    creating: usize,
    next_id: u64,
    closed: bool,
}

struct PoolInner {
    factory: Arc<dyn RecognizerFactory>,
    clock: Arc<dyn Clock>,
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, id: WorkerId, timed_out: bool) {
        let terminated = {
            let mut state = self.state();
            let closed = state.closed;
            let Some(slot) = state.slots.get_mut(&id) else {
                return;
            };
            slot.busy = false;
            slot.last_used_at = self.clock.now();
            if timed_out {
                slot.consecutive_timeouts += 1;
            } else {
                slot.consecutive_timeouts = 0;
            }
            let wedged = slot.consecutive_timeouts >= self.config.wedge_after.max(1);
            if wedged || closed {
                if wedged {
                    warn!(worker = %id, timeouts = slot.consecutive_timeouts, "Worker wedged; terminating");
                }
                state.slots.remove(&id).map(|s| s.recognizer)
            } else {
                None
            }
        };
        match terminated {
            Some(recognizer) => recognizer.terminate(),
            None => debug!(worker = %id, "Worker released"),
        }
    }
}

/// Live counts for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub busy: usize,
    pub idle: usize,
    pub creating: usize,
    pub capacity: usize,
}

/// Shared handle to the pool. Cloning is cheap.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

/// Reserved creation slot; gives the reservation back if creation is
/// abandoned (error or cancellation).
struct Reservation {
    inner: Arc<PoolInner>,
    armed: bool,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.armed {
            self.inner.state().creating -= 1;
        }
    }
}

enum Plan {
    Reuse(Worker),
    Create { evicted: Option<Arc<dyn TextRecognizer>> },
}

impl WorkerPool {
    pub fn new(factory: Arc<dyn RecognizerFactory>, config: PoolConfig) -> Self {
        Self::with_clock(factory, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        factory: Arc<dyn RecognizerFactory>,
        config: PoolConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                factory,
                clock,
                config,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.config.max_workers
    }

    /// Exclusive worker for `language`.
    #[instrument(skip(self))]
    pub async fn acquire(&self, language: &str) -> Result<Worker> {
        let plan = {
            let mut state = self.inner.state();
            if state.closed {
                return Err(ScanError::Recognition("worker pool is shut down".into()));
            }
            let reusable = state
                .slots
                .iter_mut()
                .find(|(_, s)| !s.busy && s.language == language);
            if let Some((id, slot)) = reusable {
                slot.busy = true;
                debug!(worker = %id, "Reusing idle worker");
                Plan::Reuse(Worker {
                    id: *id,
                    language: slot.language.clone(),
                    recognizer: Arc::clone(&slot.recognizer),
                    pool: Arc::clone(&self.inner),
                    timed_out: false,
                })
            } else if state.slots.len() + state.creating < self.capacity() {
                state.creating += 1;
                Plan::Create { evicted: None }
            } else {
                let victim = state
                    .slots
                    .iter()
                    .filter(|(_, s)| !s.busy)
                    .min_by_key(|(_, s)| s.last_used_at)
                    .map(|(id, _)| *id);
                match victim {
                    Some(id) => {
                        let slot = state.slots.remove(&id);
                        state.creating += 1;
                        info!(worker = %id, "Evicting idle worker of another language");
                        Plan::Create {
                            evicted: slot.map(|s| s.recognizer),
                        }
                    }
                    None => {
                        warn!(capacity = self.capacity(), "Recognition pool at capacity");
                        return Err(ScanError::CapacityExceeded {
                            capacity: self.capacity(),
                        });
                    }
                }
            }
        };

        let evicted = match plan {
            Plan::Reuse(worker) => return Ok(worker),
            Plan::Create { evicted } => evicted,
        };
        let mut reservation = Reservation {
            inner: Arc::clone(&self.inner),
            armed: true,
        };
        if let Some(recognizer) = evicted {
            recognizer.terminate();
        }

        let recognizer = self.inner.factory.create(language).await?;

        let mut state = self.inner.state();
        reservation.armed = false;
        state.creating -= 1;
        let id = WorkerId(state.next_id);
        state.next_id += 1;
        state.slots.insert(
            id,
            Slot {
                language: language.to_string(),
                recognizer: Arc::clone(&recognizer),
                busy: true,
                last_used_at: self.inner.clock.now(),
                consecutive_timeouts: 0,
            },
        );
        info!(worker = %id, "Created recognition worker");
        Ok(Worker {
            id,
            language: language.to_string(),
            recognizer,
            pool: Arc::clone(&self.inner),
            timed_out: false,
        })
    }

    /// Return a worker explicitly. Dropping the handle does the same.
    pub fn release(&self, worker: Worker) {
        drop(worker);
    }

    /// Terminate idle workers unused for longer than the idle threshold.
    /// Returns how many were evicted.
    pub fn sweep_idle(&self) -> usize {
        let idle_timeout = Duration::from_millis(self.inner.config.idle_timeout_ms);
        let now = self.inner.clock.now();
        let expired: Vec<(WorkerId, Arc<dyn TextRecognizer>)> = {
            let mut state = self.inner.state();
            let ids: Vec<WorkerId> = state
                .slots
                .iter()
                .filter(|(_, s)| !s.busy && now.saturating_duration_since(s.last_used_at) >= idle_timeout)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| state.slots.remove(&id).map(|s| (id, s.recognizer)))
                .collect()
        };
        for (id, recognizer) in &expired {
            debug!(worker = %id, "Idle worker evicted");
            recognizer.terminate();
        }
        if !expired.is_empty() {
            info!(evicted = expired.len(), "Idle sweep");
        }
        expired.len()
    }

    /// Run [`sweep_idle`](Self::sweep_idle) on the configured interval until
    /// `cancel` fires.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let pool = self.clone();
        let period = Duration::from_millis(self.inner.config.sweep_interval_ms.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        pool.sweep_idle();
                    }
                }
            }
            debug!("Idle sweeper stopped");
        })
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state();
        let busy = state.slots.values().filter(|s| s.busy).count();
        PoolStats {
            total: state.slots.len(),
            busy,
            idle: state.slots.len() - busy,
            creating: state.creating,
            capacity: self.capacity(),
        }
    }

    /// Terminate idle workers now and busy ones when they come back.
    /// Further acquisitions fail.
    pub fn shutdown(&self) {
        let idle: Vec<Arc<dyn TextRecognizer>> = {
            let mut state = self.inner.state();
            state.closed = true;
            let ids: Vec<WorkerId> = state
                .slots
                .iter()
                .filter(|(_, s)| !s.busy)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| state.slots.remove(&id).map(|s| s.recognizer))
                .collect()
        };
        for recognizer in idle {
            recognizer.terminate();
        }
        info!("Worker pool shut down");
    }
}

/// Exclusive handle to one pooled worker. Returned to the pool on drop.
pub struct Worker {
    id: WorkerId,
    language: String,
    recognizer: Arc<dyn TextRecognizer>,
    pool: Arc<PoolInner>,
    timed_out: bool,
}

impl Worker {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub async fn recognize(
        &self,
        image: Arc<DynamicImage>,
        mode: RecognitionMode,
    ) -> Result<RawRecognition> {
        self.recognizer.recognize(image, mode).await
    }

    /// Record that the last call timed out; counts towards the wedge limit.
    pub fn mark_timed_out(&mut self) {
        self.timed_out = true;
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("language", &self.language)
            .finish()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.pool.release(self.id, self.timed_out);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ocr::backend::ManualClock;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    pub(crate) struct FakeRecognizer {
        pub text: String,
        pub confidence: f32,
        pub hang: bool,
        pub terminated: AtomicBool,
    }

    #[async_trait]
    impl TextRecognizer for FakeRecognizer {
        async fn recognize(
            &self,
            _image: Arc<DynamicImage>,
            _mode: RecognitionMode,
        ) -> Result<RawRecognition> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(RawRecognition {
                text: self.text.clone(),
                confidence: self.confidence,
                ..Default::default()
            })
        }

        fn terminate(&self) {
            self.terminated.store(true, Ordering::SeqCst);
        }
    }

    /// Factory producing [`FakeRecognizer`]s and remembering every one.
    #[derive(Default)]
    pub(crate) struct FakeFactory {
        pub text: String,
        pub confidence: f32,
        pub hang: bool,
        pub created: Mutex<Vec<Arc<FakeRecognizer>>>,
        pub calls: AtomicUsize,
    }

    impl FakeFactory {
        pub(crate) fn answering(text: &str, confidence: f32) -> Arc<Self> {
            Arc::new(Self {
                text: text.into(),
                confidence,
                ..Default::default()
            })
        }

        pub(crate) fn hanging() -> Arc<Self> {
            Arc::new(Self {
                hang: true,
                ..Default::default()
            })
        }

        pub(crate) fn terminated(&self) -> usize {
            self.created
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.terminated.load(Ordering::SeqCst))
                .count()
        }
    }

    #[async_trait]
    impl RecognizerFactory for FakeFactory {
        async fn create(&self, _language: &str) -> Result<Arc<dyn TextRecognizer>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let recognizer = Arc::new(FakeRecognizer {
                text: self.text.clone(),
                confidence: self.confidence,
                hang: self.hang,
                terminated: AtomicBool::new(false),
            });
            self.created.lock().unwrap().push(Arc::clone(&recognizer));
            Ok(recognizer)
        }
    }

    fn config(max_workers: usize) -> PoolConfig {
        PoolConfig {
            max_workers,
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn never_hands_out_a_busy_worker() {
        let factory = FakeFactory::answering("x", 1.0);
        let pool = WorkerPool::new(factory.clone(), config(2));

        let a = pool.acquire("eng").await.unwrap();
        let b = pool.acquire("eng").await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.stats().busy, 2);
    }

    #[tokio::test]
    async fn capacity_overflow_fails_fast() {
        let pool = WorkerPool::new(FakeFactory::answering("x", 1.0), config(1));
        let _held = pool.acquire("eng").await.unwrap();

        let err = pool.acquire("eng").await.unwrap_err();
        assert!(matches!(err, ScanError::CapacityExceeded { capacity: 1 }));
    }

    #[tokio::test]
    async fn released_worker_is_reused_for_same_language() {
        let factory = FakeFactory::answering("x", 1.0);
        let pool = WorkerPool::new(factory.clone(), config(1));

        let first = pool.acquire("eng").await.unwrap();
        let id = first.id();
        pool.release(first);

        let again = pool.acquire("eng").await.unwrap();
        assert_eq!(again.id(), id);
        assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn idle_worker_of_other_language_is_evicted() {
        let factory = FakeFactory::answering("x", 1.0);
        let pool = WorkerPool::new(factory.clone(), config(1));

        drop(pool.acquire("eng").await.unwrap());
        let deu = pool.acquire("deu").await.unwrap();
        assert_eq!(deu.language(), "deu");
        assert_eq!(factory.terminated(), 1);
        assert_eq!(pool.stats().total, 1);
    }

    #[tokio::test]
    async fn sweep_evicts_only_expired_idle_workers() {
        let factory = FakeFactory::answering("x", 1.0);
        let clock = Arc::new(ManualClock::new());
        let pool = WorkerPool::with_clock(factory.clone(), config(2), clock.clone());

        let idle = pool.acquire("eng").await.unwrap();
        let _busy = pool.acquire("eng").await.unwrap();
        drop(idle);

        clock.advance(Duration::from_secs(60));
        assert_eq!(pool.sweep_idle(), 0);

        clock.advance(Duration::from_secs(61));
        assert_eq!(pool.sweep_idle(), 1);
        assert_eq!(factory.terminated(), 1);
        assert_eq!(pool.stats().total, 1);
        assert_eq!(pool.stats().busy, 1);
    }

    #[tokio::test]
    async fn wedged_worker_is_terminated_after_repeated_timeouts() {
        let factory = FakeFactory::answering("x", 1.0);
        let pool = WorkerPool::new(factory.clone(), config(1));

        let mut worker = pool.acquire("eng").await.unwrap();
        worker.mark_timed_out();
        drop(worker);
        assert_eq!(pool.stats().total, 1);

        let mut worker = pool.acquire("eng").await.unwrap();
        worker.mark_timed_out();
        drop(worker);
        assert_eq!(pool.stats().total, 0);
        assert_eq!(factory.terminated(), 1);
    }

    #[tokio::test]
    async fn sweeper_task_stops_on_cancel() {
        let pool = WorkerPool::new(
            FakeFactory::answering("x", 1.0),
            PoolConfig {
                sweep_interval_ms: 5,
                idle_timeout_ms: 0,
                ..PoolConfig::default()
            },
        );
        drop(pool.acquire("eng").await.unwrap());

        let cancel = CancellationToken::new();
        let handle = pool.spawn_sweeper(cancel.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(pool.stats().total, 0);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_rejects_new_work() {
        let factory = FakeFactory::answering("x", 1.0);
        let pool = WorkerPool::new(factory.clone(), config(2));
        let held = pool.acquire("eng").await.unwrap();
        drop(pool.acquire("deu").await.unwrap());

        pool.shutdown();
        assert_eq!(factory.terminated(), 1);
        assert!(pool.acquire("eng").await.is_err());

        drop(held);
        assert_eq!(factory.terminated(), 2);
    }
}
