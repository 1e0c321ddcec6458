//! Asynchronous audit-log submission, decoupled from the request path.
//!
//! A released read calls [`AccessLogger::dispatch`], which enqueues an
//! [`AuditTask`] without waiting for the ledger. A fixed pool of workers
//! drains the bounded queue and submits each task through an
//! [`AuditSubmitter`]. Transient failures are retried with exponential
//! backoff and jitter; anything that cannot be delivered ends up in a
//! [`DeadLetterStore`] instead of being dropped.
//!
//! ```text
//! dispatch ──try_send──→ [bounded queue] ──→ worker 1..N ──submit──→ ledger
//!     │                                          │
//!     └── queue full / shut down ──┐             └── exhausted / rejected ──┐
//!                                  ▼                                        ▼
//!                               DeadLetterStore ←───────────────────────────┘
//! ```
//!
//! Ordering across tasks is not preserved.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::{
    address::Address,
    config::AccessLoggerConfig,
    error::LedgerError,
    gateway::AuditSubmitter,
};

/// One audit entry waiting for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditTask {
    /// Patient whose data was read.
    pub patient: Address,
    /// Doctor who read it.
    pub doctor: Address,
    /// What was read.
    pub resource_id: String,
    /// When the read was released.
    pub requested_at: DateTime<Utc>,
}

/// Why a task was dead-lettered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// The queue was at capacity when the task was dispatched.
    QueueFull,
    /// The logger was shutting down.
    ShutDown,
    /// Every retry failed with a transient error.
    RetriesExhausted,
    /// The submission failed with an error retrying cannot fix.
    Rejected,
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::QueueFull => "queue_full",
            Self::ShutDown => "shut_down",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Rejected => "rejected",
        })
    }
}

/// An audit task that could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// The undelivered task.
    pub task: AuditTask,
    /// Why delivery stopped.
    pub reason: DeadLetterReason,
    /// Submission attempts made.
    pub attempts: u32,
    /// Last submission error, if any attempt was made.
    pub last_error: Option<String>,
    /// When the task was dead-lettered.
    pub failed_at: DateTime<Utc>,
}

/// Destination for undeliverable audit tasks.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Persists one dead letter. Must not fail; implementations log their
    /// own errors.
    async fn store(&self, letter: DeadLetter);
}

/// Keeps dead letters in memory for inspection and replay.
#[derive(Debug, Default)]
pub struct MemoryDeadLetterStore {
    letters: Mutex<Vec<DeadLetter>>,
}

impl MemoryDeadLetterStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every stored letter.
    #[must_use]
    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.lock().clone()
    }

    /// Returns the number of stored letters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.letters.lock().len()
    }

    /// Returns `true` if nothing was dead-lettered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.letters.lock().is_empty()
    }

    /// Removes and returns every stored letter, e.g. for replay.
    pub fn drain(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.letters.lock())
    }
}

#[async_trait]
impl DeadLetterStore for MemoryDeadLetterStore {
    async fn store(&self, letter: DeadLetter) {
        self.letters.lock().push(letter);
    }
}

/// Snapshot of logger counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessLoggerStats {
    /// Tasks accepted into the queue.
    pub dispatched: u64,
    /// Tasks the ledger accepted.
    pub submitted: u64,
    /// Retry attempts made.
    pub retried: u64,
    /// Tasks moved to the dead-letter store.
    pub dead_lettered: u64,
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    submitted: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
}

struct Worker {
    config: AccessLoggerConfig,
    submitter: Arc<dyn AuditSubmitter>,
    dead_letters: Arc<dyn DeadLetterStore>,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(
        self: Arc<Self>,
        id: usize,
        queue: Arc<tokio::sync::Mutex<mpsc::Receiver<AuditTask>>>,
        shutdown: watch::Receiver<bool>,
    ) {
        loop {
            // Released before processing so other workers can pick up tasks.
            let next = queue.lock().await.recv().await;
            let Some(task) = next else {
                tracing::debug!(worker = id, "audit queue closed; worker exiting");
                return;
            };
            self.deliver(task, shutdown.clone()).await;
        }
    }

    #[tracing::instrument(skip_all, fields(patient = %task.patient, doctor = %task.doctor, resource_id = %task.resource_id))]
    async fn deliver(&self, task: AuditTask, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;
        loop {
            let error = match self
                .submitter
                .submit_audit(task.patient, task.doctor, &task.resource_id)
                .await
            {
                Ok(hash) => {
                    self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(transaction = %hash, attempts = attempt + 1, "audit delivered");
                    return;
                },
                Err(e) => e,
            };

            if !error.is_retryable() {
                return self.dead_letter(task, DeadLetterReason::Rejected, attempt + 1, &error).await;
            }
            if attempt >= self.config.max_retries() {
                return self
                    .dead_letter(task, DeadLetterReason::RetriesExhausted, attempt + 1, &error)
                    .await;
            }

            let delay = compute_backoff(&self.config, attempt);
            tracing::debug!(
                attempt = attempt + 1,
                max_attempts = self.config.max_retries() + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "transient audit failure, retrying after backoff",
            );
            self.counters.retried.fetch_add(1, Ordering::Relaxed);

            // A dropped logger disables the shutdown branch; the sleep still runs.
            let stopped = tokio::select! {
                () = tokio::time::sleep(delay) => false,
                Ok(_) = shutdown.wait_for(|stop| *stop) => true,
            };
            if stopped {
                return self.dead_letter(task, DeadLetterReason::ShutDown, attempt + 1, &error).await;
            }
            attempt += 1;
        }
    }

    async fn dead_letter(
        &self,
        task: AuditTask,
        reason: DeadLetterReason,
        attempts: u32,
        error: &LedgerError,
    ) {
        tracing::error!(
            patient = %task.patient,
            doctor = %task.doctor,
            resource_id = %task.resource_id,
            %reason,
            attempts,
            error = %error,
            "audit entry dead-lettered",
        );
        self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
        self.dead_letters
            .store(DeadLetter {
                task,
                reason,
                attempts,
                last_error: Some(error.to_string()),
                failed_at: Utc::now(),
            })
            .await;
    }
}

/// Computes the backoff before retry number `attempt + 1`:
/// `initial_backoff * 2^attempt`, capped at `max_backoff`, plus 0–50% jitter.
fn compute_backoff(config: &AccessLoggerConfig, attempt: u32) -> Duration {
    let base =
        config.initial_backoff().saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = base.min(config.max_backoff());

    let jitter_range = capped.as_millis() as u64 / 2;
    if jitter_range > 0 {
        capped + Duration::from_millis(rand::rng().random_range(0..=jitter_range))
    } else {
        capped
    }
}

/// Queue-and-workers audit submitter.
///
/// Must be started inside a Tokio runtime. Call [`shutdown`](Self::shutdown)
/// to drain the queue before exiting; dropping the logger closes the queue
/// and lets the workers finish in the background.
pub struct AccessLogger {
    sender: Mutex<Option<mpsc::Sender<AuditTask>>>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    dead_letters: Arc<dyn DeadLetterStore>,
    counters: Arc<Counters>,
}

impl AccessLogger {
    /// Spawns the worker pool.
    #[must_use]
    pub fn start(
        config: AccessLoggerConfig,
        submitter: Arc<dyn AuditSubmitter>,
        dead_letters: Arc<dyn DeadLetterStore>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let queue = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(Counters::default());
        let workers = config.workers();

        let worker = Arc::new(Worker {
            config,
            submitter,
            dead_letters: Arc::clone(&dead_letters),
            counters: Arc::clone(&counters),
        });
        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(Arc::clone(&worker).run(id, Arc::clone(&queue), shutdown_rx.clone()))
            })
            .collect();

        tracing::debug!(workers, "access logger started");
        Self {
            sender: Mutex::new(Some(sender)),
            shutdown,
            workers: Mutex::new(handles),
            dead_letters,
            counters,
        }
    }

    /// Enqueues an audit entry without waiting for the ledger.
    ///
    /// Returns `true` if the task was queued. A full queue or a logger that
    /// is shutting down dead-letters the task and returns `false`; the
    /// caller's request proceeds either way.
    pub async fn dispatch(
        &self,
        patient: Address,
        doctor: Address,
        resource_id: impl Into<String>,
    ) -> bool {
        let task = AuditTask { patient, doctor, resource_id: resource_id.into(), requested_at: Utc::now() };

        let sender = self.sender.lock().clone();
        let rejected = match sender {
            Some(sender) => match sender.try_send(task) {
                Ok(()) => {
                    self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                    return true;
                },
                Err(mpsc::error::TrySendError::Full(task)) => (task, DeadLetterReason::QueueFull),
                Err(mpsc::error::TrySendError::Closed(task)) => (task, DeadLetterReason::ShutDown),
            },
            None => (task, DeadLetterReason::ShutDown),
        };

        let (task, reason) = rejected;
        tracing::error!(
            patient = %task.patient,
            doctor = %task.doctor,
            resource_id = %task.resource_id,
            %reason,
            "audit entry could not be queued",
        );
        self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
        self.dead_letters
            .store(DeadLetter { task, reason, attempts: 0, last_error: None, failed_at: Utc::now() })
            .await;
        false
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> AccessLoggerStats {
        AccessLoggerStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            retried: self.counters.retried.load(Ordering::Relaxed),
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting tasks and drains the queue.
    ///
    /// Every queued task gets at least one submission attempt. Workers may
    /// keep retrying for up to `grace`; after that, tasks still backing off
    /// are dead-lettered. Idempotent.
    pub async fn shutdown(&self, grace: Duration) {
        drop(self.sender.lock().take());
        let handles = std::mem::take(&mut *self.workers.lock());
        if handles.is_empty() {
            return;
        }

        let mut join = tokio::spawn(async move {
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "audit worker panicked");
                }
            }
        });

        if tokio::time::timeout(grace, &mut join).await.is_err() {
            tracing::warn!(grace_ms = grace.as_millis() as u64, "audit drain exceeded grace period");
            let _ = self.shutdown.send(true);
            let _ = join.await;
        }
        tracing::debug!(stats = ?self.stats(), "access logger stopped");
    }
}

impl fmt::Debug for AccessLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessLogger").field("stats", &self.stats()).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use rstest::rstest;

    use super::*;
    use crate::{address::TxHash, error::Result};

    /// Fails the first `failures` submissions with `error`, then succeeds.
    struct FlakySubmitter {
        failures: AtomicU32,
        error: fn() -> LedgerError,
        delivered: Mutex<Vec<String>>,
        gate: Option<Arc<tokio::sync::Semaphore>>,
    }

    impl FlakySubmitter {
        fn new(failures: u32, error: fn() -> LedgerError) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(failures),
                error,
                delivered: Mutex::new(Vec::new()),
                gate: None,
            })
        }

        fn gated(gate: Arc<tokio::sync::Semaphore>) -> Arc<Self> {
            Arc::new(Self {
                failures: AtomicU32::new(0),
                error: || LedgerError::transport("unused"),
                delivered: Mutex::new(Vec::new()),
                gate: Some(gate),
            })
        }

        fn delivered(&self) -> Vec<String> {
            self.delivered.lock().clone()
        }
    }

    #[async_trait]
    impl AuditSubmitter for FlakySubmitter {
        async fn submit_audit(
            &self,
            _patient: Address,
            _doctor: Address,
            resource_id: &str,
        ) -> Result<TxHash> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err((self.error)());
            }
            self.delivered.lock().push(resource_id.to_owned());
            Ok(TxHash::new([1; 32]))
        }
    }

    fn config(max_retries: u32, queue_capacity: usize, workers: usize) -> AccessLoggerConfig {
        AccessLoggerConfig::builder()
            .max_retries(max_retries)
            .queue_capacity(queue_capacity)
            .workers(workers)
            .initial_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_secs(1))
            .build()
            .unwrap()
    }

    fn addr(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_every_dispatched_task() {
        let submitter = FlakySubmitter::new(0, || LedgerError::transport("unused"));
        let dead = Arc::new(MemoryDeadLetterStore::new());
        let logger = AccessLogger::start(config(3, 16, 2), submitter.clone(), dead.clone());

        for i in 0..10 {
            assert!(logger.dispatch(addr(1), addr(2), format!("r{i}")).await);
        }
        logger.shutdown(Duration::from_secs(5)).await;

        let mut delivered = submitter.delivered();
        delivered.sort();
        let mut expected: Vec<String> = (0..10).map(|i| format!("r{i}")).collect();
        expected.sort();
        assert_eq!(delivered, expected);
        assert!(dead.is_empty());
        assert_eq!(
            logger.stats(),
            AccessLoggerStats { dispatched: 10, submitted: 10, retried: 0, dead_lettered: 0 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let submitter = FlakySubmitter::new(2, || LedgerError::transport("connection reset"));
        let dead = Arc::new(MemoryDeadLetterStore::new());
        let logger = AccessLogger::start(config(3, 4, 1), submitter.clone(), dead.clone());

        logger.dispatch(addr(1), addr(2), "r").await;
        logger.shutdown(Duration::from_secs(60)).await;

        assert_eq!(submitter.delivered(), vec!["r".to_owned()]);
        assert_eq!(logger.stats().retried, 2);
        assert!(dead.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_are_dead_lettered() {
        let submitter = FlakySubmitter::new(u32::MAX, || LedgerError::transport("down"));
        let dead = Arc::new(MemoryDeadLetterStore::new());
        let logger = AccessLogger::start(config(2, 4, 1), submitter.clone(), dead.clone());

        logger.dispatch(addr(1), addr(2), "r").await;
        logger.shutdown(Duration::from_secs(60)).await;

        let letters = dead.letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].reason, DeadLetterReason::RetriesExhausted);
        assert_eq!(letters[0].attempts, 3);
        assert_eq!(letters[0].task.resource_id, "r");
        assert!(letters[0].last_error.as_deref().is_some_and(|e| e.contains("down")));
        assert_eq!(logger.stats().dead_lettered, 1);
    }

    #[rstest]
    #[case::no_admin(|| LedgerError::NoAdminAccount)]
    #[case::unbound(|| LedgerError::ContractUnbound)]
    #[tokio::test(start_paused = true)]
    async fn permanent_failures_skip_retries(#[case] error: fn() -> LedgerError) {
        let submitter = FlakySubmitter::new(1, error);
        let dead = Arc::new(MemoryDeadLetterStore::new());
        let logger = AccessLogger::start(config(5, 4, 1), submitter, dead.clone());

        logger.dispatch(addr(1), addr(2), "r").await;
        logger.shutdown(Duration::from_secs(60)).await;

        let letters = dead.letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].reason, DeadLetterReason::Rejected);
        assert_eq!(letters[0].attempts, 1);
        assert_eq!(logger.stats().retried, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_is_single_attempt() {
        let submitter = FlakySubmitter::new(1, || LedgerError::transport("down"));
        let dead = Arc::new(MemoryDeadLetterStore::new());
        let logger = AccessLogger::start(config(0, 4, 1), submitter.clone(), dead.clone());

        logger.dispatch(addr(1), addr(2), "r").await;
        logger.shutdown(Duration::from_secs(60)).await;

        assert!(submitter.delivered().is_empty());
        assert_eq!(dead.letters()[0].attempts, 1);
        assert_eq!(dead.letters()[0].reason, DeadLetterReason::RetriesExhausted);
    }

    #[tokio::test]
    async fn full_queue_dead_letters_instead_of_blocking() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let submitter = FlakySubmitter::gated(Arc::clone(&gate));
        let dead = Arc::new(MemoryDeadLetterStore::new());
        let logger = AccessLogger::start(config(0, 1, 1), submitter.clone(), dead.clone());

        // The worker takes the first task and blocks on the gate; the second
        // fills the queue; the third overflows.
        assert!(logger.dispatch(addr(1), addr(2), "a").await);
        tokio::task::yield_now().await;
        let mut queued = 1;
        let mut overflowed = Vec::new();
        for name in ["b", "c", "d"] {
            if logger.dispatch(addr(1), addr(2), name).await {
                queued += 1;
            } else {
                overflowed.push(name);
            }
        }
        assert!(!overflowed.is_empty());
        assert!(dead.letters().iter().all(|l| l.reason == DeadLetterReason::QueueFull));
        assert_eq!(dead.len(), overflowed.len());

        gate.add_permits(16);
        logger.shutdown(Duration::from_secs(5)).await;
        assert_eq!(submitter.delivered().len(), queued);
    }

    #[tokio::test]
    async fn dispatch_after_shutdown_is_dead_lettered() {
        let submitter = FlakySubmitter::new(0, || LedgerError::transport("unused"));
        let dead = Arc::new(MemoryDeadLetterStore::new());
        let logger = AccessLogger::start(config(0, 4, 1), submitter, dead.clone());
        logger.shutdown(Duration::from_secs(1)).await;
        logger.shutdown(Duration::from_secs(1)).await;

        assert!(!logger.dispatch(addr(1), addr(2), "late").await);
        assert_eq!(dead.letters()[0].reason, DeadLetterReason::ShutDown);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_grace_cuts_backoff_short() {
        let submitter = FlakySubmitter::new(u32::MAX, || LedgerError::transport("down"));
        let dead = Arc::new(MemoryDeadLetterStore::new());
        let config = AccessLoggerConfig::builder()
            .max_retries(100)
            .workers(1)
            .initial_backoff(Duration::from_secs(10))
            .max_backoff(Duration::from_secs(60))
            .build()
            .unwrap();
        let logger = AccessLogger::start(config, submitter, dead.clone());

        logger.dispatch(addr(1), addr(2), "r").await;
        logger.shutdown(Duration::from_secs(1)).await;

        let letters = dead.letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].reason, DeadLetterReason::ShutDown);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = config(10, 1, 1);
        for attempt in 0..10 {
            let delay = compute_backoff(&config, attempt);
            let base = Duration::from_millis(100)
                .saturating_mul(1 << attempt)
                .min(Duration::from_secs(1));
            assert!(delay >= base, "attempt {attempt}: {delay:?} < {base:?}");
            assert!(delay <= base + base / 2, "attempt {attempt}: {delay:?} too large");
        }
    }

    #[tokio::test]
    async fn memory_store_drain() {
        let store = MemoryDeadLetterStore::new();
        let letter = DeadLetter {
            task: AuditTask {
                patient: addr(1),
                doctor: addr(2),
                resource_id: "r".into(),
                requested_at: Utc::now(),
            },
            reason: DeadLetterReason::QueueFull,
            attempts: 0,
            last_error: None,
            failed_at: Utc::now(),
        };
        store.store(letter.clone()).await;
        assert_eq!(store.drain(), vec![letter]);
        assert!(store.is_empty());
    }
}
