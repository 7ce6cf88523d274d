//! The extraction engine: a session-bound worker pool fed from a shared
//! task queue, drained into checkpointed batches.
//!
//! Split into focused submodules:
//! - [`queue`] - Shared FIFO task queue
//! - [`worker`] - Per-worker run loop and session recovery
//! - [`pool`] - Pool reconciliation (prune/grow/shrink) and joins
//! - [`dispatcher`] - Seed, drain, and checkpoint-flush loop
//! - [`lifecycle`] - Shutdown sequencing

mod dispatcher;
mod lifecycle;
mod pool;
mod queue;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::input::InputProvider;
use crate::source::{Authenticator, Extractor};
use crate::store::CheckpointStore;
use crate::types::{Event, RunSummary};

use dispatcher::{Dispatcher, RunContext};
use pool::{PoolContext, PoolManager};
use queue::TaskQueue;

/// Buffer size of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Resumable concurrent extraction engine.
///
/// Wires an [`Authenticator`], an [`Extractor`] and a [`CheckpointStore`]
/// into a pool of session-bound workers and drives one run over an
/// [`InputProvider`]. Each instance runs exactly once; a second call to
/// [`run`](Harvester::run) returns [`Error::AlreadyRan`].
///
/// The generic parameter is the session type shared by the authenticator
/// and the extractor.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use harvester::{Config, Harvester, JsonlInput, SqliteStore};
/// # use harvester::{AuthError, Authenticator, ExtractError, Extractor, Record, RecordStatus, Task};
/// # struct MyAuth;
/// # #[async_trait::async_trait]
/// # impl Authenticator for MyAuth {
/// #     type Session = String;
/// #     async fn login(&self) -> Result<String, AuthError> { Ok("session".into()) }
/// #     async fn logout(&self, _session: String) {}
/// # }
/// # struct MyExtractor;
/// # #[async_trait::async_trait]
/// # impl Extractor for MyExtractor {
/// #     type Session = String;
/// #     async fn extract(&self, _s: &mut String, task: &Task) -> Result<Record, ExtractError> {
/// #         Ok(Record::new(task.id, RecordStatus::Success))
/// #     }
/// # }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let harvester = Harvester::new(
///     Config::default(),
///     Arc::new(MyAuth),
///     Arc::new(MyExtractor),
///     Arc::new(SqliteStore::new("checkpoint.db")),
/// );
///
/// let handle = harvester.handle();
/// tokio::spawn(async move {
///     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
///     handle.set_target_workers(0);
/// });
///
/// let summary = harvester.run(JsonlInput::new("tasks.jsonl")).await?;
/// println!("processed {} of {}", summary.processed, summary.total);
/// # Ok(())
/// # }
/// ```
pub struct Harvester<S> {
    authenticator: Arc<dyn Authenticator<Session = S>>,
    extractor: Arc<dyn Extractor<Session = S>>,
    store: Arc<dyn CheckpointStore>,
    config: Config,
    event_tx: broadcast::Sender<Event>,
    target_workers: Arc<AtomicUsize>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl<S: Send + 'static> Harvester<S> {
    /// Create an engine from its collaborators.
    ///
    /// The initial worker target comes from `config.pool.target_workers`;
    /// it can be changed at any time through the [`HarvesterHandle`].
    pub fn new(
        config: Config,
        authenticator: Arc<dyn Authenticator<Session = S>>,
        extractor: Arc<dyn Extractor<Session = S>>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let target_workers = Arc::new(AtomicUsize::new(config.pool.target_workers));

        Self {
            authenticator,
            extractor,
            store,
            config,
            event_tx,
            target_workers,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Subscribe to engine events.
    ///
    /// Multiple subscribers are supported; each receives every event
    /// independently. A subscriber lagging more than the channel capacity
    /// behind sees a `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Control surface for the engine: resize the pool, request a stop,
    /// subscribe to events. Cheap to clone and usable from other tasks.
    pub fn handle(&self) -> HarvesterHandle {
        HarvesterHandle {
            target_workers: Arc::clone(&self.target_workers),
            cancel: self.cancel.clone(),
            event_tx: self.event_tx.clone(),
        }
    }

    /// Execute one run over `input`.
    ///
    /// Seeds the task queue with every input task not already checkpointed,
    /// keeps the worker pool converged on the target, and flushes completed
    /// records in batches. Returns when a stop is requested or when the
    /// queue is empty with the target wound down to zero and every worker
    /// gone.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRan`] when this instance has run before.
    /// - Input and store errors from the seed phase, before any worker
    ///   logs in.
    /// - [`Error::FinalFlush`] when the shutdown flush of buffered records
    ///   fails; mid-run flush failures only retry and never fail the run.
    pub async fn run<I: InputProvider + Sync>(&self, input: I) -> Result<RunSummary> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyRan);
        }

        let queue = Arc::new(TaskQueue::new());
        let (result_tx, result_rx) =
            mpsc::channel(self.config.checkpoint.result_channel_capacity.max(1));

        let pool = Arc::new(PoolManager::new(PoolContext {
            authenticator: Arc::clone(&self.authenticator),
            extractor: Arc::clone(&self.extractor),
            queue: Arc::clone(&queue),
            results: result_tx,
            events: self.event_tx.clone(),
            config: self.config.pool.clone(),
            worker_config: self.config.worker.clone(),
            target: Arc::clone(&self.target_workers),
            cancel: self.cancel.clone(),
        }));

        let dispatcher = Dispatcher::new(RunContext {
            authenticator: Arc::clone(&self.authenticator),
            store: Arc::clone(&self.store),
            pool,
            queue,
            results: result_rx,
            events: self.event_tx.clone(),
            target: Arc::clone(&self.target_workers),
            cancel: self.cancel.clone(),
            checkpoint: self.config.checkpoint.clone(),
            join_timeout: self.config.pool.worker_join_timeout,
        });

        dispatcher.run(input).await
    }
}

/// Cloneable control surface for a running engine.
///
/// Obtained from [`Harvester::handle`]; every clone controls the same
/// engine.
#[derive(Clone)]
pub struct HarvesterHandle {
    target_workers: Arc<AtomicUsize>,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<Event>,
}

impl HarvesterHandle {
    /// Change the worker target. The pool converges on the new value on its
    /// next reconcile pass: growth happens in login batches, excess workers
    /// finish their in-flight task before stopping.
    ///
    /// Setting the target to zero lets a run finish on its own once the
    /// queue is empty and the last worker is gone.
    pub fn set_target_workers(&self, target: usize) {
        tracing::info!(workers = target, "Worker target changed");
        self.target_workers.store(target, Ordering::SeqCst);
    }

    /// The current worker target.
    pub fn target_workers(&self) -> usize {
        self.target_workers.load(Ordering::SeqCst)
    }

    /// Request a cooperative stop of the run.
    ///
    /// Workers finish their in-flight task, buffered records get a final
    /// flush, and [`Harvester::run`] returns with `interrupted` set.
    pub fn request_stop(&self) {
        tracing::info!("Stop requested");
        self.cancel.cancel();
    }

    /// Whether a stop has been requested.
    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }
}
