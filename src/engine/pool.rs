//! Worker pool reconciliation: prune dead workers, grow in login batches,
//! shrink by signaling the newest workers to stop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{PoolConfig, WorkerConfig};
use crate::source::{Authenticator, Extractor};
use crate::types::{Event, Record};

use super::queue::TaskQueue;
use super::worker::{WorkerContext, run_worker};

/// One live worker as tracked by the pool.
struct PoolWorker {
    worker_id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Shared plumbing handed to the pool at run start.
pub(crate) struct PoolContext<S> {
    pub(crate) authenticator: Arc<dyn Authenticator<Session = S>>,
    pub(crate) extractor: Arc<dyn Extractor<Session = S>>,
    pub(crate) queue: Arc<TaskQueue>,
    pub(crate) results: mpsc::Sender<Record>,
    pub(crate) events: broadcast::Sender<Event>,
    pub(crate) config: PoolConfig,
    pub(crate) worker_config: WorkerConfig,
    pub(crate) target: Arc<AtomicUsize>,
    pub(crate) cancel: CancellationToken,
}

/// Keeps the number of live workers converged on the shared target without
/// overwhelming the login endpoint.
///
/// Growth happens in batches of at most `login_batch_size` workers; the next
/// batch starts only after every login in the current one has either
/// succeeded or given up. Shrinking signals the most recently started
/// workers and lets them finish their in-flight task.
pub(crate) struct PoolManager<S> {
    ctx: PoolContext<S>,
    workers: Mutex<Vec<PoolWorker>>,
    next_worker_id: AtomicU64,
}

impl<S: Send + 'static> PoolManager<S> {
    pub(crate) fn new(ctx: PoolContext<S>) -> Self {
        Self {
            ctx,
            workers: Mutex::new(Vec::new()),
            next_worker_id: AtomicU64::new(1),
        }
    }

    /// Spawn the reconciliation loop. The first adjustment runs immediately,
    /// then once per configured interval until the run-wide token fires.
    pub(crate) fn spawn_reconcile_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(pool.ctx.config.reconcile_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => pool.reconcile().await,
                    _ = pool.ctx.cancel.cancelled() => break,
                }
            }
            tracing::debug!("Pool reconcile loop exited");
        })
    }

    /// One reconciliation pass: prune, then grow or shrink toward the target.
    pub(crate) async fn reconcile(&self) {
        {
            let mut workers = self.workers.lock().await;
            workers.retain(|worker| !worker.handle.is_finished());
        }

        let target = self.ctx.target.load(Ordering::SeqCst);
        let live = self.workers.lock().await.len();

        if live < target {
            self.grow(target - live).await;
        } else if live > target {
            self.shrink(live - target).await;
        }
    }

    /// Number of workers whose task has not finished yet.
    pub(crate) async fn alive_count(&self) -> usize {
        self.workers
            .lock()
            .await
            .iter()
            .filter(|worker| !worker.handle.is_finished())
            .count()
    }

    /// Start one batch of new workers and wait for all of their logins to
    /// settle. A worker that dies during login drops its ready sender, which
    /// releases the wait as not-ready.
    async fn grow(&self, missing: usize) {
        let batch = missing.min(self.ctx.config.login_batch_size.max(1));
        tracing::info!(batch, missing, "Starting worker batch");

        let mut ready_signals = Vec::with_capacity(batch);
        {
            let mut workers = self.workers.lock().await;
            for _ in 0..batch {
                let worker_id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
                let cancel = self.ctx.cancel.child_token();
                let (ready_tx, ready_rx) = oneshot::channel();

                let worker_ctx = WorkerContext {
                    worker_id,
                    authenticator: Arc::clone(&self.ctx.authenticator),
                    extractor: Arc::clone(&self.ctx.extractor),
                    queue: Arc::clone(&self.ctx.queue),
                    results: self.ctx.results.clone(),
                    events: self.ctx.events.clone(),
                    config: self.ctx.worker_config.clone(),
                    cancel: cancel.clone(),
                };
                let handle = tokio::spawn(run_worker(worker_ctx, ready_tx));

                workers.push(PoolWorker {
                    worker_id,
                    cancel,
                    handle,
                });
                ready_signals.push((worker_id, ready_rx));
            }
        }

        // The barrier runs without the pool lock so a concurrent shutdown
        // can still reach the workers
        let barrier = join_all(ready_signals.into_iter().map(|(worker_id, rx)| async move {
            (worker_id, rx.await.unwrap_or(false))
        }));

        let outcomes = tokio::select! {
            outcomes = barrier => outcomes,
            _ = self.ctx.cancel.cancelled() => return,
        };

        for (worker_id, ready) in outcomes {
            if ready {
                tracing::debug!(worker_id, "Worker batch member ready");
            } else {
                tracing::warn!(worker_id, "Worker did not become ready");
            }
        }
    }

    /// Signal the `excess` most recently started workers to stop. They stay
    /// in the live set until their task finishes and a later prune drops
    /// them, so a slow in-flight extraction is never cut short.
    async fn shrink(&self, excess: usize) {
        let workers = self.workers.lock().await;
        tracing::info!(excess, "Shrinking worker pool");

        for worker in workers.iter().rev().take(excess) {
            tracing::debug!(worker_id = worker.worker_id, "Signaling worker to stop");
            worker.cancel.cancel();
        }
    }

    /// Cancel every remaining worker and join each handle with `join_timeout`.
    /// A worker that outlives its timeout is abandoned and reported.
    pub(crate) async fn shutdown(&self, join_timeout: Duration) {
        let workers = {
            let mut guard = self.workers.lock().await;
            std::mem::take(&mut *guard)
        };

        for worker in &workers {
            worker.cancel.cancel();
        }

        let joins = join_all(workers.into_iter().map(|worker| async move {
            match tokio::time::timeout(join_timeout, worker.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(worker_id = worker.worker_id, error = %e, "Worker task panicked")
                }
                Err(_) => {
                    tracing::warn!(
                        worker_id = worker.worker_id,
                        "Timeout waiting for worker to stop"
                    )
                }
            }
        }));
        joins.await;
    }
}
