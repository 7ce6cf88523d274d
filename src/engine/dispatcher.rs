//! Run loop: seed the queue, drain results, flush checkpoints.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::CheckpointConfig;
use crate::error::{Error, Result, StoreError};
use crate::input::InputProvider;
use crate::progress::ProgressTracker;
use crate::source::Authenticator;
use crate::store::CheckpointStore;
use crate::types::{Event, Record, RunSummary, TaskId};

use super::pool::PoolManager;
use super::queue::TaskQueue;

/// Shared plumbing handed to the dispatcher at run start.
pub(crate) struct RunContext<S> {
    pub(crate) authenticator: Arc<dyn Authenticator<Session = S>>,
    pub(crate) store: Arc<dyn CheckpointStore>,
    pub(crate) pool: Arc<PoolManager<S>>,
    pub(crate) queue: Arc<TaskQueue>,
    pub(crate) results: mpsc::Receiver<Record>,
    pub(crate) events: broadcast::Sender<Event>,
    pub(crate) target: Arc<AtomicUsize>,
    pub(crate) cancel: CancellationToken,
    pub(crate) checkpoint: CheckpointConfig,
    pub(crate) join_timeout: Duration,
}

/// Owns the run loop state: the processed-id set, the pending record buffer,
/// and the progress tracker. Workers never touch any of it.
pub(crate) struct Dispatcher<S> {
    pub(super) ctx: RunContext<S>,
    pub(super) processed: HashSet<TaskId>,
    pub(super) buffer: Vec<Record>,
    pub(super) tracker: ProgressTracker,
    pub(super) total: u64,
    pub(super) skipped: u64,
}

impl<S: Send + 'static> Dispatcher<S> {
    pub(crate) fn new(ctx: RunContext<S>) -> Self {
        Self {
            ctx,
            processed: HashSet::new(),
            buffer: Vec::new(),
            tracker: ProgressTracker::new(0),
            total: 0,
            skipped: 0,
        }
    }

    /// Execute one full run: seed, drain, shut down, summarize.
    pub(crate) async fn run<I: InputProvider + Sync>(mut self, mut input: I) -> Result<RunSummary> {
        let started = Instant::now();

        // Seed failures abort before any worker has logged in
        if let Err(e) = self.seed(&mut input).await {
            tracing::error!(error = %e, "Seeding failed, aborting run");
            self.ctx.store.close().await;
            return Err(e);
        }

        // Initial snapshot so subscribers see the remaining count before the
        // first record lands (and see zero when everything was skipped)
        self.publish_progress();

        let reconcile = self.ctx.pool.spawn_reconcile_loop();
        let drain_result = self.drain().await;
        let interrupted = self.ctx.cancel.is_cancelled();

        let final_flush = self.shutdown(reconcile).await;

        // A drain error outranks a final-flush failure; the flush error has
        // already been logged by the shutdown sequence
        drain_result?;
        final_flush.map_err(Error::FinalFlush)?;

        let summary = RunSummary {
            total: self.total,
            skipped: self.skipped,
            processed: self.tracker.processed(),
            interrupted,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            total = summary.total,
            skipped = summary.skipped,
            processed = summary.processed,
            interrupted = summary.interrupted,
            "Run finished"
        );
        self.ctx
            .events
            .send(Event::RunFinished {
                summary: summary.clone(),
            })
            .ok();
        Ok(summary)
    }

    /// Open the store and the input, then queue every task that is not
    /// already checkpointed.
    async fn seed<I: InputProvider + Sync>(&mut self, input: &mut I) -> Result<()> {
        self.ctx.store.open().await?;
        self.processed = self.load_resume_set(input).await?;

        input.open().await?;
        let mut enqueued: u64 = 0;
        while let Some(task) = input.next_item().await? {
            self.total += 1;
            if self.processed.contains(&task.id) {
                self.skipped += 1;
                continue;
            }
            self.ctx.queue.push(task).await;
            enqueued += 1;
        }
        input.close().await;

        self.tracker = ProgressTracker::new(enqueued);
        tracing::info!(
            total = self.total,
            skipped = self.skipped,
            enqueued,
            "Task queue seeded"
        );
        Ok(())
    }

    /// Load the processed-id set, gated by the input fingerprint when one is
    /// available. A changed input invalidates saved progress; the stored
    /// rows stay in place and are overwritten id by id as the new run
    /// flushes.
    async fn load_resume_set<I: InputProvider + Sync>(&self, input: &I) -> Result<HashSet<TaskId>> {
        if let Some(current) = input.fingerprint().await? {
            let stored = self.ctx.store.load_fingerprint().await?;
            let changed = stored.as_deref().is_some_and(|stored| stored != current);
            if stored.as_deref() != Some(current.as_str()) {
                self.ctx.store.store_fingerprint(&current).await?;
            }
            if changed {
                tracing::warn!("Input fingerprint changed, ignoring saved progress");
                return Ok(HashSet::new());
            }
        }

        if !self.ctx.checkpoint.resume {
            tracing::info!("Resume disabled, processing every task");
            return Ok(HashSet::new());
        }

        let processed = self.ctx.store.get_processed_items().await?;
        if !processed.is_empty() {
            tracing::info!(count = processed.len(), "Resuming, skipping processed tasks");
        }
        Ok(processed)
    }

    /// Receive records until a stop is requested or the run completes on its
    /// own. Timeouts are where the completion condition gets re-checked,
    /// which covers the target being wound down to zero.
    async fn drain(&mut self) -> Result<()> {
        loop {
            if self.ctx.cancel.is_cancelled() {
                tracing::info!("Stop requested, leaving drain loop");
                return Ok(());
            }

            let next = tokio::time::timeout(
                self.ctx.checkpoint.result_poll_interval,
                self.ctx.results.recv(),
            )
            .await;

            match next {
                Ok(Some(record)) => self.accept_record(record).await,
                Ok(None) => {
                    return Err(Error::Other(
                        "result channel closed unexpectedly".to_string(),
                    ));
                }
                Err(_) => {
                    if self.run_complete().await {
                        tracing::info!("Queue drained and pool wound down, finishing run");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Natural completion: nothing queued, target zero, every worker gone.
    async fn run_complete(&self) -> bool {
        self.ctx.queue.is_empty().await
            && self.ctx.target.load(Ordering::SeqCst) == 0
            && self.ctx.pool.alive_count().await == 0
    }

    /// Buffer one record, flush at the threshold, publish progress.
    async fn accept_record(&mut self, record: Record) {
        self.tracker.record_completed();
        self.buffer.push(record);

        if self.buffer.len() >= self.ctx.checkpoint.flush_threshold.max(1) {
            // Mid-run failures keep the buffer; the next record retries
            let _ = self.flush_buffer().await;
        }

        self.publish_progress();
    }

    fn publish_progress(&self) {
        let snapshot = self.tracker.snapshot();
        self.ctx
            .events
            .send(Event::Progress {
                processed: snapshot.processed,
                remaining: snapshot.remaining,
                items_per_min: snapshot.items_per_min,
                eta_secs: snapshot.eta.map(|eta| eta.as_secs()),
            })
            .ok();
    }

    /// Save the pending buffer. On success the buffer empties and the
    /// flushed ids join the processed set; on failure the buffer is kept
    /// for the next attempt.
    pub(super) async fn flush_buffer(&mut self) -> std::result::Result<(), StoreError> {
        match self.ctx.store.save_items(&self.buffer).await {
            Ok(()) => {
                if !self.buffer.is_empty() {
                    tracing::info!(count = self.buffer.len(), "Checkpoint saved");
                    self.ctx
                        .events
                        .send(Event::CheckpointSaved {
                            count: self.buffer.len(),
                        })
                        .ok();
                    for record in &self.buffer {
                        self.processed.insert(record.id);
                    }
                    self.buffer.clear();
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    pending = self.buffer.len(),
                    "Checkpoint flush failed, keeping buffer"
                );
                self.ctx
                    .events
                    .send(Event::CheckpointFailed {
                        error: e.to_string(),
                        pending: self.buffer.len(),
                    })
                    .ok();
                Err(e)
            }
        }
    }
}
