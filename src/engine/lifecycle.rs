//! Shutdown sequencing for the run loop.

use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::types::Event;

use super::dispatcher::Dispatcher;

impl<S: Send + 'static> Dispatcher<S> {
    /// Wind the run down. Runs on every exit path, including a drain error:
    /// buffered records still get their final flush.
    ///
    /// Returns the final flush outcome, the one checkpoint failure a run
    /// surfaces to its caller.
    pub(super) async fn shutdown(&mut self, reconcile: JoinHandle<()>) -> Result<(), StoreError> {
        tracing::info!("Initiating run shutdown");
        self.ctx.events.send(Event::ShutdownStarted).ok();

        // 1. Stop signal: workers observe their child tokens and the
        //    reconcile loop exits
        self.ctx.cancel.cancel();
        if let Err(e) = reconcile.await {
            tracing::warn!(error = %e, "Reconcile loop panicked");
        }

        // 2. Join every worker, bounded per worker
        self.ctx.pool.shutdown(self.ctx.join_timeout).await;

        // 3. Scoop up records that were sent but never received
        while let Ok(record) = self.ctx.results.try_recv() {
            self.tracker.record_completed();
            self.buffer.push(record);
        }

        // 4. Unconditional final flush
        let flush_result = self.flush_buffer().await;

        // 5. Close the store
        self.ctx.store.close().await;

        // 6. Reap sessions left behind by abnormal worker exits
        self.ctx.authenticator.reap_orphaned_sessions().await;

        tracing::info!("Run shutdown complete");
        flush_result
    }
}
