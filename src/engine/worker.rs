//! Worker run loop: login, extract, recover, stop.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::backoff::ReloginPolicy;
use crate::config::WorkerConfig;
use crate::error::ExtractError;
use crate::source::{Authenticator, Extractor};
use crate::types::{Event, Record, Task};

use super::queue::TaskQueue;

/// Everything one worker needs, cloned out of the engine at spawn time.
pub(crate) struct WorkerContext<S> {
    pub(crate) worker_id: u64,
    pub(crate) authenticator: Arc<dyn Authenticator<Session = S>>,
    pub(crate) extractor: Arc<dyn Extractor<Session = S>>,
    pub(crate) queue: Arc<TaskQueue>,
    pub(crate) results: mpsc::Sender<Record>,
    pub(crate) events: broadcast::Sender<Event>,
    pub(crate) config: WorkerConfig,
    /// Child of the run-wide token, so both a pool shrink and a global stop
    /// land here.
    pub(crate) cancel: CancellationToken,
}

/// Run one worker to completion.
///
/// Logs in, reports readiness on `ready`, then consumes tasks until the
/// cancellation token fires. A failed initial login sends `false` and ends
/// the worker; the pool does not restart it.
pub(crate) async fn run_worker<S: Send + 'static>(
    ctx: WorkerContext<S>,
    ready: oneshot::Sender<bool>,
) {
    let worker_id = ctx.worker_id;
    ctx.events.send(Event::WorkerStarted { worker_id }).ok();

    let session = match ctx.authenticator.login().await {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(worker_id, error = %e, "Worker login failed");
            ctx.events
                .send(Event::WorkerLoginFailed {
                    worker_id,
                    error: e.to_string(),
                })
                .ok();
            ready.send(false).ok();
            ctx.events.send(Event::WorkerStopped { worker_id }).ok();
            return;
        }
    };

    tracing::info!(worker_id, "Worker ready");
    ctx.events.send(Event::WorkerReady { worker_id }).ok();
    ready.send(true).ok();

    // The loop hands the session back unless recovery already lost it
    if let Some(session) = extract_loop(&ctx, session).await {
        ctx.authenticator.logout(session).await;
    }

    tracing::info!(worker_id, "Worker stopped");
    ctx.events.send(Event::WorkerStopped { worker_id }).ok();
}

/// Consume tasks until cancelled. Returns the session still held at exit,
/// or `None` when recovery gave up without one.
async fn extract_loop<S: Send + 'static>(ctx: &WorkerContext<S>, mut session: S) -> Option<S> {
    loop {
        if ctx.cancel.is_cancelled() {
            return Some(session);
        }

        let Some(task) = ctx.queue.pop_timeout(ctx.config.task_poll_interval).await else {
            continue;
        };

        match ctx.extractor.extract(&mut session, &task).await {
            Ok(record) => {
                tracing::debug!(worker_id = ctx.worker_id, task_id = task.id.0, "Task extracted");
                let status = record.status;
                if ctx.results.send(record).await.is_err() {
                    // Dispatcher is gone; nothing left to deliver to
                    return Some(session);
                }
                ctx.events
                    .send(Event::TaskCompleted {
                        task_id: task.id,
                        status,
                    })
                    .ok();
            }
            Err(ExtractError::SessionLost(reason)) => {
                match recover_session(ctx, task, reason, session).await {
                    Some(fresh) => session = fresh,
                    None => return None,
                }
            }
            Err(ExtractError::Failed(reason)) => {
                tracing::warn!(
                    worker_id = ctx.worker_id,
                    task_id = task.id.0,
                    error = %reason,
                    "Extraction failed, recording hard error"
                );
                let record = Record::hard_error(task.id, reason);
                let status = record.status;
                if ctx.results.send(record).await.is_err() {
                    return Some(session);
                }
                ctx.events
                    .send(Event::TaskCompleted {
                        task_id: task.id,
                        status,
                    })
                    .ok();
            }
        }
    }
}

/// Requeue the failed task, drop the broken session, and log in again with a
/// fixed backoff after each failed attempt.
///
/// Returns `None` when cancelled during recovery or when the configured
/// attempt cap runs out; the worker dies in that case and the pool replaces
/// it on a later reconcile if the target still calls for it.
async fn recover_session<S: Send + 'static>(
    ctx: &WorkerContext<S>,
    task: Task,
    reason: String,
    session: S,
) -> Option<S> {
    tracing::warn!(
        worker_id = ctx.worker_id,
        task_id = task.id.0,
        error = %reason,
        "Session lost, recovering"
    );
    ctx.events
        .send(Event::WorkerRecovering {
            worker_id: ctx.worker_id,
            task_id: task.id,
            error: reason,
        })
        .ok();

    // The task goes back first so another worker can pick it up while this
    // one re-authenticates
    ctx.queue.push(task).await;
    ctx.authenticator.logout(session).await;

    let mut policy = ReloginPolicy::new(&ctx.config);
    loop {
        if ctx.cancel.is_cancelled() {
            return None;
        }

        match ctx.authenticator.login().await {
            Ok(session) => {
                tracing::info!(worker_id = ctx.worker_id, "Session re-established");
                ctx.events
                    .send(Event::WorkerReady {
                        worker_id: ctx.worker_id,
                    })
                    .ok();
                return Some(session);
            }
            Err(e) => {
                let Some(delay) = policy.next_delay() else {
                    tracing::error!(
                        worker_id = ctx.worker_id,
                        attempts = policy.attempts(),
                        error = %e,
                        "Giving up on relogin"
                    );
                    return None;
                };
                tracing::warn!(
                    worker_id = ctx.worker_id,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Relogin failed, backing off"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.cancel.cancelled() => return None,
                }
            }
        }
    }
}
