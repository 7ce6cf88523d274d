//! # harvester
//!
//! Resumable concurrent extraction engine for authenticated, session-based
//! sources.
//!
//! ## Design Philosophy
//!
//! harvester is designed to be:
//! - **Source-agnostic** - Login and extraction live behind traits you implement
//! - **Resumable** - Completed work is checkpointed and skipped on the next run
//! - **Elastic** - The worker pool grows and shrinks at runtime without a restart
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use harvester::{Config, Event, Harvester, JsonlInput, SqliteStore};
//! # use harvester::{AuthError, Authenticator, ExtractError, Extractor, Record, RecordStatus, Task};
//! # struct MyAuth;
//! # #[async_trait::async_trait]
//! # impl Authenticator for MyAuth {
//! #     type Session = String;
//! #     async fn login(&self) -> Result<String, AuthError> { Ok("session".into()) }
//! #     async fn logout(&self, _session: String) {}
//! # }
//! # struct MyExtractor;
//! # #[async_trait::async_trait]
//! # impl Extractor for MyExtractor {
//! #     type Session = String;
//! #     async fn extract(&self, _s: &mut String, task: &Task) -> Result<Record, ExtractError> {
//! #         Ok(Record::new(task.id, RecordStatus::Success))
//! #     }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let harvester = Harvester::new(
//!         Config::default(),
//!         Arc::new(MyAuth),
//!         Arc::new(MyExtractor),
//!         Arc::new(SqliteStore::new("checkpoint.db")),
//!     );
//!
//!     // Subscribe to events; wind the pool down once nothing remains so
//!     // the run finishes instead of idling for more work
//!     let handle = harvester.handle();
//!     let mut events = harvester.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let Event::Progress { remaining: 0, .. } = event {
//!                 handle.set_target_workers(0);
//!             }
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summary = harvester.run(JsonlInput::new("tasks.jsonl")).await?;
//!     println!("processed {} of {} tasks", summary.processed, summary.total);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Re-login backoff policy
pub mod backoff;
/// Configuration types
pub mod config;
/// Core extraction engine (decomposed into focused submodules)
pub mod engine;
/// Error types
pub mod error;
/// Task input sources
pub mod input;
/// Run progress tracking
pub mod progress;
/// Collaborator traits for the authenticated source
pub mod source;
/// Checkpoint persistence layer
pub mod store;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use backoff::ReloginPolicy;
pub use config::{CheckpointConfig, Config, PoolConfig, WorkerConfig};
pub use engine::{Harvester, HarvesterHandle};
pub use error::{AuthError, Error, ExtractError, InputError, Result, StoreError};
pub use input::{InputProvider, JsonlInput};
pub use progress::ProgressTracker;
pub use source::{Authenticator, Extractor};
pub use store::{CheckpointStore, MemoryStore, SqliteStore};
pub use types::{
    Event, Progress, Record, RecordStatus, RunSummary, Task, TaskId,
};

/// Helper function to run the engine with graceful signal handling.
///
/// Drives the run to completion while listening for a termination signal; on
/// one, it requests a cooperative stop and waits for the run to flush and
/// finish. The returned summary has `interrupted` set when a signal cut the
/// run short.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use harvester::{Config, Harvester, JsonlInput, SqliteStore, run_with_shutdown};
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
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let harvester = Harvester::new(
///         Config::default(),
///         Arc::new(MyAuth),
///         Arc::new(MyExtractor),
///         Arc::new(SqliteStore::new("checkpoint.db")),
///     );
///
///     // Run with automatic signal handling
///     let summary = run_with_shutdown(harvester, JsonlInput::new("tasks.jsonl")).await?;
///     println!("interrupted: {}", summary.interrupted);
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown<S, I>(harvester: Harvester<S>, input: I) -> Result<RunSummary>
where
    S: Send + 'static,
    I: InputProvider + Sync,
{
    let handle = harvester.handle();
    let run = harvester.run(input);
    tokio::pin!(run);

    tokio::select! {
        summary = &mut run => return summary,
        _ = wait_for_signal() => {
            handle.request_stop();
        }
    }
    run.await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
