//! Basic extraction run
//!
//! This example demonstrates the core workflow of harvester:
//! - Implementing the `Authenticator` and `Extractor` traits for a source
//! - Building a configuration
//! - Subscribing to engine events
//! - Running over a JSON-lines task file with a SQLite checkpoint store
//!
//! The source here is simulated so the example runs without credentials.
//! Interrupt it with Ctrl+C and run it again to watch it resume.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use harvester::{
    AuthError, Authenticator, Config, Event, ExtractError, Extractor, Harvester, JsonlInput,
    Record, RecordStatus, SqliteStore, Task, run_with_shutdown,
};

/// Pretend session handle. A real source would hold cookies or a driver here.
struct DemoSession {
    serial: u32,
}

struct DemoAuthenticator;

#[async_trait]
impl Authenticator for DemoAuthenticator {
    type Session = DemoSession;

    async fn login(&self) -> Result<DemoSession, AuthError> {
        // Simulate a login round-trip
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(DemoSession { serial: 1 })
    }

    async fn logout(&self, _session: DemoSession) {}
}

struct DemoExtractor;

#[async_trait]
impl Extractor for DemoExtractor {
    type Session = DemoSession;

    async fn extract(
        &self,
        session: &mut DemoSession,
        task: &Task,
    ) -> Result<Record, ExtractError> {
        // Simulate the per-item fetch
        tokio::time::sleep(Duration::from_millis(150)).await;
        Ok(Record::new(task.id, RecordStatus::Success)
            .with_field("code", serde_json::Value::String(task.code.clone()))
            .with_field("session", serde_json::json!(session.serial)))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging (optional)
    // Uncomment if you add tracing-subscriber to your dependencies:
    // tracing_subscriber::fmt::init();

    // Write a small task file if one is not already there
    let input_path = std::path::Path::new("demo_tasks.jsonl");
    if !input_path.exists() {
        let mut lines = String::new();
        for id in 1..=25 {
            lines.push_str(&format!("{{\"task_id\": {id}, \"code\": \"{id:07}-00\"}}\n"));
        }
        std::fs::write(input_path, lines)?;
        println!("Wrote {} with 25 tasks", input_path.display());
    }

    // Build configuration
    let mut config = Config::default();
    config.pool.target_workers = 3;
    config.checkpoint.flush_threshold = 5;

    // Create the engine with a SQLite checkpoint store
    let harvester: Harvester<DemoSession> = Harvester::new(
        config,
        Arc::new(DemoAuthenticator),
        Arc::new(DemoExtractor),
        Arc::new(SqliteStore::new("demo_checkpoint.db")),
    );

    // Subscribe to events. The run only finishes on its own once the worker
    // target is zero, so wind the pool down when nothing remains.
    let handle = harvester.handle();
    let mut events = harvester.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::WorkerReady { worker_id } => {
                    println!("Worker {worker_id} logged in");
                }
                Event::TaskCompleted { task_id, status } => {
                    println!("Task {task_id} completed: {status:?}");
                }
                Event::Progress {
                    processed,
                    remaining,
                    items_per_min,
                    ..
                } => {
                    if let Some(ipm) = items_per_min {
                        println!("Progress: {processed} done, {remaining} left ({ipm:.1}/min)");
                    }
                    if remaining == 0 {
                        handle.set_target_workers(0);
                    }
                }
                Event::CheckpointSaved { count } => {
                    println!("Checkpointed {count} records");
                }
                _ => {}
            }
        }
    });

    // Run until the input is exhausted or Ctrl+C is pressed
    let summary = run_with_shutdown(harvester, JsonlInput::new(input_path)).await?;

    println!(
        "Done: {} of {} processed, {} skipped from an earlier run ({:.1}s){}",
        summary.processed,
        summary.total,
        summary.skipped,
        summary.elapsed.as_secs_f64(),
        if summary.interrupted {
            " [interrupted]"
        } else {
            ""
        },
    );

    Ok(())
}
