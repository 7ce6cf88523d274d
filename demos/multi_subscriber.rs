//! Multiple event subscribers example
//!
//! This example demonstrates how multiple parts of your application
//! can independently subscribe to engine events: a progress display, a
//! plain event log, and a statistics collector each get their own
//! receiver and miss nothing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use harvester::{
    AuthError, Authenticator, Config, Event, ExtractError, Extractor, Harvester, JsonlInput,
    Record, RecordStatus, SqliteStore, Task,
};

struct DemoAuthenticator;

#[async_trait]
impl Authenticator for DemoAuthenticator {
    type Session = ();

    async fn login(&self) -> Result<(), AuthError> {
        Ok(())
    }

    async fn logout(&self, _session: ()) {}
}

struct DemoExtractor;

#[async_trait]
impl Extractor for DemoExtractor {
    type Session = ();

    async fn extract(&self, _session: &mut (), task: &Task) -> Result<Record, ExtractError> {
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(Record::new(task.id, RecordStatus::Success)
            .with_field("code", serde_json::Value::String(task.code.clone())))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let input_path = std::path::Path::new("demo_tasks.jsonl");
    if !input_path.exists() {
        let mut lines = String::new();
        for id in 1..=40 {
            lines.push_str(&format!("{{\"task_id\": {id}, \"code\": \"{id:07}-00\"}}\n"));
        }
        std::fs::write(input_path, lines)?;
    }

    let harvester: Harvester<()> = Harvester::new(
        Config::default(),
        Arc::new(DemoAuthenticator),
        Arc::new(DemoExtractor),
        Arc::new(SqliteStore::new("demo_checkpoint.db")),
    );

    // UI subscriber - renders progress and winds the pool down at the end
    let handle = harvester.handle();
    let mut ui_events = harvester.subscribe();
    tokio::spawn(async move {
        println!("[UI] Starting UI event subscriber");
        while let Ok(event) = ui_events.recv().await {
            if let Event::Progress {
                processed,
                remaining,
                items_per_min,
                eta_secs,
            } = event
            {
                // Update progress bar
                match (items_per_min, eta_secs) {
                    (Some(ipm), Some(eta)) => println!(
                        "[UI] {processed} done, {remaining} left @ {ipm:.1}/min (ETA {eta}s)"
                    ),
                    _ => println!("[UI] {processed} done, {remaining} left"),
                }
                if remaining == 0 {
                    handle.set_target_workers(0);
                }
            }
        }
    });

    // Logging subscriber - logs everything
    let mut log_events = harvester.subscribe();
    tokio::spawn(async move {
        println!("[LOG] Starting logging subscriber");
        while let Ok(event) = log_events.recv().await {
            println!("[LOG] Event: {event:?}");
        }
    });

    // Statistics subscriber - collects outcome counts
    let mut stats_events = harvester.subscribe();
    tokio::spawn(async move {
        println!("[STATS] Starting statistics collector");
        let mut succeeded: u32 = 0;
        let mut failed: u32 = 0;

        while let Ok(event) = stats_events.recv().await {
            match event {
                Event::TaskCompleted {
                    status: RecordStatus::Success,
                    ..
                } => {
                    succeeded += 1;
                }
                Event::TaskCompleted { .. } => {
                    failed += 1;
                }
                Event::CheckpointSaved { count } => {
                    println!(
                        "[STATS] Flushed {count} records (ok: {succeeded}, failed: {failed})"
                    );
                }
                _ => {}
            }
        }
    });

    println!("All subscribers started, running...");

    let summary = harvester.run(JsonlInput::new(input_path)).await?;
    println!(
        "Run finished: {} processed, {} skipped",
        summary.processed, summary.skipped
    );

    Ok(())
}
