//! Task input sources
//!
//! An input provider enumerates the tasks a run should process. The engine
//! consumes it exactly once during the seed phase: `open`, then `next_item`
//! until exhaustion, then `close`. Providers are not restartable.

use crate::error::InputError;
use crate::types::{Task, TaskId};
use crate::utils::fingerprint_file;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

/// Enumerates the tasks a run should process
#[async_trait]
pub trait InputProvider: Send {
    /// Prepare the source for enumeration
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be opened. Seed-phase errors
    /// fail the run before any worker starts.
    async fn open(&mut self) -> Result<(), InputError>;

    /// Produce the next task, or `None` when the input is exhausted
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or a record cannot be
    /// parsed. Seed-phase errors fail the run before any worker starts.
    async fn next_item(&mut self) -> Result<Option<Task>, InputError>;

    /// Release the source
    async fn close(&mut self);

    /// Content identity of this input for resume gating
    ///
    /// A store checkpointed against one input must not silently resume a
    /// run over a different one; the engine compares this value against the
    /// fingerprint persisted in the store. `None` (the default) means the
    /// input has no stable identity and the check is skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity cannot be computed.
    async fn fingerprint(&self) -> Result<Option<String>, InputError> {
        Ok(None)
    }
}

/// Expected shape of one input line
#[derive(Debug, Deserialize)]
struct JsonlRow {
    task_id: i64,
    code: String,
}

/// Reads tasks from a JSON-lines file
///
/// One JSON object per line with a `task_id` and a `code` field; unknown
/// fields are ignored and blank lines are skipped. Row positions are
/// assigned in file order. The fingerprint is the SHA-256 of the file
/// content.
///
/// ```text
/// {"task_id": 1, "code": "0001234-55"}
/// {"task_id": 2, "code": "0001240-81"}
/// ```
pub struct JsonlInput {
    path: PathBuf,
    lines: Option<Lines<BufReader<tokio::fs::File>>>,
    line_no: u64,
    row: u64,
}

impl JsonlInput {
    /// Create an input reading from `path`
    ///
    /// The file is not touched until [`InputProvider::open`] is called.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lines: None,
            line_no: 0,
            row: 0,
        }
    }

    /// Path this input reads from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl InputProvider for JsonlInput {
    async fn open(&mut self) -> Result<(), InputError> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| InputError::Open(format!("{}: {}", self.path.display(), e)))?;
        self.lines = Some(BufReader::new(file).lines());
        self.line_no = 0;
        self.row = 0;
        Ok(())
    }

    async fn next_item(&mut self) -> Result<Option<Task>, InputError> {
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };

        loop {
            let Some(line) = lines.next_line().await? else {
                return Ok(None);
            };
            self.line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let parsed: JsonlRow =
                serde_json::from_str(trimmed).map_err(|e| InputError::Malformed {
                    line: self.line_no,
                    reason: e.to_string(),
                })?;

            let task = Task::new(TaskId::new(parsed.task_id), parsed.code, self.row);
            self.row += 1;
            return Ok(Some(task));
        }
    }

    async fn close(&mut self) {
        self.lines = None;
    }

    async fn fingerprint(&self) -> Result<Option<String>, InputError> {
        let digest = fingerprint_file(&self.path).await?;
        Ok(Some(digest))
    }
}
