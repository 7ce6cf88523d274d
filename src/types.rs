//! Core types for harvester

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Unique identifier for a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for i64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl PartialEq<i64> for TaskId {
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

impl PartialEq<TaskId> for i64 {
    fn eq(&self, other: &TaskId) -> bool {
        *self == other.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// One unit of extraction work
///
/// Tasks are created at seed time and immutable afterwards. A task is
/// consumed when the record produced for it has been checkpointed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,
    /// Source-side lookup code for this task (opaque to the engine)
    pub code: String,
    /// Position of the task in the input enumeration (0-based)
    pub row: u64,
}

impl Task {
    /// Create a new task
    pub fn new(id: impl Into<TaskId>, code: impl Into<String>, row: u64) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
            row,
        }
    }
}

/// Terminal outcome of one extraction attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// The record was found and extracted
    Success,
    /// The source reported the item does not exist
    NotFound,
    /// The source did not answer in time for this item
    Timeout,
    /// The item exists but its data is not accessible
    Unavailable,
    /// Extraction failed with an unexpected error
    HardError,
}

impl RecordStatus {
    /// Convert integer status code to RecordStatus enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => RecordStatus::Success,
            1 => RecordStatus::NotFound,
            2 => RecordStatus::Timeout,
            3 => RecordStatus::Unavailable,
            4 => RecordStatus::HardError,
            _ => RecordStatus::HardError, // Default to HardError for unknown status
        }
    }

    /// Convert RecordStatus enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            RecordStatus::Success => 0,
            RecordStatus::NotFound => 1,
            RecordStatus::Timeout => 2,
            RecordStatus::Unavailable => 3,
            RecordStatus::HardError => 4,
        }
    }
}

/// The structured output produced for one task
///
/// A record may be produced more than once for the same id when a task is
/// retried after a session loss; checkpoint writes are idempotent per id and
/// the last write wins.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Identifier of the task this record answers
    pub id: TaskId,
    /// Terminal outcome of the extraction attempt
    pub status: RecordStatus,
    /// Extracted named fields
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    /// Create an empty record with the given status
    pub fn new(id: impl Into<TaskId>, status: RecordStatus) -> Self {
        Self {
            id: id.into(),
            status,
            fields: serde_json::Map::new(),
        }
    }

    /// Add a named field, consuming and returning the record
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Create a hard-error record carrying the error text
    ///
    /// Used when extraction fails for a reason unrelated to the session, so
    /// the task still reaches a terminal outcome instead of being retried.
    pub fn hard_error(id: impl Into<TaskId>, message: impl Into<String>) -> Self {
        Self::new(id, RecordStatus::HardError)
            .with_field("error", serde_json::Value::String(message.into()))
    }
}

/// Throughput snapshot derived from the run so far
///
/// `items_per_min` and `eta` are only computed once enough time has elapsed
/// for the rate to be meaningful; both are `None` before that.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Records checkpointed or buffered so far in this run
    pub processed: u64,
    /// Tasks still outstanding
    pub remaining: u64,
    /// Observed throughput in items per minute
    pub items_per_min: Option<f64>,
    /// Estimated time until the remaining tasks are done
    pub eta: Option<Duration>,
}

/// Final accounting for one run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Tasks enumerated from the input, including already-processed ones
    pub total: u64,
    /// Tasks skipped because their ids were already persisted
    pub skipped: u64,
    /// Records produced and accepted during this run
    pub processed: u64,
    /// Whether the run was cut short by a stop request
    pub interrupted: bool,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

/// Event emitted during the run lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A worker task was spawned
    WorkerStarted {
        /// Worker serial number
        worker_id: u64,
    },

    /// A worker authenticated and entered its extract loop
    WorkerReady {
        /// Worker serial number
        worker_id: u64,
    },

    /// A worker could not authenticate and terminated
    WorkerLoginFailed {
        /// Worker serial number
        worker_id: u64,
        /// Login error message
        error: String,
    },

    /// A worker lost its session mid-task and is re-authenticating
    WorkerRecovering {
        /// Worker serial number
        worker_id: u64,
        /// The task that was re-queued
        task_id: TaskId,
        /// Session error message
        error: String,
    },

    /// A worker finished and released its session
    WorkerStopped {
        /// Worker serial number
        worker_id: u64,
    },

    /// A task reached a terminal outcome
    TaskCompleted {
        /// The task's identifier
        task_id: TaskId,
        /// Outcome of the extraction
        status: RecordStatus,
    },

    /// Periodic throughput update
    Progress {
        /// Records produced so far in this run
        processed: u64,
        /// Tasks still outstanding
        remaining: u64,
        /// Observed throughput in items per minute
        #[serde(skip_serializing_if = "Option::is_none")]
        items_per_min: Option<f64>,
        /// Estimated seconds until the remaining tasks are done
        #[serde(skip_serializing_if = "Option::is_none")]
        eta_secs: Option<u64>,
    },

    /// A checkpoint flush persisted buffered records
    CheckpointSaved {
        /// Number of records written in this flush
        count: usize,
    },

    /// A mid-run checkpoint flush failed; the buffer is retained
    CheckpointFailed {
        /// Store error message
        error: String,
        /// Number of records still buffered
        pending: usize,
    },

    /// Shutdown began (stop requested, fatal error, or work exhausted)
    ShutdownStarted,

    /// The run finished and the final flush completed
    RunFinished {
        /// Final accounting for the run
        summary: RunSummary,
    },
}
