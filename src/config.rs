//! Configuration types for harvester

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration
///
/// Composed of three sub-configs:
/// - [`pool`](PoolConfig): worker pool sizing and reconciliation
/// - [`worker`](WorkerConfig): per-worker polling and session recovery
/// - [`checkpoint`](CheckpointConfig): flush cadence and resume behavior
///
/// All sub-config fields are flattened for serialization, so config files
/// stay a single flat object with no nesting. Every field has a default;
/// `Config::default()` and an empty JSON object produce the same values.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker pool sizing and reconciliation
    #[serde(flatten)]
    pub pool: PoolConfig,

    /// Per-worker polling and session recovery
    #[serde(flatten)]
    pub worker: WorkerConfig,

    /// Checkpoint flushing and resume behavior
    #[serde(flatten)]
    pub checkpoint: CheckpointConfig,
}

/// Worker pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Desired number of live workers (default: 3)
    ///
    /// Changeable at runtime through the engine handle; the pool converges
    /// on the new value at its next reconciliation pass.
    #[serde(default = "default_target_workers")]
    pub target_workers: usize,

    /// Maximum number of workers logging in concurrently while the pool
    /// grows (default: 3)
    ///
    /// Growth beyond this count waits for the previous batch to finish
    /// authenticating, bounding the load on the remote login endpoint.
    #[serde(default = "default_login_batch_size")]
    pub login_batch_size: usize,

    /// Interval between pool reconciliation passes (default: 2 seconds)
    #[serde(default = "default_reconcile_interval", with = "duration_serde")]
    pub reconcile_interval: Duration,

    /// How long shutdown waits for each worker to finish (default: 5 seconds)
    #[serde(default = "default_worker_join_timeout", with = "duration_serde")]
    pub worker_join_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            target_workers: default_target_workers(),
            login_batch_size: default_login_batch_size(),
            reconcile_interval: default_reconcile_interval(),
            worker_join_timeout: default_worker_join_timeout(),
        }
    }
}

/// Per-worker configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// How long a worker waits for a task before re-checking its stop token
    /// (default: 1 second)
    #[serde(default = "default_task_poll_interval", with = "duration_serde")]
    pub task_poll_interval: Duration,

    /// Fixed delay between re-login attempts after a session loss
    /// (default: 30 seconds)
    #[serde(default = "default_relogin_backoff", with = "duration_serde")]
    pub relogin_backoff: Duration,

    /// Add random jitter to the relogin delay (default: false)
    ///
    /// When enabled the actual delay is uniform in `backoff..2*backoff`,
    /// spreading out re-login attempts when several workers lose their
    /// sessions at once.
    #[serde(default)]
    pub relogin_jitter: bool,

    /// Cap on consecutive failed re-login attempts (default: None)
    ///
    /// `None` retries forever; the worker only gives up on cancellation.
    /// `Some(n)` stops the worker after `n` failed attempts, as if its
    /// login had permanently failed.
    #[serde(default)]
    pub max_relogin_attempts: Option<u32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            task_poll_interval: default_task_poll_interval(),
            relogin_backoff: default_relogin_backoff(),
            relogin_jitter: false,
            max_relogin_attempts: None,
        }
    }
}

/// Checkpoint configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Number of buffered records that triggers a checkpoint flush
    /// (default: 15)
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    /// How long the run loop waits for a result before re-checking the
    /// termination condition (default: 1 second)
    #[serde(default = "default_result_poll_interval", with = "duration_serde")]
    pub result_poll_interval: Duration,

    /// Capacity of the worker-to-dispatcher result channel (default: 256)
    #[serde(default = "default_result_channel_capacity")]
    pub result_channel_capacity: usize,

    /// Whether to load the processed-id set at startup and skip tasks that
    /// already have a persisted record (default: true)
    #[serde(default = "default_true")]
    pub resume: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            flush_threshold: default_flush_threshold(),
            result_poll_interval: default_result_poll_interval(),
            result_channel_capacity: default_result_channel_capacity(),
            resume: true,
        }
    }
}

fn default_target_workers() -> usize {
    3
}

fn default_login_batch_size() -> usize {
    3
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_worker_join_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_task_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_relogin_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_flush_threshold() -> usize {
    15
}

fn default_result_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_result_channel_capacity() -> usize {
    256
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (integer seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
