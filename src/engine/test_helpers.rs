//! Scripted collaborators for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{AuthError, ExtractError, InputError};
use crate::input::InputProvider;
use crate::source::{Authenticator, Extractor};
use crate::types::{Event, Record, RecordStatus, Task, TaskId};

/// Session handle issued by [`MockAuthenticator`]. The serial number makes
/// it possible to tell a re-established session from the original one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MockSession {
    pub(crate) serial: u32,
}

/// Authenticator with scripted failures and call counters.
#[derive(Default)]
pub(crate) struct MockAuthenticator {
    login_delay: Duration,
    fail_logins: AtomicU32,
    logins: AtomicU32,
    logouts: AtomicU32,
    reaps: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    next_serial: AtomicU32,
}

impl MockAuthenticator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make every login take `delay`, so concurrent logins overlap and the
    /// batch limit becomes observable.
    pub(crate) fn with_login_delay(delay: Duration) -> Self {
        Self {
            login_delay: delay,
            ..Self::default()
        }
    }

    /// Fail the next `n` logins before succeeding again.
    pub(crate) fn fail_next_logins(&self, n: u32) {
        self.fail_logins.store(n, Ordering::SeqCst);
    }

    /// Fail every login from now on.
    pub(crate) fn fail_all_logins(&self) {
        self.fail_logins.store(u32::MAX, Ordering::SeqCst);
    }

    pub(crate) fn login_count(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    pub(crate) fn logout_count(&self) -> u32 {
        self.logouts.load(Ordering::SeqCst)
    }

    pub(crate) fn reap_count(&self) -> u32 {
        self.reaps.load(Ordering::SeqCst)
    }

    /// Highest number of logins that were ever in flight at the same time.
    pub(crate) fn max_concurrent_logins(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for MockAuthenticator {
    type Session = MockSession;

    async fn login(&self) -> Result<MockSession, AuthError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.login_delay.is_zero() {
            tokio::time::sleep(self.login_delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.logins.fetch_add(1, Ordering::SeqCst);

        // Decrement-if-positive: consume one scripted failure if any remain
        let scripted_failure = self
            .fail_logins
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure {
            return Err(AuthError::LoginFailed("scripted login failure".to_string()));
        }

        Ok(MockSession {
            serial: self.next_serial.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn logout(&self, _session: MockSession) {
        self.logouts.fetch_add(1, Ordering::SeqCst);
    }

    async fn reap_orphaned_sessions(&self) {
        self.reaps.fetch_add(1, Ordering::SeqCst);
    }
}

/// Extractor that succeeds by default and can be scripted per task id.
#[derive(Default)]
pub(crate) struct MockExtractor {
    extract_delay: Duration,
    lose_session_once: Mutex<HashSet<TaskId>>,
    fail_always: Mutex<HashMap<TaskId, String>>,
    calls: Mutex<HashMap<TaskId, u32>>,
}

impl MockExtractor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make every extraction take `delay`.
    pub(crate) fn with_extract_delay(delay: Duration) -> Self {
        Self {
            extract_delay: delay,
            ..Self::default()
        }
    }

    /// Report a lost session on the first extraction of `id`; later
    /// attempts succeed.
    pub(crate) async fn lose_session_once(&self, id: impl Into<TaskId>) {
        self.lose_session_once.lock().await.insert(id.into());
    }

    /// Fail every extraction of `id` with `reason`.
    pub(crate) async fn fail_task(&self, id: impl Into<TaskId>, reason: &str) {
        self.fail_always
            .lock()
            .await
            .insert(id.into(), reason.to_string());
    }

    /// Number of extraction attempts seen for `id`.
    pub(crate) async fn calls_for(&self, id: impl Into<TaskId>) -> u32 {
        self.calls
            .lock()
            .await
            .get(&id.into())
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    type Session = MockSession;

    async fn extract(
        &self,
        session: &mut MockSession,
        task: &Task,
    ) -> Result<Record, ExtractError> {
        {
            let mut calls = self.calls.lock().await;
            *calls.entry(task.id).or_insert(0) += 1;
        }

        if !self.extract_delay.is_zero() {
            tokio::time::sleep(self.extract_delay).await;
        }

        if self.lose_session_once.lock().await.remove(&task.id) {
            return Err(ExtractError::SessionLost(format!(
                "connection dropped on task {}",
                task.id
            )));
        }

        if let Some(reason) = self.fail_always.lock().await.get(&task.id) {
            return Err(ExtractError::Failed(reason.clone()));
        }

        Ok(Record::new(task.id, RecordStatus::Success)
            .with_field("code", serde_json::Value::String(task.code.clone()))
            .with_field("session", serde_json::json!(session.serial)))
    }
}

/// Input provider backed by a fixed task list.
pub(crate) struct VecInput {
    tasks: Vec<Task>,
    cursor: usize,
    opened: bool,
    fingerprint: Option<String>,
    fail_open: Option<String>,
}

impl VecInput {
    /// Input with tasks numbered `1..=count`.
    pub(crate) fn new(count: i64) -> Self {
        let tasks = (1..=count)
            .map(|id| Task::new(id, format!("code-{id:03}"), id as u64))
            .collect();
        Self::from_tasks(tasks)
    }

    pub(crate) fn from_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks,
            cursor: 0,
            opened: false,
            fingerprint: None,
            fail_open: None,
        }
    }

    pub(crate) fn with_fingerprint(mut self, fingerprint: &str) -> Self {
        self.fingerprint = Some(fingerprint.to_string());
        self
    }

    pub(crate) fn failing_open(mut self, reason: &str) -> Self {
        self.fail_open = Some(reason.to_string());
        self
    }
}

#[async_trait]
impl InputProvider for VecInput {
    async fn open(&mut self) -> Result<(), InputError> {
        if let Some(reason) = &self.fail_open {
            return Err(InputError::Open(reason.clone()));
        }
        self.opened = true;
        self.cursor = 0;
        Ok(())
    }

    async fn next_item(&mut self) -> Result<Option<Task>, InputError> {
        if !self.opened {
            return Ok(None);
        }
        let task = self.tasks.get(self.cursor).cloned();
        if task.is_some() {
            self.cursor += 1;
        }
        Ok(task)
    }

    async fn close(&mut self) {
        self.opened = false;
    }

    async fn fingerprint(&self) -> Result<Option<String>, InputError> {
        Ok(self.fingerprint.clone())
    }
}

/// Config with intervals shrunk so tests converge quickly.
pub(crate) fn test_config(target_workers: usize, flush_threshold: usize) -> Config {
    let mut config = Config::default();
    config.pool.target_workers = target_workers;
    config.pool.reconcile_interval = Duration::from_millis(25);
    config.pool.worker_join_timeout = Duration::from_secs(2);
    config.worker.task_poll_interval = Duration::from_millis(20);
    config.worker.relogin_backoff = Duration::from_millis(40);
    config.checkpoint.flush_threshold = flush_threshold;
    config.checkpoint.result_poll_interval = Duration::from_millis(20);
    config
}

/// Poll `check` every few milliseconds until it holds or `deadline` passes.
pub(crate) async fn wait_until<F>(deadline: Duration, mut check: F) -> bool
where
    F: AsyncFnMut() -> bool,
{
    let start = tokio::time::Instant::now();
    loop {
        if check().await {
            return true;
        }
        if start.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Pull every event buffered on the subscription so far.
pub(crate) fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wind the worker target down to zero once `completions` tasks have
/// completed, letting the run finish on its own.
pub(crate) fn stop_after_completions<S: Send + 'static>(
    harvester: &crate::engine::Harvester<S>,
    completions: usize,
) {
    let mut rx = harvester.subscribe();
    let handle = harvester.handle();
    tokio::spawn(async move {
        let mut seen = 0;
        while let Ok(event) = rx.recv().await {
            if matches!(event, Event::TaskCompleted { .. }) {
                seen += 1;
                if seen == completions {
                    handle.set_target_workers(0);
                    break;
                }
            }
        }
    });
}
