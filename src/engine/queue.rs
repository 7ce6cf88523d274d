//! Shared task queue feeding the worker pool.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use crate::types::Task;

/// FIFO queue of pending tasks shared between the dispatcher and workers.
///
/// Pops are timeout-bounded so an idle worker regularly gets back to its
/// run loop and re-checks its cancellation token. Requeued tasks go to the
/// back; ordering across workers is not guaranteed anyway.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    notify: Notify,
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Push one task onto the back of the queue and wake a waiting worker.
    pub(crate) async fn push(&self, task: Task) {
        self.tasks.lock().await.push_back(task);
        self.notify.notify_one();
    }

    /// Pop the next task, waiting up to `wait` for one to appear.
    ///
    /// Returns `None` when the queue stayed empty for the whole window.
    pub(crate) async fn pop_timeout(&self, wait: Duration) -> Option<Task> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(task) = self.tasks.lock().await.pop_front() {
                return Some(task);
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    pub(crate) async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub(crate) async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn task(id: i64) -> Task {
        Task::new(id, format!("code-{id}"), id as u64)
    }

    #[tokio::test]
    async fn pops_in_push_order() {
        let queue = TaskQueue::new();
        queue.push(task(1)).await;
        queue.push(task(2)).await;
        queue.push(task(3)).await;

        assert_eq!(queue.len().await, 3);
        for expected in 1..=3i64 {
            let popped = queue
                .pop_timeout(Duration::from_millis(50))
                .await
                .unwrap();
            assert_eq!(popped.id, expected);
        }
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn empty_pop_times_out() {
        let queue = TaskQueue::new();
        let start = tokio::time::Instant::now();
        let popped = queue.pop_timeout(Duration::from_millis(50)).await;
        assert!(popped.is_none());
        assert!(
            start.elapsed() >= Duration::from_millis(50),
            "pop should wait out the full window before giving up"
        );
    }

    #[tokio::test]
    async fn push_wakes_a_waiting_popper() {
        let queue = Arc::new(TaskQueue::new());

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop_timeout(Duration::from_secs(5)).await })
        };

        // Give the waiter time to park on the notify
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(task(9)).await;

        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped.id, 9);
    }

    #[tokio::test]
    async fn requeued_task_goes_to_the_back() {
        let queue = TaskQueue::new();
        queue.push(task(1)).await;
        queue.push(task(2)).await;

        let first = queue.pop_timeout(Duration::from_millis(50)).await.unwrap();
        queue.push(first).await;

        let next = queue.pop_timeout(Duration::from_millis(50)).await.unwrap();
        assert_eq!(next.id, 2);
        let requeued = queue.pop_timeout(Duration::from_millis(50)).await.unwrap();
        assert_eq!(requeued.id, 1);
    }
}
