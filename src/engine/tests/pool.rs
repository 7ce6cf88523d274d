//! Pool reconciliation: batched growth, shrink ordering, shutdown joins.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::engine::pool::{PoolContext, PoolManager};
use crate::engine::queue::TaskQueue;
use crate::engine::test_helpers::{
    MockAuthenticator, MockExtractor, MockSession, drain_events, test_config, wait_until,
};
use crate::source::{Authenticator, Extractor};
use crate::types::{Event, Record};

struct PoolHarness {
    pool: Arc<PoolManager<MockSession>>,
    target: Arc<AtomicUsize>,
    cancel: CancellationToken,
    events: broadcast::Receiver<Event>,
    // Keeps the result channel open for idle workers
    _results: mpsc::Receiver<Record>,
}

fn pool_harness(
    auth: &Arc<MockAuthenticator>,
    target_workers: usize,
    login_batch_size: usize,
) -> PoolHarness {
    let mut config = test_config(target_workers, 10);
    config.pool.login_batch_size = login_batch_size;

    let (result_tx, results) = mpsc::channel(64);
    let (event_tx, events) = broadcast::channel(256);
    let target = Arc::new(AtomicUsize::new(target_workers));
    let cancel = CancellationToken::new();

    let pool = Arc::new(PoolManager::new(PoolContext {
        authenticator: Arc::clone(auth) as Arc<dyn Authenticator<Session = MockSession>>,
        extractor: Arc::new(MockExtractor::new()) as Arc<dyn Extractor<Session = MockSession>>,
        queue: Arc::new(TaskQueue::new()),
        results: result_tx,
        events: event_tx,
        config: config.pool,
        worker_config: config.worker,
        target: Arc::clone(&target),
        cancel: cancel.clone(),
    }));

    PoolHarness {
        pool,
        target,
        cancel,
        events,
        _results: results,
    }
}

async fn teardown(harness: &PoolHarness) {
    harness.cancel.cancel();
    harness.pool.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn reconcile_grows_the_pool_to_the_target() {
    let auth = Arc::new(MockAuthenticator::new());
    let harness = pool_harness(&auth, 3, 3);
    let _reconcile = harness.pool.spawn_reconcile_loop();

    let converged = wait_until(Duration::from_secs(2), async || {
        harness.pool.alive_count().await == 3
    })
    .await;
    assert!(converged, "pool should reach three live workers");
    assert_eq!(auth.login_count(), 3);

    teardown(&harness).await;
    assert_eq!(harness.pool.alive_count().await, 0);
}

#[tokio::test]
async fn growth_respects_the_login_batch_size() {
    let auth = Arc::new(MockAuthenticator::with_login_delay(Duration::from_millis(30)));
    let harness = pool_harness(&auth, 5, 2);
    let _reconcile = harness.pool.spawn_reconcile_loop();

    let converged = wait_until(Duration::from_secs(3), async || {
        harness.pool.alive_count().await == 5
    })
    .await;
    assert!(converged, "pool should reach five live workers");

    assert!(
        auth.max_concurrent_logins() <= 2,
        "no more than one batch may log in at once, saw {}",
        auth.max_concurrent_logins()
    );
    assert_eq!(auth.login_count(), 5);

    teardown(&harness).await;
}

#[tokio::test]
async fn shrink_stops_the_newest_workers_first() {
    let auth = Arc::new(MockAuthenticator::new());
    let mut harness = pool_harness(&auth, 3, 3);
    let _reconcile = harness.pool.spawn_reconcile_loop();

    let grown = wait_until(Duration::from_secs(2), async || {
        harness.pool.alive_count().await == 3
    })
    .await;
    assert!(grown);

    harness.target.store(1, Ordering::SeqCst);
    let shrunk = wait_until(Duration::from_secs(2), async || {
        harness.pool.alive_count().await == 1
    })
    .await;
    assert!(shrunk, "pool should drop to one live worker");

    let stopped: Vec<u64> = drain_events(&mut harness.events)
        .into_iter()
        .filter_map(|e| match e {
            Event::WorkerStopped { worker_id } => Some(worker_id),
            _ => None,
        })
        .collect();
    let mut stopped_sorted = stopped.clone();
    stopped_sorted.sort_unstable();
    assert_eq!(
        stopped_sorted,
        vec![2, 3],
        "the two most recently started workers go first, saw {stopped:?}"
    );
    assert_eq!(auth.logout_count(), 2, "each stopped worker released its session");

    teardown(&harness).await;
}

#[tokio::test]
async fn shutdown_joins_every_worker() {
    let auth = Arc::new(MockAuthenticator::new());
    let mut harness = pool_harness(&auth, 2, 3);
    let _reconcile = harness.pool.spawn_reconcile_loop();

    let grown = wait_until(Duration::from_secs(2), async || {
        harness.pool.alive_count().await == 2
    })
    .await;
    assert!(grown);

    teardown(&harness).await;

    assert_eq!(harness.pool.alive_count().await, 0);
    assert_eq!(auth.logout_count(), 2);

    let stopped = drain_events(&mut harness.events)
        .into_iter()
        .filter(|e| matches!(e, Event::WorkerStopped { .. }))
        .count();
    assert_eq!(stopped, 2);
}

#[tokio::test]
async fn dead_worker_is_replaced_on_a_later_reconcile() {
    let auth = Arc::new(MockAuthenticator::new());
    auth.fail_next_logins(1);
    let mut harness = pool_harness(&auth, 1, 3);
    let _reconcile = harness.pool.spawn_reconcile_loop();

    let replaced = wait_until(Duration::from_secs(2), async || {
        auth.login_count() >= 2 && harness.pool.alive_count().await == 1
    })
    .await;
    assert!(replaced, "the pool should try again after the failed login");

    let events = drain_events(&mut harness.events);
    assert!(
        events
            .iter()
            .any(|e| matches!(e, Event::WorkerLoginFailed { worker_id: 1, .. })),
        "the first worker's login failure should be reported"
    );

    teardown(&harness).await;
}
