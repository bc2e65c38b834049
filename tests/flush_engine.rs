//! Flush engine integration tests
//!
//! Exercises the orchestrator end to end against a real in-memory store:
//! - The offline -> online happy path
//! - Retry cap and permanent-failure short-circuit
//! - Single-flight guard under racing triggers
//! - Reachability interruption mid-flush
//! - Snapshot isolation for enqueues that land during a flush

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch, Notify, Semaphore};

use campus_sync::error::RemoteError;
use campus_sync::models::ActionKind;
use campus_sync::store::Store;
use campus_sync::sync::{
    FlushConfig, FlushOutcome, FlushStats, RemoteExecutor, RetryPolicy, SyncOrchestrator,
};

use common::{create_test_store, start_engine, wait_for_status, RecordingExecutor};

/// Test 1: The concrete scenario - enqueue while offline, flush once online
#[tokio::test]
async fn test_offline_enqueue_then_online_flush() {
    let store = create_test_store().await;
    let payload = br#"{"studentId":"S1","date":"2024-01-10"}"#.to_vec();
    store
        .enqueue(ActionKind::MarkAttendance, payload.clone())
        .await
        .unwrap();

    let executor = RecordingExecutor::always_ok();
    let mut engine = start_engine(Arc::clone(&store), Arc::clone(&executor), false).await;

    // Offline: the action sits in the queue
    let status = wait_for_status(&mut engine.status, |s| s.pending_items == 1).await;
    assert!(!status.is_syncing);
    assert!(status.last_sync_at.is_none());

    // Going online triggers the flush
    engine.reach_tx.send(true).unwrap();
    let status = wait_for_status(&mut engine.status, |s| s.pending_items == 0).await;
    assert!(status.last_sync_at.is_some());
    assert_eq!(status.failed_items, 0);

    // Delivered once, with the exact payload, and pruned from the store
    assert_eq!(
        executor.calls(),
        vec![(ActionKind::MarkAttendance, payload)]
    );
    assert!(store.list_pending().await.unwrap().is_empty());
    assert!(store.list_failed().await.unwrap().is_empty());

    engine.shutdown().await;
}

/// Test 2: An always-transient action fails after exactly four attempts
#[tokio::test]
async fn test_retry_cap_exactly_four_attempts() {
    let store = create_test_store().await;
    store
        .enqueue(ActionKind::SendMessage, b"hello".to_vec())
        .await
        .unwrap();

    let executor = RecordingExecutor::always_err(RemoteError::ServerError(503));
    let engine = start_engine(Arc::clone(&store), Arc::clone(&executor), true).await;

    // Flushes 1-3: the action stays pending with a bumped retry count
    for expected_count in 1..=3u32 {
        let outcome = engine.flush.flush_now().await.unwrap();
        assert_eq!(
            outcome,
            FlushOutcome::Completed(FlushStats {
                sent: 0,
                retried: 1,
                failed: 0
            })
        );

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry_count, expected_count);
    }

    // Flush 4: the fourth transient failure gives up
    let outcome = engine.flush.flush_now().await.unwrap();
    assert_eq!(
        outcome,
        FlushOutcome::Completed(FlushStats {
            sent: 0,
            retried: 0,
            failed: 1
        })
    );

    let failed = store.list_failed().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 3);
    assert_eq!(
        failed[0].last_error.as_deref(),
        Some("Server error: HTTP 503")
    );

    // Flush 5: nothing pending, never a fifth attempt
    let outcome = engine.flush.flush_now().await.unwrap();
    assert_eq!(outcome, FlushOutcome::Empty);
    assert_eq!(executor.call_count(), 4);

    engine.shutdown().await;
}

/// Test 3: A permanent failure short-circuits on the first attempt
#[tokio::test]
async fn test_permanent_failure_short_circuits() {
    let store = create_test_store().await;
    store
        .enqueue(ActionKind::SubmitAssignment, b"{}".to_vec())
        .await
        .unwrap();

    let executor = RecordingExecutor::always_err(RemoteError::Rejected(422));
    let engine = start_engine(Arc::clone(&store), Arc::clone(&executor), true).await;

    let outcome = engine.flush.flush_now().await.unwrap();
    assert_eq!(
        outcome,
        FlushOutcome::Completed(FlushStats {
            sent: 0,
            retried: 0,
            failed: 1
        })
    );

    let failed = store.list_failed().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 0);
    assert_eq!(executor.call_count(), 1);

    engine.shutdown().await;
}

/// Executor whose calls block until the test releases them
struct GatedExecutor {
    entered: Notify,
    gate: Semaphore,
}

impl GatedExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            gate: Semaphore::new(0),
        })
    }
}

#[async_trait]
impl RemoteExecutor for GatedExecutor {
    async fn execute(&self, _kind: ActionKind, _payload: &[u8]) -> Result<(), RemoteError> {
        self.entered.notify_one();
        self.gate
            .acquire()
            .await
            .expect("Gate closed unexpectedly")
            .forget();
        Ok(())
    }
}

/// Test 4: Two rapid triggers produce exactly one active flush
#[tokio::test]
async fn test_single_flight_guard() {
    let store = create_test_store().await;
    store
        .enqueue(ActionKind::SendMessage, b"hi".to_vec())
        .await
        .unwrap();

    let executor = GatedExecutor::new();
    let engine = start_engine(Arc::clone(&store), Arc::clone(&executor), true).await;

    let first_handle = engine.flush.clone();
    let first = tokio::spawn(async move { first_handle.flush_now().await });

    // Wait until the first flush is inside the executor call
    executor.entered.notified().await;

    // The second trigger is a no-op while is_syncing holds
    let second = engine.flush.flush_now().await.unwrap();
    assert_eq!(second, FlushOutcome::AlreadyRunning);

    executor.gate.add_permits(1);
    let first = first.await.unwrap().unwrap();
    assert_eq!(
        first,
        FlushOutcome::Completed(FlushStats {
            sent: 1,
            retried: 0,
            failed: 0
        })
    );

    engine.shutdown().await;
}

/// Test 5: Actions enqueued during a flush wait for the next snapshot
#[tokio::test]
async fn test_enqueue_during_flush_waits_for_next_snapshot() {
    let store = create_test_store().await;
    store
        .enqueue(ActionKind::MarkAttendance, b"a".to_vec())
        .await
        .unwrap();

    let executor = GatedExecutor::new();
    let engine = start_engine(Arc::clone(&store), Arc::clone(&executor), true).await;

    let first_handle = engine.flush.clone();
    let first = tokio::spawn(async move { first_handle.flush_now().await });
    executor.entered.notified().await;

    // Enqueue never blocks on the in-progress flush
    let b = store
        .enqueue(ActionKind::SendMessage, b"b".to_vec())
        .await
        .unwrap();

    executor.gate.add_permits(1);
    let first = first.await.unwrap().unwrap();
    assert_eq!(
        first,
        FlushOutcome::Completed(FlushStats {
            sent: 1,
            retried: 0,
            failed: 0
        })
    );

    // The late action is untouched by the first flush
    let pending = store.list_pending().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, b);

    executor.gate.add_permits(1);
    let second = engine.flush.flush_now().await.unwrap();
    assert_eq!(
        second,
        FlushOutcome::Completed(FlushStats {
            sent: 1,
            retried: 0,
            failed: 0
        })
    );
    assert!(store.list_pending().await.unwrap().is_empty());

    engine.shutdown().await;
}

/// Executor that drops reachability after a fixed number of deliveries
struct OfflineAfter {
    limit: u32,
    count: AtomicU32,
    reach_tx: Arc<watch::Sender<bool>>,
}

#[async_trait]
impl RemoteExecutor for OfflineAfter {
    async fn execute(&self, _kind: ActionKind, _payload: &[u8]) -> Result<(), RemoteError> {
        let delivered = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if delivered == self.limit {
            let _ = self.reach_tx.send(false);
        }
        Ok(())
    }
}

/// Test 6: Reachability dropping after action 2 of 5 leaves 3-5 pending, and
/// the next flush sends exactly 3-5 in order
#[tokio::test]
async fn test_reachability_drop_mid_flush() {
    let store = create_test_store().await;
    let mut ids = Vec::new();
    for i in 1..=5u8 {
        ids.push(
            store
                .enqueue(ActionKind::SendMessage, vec![i])
                .await
                .unwrap(),
        );
    }

    let (reach_tx, reach_rx) = watch::channel(true);
    let reach_tx = Arc::new(reach_tx);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let executor = Arc::new(OfflineAfter {
        limit: 2,
        count: AtomicU32::new(0),
        reach_tx: Arc::clone(&reach_tx),
    });

    let orchestrator = SyncOrchestrator::new(
        FlushConfig {
            flush_interval_secs: 3600,
            jitter_secs: 0,
            call_timeout_secs: 5,
        },
        Arc::clone(&store),
        Arc::clone(&executor),
        RetryPolicy::default(),
        reach_rx,
        shutdown_rx,
    );
    let flush = orchestrator.flush_handle();
    let mut status = orchestrator.subscribe_status();
    let task = tokio::spawn(orchestrator.run());

    let outcome = flush.flush_now().await.unwrap();
    assert_eq!(
        outcome,
        FlushOutcome::Interrupted(FlushStats {
            sent: 2,
            retried: 0,
            failed: 0
        })
    );

    // Actions 1-2 are pruned, 3-5 remain pending in order
    let pending = store.list_pending().await.unwrap();
    let remaining: Vec<i64> = pending.iter().map(|a| a.id).collect();
    assert_eq!(remaining, &ids[2..]);

    // Back online: the orchestrator flushes the remainder on its own
    reach_tx.send(true).unwrap();
    wait_for_status(&mut status, |s| s.pending_items == 0 && !s.is_syncing).await;

    assert_eq!(executor.count.load(Ordering::SeqCst), 5);
    assert!(store.list_pending().await.unwrap().is_empty());

    let _ = shutdown_tx.send(());
    let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
}

/// Test 7: Flushing an empty queue updates only the sync timestamp
#[tokio::test]
async fn test_empty_flush_updates_timestamp_only() {
    let store = create_test_store().await;
    let executor = RecordingExecutor::always_ok();
    let mut engine = start_engine(Arc::clone(&store), executor, true).await;

    let outcome = engine.flush.flush_now().await.unwrap();
    assert_eq!(outcome, FlushOutcome::Empty);

    let status = wait_for_status(&mut engine.status, |s| s.last_sync_at.is_some()).await;
    assert_eq!(status.pending_items, 0);
    assert_eq!(status.failed_items, 0);
    assert!(!status.is_syncing);

    engine.shutdown().await;
}

/// Test 8: The flush handle reports a stopped engine
#[tokio::test]
async fn test_flush_handle_after_shutdown() {
    let store = create_test_store().await;
    let executor = RecordingExecutor::always_ok();
    let engine = start_engine(store, executor, true).await;

    let flush = engine.flush.clone();
    engine.shutdown().await;

    assert!(flush.flush_now().await.is_err());
}
