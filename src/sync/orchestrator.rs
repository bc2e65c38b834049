//! Single-flight flush orchestrator
//!
//! The orchestrator owns the flush loop that drains the offline action queue
//! against the remote executor. Flushes are triggered by a periodic timer,
//! by reachability coming back, or manually through a [`FlushHandle`]; the
//! `is_syncing` flag is the single-flight guard between them. Actions are
//! processed in enqueue order from a snapshot taken at flush start; a
//! reachability drop interrupts the flush at the next action boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{FailureKind, RemoteError, StoreError};
use crate::models::{QueuedAction, SyncStatus};
use crate::store::Store;
use crate::sync::executor::RemoteExecutor;
use crate::sync::retry::RetryPolicy;

/// Configuration for the flush orchestrator
#[derive(Debug, Clone)]
pub struct FlushConfig {
    /// Periodic flush interval (seconds)
    pub flush_interval_secs: u64,
    /// Jitter added to periodic flushes (seconds) - spreads client load
    pub jitter_secs: u64,
    /// Per-action remote call timeout (seconds); exceeding it counts as a
    /// transient failure and consumes one retry
    pub call_timeout_secs: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 120,
            jitter_secs: 10,
            call_timeout_secs: 30,
        }
    }
}

/// What a single flush did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Actions delivered and pruned
    pub sent: u32,
    /// Actions left pending for the next flush after a transient failure
    pub retried: u32,
    /// Actions transitioned to failed
    pub failed: u32,
}

/// Outcome of a flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The snapshot was fully processed
    Completed(FlushStats),
    /// Reachability dropped mid-flush; remaining actions stay pending
    Interrupted(FlushStats),
    /// The queue was empty; only the sync timestamp was updated
    Empty,
    /// Another flush was already running; this trigger was a no-op
    AlreadyRunning,
}

/// What woke the flush loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushTrigger {
    Timer,
    Reachability,
    Manual,
}

impl std::fmt::Display for FlushTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlushTrigger::Timer => write!(f, "timer"),
            FlushTrigger::Reachability => write!(f, "reachability"),
            FlushTrigger::Manual => write!(f, "manual"),
        }
    }
}

/// Returned by [`FlushHandle::flush_now`] when the orchestrator is gone
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Sync engine is not running")]
pub struct EngineStopped;

/// Manual flush request
struct FlushRequest {
    response: mpsc::Sender<FlushOutcome>,
}

/// Handle for triggering manual flushes
///
/// Idempotent: while a flush is active the trigger is a no-op and resolves
/// to [`FlushOutcome::AlreadyRunning`].
#[derive(Clone)]
pub struct FlushHandle {
    tx: mpsc::Sender<FlushRequest>,
    is_syncing: Arc<AtomicBool>,
}

impl FlushHandle {
    /// Trigger a flush and wait for its outcome
    pub async fn flush_now(&self) -> Result<FlushOutcome, EngineStopped> {
        if self.is_syncing.load(Ordering::SeqCst) {
            return Ok(FlushOutcome::AlreadyRunning);
        }

        let (response_tx, mut response_rx) = mpsc::channel(1);

        self.tx
            .send(FlushRequest {
                response: response_tx,
            })
            .await
            .map_err(|_| EngineStopped)?;

        response_rx.recv().await.ok_or(EngineStopped)
    }
}

/// The sync engine's core state machine
///
/// Owns the single background worker that performs all queue transitions;
/// `enqueue` never goes through here and never blocks on a flush.
pub struct SyncOrchestrator<S, E> {
    config: FlushConfig,
    store: Arc<S>,
    executor: Arc<E>,
    policy: RetryPolicy,
    reachability: watch::Receiver<bool>,
    status_tx: watch::Sender<SyncStatus>,
    is_syncing: Arc<AtomicBool>,
    last_sync_at: Option<DateTime<Utc>>,
    flush_tx: mpsc::Sender<FlushRequest>,
    flush_rx: mpsc::Receiver<FlushRequest>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl<S, E> SyncOrchestrator<S, E>
where
    S: Store,
    E: RemoteExecutor,
{
    /// Create a new orchestrator
    ///
    /// # Arguments
    ///
    /// * `config` - Flush timing configuration
    /// * `store` - The durable action store
    /// * `executor` - Remote executor performing the per-action network call
    /// * `policy` - Bounded retry policy
    /// * `reachability` - Settled reachability state from the monitor
    /// * `shutdown_rx` - Broadcast receiver for shutdown signal
    pub fn new(
        config: FlushConfig,
        store: Arc<S>,
        executor: Arc<E>,
        policy: RetryPolicy,
        reachability: watch::Receiver<bool>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let (flush_tx, flush_rx) = mpsc::channel(32);
        let (status_tx, _) = watch::channel(SyncStatus::default());

        Self {
            config,
            store,
            executor,
            policy,
            reachability,
            status_tx,
            is_syncing: Arc::new(AtomicBool::new(false)),
            last_sync_at: None,
            flush_tx,
            flush_rx,
            shutdown_rx,
        }
    }

    /// Get a handle for triggering manual flushes
    pub fn flush_handle(&self) -> FlushHandle {
        FlushHandle {
            tx: self.flush_tx.clone(),
            is_syncing: Arc::clone(&self.is_syncing),
        }
    }

    /// Subscribe to the observable sync status
    ///
    /// The receiver observes the current status immediately via `borrow()`
    /// and wakes after every flush transition.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Run the orchestrator until shutdown
    pub async fn run(mut self) {
        info!(
            interval_secs = self.config.flush_interval_secs,
            "Starting sync orchestrator"
        );

        // Surface counts persisted by a previous process before any flush
        if let Err(e) = self.publish_status().await {
            error!(error = %e, "Failed to read initial queue counts");
        }

        let period = Duration::from_secs(self.config.flush_interval_secs);
        let mut timer = interval_at(Instant::now() + period, period);
        let mut reach_rx = self.reachability.clone();
        let mut reach_alive = true;

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping sync orchestrator");
                    break;
                }
                _ = timer.tick() => {
                    // Spread periodic flushes so a fleet of clients does not
                    // stampede the server at the same instant
                    let jitter = if self.config.jitter_secs > 0 {
                        rand::thread_rng().gen_range(0..self.config.jitter_secs)
                    } else {
                        0
                    };
                    if jitter > 0 {
                        tokio::time::sleep(Duration::from_secs(jitter)).await;
                    }

                    self.flush(FlushTrigger::Timer).await;
                }
                changed = reach_rx.changed(), if reach_alive => {
                    match changed {
                        Ok(()) => {
                            let online = *reach_rx.borrow_and_update();
                            if online {
                                info!("Reachability restored, flushing");
                                self.flush(FlushTrigger::Reachability).await;
                            } else {
                                debug!("Reachability lost");
                            }
                        }
                        Err(_) => {
                            warn!("Reachability monitor gone, periodic flushes only");
                            reach_alive = false;
                        }
                    }
                }
                Some(request) = self.flush_rx.recv() => {
                    let outcome = self.flush(FlushTrigger::Manual).await;
                    let _ = request.response.send(outcome).await;
                }
            }
        }

        info!("Sync orchestrator stopped");
    }

    /// Run one flush pass
    async fn flush(&mut self, trigger: FlushTrigger) -> FlushOutcome {
        // Single-flight guard: compare-and-set, never read-then-write
        if self
            .is_syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(trigger = %trigger, "Flush already running, trigger ignored");
            return FlushOutcome::AlreadyRunning;
        }

        if let Err(e) = self.publish_status().await {
            warn!(error = %e, "Failed to publish syncing status");
        }

        let snapshot = match self.store.list_pending().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "Failed to snapshot pending actions");
                self.finish_flush(trigger, FlushStats::default(), true)
                    .await;
                return FlushOutcome::Interrupted(FlushStats::default());
            }
        };

        if snapshot.is_empty() {
            debug!(trigger = %trigger, "Queue empty, nothing to flush");
            self.finish_flush(trigger, FlushStats::default(), false)
                .await;
            return FlushOutcome::Empty;
        }

        debug!(trigger = %trigger, actions = snapshot.len(), "Flush started");

        let mut stats = FlushStats::default();
        let mut interrupted = false;

        for action in snapshot {
            // Checked at the action boundary only: an in-flight call is
            // allowed to complete or time out first
            if !*self.reachability.borrow() {
                warn!(action_id = action.id, "Reachability lost, interrupting flush");
                interrupted = true;
                break;
            }

            self.process_action(&action, &mut stats).await;
        }

        self.finish_flush(trigger, stats, interrupted).await;

        if interrupted {
            FlushOutcome::Interrupted(stats)
        } else {
            FlushOutcome::Completed(stats)
        }
    }

    /// Execute one action and apply its status transition
    ///
    /// Remote failures never propagate out of the flush loop; a store fault
    /// on this record fails the record, not the flush.
    async fn process_action(&self, action: &QueuedAction, stats: &mut FlushStats) {
        let call_timeout = Duration::from_secs(self.config.call_timeout_secs);

        let result = match tokio::time::timeout(
            call_timeout,
            self.executor.execute(action.kind, &action.payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        };

        match result {
            Ok(()) => match self.store.mark_succeeded(action.id).await {
                Ok(()) => {
                    debug!(action_id = action.id, kind = %action.kind, "Action delivered");
                    stats.sent += 1;
                }
                Err(e) => {
                    // Delivered but unrecordable; failing it beats silently
                    // re-sending a duplicate on the next flush
                    warn!(
                        action_id = action.id,
                        error = %e,
                        "Delivered action could not be recorded, marking failed"
                    );
                    self.mark_failed_best_effort(action, format!("Store error: {}", e))
                        .await;
                    stats.failed += 1;
                }
            },
            Err(err) => {
                let failure = err.failure_kind();
                if self.policy.should_retry(action.retry_count, failure) {
                    let next_count = action.retry_count + 1;
                    debug!(
                        action_id = action.id,
                        retry_count = next_count,
                        error = %err,
                        "Transient failure, will retry on next flush"
                    );
                    match self
                        .store
                        .bump_retry(action.id, next_count, Some(err.to_string()))
                        .await
                    {
                        Ok(()) => stats.retried += 1,
                        Err(e) => {
                            warn!(action_id = action.id, error = %e, "Failed to record retry");
                            self.mark_failed_best_effort(action, format!("Store error: {}", e))
                                .await;
                            stats.failed += 1;
                        }
                    }
                } else {
                    warn!(
                        action_id = action.id,
                        kind = %action.kind,
                        retry_count = action.retry_count,
                        permanent = matches!(failure, FailureKind::Permanent),
                        error = %err,
                        "Giving up on action"
                    );
                    self.mark_failed_best_effort(action, err.to_string()).await;
                    stats.failed += 1;
                }
            }
        }
    }

    async fn mark_failed_best_effort(&self, action: &QueuedAction, reason: String) {
        if let Err(e) = self
            .store
            .mark_failed(action.id, action.retry_count, Some(reason))
            .await
        {
            error!(action_id = action.id, error = %e, "Failed to mark action as failed");
        }
    }

    /// Close out a flush attempt: prune, stamp, clear the guard, publish
    async fn finish_flush(&mut self, trigger: FlushTrigger, stats: FlushStats, interrupted: bool) {
        // Prune even on interruption so delivered actions never linger
        match self.store.prune_succeeded().await {
            Ok(pruned) if pruned > 0 => debug!(pruned, "Pruned succeeded actions"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to prune succeeded actions"),
        }

        self.last_sync_at = Some(Utc::now());
        self.is_syncing.store(false, Ordering::SeqCst);

        if let Err(e) = self.publish_status().await {
            warn!(error = %e, "Failed to publish sync status");
        }

        info!(
            trigger = %trigger,
            sent = stats.sent,
            retried = stats.retried,
            failed = stats.failed,
            interrupted,
            "Flush finished"
        );
    }

    /// Recompute the status snapshot from the store and publish it
    async fn publish_status(&self) -> Result<(), StoreError> {
        let counts = self.store.queue_counts().await?;
        let status = SyncStatus::from_counts(
            counts,
            self.is_syncing.load(Ordering::SeqCst),
            self.last_sync_at,
        );
        self.status_tx.send_replace(status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::ActionKind;
    use crate::store::{MockStore, SqliteStore};
    use crate::sync::executor::MockRemoteExecutor;
    use async_trait::async_trait;

    fn test_config() -> FlushConfig {
        FlushConfig {
            flush_interval_secs: 3600,
            jitter_secs: 0,
            call_timeout_secs: 5,
        }
    }

    fn online_watch(online: bool) -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(online)
    }

    // Test 1: A store snapshot failure interrupts the flush but still stamps
    // the attempt
    #[tokio::test]
    async fn test_snapshot_failure_interrupts() {
        let mut store = MockStore::new();
        store
            .expect_queue_counts()
            .returning(|| Ok(Default::default()));
        store
            .expect_list_pending()
            .times(1)
            .returning(|| Err(StoreError::NotFound));
        store.expect_prune_succeeded().returning(|| Ok(0));

        let executor = MockRemoteExecutor::new();
        let (_reach_tx, reach_rx) = online_watch(true);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let mut orchestrator = SyncOrchestrator::new(
            test_config(),
            Arc::new(store),
            Arc::new(executor),
            RetryPolicy::default(),
            reach_rx,
            shutdown_rx,
        );
        let status_rx = orchestrator.subscribe_status();

        let outcome = orchestrator.flush(FlushTrigger::Manual).await;
        assert_eq!(outcome, FlushOutcome::Interrupted(FlushStats::default()));
        assert!(status_rx.borrow().last_sync_at.is_some());
        assert!(!status_rx.borrow().is_syncing);
    }

    fn pending_action(id: i64) -> QueuedAction {
        QueuedAction {
            id,
            kind: ActionKind::SendMessage,
            payload: b"{}".to_vec(),
            enqueued_at: Utc::now(),
            retry_count: 0,
            status: crate::models::ActionStatus::Pending,
            last_error: None,
        }
    }

    // Test 2: A store fault while recording one result fails that record and
    // does not abort the rest of the flush
    #[tokio::test]
    async fn test_store_fault_on_one_record_continues() {
        let mut store = MockStore::new();
        store
            .expect_queue_counts()
            .returning(|| Ok(Default::default()));
        store
            .expect_list_pending()
            .times(1)
            .returning(|| Ok(vec![pending_action(1), pending_action(2)]));
        store
            .expect_mark_succeeded()
            .withf(|id| *id == 1)
            .times(1)
            .returning(|_| Err(StoreError::Corrupted("disk error".to_string())));
        store
            .expect_mark_failed()
            .withf(|id, _, _| *id == 1)
            .times(1)
            .returning(|_, _, _| Ok(()));
        store
            .expect_mark_succeeded()
            .withf(|id| *id == 2)
            .times(1)
            .returning(|_| Ok(()));
        store.expect_prune_succeeded().returning(|| Ok(1));

        let mut executor = MockRemoteExecutor::new();
        executor.expect_execute().times(2).returning(|_, _| Ok(()));

        let (_reach_tx, reach_rx) = online_watch(true);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let mut orchestrator = SyncOrchestrator::new(
            test_config(),
            Arc::new(store),
            Arc::new(executor),
            RetryPolicy::default(),
            reach_rx,
            shutdown_rx,
        );

        let outcome = orchestrator.flush(FlushTrigger::Manual).await;
        assert_eq!(
            outcome,
            FlushOutcome::Completed(FlushStats {
                sent: 1,
                retried: 0,
                failed: 1
            })
        );
    }

    // Test 3: Offline at flush start interrupts before the first call
    #[tokio::test]
    async fn test_offline_at_start_sends_nothing() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        store
            .enqueue(ActionKind::SendMessage, b"hi".to_vec())
            .await
            .unwrap();

        // No expectations: the executor must never be called
        let executor = MockRemoteExecutor::new();

        let (_reach_tx, reach_rx) = online_watch(false);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let mut orchestrator = SyncOrchestrator::new(
            test_config(),
            Arc::clone(&store),
            Arc::new(executor),
            RetryPolicy::default(),
            reach_rx,
            shutdown_rx,
        );

        let outcome = orchestrator.flush(FlushTrigger::Manual).await;
        assert_eq!(outcome, FlushOutcome::Interrupted(FlushStats::default()));
        assert_eq!(store.list_pending().await.unwrap().len(), 1);
    }

    /// Executor that never answers within the per-call timeout
    struct StalledExecutor;

    #[async_trait]
    impl RemoteExecutor for StalledExecutor {
        async fn execute(&self, _kind: ActionKind, _payload: &[u8]) -> Result<(), RemoteError> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(())
        }
    }

    // Test 4: A slow executor call counts as a transient timeout failure
    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_is_transient() {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        store
            .enqueue(ActionKind::SubmitAssignment, b"late".to_vec())
            .await
            .unwrap();

        let executor = StalledExecutor;

        let (_reach_tx, reach_rx) = online_watch(true);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let mut orchestrator = SyncOrchestrator::new(
            test_config(),
            Arc::clone(&store),
            Arc::new(executor),
            RetryPolicy::default(),
            reach_rx,
            shutdown_rx,
        );

        let outcome = orchestrator.flush(FlushTrigger::Manual).await;
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
        assert_eq!(pending[0].retry_count, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("Request timeout"));
    }
}
