//! Common test utilities and helpers for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use campus_sync::error::RemoteError;
use campus_sync::models::{ActionKind, SyncStatus};
use campus_sync::store::SqliteStore;
use campus_sync::sync::{FlushConfig, FlushHandle, RemoteExecutor, RetryPolicy, SyncOrchestrator};

/// Create an in-memory store for testing
pub async fn create_test_store() -> Arc<SqliteStore> {
    Arc::new(
        SqliteStore::in_memory()
            .await
            .expect("Failed to create test store"),
    )
}

/// Executor that records every call and replays a scripted outcome per call
///
/// Outcomes are consumed front-to-back; once the script is exhausted every
/// further call returns the default outcome.
pub struct RecordingExecutor {
    script: Mutex<VecDeque<Result<(), RemoteError>>>,
    default: Result<(), RemoteError>,
    calls: Mutex<Vec<(ActionKind, Vec<u8>)>>,
}

impl RecordingExecutor {
    /// Every call succeeds
    pub fn always_ok() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            default: Ok(()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Every call fails the same way
    pub fn always_err(err: RemoteError) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            default: Err(err),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Play the given outcomes in order, then succeed
    pub fn with_script(script: Vec<Result<(), RemoteError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            default: Ok(()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Every `(kind, payload)` pair seen so far, in call order
    pub fn calls(&self) -> Vec<(ActionKind, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls seen so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn execute(&self, kind: ActionKind, payload: &[u8]) -> Result<(), RemoteError> {
        self.calls.lock().unwrap().push((kind, payload.to_vec()));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

/// A running engine plus the handles the tests poke it with
pub struct TestEngine {
    pub store: Arc<SqliteStore>,
    pub flush: FlushHandle,
    pub status: watch::Receiver<SyncStatus>,
    pub reach_tx: watch::Sender<bool>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub task: JoinHandle<()>,
}

impl TestEngine {
    /// Stop the engine and wait for the worker to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(2), self.task).await;
    }
}

/// Spawn an orchestrator over the given store and executor
///
/// The periodic timer is effectively disabled so tests control every flush
/// through the handle or the reachability sender.
pub async fn start_engine<E>(store: Arc<SqliteStore>, executor: Arc<E>, online: bool) -> TestEngine
where
    E: RemoteExecutor + 'static,
{
    let (reach_tx, reach_rx) = watch::channel(online);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let orchestrator = SyncOrchestrator::new(
        FlushConfig {
            flush_interval_secs: 3600,
            jitter_secs: 0,
            call_timeout_secs: 5,
        },
        Arc::clone(&store),
        executor,
        RetryPolicy::default(),
        reach_rx,
        shutdown_rx,
    );

    let flush = orchestrator.flush_handle();
    let status = orchestrator.subscribe_status();
    let task = tokio::spawn(orchestrator.run());

    TestEngine {
        store,
        flush,
        status,
        reach_tx,
        shutdown_tx,
        task,
    }
}

/// Wait until the observed sync status satisfies the predicate
pub async fn wait_for_status<F>(rx: &mut watch::Receiver<SyncStatus>, mut pred: F) -> SyncStatus
where
    F: FnMut(&SyncStatus) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            {
                let status = rx.borrow_and_update();
                if pred(&status) {
                    return status.clone();
                }
            }
            rx.changed().await.expect("Status channel closed");
        }
    })
    .await
    .expect("Timed out waiting for sync status")
}
