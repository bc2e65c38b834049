//! Read-side snapshot refresh
//!
//! Independent of the action queue: each reference dataset (timetable,
//! assignment list, attendance history) is fetched whole from the server and
//! atomically replaces the cached rows, stamped with a single `synced_at`
//! watermark. The engine never merges local edits into these caches; the UI
//! decides staleness from the watermark.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::RemoteError;
use crate::models::{AssignmentSnapshot, AttendanceSnapshot, TimetableEntry};
use crate::store::Store;

/// Server API for fetching whole reference datasets
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotApi: Send + Sync {
    /// Fetch the full timetable
    async fn fetch_timetable(&self) -> Result<Vec<TimetableEntry>, RemoteError>;

    /// Fetch the full assignment list
    async fn fetch_assignments(&self) -> Result<Vec<AssignmentSnapshot>, RemoteError>;

    /// Fetch the full attendance history
    async fn fetch_attendance(&self) -> Result<Vec<AttendanceSnapshot>, RemoteError>;
}

/// HTTP implementation of the snapshot API
#[derive(Debug, Clone)]
pub struct HttpSnapshotApi {
    client: Client,
    base_url: String,
}

impl HttpSnapshotApi {
    /// Create a new snapshot client against the given API base URL
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(request_timeout)
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.into(),
        }
    }

    /// Create a snapshot client with a custom reqwest Client
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn fetch_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Fetching snapshot dataset");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout
            } else if e.is_connect() {
                RemoteError::ConnectionRefused
            } else {
                RemoteError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(RemoteError::ServerError(status.as_u16()));
        }
        if !status.is_success() {
            return Err(RemoteError::Rejected(status.as_u16()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::InvalidPayload(e.to_string()))
    }
}

#[async_trait]
impl SnapshotApi for HttpSnapshotApi {
    async fn fetch_timetable(&self) -> Result<Vec<TimetableEntry>, RemoteError> {
        self.fetch_json("/api/v1/timetable").await
    }

    async fn fetch_assignments(&self) -> Result<Vec<AssignmentSnapshot>, RemoteError> {
        self.fetch_json("/api/v1/assignments").await
    }

    async fn fetch_attendance(&self) -> Result<Vec<AttendanceSnapshot>, RemoteError> {
        self.fetch_json("/api/v1/attendance/history").await
    }
}

/// Record counts from one refresh pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    /// Timetable rows cached
    pub timetable: u64,
    /// Assignment rows cached
    pub assignments: u64,
    /// Attendance rows cached
    pub attendance: u64,
    /// Datasets that could not be refreshed this pass
    pub failed_datasets: u32,
}

/// Periodic refresher for the cached read-side datasets
pub struct SnapshotRefresher<S, A> {
    store: Arc<S>,
    api: Arc<A>,
    reachability: watch::Receiver<bool>,
    refresh_interval: Duration,
    shutdown_rx: broadcast::Receiver<()>,
}

impl<S, A> SnapshotRefresher<S, A>
where
    S: Store,
    A: SnapshotApi,
{
    /// Create a new refresher
    pub fn new(
        store: Arc<S>,
        api: Arc<A>,
        reachability: watch::Receiver<bool>,
        refresh_interval: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            store,
            api,
            reachability,
            refresh_interval,
            shutdown_rx,
        }
    }

    /// Refresh every dataset once
    ///
    /// A failure on one dataset is logged and does not block the others; the
    /// stale cache simply keeps its old watermark.
    pub async fn refresh_all(&self) -> RefreshStats {
        let mut stats = RefreshStats::default();

        match self.api.fetch_timetable().await {
            Ok(entries) => {
                let count = entries.len() as u64;
                match self.store.replace_timetable(entries, Utc::now()).await {
                    Ok(()) => stats.timetable = count,
                    Err(e) => {
                        warn!(error = %e, "Failed to cache timetable");
                        stats.failed_datasets += 1;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch timetable");
                stats.failed_datasets += 1;
            }
        }

        match self.api.fetch_assignments().await {
            Ok(snapshots) => {
                let count = snapshots.len() as u64;
                match self.store.replace_assignments(snapshots, Utc::now()).await {
                    Ok(()) => stats.assignments = count,
                    Err(e) => {
                        warn!(error = %e, "Failed to cache assignments");
                        stats.failed_datasets += 1;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch assignments");
                stats.failed_datasets += 1;
            }
        }

        match self.api.fetch_attendance().await {
            Ok(snapshots) => {
                let count = snapshots.len() as u64;
                match self.store.replace_attendance(snapshots, Utc::now()).await {
                    Ok(()) => stats.attendance = count,
                    Err(e) => {
                        warn!(error = %e, "Failed to cache attendance");
                        stats.failed_datasets += 1;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to fetch attendance");
                stats.failed_datasets += 1;
            }
        }

        stats
    }

    /// Run the refresher until shutdown
    ///
    /// Refreshes immediately when online, then on the configured interval,
    /// skipping passes while offline.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.refresh_interval.as_secs(),
            "Starting snapshot refresher"
        );

        let mut timer = tokio::time::interval(self.refresh_interval);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping snapshot refresher");
                    break;
                }
                _ = timer.tick() => {
                    if !*self.reachability.borrow() {
                        debug!("Offline, skipping snapshot refresh");
                        continue;
                    }

                    let stats = self.refresh_all().await;
                    info!(
                        timetable = stats.timetable,
                        assignments = stats.assignments,
                        attendance = stats.attendance,
                        failed_datasets = stats.failed_datasets,
                        "Snapshot refresh completed"
                    );
                }
            }
        }

        info!("Snapshot refresher stopped");
    }
}
