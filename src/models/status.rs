//! Observable synchronization status
//!
//! `SyncStatus` is derived from the store after every transition and
//! published through a watch channel; it is never independently
//! authoritative.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate counts over the action queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    /// Actions awaiting delivery
    pub pending: u64,
    /// Actions that gave up and await user action
    pub failed: u64,
}

/// Read-only summary of the engine's state, consumed by the UI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Actions awaiting delivery
    pub pending_items: u64,

    /// Permanently failed actions awaiting user action
    pub failed_items: u64,

    /// True only while a flush is actively running
    pub is_syncing: bool,

    /// When the last flush attempt completed, successful or not
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl SyncStatus {
    /// Build a status snapshot from queue counts
    pub fn from_counts(
        counts: QueueCounts,
        is_syncing: bool,
        last_sync_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            pending_items: counts.pending,
            failed_items: counts.failed,
            is_syncing,
            last_sync_at,
        }
    }
}
