//! Durable store for campus-sync
//!
//! This module defines the store trait and SQLite implementation. The store
//! owns two kinds of state: the queued-action table (the offline mutation
//! queue) and the cached read-side snapshot tables.

pub mod migrations;
pub mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{
    ActionKind, AssignmentSnapshot, AttendanceSnapshot, QueueCounts, QueuedAction, TimetableEntry,
};

/// Store trait for durable persistence
///
/// Every mutating call is a single transaction against the underlying store:
/// a crash mid-write leaves either the old or the new state, never a torn
/// one. Uses `async_trait` for async methods and `mockall::automock` for
/// testing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Store: Send + Sync {
    // =========================================================================
    // Queued action operations
    // =========================================================================

    /// Durably persist a new `Pending` action
    ///
    /// Does not return until the write is confirmed durable; the caller may
    /// apply an optimistic UI change predicated on the enqueue having
    /// happened.
    async fn enqueue(&self, kind: ActionKind, payload: Vec<u8>) -> Result<i64, StoreError>;

    /// All `Pending` actions in enqueue order
    ///
    /// Reflects any enqueue that completed before the call, including across
    /// process restarts. Order is `(enqueued_at, id)`.
    async fn list_pending(&self) -> Result<Vec<QueuedAction>, StoreError>;

    /// All `Failed` actions, oldest first
    async fn list_failed(&self) -> Result<Vec<QueuedAction>, StoreError>;

    /// Transition an action to `Succeeded`
    ///
    /// A no-op (not an error) if the id no longer exists.
    async fn mark_succeeded(&self, id: i64) -> Result<(), StoreError>;

    /// Transition an action to `Failed`, recording the final retry count and
    /// failure reason
    ///
    /// A no-op (not an error) if the id no longer exists.
    async fn mark_failed(
        &self,
        id: i64,
        retry_count: u32,
        last_error: Option<String>,
    ) -> Result<(), StoreError>;

    /// Persist an incremented retry count while the action stays `Pending`
    async fn bump_retry(
        &self,
        id: i64,
        retry_count: u32,
        last_error: Option<String>,
    ) -> Result<(), StoreError>;

    /// Delete all `Succeeded` entries; called once per completed flush
    ///
    /// Returns the number of deleted records
    async fn prune_succeeded(&self) -> Result<u64, StoreError>;

    /// User-initiated removal of a permanently failed action
    async fn clear_failed(&self, id: i64) -> Result<(), StoreError>;

    /// User-initiated removal of all permanently failed actions
    ///
    /// Returns the number of deleted records
    async fn clear_all_failed(&self) -> Result<u64, StoreError>;

    /// Aggregate pending/failed counts for status recomputation
    async fn queue_counts(&self) -> Result<QueueCounts, StoreError>;

    // =========================================================================
    // Cached read-side operations
    // =========================================================================

    /// Atomically replace the cached timetable, stamping every row with
    /// `synced_at`
    async fn replace_timetable(
        &self,
        entries: Vec<TimetableEntry>,
        synced_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Cached timetable, in weekday and start-time order
    async fn timetable(&self) -> Result<Vec<TimetableEntry>, StoreError>;

    /// Atomically replace the cached assignment list
    async fn replace_assignments(
        &self,
        snapshots: Vec<AssignmentSnapshot>,
        synced_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Cached assignments, due-date order
    async fn assignments(&self) -> Result<Vec<AssignmentSnapshot>, StoreError>;

    /// Atomically replace the cached attendance history
    async fn replace_attendance(
        &self,
        snapshots: Vec<AttendanceSnapshot>,
        synced_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Cached attendance history, date order
    async fn attendance(&self) -> Result<Vec<AttendanceSnapshot>, StoreError>;
}
