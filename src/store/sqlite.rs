//! SQLite implementation of the Store trait
//!
//! This module provides a SQLite-based implementation of the Store trait
//! using rusqlite and tokio-rusqlite for async operations. The connection is
//! opened with WAL journaling and full synchronous mode: `enqueue` must not
//! return before the write is on disk.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::types::Type;
use tokio_rusqlite::Connection;

use super::migrations::CREATE_SCHEMA;
use super::Store;
use crate::error::StoreError;
use crate::models::{
    ActionKind, ActionStatus, AssignmentSnapshot, AttendanceSnapshot, QueueCounts, QueuedAction,
    TimetableEntry,
};

/// SQLite store implementation
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the store at the given path
    ///
    /// Runs migrations before returning. Any failure here is surfaced to the
    /// caller; a store that cannot open must never be mistaken for an empty
    /// queue.
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path).await?;

        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "FULL")?;
            conn.execute_batch(CREATE_SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Create a new in-memory store (useful for testing)
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::new(":memory:").await
    }
}

#[async_trait]
impl Store for SqliteStore {
    // =========================================================================
    // Queued action operations
    // =========================================================================

    async fn enqueue(&self, kind: ActionKind, payload: Vec<u8>) -> Result<i64, StoreError> {
        let kind = kind.to_string();
        let enqueued_at = Utc::now().to_rfc3339();

        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO queued_actions (kind, payload, enqueued_at, retry_count, status)
                    VALUES (?1, ?2, ?3, 0, 'pending')
                    "#,
                    rusqlite::params![kind, payload, enqueued_at],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;

        Ok(id)
    }

    async fn list_pending(&self) -> Result<Vec<QueuedAction>, StoreError> {
        self.list_by_status(ActionStatus::Pending).await
    }

    async fn list_failed(&self) -> Result<Vec<QueuedAction>, StoreError> {
        self.list_by_status(ActionStatus::Failed).await
    }

    async fn mark_succeeded(&self, id: i64) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                // Affecting zero rows is fine: the action may already be pruned
                conn.execute(
                    "UPDATE queued_actions SET status = 'succeeded', last_error = NULL WHERE id = ?1",
                    [id],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        id: i64,
        retry_count: u32,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    UPDATE queued_actions
                    SET status = 'failed', retry_count = ?2, last_error = ?3
                    WHERE id = ?1
                    "#,
                    rusqlite::params![id, retry_count, last_error],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn bump_retry(
        &self,
        id: i64,
        retry_count: u32,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"
                    UPDATE queued_actions
                    SET retry_count = ?2, last_error = ?3
                    WHERE id = ?1 AND status = 'pending'
                    "#,
                    rusqlite::params![id, retry_count, last_error],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn prune_succeeded(&self) -> Result<u64, StoreError> {
        let deleted = self
            .conn
            .call(|conn| {
                let n = conn.execute("DELETE FROM queued_actions WHERE status = 'succeeded'", [])?;
                Ok(n as u64)
            })
            .await?;

        Ok(deleted)
    }

    async fn clear_failed(&self, id: i64) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM queued_actions WHERE id = ?1 AND status = 'failed'",
                    [id],
                )?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn clear_all_failed(&self) -> Result<u64, StoreError> {
        let deleted = self
            .conn
            .call(|conn| {
                let n = conn.execute("DELETE FROM queued_actions WHERE status = 'failed'", [])?;
                Ok(n as u64)
            })
            .await?;

        Ok(deleted)
    }

    async fn queue_counts(&self) -> Result<QueueCounts, StoreError> {
        let counts = self
            .conn
            .call(|conn| {
                let (pending, failed) = conn.query_row(
                    r#"
                    SELECT
                        COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
                    FROM queued_actions
                    "#,
                    [],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
                )?;
                Ok(QueueCounts {
                    pending: pending as u64,
                    failed: failed as u64,
                })
            })
            .await?;

        Ok(counts)
    }

    // =========================================================================
    // Cached read-side operations
    // =========================================================================

    async fn replace_timetable(
        &self,
        entries: Vec<TimetableEntry>,
        synced_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let synced_at = synced_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM timetable_entries", [])?;
                {
                    let mut stmt = tx.prepare(
                        r#"
                        INSERT INTO timetable_entries
                        (id, course, room, weekday, starts_at, ends_at, synced_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                        "#,
                    )?;
                    for entry in &entries {
                        stmt.execute(rusqlite::params![
                            entry.id,
                            entry.course,
                            entry.room,
                            entry.weekday,
                            entry.starts_at.format("%H:%M:%S").to_string(),
                            entry.ends_at.format("%H:%M:%S").to_string(),
                            synced_at,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn timetable(&self) -> Result<Vec<TimetableEntry>, StoreError> {
        let entries = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, course, room, weekday, starts_at, ends_at, synced_at
                    FROM timetable_entries
                    ORDER BY weekday, starts_at
                    "#,
                )?;

                let entries = stmt
                    .query_map([], |row| {
                        Ok(TimetableEntry {
                            id: row.get(0)?,
                            course: row.get(1)?,
                            room: row.get(2)?,
                            weekday: row.get(3)?,
                            starts_at: parse_time(4, row.get::<_, String>(4)?)?,
                            ends_at: parse_time(5, row.get::<_, String>(5)?)?,
                            synced_at: parse_datetime(row.get::<_, Option<String>>(6)?),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(entries)
            })
            .await?;

        Ok(entries)
    }

    async fn replace_assignments(
        &self,
        snapshots: Vec<AssignmentSnapshot>,
        synced_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let synced_at = synced_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM assignment_snapshots", [])?;
                {
                    let mut stmt = tx.prepare(
                        r#"
                        INSERT INTO assignment_snapshots
                        (id, course, title, due_at, submitted, synced_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        "#,
                    )?;
                    for snap in &snapshots {
                        stmt.execute(rusqlite::params![
                            snap.id,
                            snap.course,
                            snap.title,
                            snap.due_at.to_rfc3339(),
                            snap.submitted,
                            synced_at,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn assignments(&self) -> Result<Vec<AssignmentSnapshot>, StoreError> {
        let snapshots = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, course, title, due_at, submitted, synced_at
                    FROM assignment_snapshots
                    ORDER BY due_at
                    "#,
                )?;

                let snapshots = stmt
                    .query_map([], |row| {
                        Ok(AssignmentSnapshot {
                            id: row.get(0)?,
                            course: row.get(1)?,
                            title: row.get(2)?,
                            due_at: require_datetime(3, row.get::<_, String>(3)?)?,
                            submitted: row.get(4)?,
                            synced_at: parse_datetime(row.get::<_, Option<String>>(5)?),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(snapshots)
            })
            .await?;

        Ok(snapshots)
    }

    async fn replace_attendance(
        &self,
        snapshots: Vec<AttendanceSnapshot>,
        synced_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let synced_at = synced_at.to_rfc3339();

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM attendance_snapshots", [])?;
                {
                    let mut stmt = tx.prepare(
                        r#"
                        INSERT INTO attendance_snapshots
                        (id, student_id, date, present, synced_at)
                        VALUES (?1, ?2, ?3, ?4, ?5)
                        "#,
                    )?;
                    for snap in &snapshots {
                        stmt.execute(rusqlite::params![
                            snap.id,
                            snap.student_id,
                            snap.date.format("%Y-%m-%d").to_string(),
                            snap.present,
                            synced_at,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;

        Ok(())
    }

    async fn attendance(&self) -> Result<Vec<AttendanceSnapshot>, StoreError> {
        let snapshots = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, student_id, date, present, synced_at
                    FROM attendance_snapshots
                    ORDER BY date, student_id
                    "#,
                )?;

                let snapshots = stmt
                    .query_map([], |row| {
                        Ok(AttendanceSnapshot {
                            id: row.get(0)?,
                            student_id: row.get(1)?,
                            date: parse_date(2, row.get::<_, String>(2)?)?,
                            present: row.get(3)?,
                            synced_at: parse_datetime(row.get::<_, Option<String>>(4)?),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(snapshots)
            })
            .await?;

        Ok(snapshots)
    }
}

impl SqliteStore {
    async fn list_by_status(&self, status: ActionStatus) -> Result<Vec<QueuedAction>, StoreError> {
        let status = status.to_string();

        let actions = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, kind, payload, enqueued_at, retry_count, status, last_error
                    FROM queued_actions
                    WHERE status = ?1
                    ORDER BY enqueued_at, id
                    "#,
                )?;

                let actions = stmt
                    .query_map([&status], |row| {
                        Ok(QueuedAction {
                            id: row.get(0)?,
                            kind: parse_column(1, row.get::<_, String>(1)?)?,
                            payload: row.get(2)?,
                            enqueued_at: require_datetime(3, row.get::<_, String>(3)?)?,
                            retry_count: row.get(4)?,
                            status: parse_column(5, row.get::<_, String>(5)?)?,
                            last_error: row.get(6)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(actions)
            })
            .await?;

        Ok(actions)
    }
}

/// Parse an optional stored timestamp; unparseable stamps read as None
fn parse_datetime(value: Option<String>) -> Option<DateTime<Utc>> {
    let value = value?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&value) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse a required stored timestamp, failing the row read if corrupted
fn require_datetime(idx: usize, value: String) -> Result<DateTime<Utc>, rusqlite::Error> {
    parse_datetime(Some(value.clone())).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp: {}", value).into(),
        )
    })
}

fn parse_time(idx: usize, value: String) -> Result<NaiveTime, rusqlite::Error> {
    NaiveTime::parse_from_str(&value, "%H:%M:%S").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.to_string().into())
    })
}

fn parse_date(idx: usize, value: String) -> Result<NaiveDate, rusqlite::Error> {
    NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.to_string().into())
    })
}

/// Parse a stored enum column via FromStr, failing the row read if corrupted
fn parse_column<T>(idx: usize, value: String) -> Result<T, rusqlite::Error>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}
