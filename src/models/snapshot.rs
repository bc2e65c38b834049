//! Cached read-side entities
//!
//! Local copies of server-owned data, keyed by their domain id and stamped
//! with a `synced_at` watermark. The engine never merges local edits into
//! them; each successful refresh replaces a dataset wholesale. Staleness
//! thresholds are the UI layer's decision; the engine only guarantees the
//! stamp is accurate and the replace is atomic.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// One timetable slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimetableEntry {
    /// Server-assigned entry id
    pub id: String,

    /// Course name
    pub course: String,

    /// Room or location
    pub room: String,

    /// Day of week, 1 = Monday .. 7 = Sunday
    pub weekday: u8,

    /// Slot start time
    pub starts_at: NaiveTime,

    /// Slot end time
    pub ends_at: NaiveTime,

    /// When this record was last refreshed from the server
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
}

/// One assignment as last seen on the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentSnapshot {
    /// Server-assigned assignment id
    pub id: String,

    /// Course name
    pub course: String,

    /// Assignment title
    pub title: String,

    /// Submission deadline
    pub due_at: DateTime<Utc>,

    /// Whether the server has recorded a submission
    pub submitted: bool,

    /// When this record was last refreshed from the server
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
}

/// One attendance record as last seen on the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceSnapshot {
    /// Server-assigned record id
    pub id: String,

    /// Student the record belongs to
    pub student_id: String,

    /// Date the record covers
    pub date: NaiveDate,

    /// Whether the student was present
    pub present: bool,

    /// When this record was last refreshed from the server
    #[serde(default)]
    pub synced_at: Option<DateTime<Utc>>,
}
