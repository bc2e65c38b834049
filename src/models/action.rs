//! Queued-action domain models
//!
//! This module defines the pending-mutation record and its closed kind and
//! status enumerations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a queued mutation
///
/// Closed enumeration: the remote executor matches on it exhaustively, so
/// adding a kind without handling it is a compile error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Record a student's attendance for a date
    MarkAttendance,
    /// Submit an assignment
    SubmitAssignment,
    /// Send a message
    SendMessage,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::MarkAttendance => write!(f, "mark_attendance"),
            ActionKind::SubmitAssignment => write!(f, "submit_assignment"),
            ActionKind::SendMessage => write!(f, "send_message"),
        }
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mark_attendance" => Ok(ActionKind::MarkAttendance),
            "submit_assignment" => Ok(ActionKind::SubmitAssignment),
            "send_message" => Ok(ActionKind::SendMessage),
            _ => Err(format!("Invalid action kind: {}", s)),
        }
    }
}

/// Lifecycle status of a queued action
///
/// Transitions happen only inside a flush: `Pending -> Succeeded` or
/// `Pending -> Failed`. `Succeeded` entries are pruned after the flush;
/// `Failed` entries persist until explicitly cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Awaiting delivery
    #[default]
    Pending,
    /// Delivered; will be pruned
    Succeeded,
    /// Gave up; kept until the user clears it
    Failed,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionStatus::Pending => write!(f, "pending"),
            ActionStatus::Succeeded => write!(f, "succeeded"),
            ActionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ActionStatus::Pending),
            "succeeded" => Ok(ActionStatus::Succeeded),
            "failed" => Ok(ActionStatus::Failed),
            _ => Err(format!("Invalid action status: {}", s)),
        }
    }
}

/// A single pending mutation awaiting delivery to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedAction {
    /// Store-assigned id, stable for the action's lifetime
    pub id: i64,

    /// Which remote operation this action maps to
    pub kind: ActionKind,

    /// Opaque serialized payload, meaningful only to the executor
    pub payload: Vec<u8>,

    /// When the action was enqueued; never mutated
    pub enqueued_at: DateTime<Utc>,

    /// Transient-failure count, incremented once per failed flush attempt
    pub retry_count: u32,

    /// Current lifecycle status
    pub status: ActionStatus,

    /// Reason recorded when the last attempt failed
    pub last_error: Option<String>,
}
