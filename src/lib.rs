//! campus-sync - offline action queue and synchronization engine
//!
//! This crate keeps campus mobile clients usable while the network is
//! intermittent: user mutations (mark attendance, submit assignment, send
//! message) are durably queued locally and drained against the server once
//! connectivity returns, without loss, duplication, or reordering. Cached
//! read-side snapshots (timetable, assignments, attendance) let the UI render
//! without a network round-trip.

pub mod config;
pub mod error;
pub mod models;
pub mod store;
pub mod sync;
