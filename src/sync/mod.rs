//! Synchronization engine
//!
//! This module contains the machinery that drains the offline action queue
//! against the network and keeps the cached read-side snapshots fresh.
//!
//! # Components
//!
//! - [`retry`]: bounded retry policy deciding retry vs give-up per failure
//! - [`reachability`]: debounced online/offline monitor and HTTP probe
//! - [`executor`]: remote executor boundary and its HTTP implementation
//! - [`orchestrator`]: the single-flight flush loop
//! - [`snapshots`]: read-side snapshot refresh
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use campus_sync::store::SqliteStore;
//! use campus_sync::sync::{
//!     FlushConfig, ReachabilityMonitor, RetryPolicy, SyncOrchestrator,
//! };
//!
//! let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
//! let store = Arc::new(SqliteStore::new("campus.db").await?);
//! let monitor = ReachabilityMonitor::new(Default::default(), shutdown_tx.subscribe());
//! let orchestrator = SyncOrchestrator::new(
//!     FlushConfig::default(),
//!     Arc::clone(&store),
//!     executor,
//!     RetryPolicy::default(),
//!     monitor.subscribe(),
//!     shutdown_tx.subscribe(),
//! );
//! let flush = orchestrator.flush_handle();
//! tokio::spawn(monitor.run());
//! tokio::spawn(orchestrator.run());
//! flush.flush_now().await?;
//! ```

pub mod executor;
pub mod orchestrator;
pub mod reachability;
pub mod retry;
pub mod snapshots;

// Re-export main types for convenience
pub use executor::{HttpRemoteExecutor, RemoteExecutor};
pub use orchestrator::{FlushConfig, FlushHandle, FlushOutcome, FlushStats, SyncOrchestrator};
pub use reachability::{
    ReachabilityConfig, ReachabilityHandle, ReachabilityMonitor, ReachabilityProbe,
};
pub use retry::RetryPolicy;
pub use snapshots::{HttpSnapshotApi, RefreshStats, SnapshotApi, SnapshotRefresher};
