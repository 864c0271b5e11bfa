//! Storage Module
//!
//! Local store-and-forward buffer for samples, analysis results and alerts.
//!
//! ## Structure
//! - `types`: RecordKind, Persistable, SyncRecord, RetentionPolicy, StoreStats
//! - `queue`: DurableQueue (SQLite) and snapshot rotation

pub mod queue;
pub mod types;

pub use queue::{list_snapshots, DurableQueue, SNAPSHOTS_KEPT};
pub use types::{
    Persistable, RecordKind, RetentionPolicy, SnapshotHandle, StorageError, StoreStats, SyncRecord,
};

#[cfg(test)]
mod tests;
