//! Logic Module - Edge Node Engines
//!
//! - `sensors/` - sampling, calibration, validation, derived metrics
//! - `threat/` - factor scoring, trend escalation, alerts
//! - `storage/` - durable local queue, retention, snapshots
//! - `cloud_sync/` - central server link with retry policies
//! - `coordinator` - owns the components and runs the loops

pub mod cloud_sync;
pub mod config;
pub mod coordinator;
pub mod sensors;
pub mod storage;
pub mod threat;
