//! Cloud Sync Module - Edge to Central Server Communication
//!
//! This module handles:
//! - Device registration and heartbeats
//! - Batched upload of queued records
//! - Emergency alert delivery
//! - Polling for threshold / config updates

pub mod client;
pub mod gateway;
pub mod peer;
pub mod retry;

pub use client::{GatewayError, NeighborDevice, UpdateDirective};
pub use gateway::{GatewaySettings, GatewayStatus, SyncGateway, FATAL_TARGET};
pub use peer::PeerTransport;
pub use retry::{Backoff, RetryPolicy};
