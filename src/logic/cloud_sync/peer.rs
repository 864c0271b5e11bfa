//! Peer Transport
//!
//! Extension point for direct edge-to-edge exchange. The node ships without
//! an implementation; routine sync always goes through the central server.

use std::future::Future;

use super::client::{GatewayError, NeighborDevice};
use crate::logic::storage::SyncRecord;

pub trait PeerTransport: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Push records to one neighbor
    fn push(
        &self,
        neighbor: &NeighborDevice,
        records: &[SyncRecord],
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;
}
