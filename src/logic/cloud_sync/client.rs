//! Central Server Wire Types
//!
//! Request/response bodies for the edge endpoints and the gateway error type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logic::storage::StoreStats;
use crate::logic::threat::Alert;

use super::gateway::GatewayStatus;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http client setup failed: {0}")]
    Client(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("server returned {0}")]
    Status(u16),
    #[error("response decode failed: {0}")]
    Decode(String),
    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Client(_) => "client",
            GatewayError::Network(_) => "network",
            GatewayError::Timeout => "timeout",
            GatewayError::Status(_) => "status",
            GatewayError::Decode(_) => "decode",
            GatewayError::Encode(_) => "encode",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else {
            GatewayError::Network(e.to_string())
        }
    }
}

// ============================================================================
// OUTBOUND
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SyncRequest {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub data_batch: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct EmergencyAlertRequest<'a> {
    pub device_id: &'a str,
    pub alert: &'a Alert,
    pub priority: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Online,
    Offline,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatRequest<'a> {
    pub device_id: &'a str,
    pub timestamp: DateTime<Utc>,
    pub status: DeviceState,
    pub location: &'a str,
}

#[derive(Debug, Serialize)]
pub struct Capabilities {
    pub sensors: Vec<String>,
    pub processing: bool,
    pub real_time_analysis: bool,
}

#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub device_id: &'a str,
    pub location: &'a str,
    pub capabilities: Capabilities,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatusBody<'a> {
    pub stats: &'a StoreStats,
    pub gateway: GatewayStatus,
}

#[derive(Debug, Serialize)]
pub struct StatusReport<'a> {
    pub device_id: &'a str,
    pub timestamp: DateTime<Utc>,
    pub status: StatusBody<'a>,
}

// ============================================================================
// INBOUND
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct UpdatesResponse {
    #[serde(default)]
    pub updates: Vec<serde_json::Value>,
}

/// One item of the update poll
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum UpdateDirective {
    ConfigUpdate(serde_json::Map<String, serde_json::Value>),
    ThresholdUpdate(serde_json::Map<String, serde_json::Value>),
}

impl UpdatesResponse {
    /// Known directives in server order; anything else is skipped
    pub fn directives(self) -> Vec<UpdateDirective> {
        self.updates
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<UpdateDirective>(raw.clone()) {
                Ok(directive) => Some(directive),
                Err(e) => {
                    let kind = raw.get("type").and_then(|t| t.as_str()).unwrap_or("<missing>");
                    log::warn!("Skipping update directive '{}': {}", kind, e);
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborDevice {
    pub device_id: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NeighborsResponse {
    #[serde(default)]
    pub devices: Vec<NeighborDevice>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_directives_skip_unknown_types() {
        let response: UpdatesResponse = serde_json::from_value(json!({
            "updates": [
                { "type": "threshold_update", "data": { "tilt": 0.2 } },
                { "type": "model_update", "data": { "version": "2.1" } },
                { "type": "config_update", "data": { "communication": { "sync_interval": 30 } } },
                { "data": {} }
            ]
        }))
        .unwrap();

        let directives = response.directives();
        assert_eq!(directives.len(), 2);
        match &directives[0] {
            UpdateDirective::ThresholdUpdate(data) => assert_eq!(data["tilt"], 0.2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(directives[1], UpdateDirective::ConfigUpdate(_)));
    }

    #[test]
    fn test_missing_updates_field_is_empty() {
        let response: UpdatesResponse = serde_json::from_value(json!({})).unwrap();
        assert!(response.directives().is_empty());
    }

    #[test]
    fn test_heartbeat_wire_shape() {
        let body = HeartbeatRequest {
            device_id: "edge-001",
            timestamp: Utc::now(),
            status: DeviceState::Offline,
            location: "Site-A",
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["status"], "offline");
        assert_eq!(value["location"], "Site-A");
    }

    #[test]
    fn test_neighbor_keeps_extra_fields() {
        let neighbor: NeighborDevice = serde_json::from_value(json!({
            "device_id": "edge-002",
            "distance_m": 120.5
        }))
        .unwrap();
        assert_eq!(neighbor.device_id, "edge-002");
        assert!(neighbor.location.is_none());
        assert_eq!(neighbor.extra["distance_m"], 120.5);
    }
}
