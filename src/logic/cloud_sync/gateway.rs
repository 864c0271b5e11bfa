//! Sync Gateway
//!
//! The edge node's only path to the central server. Every call carries its
//! own timeout; none of the public operations return errors.

use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::client::{
    Capabilities, DeviceState, EmergencyAlertRequest, GatewayError, HeartbeatRequest, NeighborDevice,
    NeighborsResponse, RegisterRequest, StatusBody, StatusReport, SyncRequest, UpdateDirective,
    UpdatesResponse,
};
use super::retry::RetryPolicy;
use crate::logic::config::EdgeConfig;
use crate::logic::storage::{StoreStats, SyncRecord};
use crate::logic::threat::Alert;

/// Log target for events that need an operator
pub const FATAL_TARGET: &str = "rockfall_edge::fatal";

/// Recent errors kept in the status
pub const MAX_STATUS_ERRORS: usize = 20;

// ============================================================================
// ENDPOINTS + TIMEOUTS
// ============================================================================

const SYNC_PATH: &str = "/api/edge/sync-data";
const EMERGENCY_PATH: &str = "/api/alerts/emergency";
const UPDATES_PATH: &str = "/api/edge/updates";
const HEARTBEAT_PATH: &str = "/api/edge/heartbeat";
const REGISTER_PATH: &str = "/api/edge/register";
const STATUS_PATH: &str = "/api/edge/status";
const NEIGHBORS_PATH: &str = "/api/edge/neighbors";

const SYNC_TIMEOUT: Duration = Duration::from_secs(30);
const EMERGENCY_TIMEOUT: Duration = Duration::from_secs(15);
const UPDATES_TIMEOUT: Duration = Duration::from_secs(20);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(10);
const REGISTER_TIMEOUT: Duration = Duration::from_secs(30);
const OFFLINE_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);
const STATUS_TIMEOUT: Duration = Duration::from_secs(20);
const NEIGHBORS_TIMEOUT: Duration = Duration::from_secs(15);

const OK_ONLY: &[StatusCode] = &[StatusCode::OK];
const OK_OR_CREATED: &[StatusCode] = &[StatusCode::OK, StatusCode::CREATED];

// ============================================================================
// SETTINGS + STATUS
// ============================================================================

/// The slice of EdgeConfig the gateway needs
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    pub server_url: String,
    pub device_id: String,
    pub location: String,
    pub sensors: Vec<String>,
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub emergency_retry_delay: Duration,
}

impl GatewaySettings {
    pub fn from_config(config: &EdgeConfig) -> Self {
        Self {
            server_url: config.communication.central_server.trim_end_matches('/').to_string(),
            device_id: config.edge_device.id.clone(),
            location: config.edge_device.location.clone(),
            sensors: config
                .sensors
                .enabled_channels()
                .iter()
                .map(|c| c.as_str().to_string())
                .collect(),
            retry_attempts: config.communication.retry_attempts,
            retry_base_delay: Duration::from_millis(config.communication.retry_base_delay_ms),
            emergency_retry_delay: Duration::from_millis(config.communication.emergency_retry_delay_ms),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayStatus {
    pub is_connected: bool,
    pub is_registered: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_sync: Option<DateTime<Utc>>,
    pub heartbeat_count: u64,
    pub records_synced: u64,
    pub sync_failures: u64,
    pub alerts_delivered: u64,
    /// Emergency alerts that exhausted every attempt
    pub manual_interventions: u64,
    pub errors: Vec<String>,
}

impl GatewayStatus {
    fn push_error(&mut self, context: &str, error: &GatewayError) {
        if self.errors.len() >= MAX_STATUS_ERRORS {
            self.errors.remove(0);
        }
        self.errors
            .push(format!("{} {}: {}", Utc::now().to_rfc3339(), context, error));
    }
}

// ============================================================================
// GATEWAY
// ============================================================================

pub struct SyncGateway {
    http: reqwest::Client,
    settings: RwLock<GatewaySettings>,
    status: RwLock<GatewayStatus>,
}

impl SyncGateway {
    pub fn new(settings: GatewaySettings) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .user_agent(format!("{}/{}", crate::constants::APP_NAME, crate::constants::APP_VERSION))
            .build()
            .map_err(|e| GatewayError::Client(e.to_string()))?;

        log::info!("Sync gateway targeting {}", settings.server_url);

        Ok(Self {
            http,
            settings: RwLock::new(settings),
            status: RwLock::new(GatewayStatus::default()),
        })
    }

    pub fn from_config(config: &EdgeConfig) -> Result<Self, GatewayError> {
        Self::new(GatewaySettings::from_config(config))
    }

    pub fn reconfigure(&self, settings: GatewaySettings) {
        *self.settings.write() = settings;
    }

    pub fn settings(&self) -> GatewaySettings {
        self.settings.read().clone()
    }

    pub fn status(&self) -> GatewayStatus {
        self.status.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.read().is_connected
    }

    // ========================================================================
    // ROUTINE SYNC
    // ========================================================================

    /// Upload a batch; true only when the server answered 200
    pub async fn sync_batch(&self, records: &[SyncRecord]) -> bool {
        if records.is_empty() {
            return true;
        }

        let settings = self.settings();
        let request = match build_sync_request(&settings.device_id, records) {
            Ok(request) => request,
            Err(e) => {
                log::error!("Sync batch encoding failed (kind={}): {}", e.kind(), e);
                return false;
            }
        };

        let url = settings.url(SYNC_PATH);
        let policy = RetryPolicy::routine(settings.retry_attempts, settings.retry_base_delay);

        let result = policy
            .run("Data sync", |_| {
                self.post_expecting(&url, &request, SYNC_TIMEOUT, OK_ONLY)
            })
            .await;

        let mut status = self.status.write();
        match result {
            Ok(()) => {
                status.is_connected = true;
                status.last_sync = Some(Utc::now());
                status.records_synced += records.len() as u64;
                log::info!("Synced {} records to central server", records.len());
                true
            }
            Err(e) => {
                status.sync_failures += 1;
                status.push_error("sync", &e);
                log::warn!(
                    "Data sync gave up after {} attempts; records stay queued (kind={})",
                    policy.attempts,
                    e.kind()
                );
                false
            }
        }
    }

    // ========================================================================
    // EMERGENCY PATH
    // ========================================================================

    /// Deliver an alert; on exhaustion the alert needs manual handling
    pub async fn send_emergency_alert(&self, alert: &Alert) -> bool {
        let settings = self.settings();
        let url = settings.url(EMERGENCY_PATH);
        let policy = RetryPolicy::emergency(settings.retry_attempts, settings.emergency_retry_delay);
        let request = EmergencyAlertRequest {
            device_id: &settings.device_id,
            alert,
            priority: "emergency",
        };

        let result = policy
            .run("Emergency alert", |_| {
                self.post_expecting(&url, &request, EMERGENCY_TIMEOUT, OK_OR_CREATED)
            })
            .await;

        let mut status = self.status.write();
        match result {
            Ok(()) => {
                status.is_connected = true;
                status.alerts_delivered += 1;
                log::info!("Emergency alert {} delivered", alert.id);
                true
            }
            Err(e) => {
                status.manual_interventions += 1;
                status.push_error("emergency", &e);
                log::error!(
                    target: FATAL_TARGET,
                    "MANUAL INTERVENTION REQUIRED: emergency alert {} ({}, level {:.2}) undelivered after {} attempts (kind={}): {}",
                    alert.id,
                    alert.severity,
                    alert.threat_level,
                    policy.attempts,
                    e.kind(),
                    e
                );
                false
            }
        }
    }

    // ========================================================================
    // UPDATES
    // ========================================================================

    /// Directives queued for this device; 204 means none
    pub async fn poll_updates(&self) -> Vec<UpdateDirective> {
        let settings = self.settings();
        let url = format!("{}/{}", settings.url(UPDATES_PATH), settings.device_id);

        match self.fetch_updates(&url).await {
            Ok(directives) => {
                if !directives.is_empty() {
                    log::info!("Received {} updates from server", directives.len());
                }
                directives
            }
            Err(e) => {
                log::warn!("Update poll failed (kind={}): {}", e.kind(), e);
                self.status.write().push_error("updates", &e);
                Vec::new()
            }
        }
    }

    async fn fetch_updates(&self, url: &str) -> Result<Vec<UpdateDirective>, GatewayError> {
        let response = self.http.get(url).timeout(UPDATES_TIMEOUT).send().await?;

        match response.status() {
            StatusCode::OK => {
                let body: UpdatesResponse = response.json().await?;
                Ok(body.directives())
            }
            StatusCode::NO_CONTENT => Ok(Vec::new()),
            other => Err(GatewayError::Status(other.as_u16())),
        }
    }

    // ========================================================================
    // PRESENCE
    // ========================================================================

    pub async fn heartbeat(&self) -> bool {
        let settings = self.settings();
        let request = HeartbeatRequest {
            device_id: &settings.device_id,
            timestamp: Utc::now(),
            status: DeviceState::Online,
            location: &settings.location,
        };

        let result = self
            .post_expecting(&settings.url(HEARTBEAT_PATH), &request, HEARTBEAT_TIMEOUT, OK_ONLY)
            .await;

        let mut status = self.status.write();
        match result {
            Ok(()) => {
                status.is_connected = true;
                status.last_heartbeat = Some(Utc::now());
                status.heartbeat_count += 1;
                log::debug!("Heartbeat sent");
                true
            }
            Err(e) => {
                status.is_connected = false;
                status.push_error("heartbeat", &e);
                log::warn!("Heartbeat failed (kind={}): {}", e.kind(), e);
                false
            }
        }
    }

    /// Best-effort notice on shutdown
    pub async fn send_offline_heartbeat(&self) {
        let settings = self.settings();
        let request = HeartbeatRequest {
            device_id: &settings.device_id,
            timestamp: Utc::now(),
            status: DeviceState::Offline,
            location: &settings.location,
        };

        if let Err(e) = self
            .post_expecting(&settings.url(HEARTBEAT_PATH), &request, OFFLINE_HEARTBEAT_TIMEOUT, OK_ONLY)
            .await
        {
            log::debug!("Offline heartbeat not delivered: {}", e);
        }
        self.status.write().is_connected = false;
    }

    pub async fn register_device(&self) -> bool {
        let settings = self.settings();
        let request = RegisterRequest {
            device_id: &settings.device_id,
            location: &settings.location,
            capabilities: Capabilities {
                sensors: settings.sensors.clone(),
                processing: true,
                real_time_analysis: true,
            },
            timestamp: Utc::now(),
        };

        let result = self
            .post_expecting(&settings.url(REGISTER_PATH), &request, REGISTER_TIMEOUT, OK_OR_CREATED)
            .await;

        let mut status = self.status.write();
        match result {
            Ok(()) => {
                status.is_connected = true;
                status.is_registered = true;
                log::info!("Device {} registered successfully", settings.device_id);
                true
            }
            Err(e) => {
                status.push_error("register", &e);
                log::error!("Device registration failed (kind={}): {}", e.kind(), e);
                false
            }
        }
    }

    pub async fn report_status(&self, stats: &StoreStats) -> bool {
        let settings = self.settings();
        let request = StatusReport {
            device_id: &settings.device_id,
            timestamp: Utc::now(),
            status: StatusBody {
                stats,
                gateway: self.status(),
            },
        };

        match self
            .post_expecting(&settings.url(STATUS_PATH), &request, STATUS_TIMEOUT, OK_ONLY)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Status report failed (kind={}): {}", e.kind(), e);
                self.status.write().push_error("status", &e);
                false
            }
        }
    }

    /// Nearby edge devices known to the central server
    pub async fn neighbors(&self) -> Vec<NeighborDevice> {
        let settings = self.settings();
        let url = format!("{}/{}", settings.url(NEIGHBORS_PATH), settings.device_id);

        match self.fetch_neighbors(&url).await {
            Ok(devices) => devices,
            Err(e) => {
                log::warn!("Neighbor lookup failed (kind={}): {}", e.kind(), e);
                Vec::new()
            }
        }
    }

    async fn fetch_neighbors(&self, url: &str) -> Result<Vec<NeighborDevice>, GatewayError> {
        let response = self.http.get(url).timeout(NEIGHBORS_TIMEOUT).send().await?;
        if response.status() != StatusCode::OK {
            return Err(GatewayError::Status(response.status().as_u16()));
        }
        let body: NeighborsResponse = response.json().await?;
        Ok(body.devices)
    }

    // ========================================================================
    // HTTP
    // ========================================================================

    async fn post_expecting<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        timeout: Duration,
        accepted: &[StatusCode],
    ) -> Result<(), GatewayError> {
        let response = self.http.post(url).timeout(timeout).json(body).send().await?;
        let code = response.status();

        if accepted.contains(&code) {
            Ok(())
        } else {
            Err(GatewayError::Status(code.as_u16()))
        }
    }
}

fn build_sync_request(device_id: &str, records: &[SyncRecord]) -> Result<SyncRequest, GatewayError> {
    let data_batch = records
        .iter()
        .map(SyncRecord::to_wire)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SyncRequest {
        device_id: device_id.to_string(),
        timestamp: Utc::now(),
        data_batch,
    })
}
