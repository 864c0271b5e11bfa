//! Edge Configuration
//!
//! Loaded once at startup from a JSON file. A missing or malformed file falls
//! back to the defaults below; environment variables override either.
//! Remote `config_update` directives are shallow-merged at the top level.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants;
use crate::logic::sensors::Channel;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("config read failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse failed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigError::NotFound(_) => "not_found",
            ConfigError::Io(_) => "io",
            ConfigError::Parse(_) => "parse",
            ConfigError::Invalid(_) => "invalid",
        }
    }
}

// ============================================================================
// SECTIONS
// ============================================================================

/// Device identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub id: String,
    pub location: String,
    /// Samples per second
    pub sampling_rate: f64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: constants::DEFAULT_DEVICE_ID.to_string(),
            location: constants::DEFAULT_LOCATION.to_string(),
            sampling_rate: constants::DEFAULT_SAMPLING_RATE,
        }
    }
}

/// Linear calibration `scale * raw + bias`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    pub scale: f64,
    pub bias: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self { scale: 1.0, bias: 0.0 }
    }
}

impl Calibration {
    pub fn apply(&self, raw: f64) -> f64 {
        self.scale * raw + self.bias
    }

    pub fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.bias == 0.0
    }
}

/// Per-channel capability record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    pub calibration: Calibration,
    /// Seconds between refreshes for slow channels (weather)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_interval: Option<u64>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: None,
            calibration: Calibration::default(),
            update_interval: None,
        }
    }
}

/// Fixed table of named channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorTable {
    pub accelerometer: ChannelConfig,
    pub tiltmeter: ChannelConfig,
    pub weather: ChannelConfig,
}

impl Default for SensorTable {
    fn default() -> Self {
        Self {
            accelerometer: ChannelConfig {
                threshold: Some(0.5),
                ..Default::default()
            },
            tiltmeter: ChannelConfig {
                threshold: Some(0.1),
                ..Default::default()
            },
            weather: ChannelConfig {
                update_interval: Some(300),
                ..Default::default()
            },
        }
    }
}

impl SensorTable {
    pub fn get(&self, channel: Channel) -> &ChannelConfig {
        match channel {
            Channel::Accelerometer => &self.accelerometer,
            Channel::Tiltmeter => &self.tiltmeter,
            Channel::Weather => &self.weather,
        }
    }

    pub fn enabled_channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.get(*c).enabled)
            .collect()
    }
}

/// Link to the central authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicationConfig {
    pub central_server: String,
    /// Seconds between sync cycles
    pub sync_interval: u64,
    /// Total tries for routine sync (emergency alerts get twice as many)
    pub retry_attempts: u32,
    /// Base of the exponential backoff for routine sync
    pub retry_base_delay_ms: u64,
    /// Fixed pause between emergency delivery attempts
    pub emergency_retry_delay_ms: u64,
    /// Records per sync batch
    pub batch_size: usize,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            central_server: constants::DEFAULT_CENTRAL_SERVER.to_string(),
            sync_interval: constants::DEFAULT_SYNC_INTERVAL,
            retry_attempts: constants::DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay_ms: 1000,
            emergency_retry_delay_ms: 1000,
            batch_size: 100,
        }
    }
}

/// Local buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub max_local_records: usize,
    pub max_analysis_results: usize,
    pub max_alerts: usize,
    /// Seconds between maintenance passes (retention + snapshot)
    pub backup_interval: u64,
    pub db_path: PathBuf,
    pub backup_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(constants::APP_NAME);

        Self {
            max_local_records: constants::DEFAULT_MAX_LOCAL_RECORDS,
            max_analysis_results: 1000,
            max_alerts: 500,
            backup_interval: constants::DEFAULT_BACKUP_INTERVAL,
            db_path: base.join("edge_data.db"),
            backup_dir: base.join("backups"),
        }
    }
}

/// Scoring cadence and trend detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub interval_secs: u64,
    /// Samples fetched from the store per analysis pass
    pub history_limit: usize,
    /// Samples re-scored for the trend fit
    pub trend_window: usize,
    /// Minimum slope per step that counts as escalation
    pub trend_epsilon: f64,
    /// Steps the level is projected forward when escalating
    pub trend_horizon: f64,
    /// Alerts kept in memory for audit
    pub alert_history: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            history_limit: 100,
            trend_window: 10,
            trend_epsilon: 0.01,
            trend_horizon: 5.0,
            alert_history: 100,
        }
    }
}

/// Plausibility bands and derived-metric weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionParams {
    pub nominal_gravity: f64,
    pub gravity_band_min: f64,
    pub gravity_band_max: f64,
    pub tilt_ceiling: f64,
    pub instability_accel_weight: f64,
    pub instability_tilt_weight: f64,
    pub rain_normalizer: f64,
    pub wind_normalizer: f64,
    pub rain_weight: f64,
    pub wind_weight: f64,
}

impl Default for IngestionParams {
    fn default() -> Self {
        Self {
            nominal_gravity: 9.81,
            gravity_band_min: 8.0,
            gravity_band_max: 12.0,
            tilt_ceiling: 1.0,
            instability_accel_weight: 0.6,
            instability_tilt_weight: 0.4,
            rain_normalizer: 10.0,
            wind_normalizer: 20.0,
            rain_weight: 0.7,
            wind_weight: 0.3,
        }
    }
}

// ============================================================================
// ROOT
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    pub edge_device: DeviceConfig,
    pub sensors: SensorTable,
    pub communication: CommunicationConfig,
    pub storage: StorageConfig,
    pub analysis: AnalysisConfig,
    pub ingestion: IngestionParams,
}

impl EdgeConfig {
    /// Strict load: parse + validate, no fallback
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let data = std::fs::read(path)?;
        let config: EdgeConfig = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Load, falling back to defaults on any error, then apply env overrides
    pub fn load_or_default(path: &Path) -> Self {
        let mut config = match Self::from_file(path) {
            Ok(config) => {
                log::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                log::warn!(
                    "Config unavailable (kind={}): {} - using defaults",
                    e.kind(),
                    e
                );
                Self::default()
            }
        };
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(id) = constants::env_device_id() {
            self.edge_device.id = id;
        }
        if let Some(location) = constants::env_location() {
            self.edge_device.location = location;
        }
        if let Some(url) = constants::env_central_server() {
            self.communication.central_server = url;
        }
        if let Some(interval) = constants::env_sync_interval() {
            self.communication.sync_interval = interval;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.edge_device.id.trim().is_empty() {
            return Err(ConfigError::Invalid("edge_device.id is empty".into()));
        }
        if !(self.edge_device.sampling_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "edge_device.sampling_rate must be > 0, got {}",
                self.edge_device.sampling_rate
            )));
        }
        if Duration::try_from_secs_f64(1.0 / self.edge_device.sampling_rate).is_err() {
            return Err(ConfigError::Invalid(format!(
                "edge_device.sampling_rate {} gives an unrepresentable period",
                self.edge_device.sampling_rate
            )));
        }
        if self.communication.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "communication.retry_attempts must be >= 1".into(),
            ));
        }
        if self.communication.sync_interval == 0 || self.storage.backup_interval == 0 {
            return Err(ConfigError::Invalid("intervals must be > 0".into()));
        }
        if self.communication.batch_size == 0 {
            return Err(ConfigError::Invalid("communication.batch_size must be > 0".into()));
        }
        if self.storage.max_local_records == 0
            || self.storage.max_analysis_results == 0
            || self.storage.max_alerts == 0
        {
            return Err(ConfigError::Invalid("storage caps must be > 0".into()));
        }
        if self.ingestion.gravity_band_min >= self.ingestion.gravity_band_max {
            return Err(ConfigError::Invalid("ingestion gravity band is empty".into()));
        }
        if self.ingestion.rain_normalizer <= 0.0 || self.ingestion.wind_normalizer <= 0.0 {
            return Err(ConfigError::Invalid("normalizers must be > 0".into()));
        }
        Ok(())
    }

    /// Shallow merge of a remote patch; the result must still validate
    pub fn merged(&self, patch: &serde_json::Map<String, serde_json::Value>) -> Result<Self, ConfigError> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            for (key, v) in patch {
                obj.insert(key.clone(), v.clone());
            }
        }
        let merged: EdgeConfig = serde_json::from_value(value)?;
        merged.validate()?;
        Ok(merged)
    }

    /// Falls back to the default rate when the configured one has no
    /// representable period
    pub fn sampling_period(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.edge_device.sampling_rate).unwrap_or_else(|_| {
            Duration::from_secs_f64(1.0 / constants::DEFAULT_SAMPLING_RATE)
        })
    }

    pub fn sync_period(&self) -> Duration {
        Duration::from_secs(self.communication.sync_interval)
    }

    pub fn analysis_period(&self) -> Duration {
        Duration::from_secs(self.analysis.interval_secs.max(1))
    }

    pub fn maintenance_period(&self) -> Duration {
        Duration::from_secs(self.storage.backup_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_match_documented_schema() {
        let config = EdgeConfig::default();
        assert_eq!(config.edge_device.id, "edge-001");
        assert_eq!(config.edge_device.sampling_rate, 1.0);
        assert_eq!(config.sensors.tiltmeter.threshold, Some(0.1));
        assert_eq!(config.communication.retry_attempts, 3);
        assert_eq!(config.storage.max_local_records, 10_000);
        assert_eq!(config.storage.max_alerts, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");

        assert!(matches!(EdgeConfig::from_file(&path), Err(ConfigError::NotFound(_))));
        let config = EdgeConfig::load_or_default(&path);
        assert_eq!(config.storage.backup_interval, 3600);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edge.json");
        std::fs::write(
            &path,
            json!({
                "edge_device": { "id": "edge-042", "sampling_rate": 2.0 },
                "sensors": { "weather": { "enabled": false } }
            })
            .to_string(),
        )
        .unwrap();

        let config = EdgeConfig::from_file(&path).unwrap();
        assert_eq!(config.edge_device.id, "edge-042");
        assert_eq!(config.edge_device.location, "Site-A");
        assert_eq!(
            config.sensors.enabled_channels(),
            vec![Channel::Accelerometer, Channel::Tiltmeter]
        );
        assert_eq!(config.sampling_period(), Duration::from_millis(500));
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = EdgeConfig::from_file(&path).unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[test]
    fn test_zero_sampling_rate_rejected() {
        let mut config = EdgeConfig::default();
        config.edge_device.sampling_rate = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_merge_replaces_top_level_sections() {
        let config = EdgeConfig::default();
        let patch = json!({ "communication": { "sync_interval": 15 } });

        let merged = config.merged(patch.as_object().unwrap()).unwrap();
        assert_eq!(merged.communication.sync_interval, 15);
        // section replaced wholesale, missing fields take their defaults
        assert_eq!(merged.communication.retry_attempts, 3);
        assert_eq!(merged.edge_device, config.edge_device);
    }

    #[test]
    fn test_tiny_sampling_rate_rejected() {
        let config = EdgeConfig::default();
        let patch = json!({
            "edge_device": { "id": "edge-001", "location": "Site-A", "sampling_rate": 1e-30 }
        });
        assert!(matches!(
            config.merged(patch.as_object().unwrap()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_sampling_period_never_panics() {
        let mut config = EdgeConfig::default();
        config.edge_device.sampling_rate = 1e-30;
        assert_eq!(config.sampling_period(), Duration::from_secs(1));

        config.edge_device.sampling_rate = 4.0;
        assert_eq!(config.sampling_period(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_merge_is_rejected() {
        let config = EdgeConfig::default();
        let patch = json!({ "communication": { "retry_attempts": 0 } });
        assert!(config.merged(patch.as_object().unwrap()).is_err());
    }
}
