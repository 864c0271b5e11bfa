//! Sensor Types
//!
//! Data structures shared by ingestion, analysis and storage.
//! No logic beyond small accessors.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// CHANNELS
// ============================================================================

/// Sensor channels an edge node can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Accelerometer,
    Tiltmeter,
    Weather,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Accelerometer, Channel::Tiltmeter, Channel::Weather];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Accelerometer => "accelerometer",
            Channel::Tiltmeter => "tiltmeter",
            Channel::Weather => "weather",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One channel reading: named measurements (e.g. `x_axis`, `rainfall`)
pub type Reading = BTreeMap<String, f64>;

// ============================================================================
// SAMPLE
// ============================================================================

/// Raw, calibrated readings from every enabled channel at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub sensors: BTreeMap<Channel, Reading>,
}

impl SensorSample {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            device_id: device_id.into(),
            sensors: BTreeMap::new(),
        }
    }

    pub fn with_reading(mut self, channel: Channel, reading: Reading) -> Self {
        self.sensors.insert(channel, reading);
        self
    }

    pub fn reading(&self, channel: Channel) -> Option<&Reading> {
        self.sensors.get(&channel)
    }

    /// Measurement lookup, `None` if channel or field is missing
    pub fn value(&self, channel: Channel, field: &str) -> Option<f64> {
        self.sensors.get(&channel).and_then(|r| r.get(field)).copied()
    }
}

/// Build a reading from `(name, value)` pairs
pub fn reading<const N: usize>(pairs: [(&str, f64); N]) -> Reading {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

// ============================================================================
// QUALITY + DERIVED METRICS
// ============================================================================

/// Plausibility verdict for one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityFlag {
    pub valid: bool,
    #[serde(default)]
    pub diagnostics: BTreeMap<String, f64>,
}

impl QualityFlag {
    pub fn new(valid: bool) -> Self {
        Self {
            valid,
            diagnostics: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.diagnostics.insert(name.to_string(), value);
        self
    }
}

/// Cross-channel indices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instability_index: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environmental_risk: Option<f64>,
}

impl DerivedMetrics {
    pub fn is_empty(&self) -> bool {
        self.instability_index.is_none() && self.environmental_risk.is_none()
    }
}

/// A sample after validation and metric derivation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSample {
    #[serde(flatten)]
    pub sample: SensorSample,
    #[serde(default)]
    pub quality_flags: BTreeMap<Channel, QualityFlag>,
    #[serde(default)]
    pub derived_metrics: DerivedMetrics,
}

impl ProcessedSample {
    /// Wrap a sample with no annotations
    pub fn bare(sample: SensorSample) -> Self {
        Self {
            sample,
            quality_flags: BTreeMap::new(),
            derived_metrics: DerivedMetrics::default(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.sample.timestamp
    }

    /// True when every flagged channel passed its plausibility check
    pub fn is_trusted(&self) -> bool {
        self.quality_flags.values().all(|f| f.valid)
    }
}
