//! Threat Scoring Rules & Thresholds
//!
//! Fixed category weights and the remotely-tunable threshold set.
//! No scoring logic here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::RiskCategory;
use crate::logic::config::SensorTable;

// ============================================================================
// WEIGHTS (fixed)
// ============================================================================

pub const ACCELERATION_WEIGHT: f64 = 0.25;
pub const TILT_WEIGHT: f64 = 0.30;
pub const ENVIRONMENTAL_WEIGHT: f64 = 0.20;
pub const DERIVED_WEIGHT: f64 = 0.25;

pub fn category_weight(category: RiskCategory) -> f64 {
    match category {
        RiskCategory::Acceleration => ACCELERATION_WEIGHT,
        RiskCategory::Tilt => TILT_WEIGHT,
        RiskCategory::Environmental => ENVIRONMENTAL_WEIGHT,
        RiskCategory::Derived => DERIVED_WEIGHT,
    }
}

// ============================================================================
// FACTOR CONSTANTS
// ============================================================================

pub const NOMINAL_GRAVITY: f64 = 9.81;

/// Vibration frequency (Hz) treated as full risk
pub const FREQUENCY_NORMALIZER: f64 = 5.0;

/// Rainfall (mm) treated as full risk
pub const RAIN_NORMALIZER: f64 = 5.0;

/// Wind speed (m/s) below which wind adds no risk
pub const WIND_FLOOR: f64 = 10.0;

/// Freeze-thaw band (deg C)
pub const FREEZE_THAW_MIN: f64 = -2.0;
pub const FREEZE_THAW_MAX: f64 = 2.0;

/// Tilt factor score above which the factor is reported high
pub const TILT_HIGH_SCORE: f64 = 0.7;

/// Threat level above which "enhanced monitoring" is advised
pub const MONITORING_LEVEL: f64 = 0.3;

// ============================================================================
// THRESHOLD CONFIG (runtime, replace-on-update)
// ============================================================================

pub const INSTABILITY: &str = "instability";
pub const ACCELERATION: &str = "acceleration";
pub const TILT: &str = "tilt";
pub const ENVIRONMENTAL: &str = "environmental";
pub const COMBINED_RISK: &str = "combined_risk";
pub const EMERGENCY: &str = "emergency";

/// Named thresholds. Unknown names are kept for forward compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdConfig {
    values: BTreeMap<String, f64>,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        let values = [
            (INSTABILITY, 0.5),
            (ACCELERATION, 0.3),
            (TILT, 0.1),
            (ENVIRONMENTAL, 0.7),
            (COMBINED_RISK, 0.6),
            (EMERGENCY, 0.7),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self { values }
    }
}

impl ThresholdConfig {
    /// Defaults, with per-channel thresholds from the config file applied
    pub fn from_sensors(sensors: &SensorTable) -> Self {
        let mut config = Self::default();
        if let Some(t) = sensors.tiltmeter.threshold {
            config.values.insert(TILT.to_string(), t);
        }
        if let Some(t) = sensors.accelerometer.threshold {
            config.values.insert(ACCELERATION.to_string(), t);
        }
        config
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    fn known(&self, name: &str) -> f64 {
        // defaults always carry the known names; merges never remove keys
        self.get(name).unwrap_or(0.0)
    }

    pub fn instability(&self) -> f64 {
        self.known(INSTABILITY)
    }

    pub fn acceleration(&self) -> f64 {
        self.known(ACCELERATION)
    }

    pub fn tilt(&self) -> f64 {
        self.known(TILT)
    }

    pub fn environmental(&self) -> f64 {
        self.known(ENVIRONMENTAL)
    }

    pub fn combined_risk(&self) -> f64 {
        self.known(COMBINED_RISK)
    }

    pub fn emergency(&self) -> f64 {
        self.known(EMERGENCY)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Shallow merge into a new set; returns the set and how many keys changed
    ///
    /// `tilt_threshold` style keys are accepted as `tilt`. Non-numeric values
    /// are skipped.
    pub fn merged(&self, patch: &serde_json::Map<String, serde_json::Value>) -> (Self, usize) {
        let mut next = self.clone();
        let mut applied = 0;

        for (key, value) in patch {
            let name = normalize_key(key);
            match value.as_f64() {
                Some(v) if v.is_finite() => {
                    next.values.insert(name.to_string(), v);
                    applied += 1;
                }
                _ => {
                    log::warn!("Threshold '{}' ignored: non-numeric value {}", key, value);
                }
            }
        }

        (next, applied)
    }
}

fn normalize_key(key: &str) -> &str {
    key.strip_suffix("_threshold").unwrap_or(key)
}
