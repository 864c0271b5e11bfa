//! Threat Types
//!
//! Core types for rockfall threat scoring.
//! No logic beyond conversions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logic::sensors::ProcessedSample;

// ============================================================================
// SEVERITY
// ============================================================================

/// Discrete alert severity derived from a threat level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Fixed cutoffs: >=0.8 critical, >=0.6 high, >=0.3 medium
    pub fn from_level(threat_level: f64) -> Self {
        if threat_level >= 0.8 {
            Severity::Critical
        } else if threat_level >= 0.6 {
            Severity::High
        } else if threat_level >= 0.3 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// RISK FACTORS
// ============================================================================

/// Independent scoring categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskCategory {
    Acceleration,
    Tilt,
    Environmental,
    Derived,
}

impl RiskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Acceleration => "acceleration",
            RiskCategory::Tilt => "tilt",
            RiskCategory::Environmental => "environmental",
            RiskCategory::Derived => "derived",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Normal,
    High,
}

/// Score of one category plus the intermediate values that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub risk_score: f64,
    pub alert_level: AlertLevel,
    #[serde(default)]
    pub details: BTreeMap<String, f64>,
}

impl RiskFactor {
    pub fn new(risk_score: f64, high: bool) -> Self {
        Self {
            risk_score,
            alert_level: if high { AlertLevel::High } else { AlertLevel::Normal },
            details: BTreeMap::new(),
        }
    }

    pub fn detail(mut self, name: &str, value: f64) -> Self {
        self.details.insert(name.to_string(), value);
        self
    }

    pub fn is_high(&self) -> bool {
        self.alert_level == AlertLevel::High
    }
}

// ============================================================================
// ANALYSIS RESULT
// ============================================================================

/// Score of a single sample. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub timestamp: DateTime<Utc>,
    /// Timestamp of the scored sample
    pub data_id: DateTime<Utc>,
    pub threat_level: f64,
    pub risk_factors: BTreeMap<RiskCategory, RiskFactor>,
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub alert_generated: bool,
}

impl AnalysisResult {
    pub fn severity(&self) -> Severity {
        Severity::from_level(self.threat_level)
    }

    pub fn factor(&self, category: RiskCategory) -> Option<&RiskFactor> {
        self.risk_factors.get(&category)
    }
}

// ============================================================================
// ALERT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// `alert_YYYYMMDD_HHMMSS` of `timestamp`
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub threat_level: f64,
    pub severity: Severity,
    pub site_location: String,
    pub message: String,
    pub data_snapshot: ProcessedSample,
    pub recommended_actions: Vec<String>,
}

/// Deterministic alert id for a timestamp
pub fn alert_id(timestamp: DateTime<Utc>) -> String {
    format!("alert_{}", timestamp.format("%Y%m%d_%H%M%S"))
}
