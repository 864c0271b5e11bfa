//! Threat Analyzer
//!
//! Scoring only - no I/O.
//! Input: ProcessedSample (or a short history of them)
//! Output: AnalysisResult / trend-assessed level / Alert

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use super::rules::{self, ThresholdConfig};
use super::trend::{self, TrendParams};
use super::types::{alert_id, Alert, AnalysisResult, RiskCategory, RiskFactor, Severity};
use crate::logic::sensors::{Channel, ProcessedSample};

/// Alerts kept for audit when not configured
pub const DEFAULT_ALERT_HISTORY: usize = 100;

struct AnalyzerSettings {
    site_location: String,
    trend: TrendParams,
}

pub struct ThreatAnalyzer {
    thresholds: RwLock<Arc<ThresholdConfig>>,
    settings: RwLock<AnalyzerSettings>,
    alert_history: Mutex<VecDeque<Alert>>,
    history_cap: usize,
}

impl ThreatAnalyzer {
    pub fn new(site_location: impl Into<String>, thresholds: ThresholdConfig) -> Self {
        Self::with_params(site_location, thresholds, TrendParams::default(), DEFAULT_ALERT_HISTORY)
    }

    pub fn with_params(
        site_location: impl Into<String>,
        thresholds: ThresholdConfig,
        trend: TrendParams,
        history_cap: usize,
    ) -> Self {
        Self {
            thresholds: RwLock::new(Arc::new(thresholds)),
            settings: RwLock::new(AnalyzerSettings {
                site_location: site_location.into(),
                trend,
            }),
            alert_history: Mutex::new(VecDeque::new()),
            history_cap: history_cap.max(1),
        }
    }

    /// Current threshold set (a consistent snapshot)
    pub fn thresholds(&self) -> Arc<ThresholdConfig> {
        self.thresholds.read().clone()
    }

    /// Shallow-merge a remote patch; readers see either the old or the new set
    pub fn update_thresholds(&self, patch: &serde_json::Map<String, serde_json::Value>) -> usize {
        let mut guard = self.thresholds.write();
        let (next, applied) = guard.merged(patch);
        *guard = Arc::new(next);
        log::info!("Analysis thresholds updated ({} keys)", applied);
        applied
    }

    pub fn reconfigure(&self, site_location: &str, trend: TrendParams) {
        let mut settings = self.settings.write();
        settings.site_location = site_location.to_string();
        settings.trend = trend;
    }

    // ========================================================================
    // SCORING
    // ========================================================================

    pub fn analyze(&self, sample: &ProcessedSample) -> AnalysisResult {
        let thresholds = self.thresholds();
        score(sample, &thresholds)
    }

    /// Trend-adjusted level over an oldest-first history
    pub fn assess_trend(&self, history: &[ProcessedSample]) -> f64 {
        if history.is_empty() {
            return 0.0;
        }

        let thresholds = self.thresholds();
        let params = self.settings.read().trend;
        let start = history.len().saturating_sub(params.window.max(1));

        let levels: Vec<f64> = history[start..]
            .iter()
            .map(|s| score(s, &thresholds).threat_level)
            .collect();

        trend::project(&levels, &params)
    }

    pub fn severity_of(&self, threat_level: f64) -> Severity {
        Severity::from_level(threat_level)
    }

    /// The AnalysisResult backing an alert raised at `threat_level`
    pub fn escalate(&self, threat_level: f64, sample: &ProcessedSample) -> AnalysisResult {
        let thresholds = self.thresholds();
        let base = score(sample, &thresholds);
        let level = threat_level.clamp(0.0, 1.0);

        AnalysisResult {
            recommendations: recommendations(level, &base.risk_factors, &thresholds),
            threat_level: level,
            alert_generated: true,
            ..base
        }
    }

    // ========================================================================
    // ALERTS
    // ========================================================================

    pub fn generate_alert(&self, threat_level: f64, sample: &ProcessedSample) -> Alert {
        let thresholds = self.thresholds();
        let location = self.settings.read().site_location.clone();
        let timestamp = Utc::now();
        let severity = Severity::from_level(threat_level);

        let alert = Alert {
            id: alert_id(timestamp),
            timestamp,
            threat_level,
            severity,
            message: alert_message(severity, &location),
            site_location: location,
            data_snapshot: sample.clone(),
            recommended_actions: recommendations(threat_level, &BTreeMap::new(), &thresholds),
        };

        let mut history = self.alert_history.lock();
        if history.len() >= self.history_cap {
            history.pop_front();
        }
        history.push_back(alert.clone());

        alert
    }

    /// More than one alert in the history carries this id
    pub fn is_duplicate(&self, id: &str) -> bool {
        let history = self.alert_history.lock();
        history.iter().filter(|a| a.id == id).count() > 1
    }

    pub fn recent_alerts(&self) -> Vec<Alert> {
        self.alert_history.lock().iter().cloned().collect()
    }
}

// ============================================================================
// FACTOR SCORING
// ============================================================================

/// Score a sample against a threshold set
pub fn score(sample: &ProcessedSample, thresholds: &ThresholdConfig) -> AnalysisResult {
    let mut risk_factors = BTreeMap::new();

    if sample.sample.reading(Channel::Accelerometer).is_some() {
        risk_factors.insert(RiskCategory::Acceleration, acceleration_factor(sample, thresholds));
    }
    if sample.sample.reading(Channel::Tiltmeter).is_some() {
        risk_factors.insert(RiskCategory::Tilt, tilt_factor(sample, thresholds));
    }
    if sample.sample.reading(Channel::Weather).is_some() {
        risk_factors.insert(RiskCategory::Environmental, environmental_factor(sample, thresholds));
    }
    if !sample.derived_metrics.is_empty() {
        risk_factors.insert(RiskCategory::Derived, derived_factor(sample, thresholds));
    }

    let threat_level = combine(&risk_factors);

    AnalysisResult {
        timestamp: Utc::now(),
        data_id: sample.timestamp(),
        threat_level,
        recommendations: recommendations(threat_level, &risk_factors, thresholds),
        risk_factors,
        alert_generated: false,
    }
}

/// Weighted average over the factors present; none present => 0.0
pub fn combine(risk_factors: &BTreeMap<RiskCategory, RiskFactor>) -> f64 {
    let (total, weight) = risk_factors
        .iter()
        .fold((0.0, 0.0), |(total, weight), (category, factor)| {
            let w = rules::category_weight(*category);
            (total + factor.risk_score * w, weight + w)
        });

    if weight > 0.0 {
        (total / weight).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn acceleration_factor(sample: &ProcessedSample, thresholds: &ThresholdConfig) -> RiskFactor {
    let s = &sample.sample;
    let magnitude = s
        .value(Channel::Accelerometer, "magnitude")
        .unwrap_or(rules::NOMINAL_GRAVITY);
    let frequency = s.value(Channel::Accelerometer, "frequency").unwrap_or(0.0);

    let gravity_deviation = (magnitude - rules::NOMINAL_GRAVITY).abs() / rules::NOMINAL_GRAVITY;
    let frequency_risk = (frequency / rules::FREQUENCY_NORMALIZER).clamp(0.0, 1.0);
    let risk = (gravity_deviation * 0.6 + frequency_risk * 0.4).min(1.0);

    RiskFactor::new(risk, risk > thresholds.acceleration())
        .detail("gravity_deviation", gravity_deviation)
        .detail("frequency_risk", frequency_risk)
}

fn tilt_factor(sample: &ProcessedSample, thresholds: &ThresholdConfig) -> RiskFactor {
    let s = &sample.sample;
    let x = s.value(Channel::Tiltmeter, "x_tilt").unwrap_or(0.0).abs();
    let y = s.value(Channel::Tiltmeter, "y_tilt").unwrap_or(0.0).abs();
    let max_tilt = x.max(y);
    let total_tilt = (x * x + y * y).sqrt();

    let limit = thresholds.tilt();
    let risk = if limit > 0.0 {
        (total_tilt / limit).min(1.0)
    } else if total_tilt > 0.0 {
        1.0
    } else {
        0.0
    };

    RiskFactor::new(risk, risk > rules::TILT_HIGH_SCORE)
        .detail("max_tilt", max_tilt)
        .detail("total_tilt", total_tilt)
}

fn environmental_factor(sample: &ProcessedSample, thresholds: &ThresholdConfig) -> RiskFactor {
    let s = &sample.sample;
    let rainfall = s.value(Channel::Weather, "rainfall").unwrap_or(0.0);
    let wind_speed = s.value(Channel::Weather, "wind_speed").unwrap_or(0.0);
    let temperature = s.value(Channel::Weather, "temperature").unwrap_or(20.0);

    let rain_risk = (rainfall / rules::RAIN_NORMALIZER).clamp(0.0, 1.0);
    let wind_risk = ((wind_speed - rules::WIND_FLOOR).max(0.0) / 10.0).min(1.0);
    let temperature_risk = if (rules::FREEZE_THAW_MIN..=rules::FREEZE_THAW_MAX).contains(&temperature) {
        0.5
    } else {
        0.0
    };
    let risk = rain_risk * 0.5 + wind_risk * 0.3 + temperature_risk * 0.2;

    RiskFactor::new(risk, risk > thresholds.environmental())
        .detail("rain_risk", rain_risk)
        .detail("wind_risk", wind_risk)
        .detail("temperature_risk", temperature_risk)
}

fn derived_factor(sample: &ProcessedSample, thresholds: &ThresholdConfig) -> RiskFactor {
    let instability = sample.derived_metrics.instability_index.unwrap_or(0.0);
    let environmental = sample.derived_metrics.environmental_risk.unwrap_or(0.0);
    let risk = (instability * 0.7 + environmental * 0.3).clamp(0.0, 1.0);

    RiskFactor::new(risk, risk > thresholds.combined_risk())
        .detail("instability_index", instability)
        .detail("environmental_component", environmental)
}

// ============================================================================
// RECOMMENDATIONS + MESSAGES
// ============================================================================

fn recommendations(
    threat_level: f64,
    risk_factors: &BTreeMap<RiskCategory, RiskFactor>,
    thresholds: &ThresholdConfig,
) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    let general: &[&str] = if threat_level > thresholds.emergency() {
        &[
            "IMMEDIATE EVACUATION RECOMMENDED",
            "Alert emergency services",
            "Activate emergency protocols",
            "Continuous monitoring required",
        ]
    } else if threat_level > thresholds.combined_risk() {
        &[
            "Increase monitoring frequency",
            "Restrict access to high-risk areas",
            "Prepare evacuation procedures",
            "Contact geological team",
        ]
    } else if threat_level > rules::MONITORING_LEVEL {
        &[
            "Enhanced monitoring recommended",
            "Review recent geological changes",
            "Check sensor calibration",
        ]
    } else {
        &[]
    };
    out.extend(general.iter().map(|s| s.to_string()));

    for (category, factor) in risk_factors {
        if !factor.is_high() {
            continue;
        }
        let line = match category {
            RiskCategory::Acceleration => "High vibration detected - check for equipment interference",
            RiskCategory::Tilt => "Significant slope movement detected",
            RiskCategory::Environmental => "Adverse weather conditions - increased rockfall risk",
            RiskCategory::Derived => "Combined instability indicators elevated",
        };
        out.push(line.to_string());
    }

    out
}

fn alert_message(severity: Severity, location: &str) -> String {
    match severity {
        Severity::Critical => format!(
            "CRITICAL ROCKFALL RISK detected at {}. Immediate evacuation recommended.",
            location
        ),
        Severity::High => format!(
            "HIGH ROCKFALL RISK detected at {}. Enhanced monitoring and restricted access advised.",
            location
        ),
        Severity::Medium => format!(
            "ELEVATED ROCKFALL RISK detected at {}. Increased vigilance recommended.",
            location
        ),
        Severity::Low => format!("Normal monitoring alert from {}.", location),
    }
}
