//! Threat Module
//!
//! Rockfall threat scoring: per-factor risk, weighted threat level, trend
//! escalation and alert generation.
//!
//! ## Structure
//! - `types`: Severity, RiskFactor, AnalysisResult, Alert
//! - `rules`: weights, factor constants, ThresholdConfig
//! - `trend`: least-squares escalation
//! - `analyzer`: ThreatAnalyzer
//!
//! ## Usage
//! ```ignore
//! let analyzer = ThreatAnalyzer::new("Site-A", ThresholdConfig::default());
//! let result = analyzer.analyze(&sample);
//! if analyzer.assess_trend(&history) > analyzer.thresholds().emergency() {
//!     let alert = analyzer.generate_alert(level, &latest);
//! }
//! ```

pub mod analyzer;
pub mod rules;
pub mod trend;
pub mod types;

pub use analyzer::{combine, score, ThreatAnalyzer};
pub use rules::ThresholdConfig;
pub use trend::TrendParams;
pub use types::{Alert, AlertLevel, AnalysisResult, RiskCategory, RiskFactor, Severity};
