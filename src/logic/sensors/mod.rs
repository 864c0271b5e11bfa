//! Sensors Module - Sampling, Calibration, Validation
//!
//! - `types`: SensorSample, QualityFlag, DerivedMetrics, ProcessedSample
//! - `driver`: hardware seam + simulated driver
//! - `ingestion`: the sampling pipeline

pub mod driver;
pub mod ingestion;
pub mod types;

pub use driver::{SensorDriver, SensorError, SimulatedDriver};
pub use ingestion::{annotate, derive_metrics, validate, SensorIngestion};
pub use types::{
    reading, Channel, DerivedMetrics, ProcessedSample, QualityFlag, Reading, SensorSample,
};
