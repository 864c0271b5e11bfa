//! Sensor Ingestion
//!
//! Sample enabled channels, calibrate, flag implausible readings and compute
//! cross-channel indices. No persistence here.

use std::collections::BTreeMap;

use chrono::Utc;

use super::driver::SensorDriver;
use super::types::{Channel, DerivedMetrics, ProcessedSample, QualityFlag, SensorSample};
use crate::logic::config::{IngestionParams, SensorTable};

pub struct SensorIngestion {
    device_id: String,
    sensors: SensorTable,
    params: IngestionParams,
    driver: Box<dyn SensorDriver>,
}

impl SensorIngestion {
    pub fn new(
        device_id: impl Into<String>,
        sensors: SensorTable,
        params: IngestionParams,
        driver: Box<dyn SensorDriver>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            sensors,
            params,
            driver,
        }
    }

    /// Pick up a new channel table / parameter set after a config update
    pub fn reconfigure(&mut self, device_id: &str, sensors: &SensorTable, params: &IngestionParams) {
        self.device_id = device_id.to_string();
        self.sensors = sensors.clone();
        self.params = params.clone();
    }

    /// Read every enabled channel and apply its calibration
    pub fn sample(&mut self) -> SensorSample {
        let mut sample = SensorSample {
            timestamp: Utc::now(),
            device_id: self.device_id.clone(),
            sensors: BTreeMap::new(),
        };

        for channel in self.sensors.enabled_channels() {
            match self.driver.read(channel) {
                Ok(mut reading) => {
                    let cal = self.sensors.get(channel).calibration;
                    if !cal.is_identity() {
                        for value in reading.values_mut() {
                            *value = cal.apply(*value);
                        }
                    }
                    sample.sensors.insert(channel, reading);
                }
                Err(e) => {
                    log::warn!("Sensor read skipped (kind={}): {}", e.kind(), e);
                }
            }
        }

        sample
    }

    pub fn validate(&self, sample: &SensorSample) -> BTreeMap<Channel, QualityFlag> {
        validate(sample, &self.params)
    }

    pub fn derive_metrics(&self, sample: &SensorSample) -> DerivedMetrics {
        derive_metrics(sample, &self.params)
    }

    /// sample -> validate -> derive
    pub fn process(&mut self) -> ProcessedSample {
        let sample = self.sample();
        annotate(sample, &self.params)
    }
}

/// Attach quality flags and derived metrics to an existing sample
pub fn annotate(sample: SensorSample, params: &IngestionParams) -> ProcessedSample {
    let quality_flags = validate(&sample, params);
    let derived_metrics = derive_metrics(&sample, params);

    for (channel, flag) in &quality_flags {
        if !flag.valid {
            log::debug!("Implausible {} reading: {:?}", channel, flag.diagnostics);
        }
    }

    ProcessedSample {
        sample,
        quality_flags,
        derived_metrics,
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Per-channel plausibility checks. Never fails, only annotates.
pub fn validate(sample: &SensorSample, params: &IngestionParams) -> BTreeMap<Channel, QualityFlag> {
    let mut flags = BTreeMap::new();

    if let Some(accel) = sample.reading(Channel::Accelerometer) {
        let axes = (accel.get("x_axis"), accel.get("y_axis"), accel.get("z_axis"));
        let magnitude = match axes {
            (Some(x), Some(y), Some(z)) => (x * x + y * y + z * z).sqrt(),
            _ => accel.get("magnitude").copied().unwrap_or(0.0),
        };
        let valid = magnitude > params.gravity_band_min && magnitude < params.gravity_band_max;
        flags.insert(
            Channel::Accelerometer,
            QualityFlag::new(valid).with("magnitude_check", magnitude),
        );
    }

    if let Some(tilt) = sample.reading(Channel::Tiltmeter) {
        let x = tilt.get("x_tilt").copied().unwrap_or(0.0).abs();
        let y = tilt.get("y_tilt").copied().unwrap_or(0.0).abs();
        let max_tilt = x.max(y);
        flags.insert(
            Channel::Tiltmeter,
            QualityFlag::new(max_tilt < params.tilt_ceiling).with("max_tilt", max_tilt),
        );
    }

    if let Some(weather) = sample.reading(Channel::Weather) {
        let rainfall = weather.get("rainfall").copied().unwrap_or(0.0);
        let humidity = weather.get("humidity").copied();
        let humidity_ok = humidity.map_or(true, |h| (0.0..=100.0).contains(&h));
        let mut flag = QualityFlag::new(rainfall >= 0.0 && humidity_ok).with("rainfall", rainfall);
        if let Some(h) = humidity {
            flag = flag.with("humidity", h);
        }
        flags.insert(Channel::Weather, flag);
    }

    flags
}

// ============================================================================
// DERIVED METRICS
// ============================================================================

pub fn derive_metrics(sample: &SensorSample, params: &IngestionParams) -> DerivedMetrics {
    let mut metrics = DerivedMetrics::default();

    if let (Some(accel), Some(tilt)) = (
        sample.reading(Channel::Accelerometer),
        sample.reading(Channel::Tiltmeter),
    ) {
        let magnitude = accel.get("magnitude").copied().unwrap_or(params.nominal_gravity);
        let x = tilt.get("x_tilt").copied().unwrap_or(0.0);
        let y = tilt.get("y_tilt").copied().unwrap_or(0.0);
        let tilt_magnitude = (x * x + y * y).sqrt();

        let index = (magnitude - params.nominal_gravity) / params.nominal_gravity
            * params.instability_accel_weight
            + tilt_magnitude * params.instability_tilt_weight;
        metrics.instability_index = Some(index.max(0.0));
    }

    if let Some(weather) = sample.reading(Channel::Weather) {
        let rain = weather.get("rainfall").copied().unwrap_or(0.0);
        let wind = weather.get("wind_speed").copied().unwrap_or(0.0);
        let rain_factor = (rain / params.rain_normalizer).min(1.0);
        let wind_factor = (wind / params.wind_normalizer).min(1.0);
        metrics.environmental_risk =
            Some(rain_factor * params.rain_weight + wind_factor * params.wind_weight);
    }

    metrics
}
