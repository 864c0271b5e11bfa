//! Sensor Drivers
//!
//! Hardware access sits behind `SensorDriver`. The simulated driver produces
//! plausible readings for bench runs and field-less deployments.

use rand::Rng;
use thiserror::Error;

use super::types::{reading, Channel, Reading};

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("channel {0} is not wired on this device")]
    NotWired(Channel),
    #[error("read failed on {channel}: {reason}")]
    ReadFailed { channel: Channel, reason: String },
}

impl SensorError {
    pub fn kind(&self) -> &'static str {
        match self {
            SensorError::NotWired(_) => "not_wired",
            SensorError::ReadFailed { .. } => "read_failed",
        }
    }
}

/// Source of raw channel readings
pub trait SensorDriver: Send {
    fn read(&mut self, channel: Channel) -> Result<Reading, SensorError>;
}

// ============================================================================
// SIMULATED DRIVER
// ============================================================================

/// Random readings around a stable slope
#[derive(Debug, Default)]
pub struct SimulatedDriver;

impl SimulatedDriver {
    pub fn new() -> Self {
        Self
    }
}

impl SensorDriver for SimulatedDriver {
    fn read(&mut self, channel: Channel) -> Result<Reading, SensorError> {
        let mut rng = rand::thread_rng();
        let r = match channel {
            Channel::Accelerometer => reading([
                ("x_axis", normal(&mut rng, 0.0, 0.1)),
                ("y_axis", normal(&mut rng, 0.0, 0.1)),
                ("z_axis", normal(&mut rng, 9.81, 0.2)),
                ("magnitude", normal(&mut rng, 9.81, 0.2)),
                ("frequency", rng.gen_range(0.1..10.0)),
            ]),
            Channel::Tiltmeter => reading([
                ("x_tilt", normal(&mut rng, 0.0, 0.05)),
                ("y_tilt", normal(&mut rng, 0.0, 0.05)),
                ("temperature", rng.gen_range(15.0..25.0)),
            ]),
            Channel::Weather => reading([
                ("temperature", rng.gen_range(10.0..30.0)),
                ("humidity", rng.gen_range(30.0..90.0)),
                ("pressure", rng.gen_range(980.0..1020.0)),
                ("rainfall", normal(&mut rng, 0.0, 2.0).max(0.0)),
                ("wind_speed", rng.gen_range(0.0..15.0)),
                ("wind_direction", rng.gen_range(0.0..360.0)),
            ]),
        };
        Ok(r)
    }
}

/// Box-Muller draw from N(mean, std_dev)
fn normal<R: Rng>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std_dev * z
}
