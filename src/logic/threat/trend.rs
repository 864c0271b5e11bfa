//! Trend Escalation
//!
//! First-order least-squares fit over recent threat levels. A rising slope
//! projects the latest level forward so accelerating degradation is caught
//! before any single reading crosses a threshold.

use serde::{Deserialize, Serialize};

/// Minimum number of levels needed for a fit
pub const MIN_TREND_POINTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendParams {
    /// How many of the most recent samples are re-scored
    pub window: usize,
    /// Slope per step that counts as rising
    pub epsilon: f64,
    /// Steps projected forward
    pub horizon: f64,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            window: 10,
            epsilon: 0.01,
            horizon: 5.0,
        }
    }
}

/// Least-squares slope of `values` against their index
pub fn linear_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }

    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;

    let (mut num, mut den) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }

    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Projected level for an ordered (oldest first) series of threat levels
pub fn project(levels: &[f64], params: &TrendParams) -> f64 {
    let Some(&current) = levels.last() else {
        return 0.0;
    };

    if levels.len() < MIN_TREND_POINTS {
        return current;
    }

    let slope = linear_slope(levels);
    if slope > params.epsilon {
        (current + slope * params.horizon).min(1.0)
    } else {
        current
    }
}
