//! Per-parcel pixel statistics.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Inclusive range of values a sensor can produce for an index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidRange {
    pub min: f64,
    pub max: f64,
}

impl ValidRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }
}

/// Summary statistics over the valid pixels of one acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    pub count: u64,
}

/// Reduces raw pixel values to summary statistics.
///
/// Non-finite values and values outside `range` are dropped first. Fails with
/// [`Error::InsufficientData`] when nothing survives the filter.
pub fn reduce(values: &[f64], range: ValidRange) -> Result<Statistics> {
    let mut count = 0u64;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;

    for &v in values.iter().filter(|v| range.contains(**v)) {
        count += 1;
        sum += v;
        min = min.min(v);
        max = max.max(v);
    }

    if count == 0 {
        return Err(Error::InsufficientData);
    }

    // Rounding in the division can push the mean just past an extreme
    // when all pixels are equal.
    let mean = (sum / count as f64).clamp(min, max);

    let variance = values
        .iter()
        .filter(|v| range.contains(**v))
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / count as f64;

    Ok(Statistics {
        mean,
        min,
        max,
        std_dev: variance.sqrt(),
        count,
    })
}
