//! Latency statistics.
//!
//! Raw samples are collected in microseconds and summarized in milliseconds,
//! every field rounded to two decimal places.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Summary of one latency distribution, in milliseconds.
///
/// Field names on the wire match the result files consumed by the plotting
/// scripts (`avg_time`, `std_dev`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceResult {
    #[serde(rename = "min_time")]
    pub min: f64,
    #[serde(rename = "max_time")]
    pub max: f64,
    #[serde(rename = "avg_time")]
    pub mean: f64,
    #[serde(rename = "std_dev")]
    pub stddev: f64,
    #[serde(rename = "median_time")]
    pub median: f64,
}

impl PerformanceResult {
    /// Summarize raw samples given in microseconds.
    ///
    /// Standard deviation is the population deviation. Fails with
    /// [`Error::EmptySampleSet`] when `samples_us` is empty.
    pub fn from_samples(samples_us: &[f64]) -> Result<Self> {
        if samples_us.is_empty() {
            return Err(Error::EmptySampleSet);
        }

        let mut millis: Vec<f64> = samples_us.iter().map(|us| us / 1000.0).collect();
        millis.sort_by(f64::total_cmp);

        let count = millis.len() as f64;
        let min = millis[0];
        let max = millis[millis.len() - 1];
        // Summation error can push the mean of near-equal samples past an
        // extreme, which rounding would then expose.
        let mean = (millis.iter().sum::<f64>() / count).clamp(min, max);
        let variance = millis.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / count;

        let mid = millis.len() / 2;
        let median = if millis.len() % 2 == 0 {
            (millis[mid - 1] + millis[mid]) / 2.0
        } else {
            millis[mid]
        };

        Ok(Self {
            min: round_two_places(min),
            max: round_two_places(max),
            mean: round_two_places(mean),
            stddev: round_two_places(variance.sqrt()),
            median: round_two_places(median),
        })
    }
}

/// Round to two decimal places, half away from zero, on the shortest decimal
/// representation of `value`.
///
/// Rounding the binary value directly would turn `1.005` into `1.00`.
pub fn round_two_places(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }

    // f64 Display never uses exponent notation and yields the shortest
    // round-trip digits.
    let repr = value.abs().to_string();
    let (int_part, frac_part) = repr.split_once('.').unwrap_or((repr.as_str(), ""));
    if frac_part.len() <= 2 {
        return value;
    }

    let frac = frac_part.as_bytes();
    let mut cents: u128 = match int_part.parse::<u128>() {
        Ok(whole) => whole * 100,
        // Integer part too large to carry cents; already exact at this scale.
        Err(_) => return value,
    };
    cents += u128::from(frac[0] - b'0') * 10 + u128::from(frac[1] - b'0');
    if frac[2] >= b'5' {
        cents += 1;
    }

    let rounded: f64 = format!("{}.{:02}", cents / 100, cents % 100)
        .parse()
        .unwrap_or(value);
    if value.is_sign_negative() {
        -rounded
    } else {
        rounded
    }
}
