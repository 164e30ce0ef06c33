//! Descriptive statistics over timing and metric samples.
//!
//! Quartiles use midpoint interpolation: the sorted sample is split into
//! overlapping lower and upper halves and each half's median is taken.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TestbedError};

/// Summary of one numeric sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Stats {
    /// Arithmetic mean.
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    /// Largest value.
    pub max: f64,
    /// Upper quartile.
    pub quantile3: f64,
    /// Median.
    pub median: f64,
    /// Lower quartile.
    pub quantile1: f64,
    /// Smallest value.
    pub min: f64,
}

/// Compute [`Stats`] for a non-empty sample.
pub fn build_stats(results: &[f64]) -> Result<Stats> {
    let first = *results.first().ok_or(TestbedError::EmptyInput)?;

    // min, max, mean and std in a single pass
    let mut sum = 0.0;
    let mut sum_squared = 0.0;
    let mut min = first;
    let mut max = first;

    for &x in results {
        sum += x;
        sum_squared += x * x;
        if x < min {
            min = x;
        }
        if x > max {
            max = x;
        }
    }

    let n = results.len() as f64;
    let mean = sum / n;
    let variance = (sum_squared / n - mean * mean).max(0.0);

    let (quantile1, median, quantile3) = quantiles(results);

    Ok(Stats {
        mean,
        std: variance.sqrt(),
        max,
        quantile3,
        median,
        quantile1,
        min,
    })
}

/// Lower quartile, median and upper quartile of an unsorted sample.
fn quantiles(input: &[f64]) -> (f64, f64, f64) {
    if input.is_empty() {
        return (0.0, 0.0, 0.0);
    }

    let mut sorted = input.to_vec();
    sorted.sort_by(f64::total_cmp);

    let len = sorted.len();
    let (c1, c2) = if len % 2 == 0 {
        (len / 2 + 1, len / 2 - 1)
    } else {
        let c1 = (len - 1) / 2 + 1;
        (c1, c1 - 1)
    };

    (
        median(&sorted[..c1]),
        median(&sorted),
        median(&sorted[c2..]),
    )
}

/// Median of an already sorted, non-empty slice.
fn median(sorted: &[f64]) -> f64 {
    let len = sorted.len();
    if len % 2 == 0 {
        (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0
    } else {
        sorted[len / 2]
    }
}

/// Element-wise `after - before` over metric readings.
///
/// Fails if the arrays differ in length or a value is not a float.
pub fn subtract_arrays(before: &[String], after: &[String]) -> Result<Vec<f64>> {
    if before.len() != after.len() {
        return Err(TestbedError::Validation(format!(
            "metric arrays do not have the same length ({} != {})",
            before.len(),
            after.len()
        )));
    }

    before
        .iter()
        .zip(after)
        .map(|(b, a)| Ok(parse_metric(a)? - parse_metric(b)?))
        .collect()
}

fn parse_metric(s: &str) -> Result<f64> {
    s.trim()
        .parse::<f64>()
        .map_err(|_| TestbedError::Parse(format!("metric value `{}` is not a number", s)))
}
