//! Standard Normal Homogeneity Test.
//!
//! The threshold is tied to the reference series itself: a candidate split in
//! the anomaly only counts when its statistic beats `sd_factor` times the
//! largest statistic the reference reaches on its own.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{apply_boundary_rule, check_lengths, SegmentRules};
use crate::error::Result;
use crate::stats::{mean, run_starts, sample_variance};

/// SNHT parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnhtParams {
    /// Multiplier on the reference's maximum statistic.
    pub sd_factor: f64,
    /// Series with fewer co-located finite points are left untouched.
    pub min_valid_points: usize,
    #[serde(flatten)]
    pub rules: SegmentRules,
}

impl Default for SnhtParams {
    fn default() -> Self {
        Self {
            sd_factor: 1.0,
            min_valid_points: 24,
            rules: SegmentRules::default(),
        }
    }
}

/// SNHT statistic of a fully finite series.
///
/// `Tn[k] = (k·(mean(x[..k]) − m)² + (n−k)·(mean(x[k..]) − m)²) / var`
/// with `var` the sample variance. `Tn[0]` and `Tn[n−1]` are 0, and the whole
/// statistic is 0 for fewer than two points or a constant series.
pub fn snht_statistic(x: &[f64]) -> Vec<f64> {
    let n = x.len();
    let mut tn = vec![0.0; n];
    if n < 2 {
        return tn;
    }

    let variance = sample_variance(x);
    if !(variance > 0.0) {
        return tn;
    }
    let total_mean = mean(x);

    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    for &v in x {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + v);
    }
    let total = prefix[n];

    for k in 1..n - 1 {
        let head = prefix[k] / k as f64;
        let tail = (total - prefix[k]) / (n - k) as f64;
        tn[k] = (k as f64 * (head - total_mean).powi(2)
            + (n - k) as f64 * (tail - total_mean).powi(2))
            / variance;
    }
    tn
}

/// Detect breakpoints of `series` against `reference`.
///
/// Returns original-array indices, anchored at 0. The list is empty when the
/// two series share fewer than `min_valid_points` finite positions or the
/// reference is constant (its statistic, and so the threshold, is zero).
pub fn detect(series: &[f64], reference: &[f64], params: &SnhtParams) -> Result<Vec<usize>> {
    check_lengths(series.len(), reference.len())?;

    let valid: Vec<usize> = (0..series.len())
        .filter(|&i| series[i].is_finite() && reference[i].is_finite())
        .collect();
    if valid.len() < params.min_valid_points || valid.len() < 2 {
        debug!(
            valid_points = valid.len(),
            min_valid_points = params.min_valid_points,
            "Insufficient data for SNHT"
        );
        return Ok(Vec::new());
    }

    let valid_reference: Vec<f64> = valid.iter().map(|&i| reference[i]).collect();
    let anomaly: Vec<f64> = valid.iter().map(|&i| series[i] - reference[i]).collect();

    // Threshold and anomaly statistic share the same co-finite positions.
    let reference_max = snht_statistic(&valid_reference)
        .into_iter()
        .fold(0.0_f64, f64::max);
    if !(reference_max > 0.0) {
        debug!("Constant reference, SNHT threshold is degenerate");
        return Ok(Vec::new());
    }
    let threshold = params.sd_factor * reference_max;

    let exceedances: Vec<usize> = snht_statistic(&anomaly)
        .iter()
        .enumerate()
        .filter(|&(_, &t)| t > threshold)
        .map(|(k, _)| k)
        .collect();

    let last = anomaly.len() - 1;
    let mut accepted: Vec<usize> = Vec::new();
    for candidate in run_starts(&exceedances) {
        if candidate == last {
            continue;
        }
        match accepted.last() {
            Some(&prev) if candidate - prev < params.rules.min_segment_length => {}
            _ => accepted.push(candidate),
        }
    }
    apply_boundary_rule(&mut accepted, params.rules.min_segment_length);

    let mut breakpoints: Vec<usize> = accepted.into_iter().map(|k| valid[k]).collect();
    // The anchor segment starts at the series start, not at the first valid point.
    if let Some(first) = breakpoints.first_mut() {
        *first = 0;
    }
    debug!(
        threshold,
        reference_max,
        breakpoints = ?breakpoints,
        "SNHT detection complete"
    );
    Ok(breakpoints)
}
