//! Pairwise comparison against the mean of spatial neighbors.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{apply_boundary_rule, check_lengths, SegmentRules};
use crate::error::Result;
use crate::stats::{nanstd, run_starts};

/// Pairwise parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairwiseParams {
    /// Multiplier on the standard deviation of the differences.
    pub threshold_factor: f64,
    #[serde(flatten)]
    pub rules: SegmentRules,
}

impl Default for PairwiseParams {
    fn default() -> Self {
        Self {
            threshold_factor: 3.0,
            rules: SegmentRules::default(),
        }
    }
}

/// Per-time-step mean of the finite neighbor values (NaN where none is finite).
pub fn neighbor_means(neighbors: &[&[f64]], len: usize) -> Result<Vec<f64>> {
    for neighbor in neighbors {
        check_lengths(len, neighbor.len())?;
    }

    let mut means = vec![f64::NAN; len];
    for (t, slot) in means.iter_mut().enumerate() {
        let mut sum = 0.0;
        let mut count = 0usize;
        for neighbor in neighbors {
            let v = neighbor[t];
            if v.is_finite() {
                sum += v;
                count += 1;
            }
        }
        if count > 0 {
            *slot = sum / count as f64;
        }
    }
    Ok(means)
}

/// Detect breakpoints of `series` against its neighbor means.
///
/// After the first one, a candidate is accepted only when it is at least
/// `min_segment_length` past the previous breakpoint and the differences in
/// between dip below the threshold at least once, so one long excursion
/// yields a single breakpoint.
pub fn detect(series: &[f64], means: &[f64], params: &PairwiseParams) -> Result<Vec<usize>> {
    check_lengths(series.len(), means.len())?;
    if series.is_empty() {
        return Ok(Vec::new());
    }

    let differences: Vec<f64> = series.iter().zip(means).map(|(s, m)| s - m).collect();
    let threshold = params.threshold_factor * nanstd(&differences);

    let exceedances: Vec<usize> = differences
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d.is_finite() && d.abs() > threshold)
        .map(|(t, _)| t)
        .collect();

    let last = series.len() - 1;
    let min_gap = params.rules.min_segment_length;
    let mut accepted: Vec<usize> = Vec::new();
    for candidate in run_starts(&exceedances) {
        if candidate == last {
            continue;
        }
        let accept = match accepted.last() {
            None => true,
            Some(&prev) => {
                candidate - prev >= min_gap
                    && differences[prev..candidate]
                        .iter()
                        .any(|d| d.is_finite() && d.abs() < threshold)
            }
        };
        if accept {
            accepted.push(candidate);
        }
    }
    apply_boundary_rule(&mut accepted, min_gap);

    debug!(threshold, breakpoints = ?accepted, "Pairwise detection complete");
    Ok(accepted)
}
