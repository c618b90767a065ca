//! Breakpoint detection and correction strategies.
//!
//! Both strategies share the same shape: compare a target series against a
//! comparison series, pick the first index of each run of exceedances as a
//! breakpoint candidate, filter the candidates by spacing, anchor the list at
//! index 0 and then shift every earlier segment onto the most recent one.
//!
//! ```text
//!   series ──┐
//!            ├─► anomaly ──► detect ──► [0, b1, b2] ──► correct ──► corrected
//!   reference┘      │                                     ▲
//!                   └─────────────── windowed offsets ────┘
//! ```

pub mod pairwise;
pub mod snht;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::WindowAlignment;
use crate::error::{HomogenizationError, Result};
use crate::stats::nanmean;

pub use pairwise::PairwiseParams;
pub use snht::SnhtParams;

/// Spacing and windowing rules shared by both strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRules {
    /// Points on each side of a breakpoint used for its offset.
    pub window_size: usize,
    /// Minimum distance between accepted breakpoints.
    pub min_segment_length: usize,
    pub alignment: WindowAlignment,
}

impl Default for SegmentRules {
    fn default() -> Self {
        Self {
            window_size: 24,
            min_segment_length: 12,
            alignment: WindowAlignment::Aligned,
        }
    }
}

/// What a cell is compared against.
#[derive(Debug, Clone, Copy)]
pub enum ReferenceInput<'a> {
    /// A single reference series of the same length as the target.
    Series(&'a [f64]),
    /// Spatial neighbor series, averaged per time step.
    Neighbors(&'a [&'a [f64]]),
}

impl<'a> ReferenceInput<'a> {
    /// Collapse the input into one comparison series of length `len`.
    pub fn comparison_series(&self, len: usize) -> Result<Vec<f64>> {
        match self {
            Self::Series(reference) => {
                check_lengths(len, reference.len())?;
                Ok(reference.to_vec())
            }
            Self::Neighbors(neighbors) => pairwise::neighbor_means(neighbors, len),
        }
    }
}

/// Outcome of homogenizing one series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesCorrection {
    pub original: Vec<f64>,
    pub corrected: Vec<f64>,
    /// The comparison series actually used (reference or neighbor means).
    pub reference: Vec<f64>,
    pub breakpoints: Vec<usize>,
}

impl SeriesCorrection {
    /// Per-point adjustment `corrected - original`.
    pub fn adjustments(&self) -> Vec<f64> {
        self.corrected
            .iter()
            .zip(&self.original)
            .map(|(c, o)| c - o)
            .collect()
    }
}

/// A breakpoint strategy with its parameters, dispatched once per cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum BreakpointStrategy {
    Snht(SnhtParams),
    Pairwise(PairwiseParams),
}

impl BreakpointStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Snht(_) => "SNHT",
            Self::Pairwise(_) => "pairwise",
        }
    }

    pub fn rules(&self) -> &SegmentRules {
        match self {
            Self::Snht(p) => &p.rules,
            Self::Pairwise(p) => &p.rules,
        }
    }

    /// Detect breakpoints of `series` against `reference`.
    pub fn detect(&self, series: &[f64], reference: &ReferenceInput<'_>) -> Result<Vec<usize>> {
        let comparison = reference.comparison_series(series.len())?;
        self.detect_against(series, &comparison)
    }

    /// Apply the correction pass for previously detected breakpoints.
    pub fn correct(
        &self,
        series: &[f64],
        reference: &ReferenceInput<'_>,
        breakpoints: &[usize],
    ) -> Result<Vec<f64>> {
        let comparison = reference.comparison_series(series.len())?;
        Ok(apply_corrections(series, &comparison, breakpoints, self.rules()))
    }

    /// Detect and correct in one pass.
    pub fn homogenize(
        &self,
        series: &[f64],
        reference: &ReferenceInput<'_>,
    ) -> Result<SeriesCorrection> {
        let comparison = reference.comparison_series(series.len())?;
        let breakpoints = self.detect_against(series, &comparison)?;
        let corrected = apply_corrections(series, &comparison, &breakpoints, self.rules());
        Ok(SeriesCorrection {
            original: series.to_vec(),
            corrected,
            reference: comparison,
            breakpoints,
        })
    }

    fn detect_against(&self, series: &[f64], comparison: &[f64]) -> Result<Vec<usize>> {
        match self {
            Self::Snht(p) => snht::detect(series, comparison, p),
            Self::Pairwise(p) => pairwise::detect(series, comparison, p),
        }
    }
}

pub(crate) fn check_lengths(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(HomogenizationError::shape_mismatch(&[expected], &[actual]));
    }
    Ok(())
}

/// Anchor the breakpoint list at index 0.
///
/// A first breakpoint closer than `min_segment_length` to the start is moved
/// to 0; otherwise 0 is inserted in front of it.
pub fn apply_boundary_rule(breakpoints: &mut Vec<usize>, min_segment_length: usize) {
    match breakpoints.first().copied() {
        None => {}
        Some(first) if first < min_segment_length => breakpoints[0] = 0,
        Some(_) => breakpoints.insert(0, 0),
    }
}

/// Offset of the segment starting at `breakpoint` relative to the one before it.
///
/// `mean(anomaly after) - mean(anomaly before)` over `window_size` points on
/// each side, clipped to the series. Zero at index 0 or when either window
/// has no finite anomaly.
pub fn innovation(anomaly: &[f64], breakpoint: usize, rules: &SegmentRules) -> f64 {
    if breakpoint == 0 || breakpoint >= anomaly.len() {
        return 0.0;
    }
    let n = anomaly.len();
    let w = rules.window_size;
    let pivot = match rules.alignment {
        WindowAlignment::Aligned => breakpoint,
        WindowAlignment::Lagged => breakpoint - 1,
    };
    let before = &anomaly[pivot.saturating_sub(w)..pivot];
    let after = &anomaly[pivot..(breakpoint + w).min(n)];

    let shift = nanmean(after) - nanmean(before);
    if shift.is_finite() {
        shift
    } else {
        0.0
    }
}

/// Shift every segment onto the most recent one.
///
/// Breakpoints are visited last to first; every value before breakpoint `b`
/// receives `b`'s innovation, so earlier segments accumulate the offsets of
/// all later breakpoints. Innovations are measured on the uncorrected
/// anomaly, which keeps each one local to its windows.
pub fn apply_corrections(
    series: &[f64],
    comparison: &[f64],
    breakpoints: &[usize],
    rules: &SegmentRules,
) -> Vec<f64> {
    let mut corrected = series.to_vec();
    if breakpoints.len() < 2 {
        return corrected;
    }

    let anomaly: Vec<f64> = series
        .iter()
        .zip(comparison)
        .map(|(s, r)| s - r)
        .collect();

    for &bp in breakpoints.iter().rev() {
        let shift = innovation(&anomaly, bp, rules);
        if shift == 0.0 {
            continue;
        }
        debug!(breakpoint = bp, innovation = shift, "Applying segment correction");
        for value in &mut corrected[..bp] {
            *value += shift;
        }
    }
    corrected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(w: usize) -> SegmentRules {
        SegmentRules {
            window_size: w,
            ..SegmentRules::default()
        }
    }

    #[test]
    fn test_boundary_rule() {
        let mut bps = vec![5, 30];
        apply_boundary_rule(&mut bps, 12);
        assert_eq!(bps, vec![0, 30]);

        let mut bps = vec![12, 30];
        apply_boundary_rule(&mut bps, 12);
        assert_eq!(bps, vec![0, 12, 30]);

        let mut bps: Vec<usize> = vec![];
        apply_boundary_rule(&mut bps, 12);
        assert!(bps.is_empty());
    }

    #[test]
    fn test_innovation_windows() {
        // Offset of 2 before index 4, 0 after.
        let anomaly = [2.0, 2.0, 2.0, 2.0, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(innovation(&anomaly, 4, &rules(2)), -2.0);
        assert_eq!(innovation(&anomaly, 0, &rules(2)), 0.0);

        let lagged = SegmentRules {
            alignment: WindowAlignment::Lagged,
            ..rules(2)
        };
        // Before = [1, 3), after = [3, 6): mean 2 vs mean 2/3.
        let shift = innovation(&anomaly, 4, &lagged);
        assert!((shift - (2.0 / 3.0 - 2.0)).abs() < 1e-12);
    }

    #[test]
    fn test_innovation_missing_window_is_zero() {
        let anomaly = [f64::NAN, f64::NAN, 1.0, 1.0];
        assert_eq!(innovation(&anomaly, 2, &rules(2)), 0.0);
    }

    #[test]
    fn test_corrections_accumulate_backwards() {
        let reference = vec![0.0; 9];
        let series = vec![3.0, 3.0, 3.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0];
        let corrected = apply_corrections(&series, &reference, &[0, 3, 6], &rules(3));
        assert_eq!(corrected, vec![0.0; 9]);
    }

    #[test]
    fn test_single_breakpoint_is_noop() {
        let series = vec![1.0, 2.0, 3.0];
        let corrected = apply_corrections(&series, &[0.0; 3], &[0], &rules(2));
        assert_eq!(corrected, series);
    }

    #[test]
    fn test_reference_length_mismatch() {
        let strategy = BreakpointStrategy::Snht(SnhtParams::default());
        let result = strategy.homogenize(&[1.0, 2.0], &ReferenceInput::Series(&[1.0]));
        assert!(matches!(
            result,
            Err(HomogenizationError::ShapeMismatch { .. })
        ));
    }
}
