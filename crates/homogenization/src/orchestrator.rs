//! The per-cell grid pass.
//!
//! # Layout
//!
//! ```text
//! target  [time][lat][lon] ──transpose──► [cell][time] ──┐
//! reference                 ──transpose──► [cell][time] ─┤
//!                                                         ▼
//!                       par_chunks_mut(times) over the output arenas
//!                       (one worker owns one cell's slices)
//!                                                         │
//! result  [time][lat][lon] ◄──transpose── [cell][time] ◄──┘
//! ```
//!
//! Cells never share mutable state. A failing or panicking cell is logged and
//! written as all-NaN; only cancellation stops the pass.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::align::AlignedInputs;
use crate::config::{HomogenizationConfig, ReferenceSource, StrategyConfig};
use crate::diagnostics::{autocorrelation, moving_variance_difference};
use crate::error::{HomogenizationError, Result};
use crate::neighbors::{find_valid_neighbors, neighbor_mean};
use crate::stats::all_missing;
use crate::strategy::{BreakpointStrategy, ReferenceInput};
use crate::types::{transpose, CellIndex, GridCoords, GridShape};

/// Cooperative cancellation flag, checked before each cell.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// What happened to one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellOutcome {
    /// At least one breakpoint besides the index-0 anchor was corrected.
    Homogenized,
    /// No breakpoints, or too little data to test.
    Unchanged,
    /// No usable neighbors; left as the original.
    Skipped,
    /// Processing failed; outputs are NaN.
    Failed,
}

impl CellOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Homogenized => "homogenized",
            Self::Unchanged => "unchanged",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// Counts for one grid pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridPassSummary {
    pub cells: usize,
    pub homogenized: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Detected breakpoints, not counting the index-0 anchors.
    pub breakpoints: usize,
    pub duration_ms: u64,
}

impl GridPassSummary {
    fn record(&mut self, status: &CellStatus) {
        self.cells += 1;
        self.breakpoints += status.breakpoints;
        match status.outcome {
            CellOutcome::Homogenized => self.homogenized += 1,
            CellOutcome::Unchanged => self.unchanged += 1,
            CellOutcome::Skipped => self.skipped += 1,
            CellOutcome::Failed => self.failed += 1,
        }
    }

    pub fn count(&self, outcome: CellOutcome) -> usize {
        match outcome {
            CellOutcome::Homogenized => self.homogenized,
            CellOutcome::Unchanged => self.unchanged,
            CellOutcome::Skipped => self.skipped,
            CellOutcome::Failed => self.failed,
        }
    }
}

/// SNHT validation fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnhtDiagnostics {
    /// `[time][lat][lon]` rolling variance of corrected minus original.
    pub moving_variance: Vec<f64>,
    /// `[lag][lat][lon]`, lags `1..=max_lag`.
    pub acf_original: Vec<f64>,
    /// `[lag][lat][lon]`, lags `1..=max_lag`.
    pub acf_corrected: Vec<f64>,
    pub max_lag: usize,
}

/// Strategy-specific part of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultExtension {
    /// Only original and corrected (e.g. transferred adjustments).
    Basic,
    Snht(SnhtDiagnostics),
    Pairwise,
}

/// Output of a grid pass. Arrays are `[time][lat][lon]` over `coords`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomogenizationResult {
    pub coords: GridCoords,
    pub original: Vec<f64>,
    pub corrected: Vec<f64>,
    pub extension: ResultExtension,
    pub summary: GridPassSummary,
}

impl HomogenizationResult {
    pub fn shape(&self) -> GridShape {
        self.coords.shape()
    }

    /// Adjustment field `corrected - original`.
    pub fn corrections(&self) -> Vec<f64> {
        self.corrected
            .iter()
            .zip(&self.original)
            .map(|(c, o)| c - o)
            .collect()
    }

    pub fn diagnostics(&self) -> Option<&SnhtDiagnostics> {
        match &self.extension {
            ResultExtension::Snht(d) => Some(d),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CellStatus {
    outcome: CellOutcome,
    breakpoints: usize,
}

/// Corrected series of one cell.
#[derive(Debug, Clone)]
pub(crate) struct CellRun {
    pub outcome: CellOutcome,
    pub corrected: Vec<f64>,
    pub breakpoints: usize,
}

/// Homogenize every cell of the aligned grids.
///
/// Fails as a whole only for an empty time intersection, inconsistent input
/// arrays, an invalid configuration or cancellation.
pub fn homogenize(
    inputs: &AlignedInputs,
    config: &HomogenizationConfig,
    cancel: Option<&CancelToken>,
) -> Result<HomogenizationResult> {
    config.validate()?;
    if inputs.is_empty() {
        return Err(HomogenizationError::EmptyTimeAxis);
    }

    let shape = inputs.coords.shape();
    for grid in [&inputs.target, &inputs.reference] {
        if grid.shape() != shape {
            return Err(HomogenizationError::shape_mismatch(
                &shape.dims(),
                &grid.shape().dims(),
            ));
        }
    }

    let target = if config.fill_missing_from_reference {
        inputs.target.fill_missing_from(&inputs.reference)?
    } else {
        inputs.target.clone()
    };
    let target_cm = target.to_cell_major();
    let reference_cm = inputs.reference.to_cell_major();
    let strategy = config.breakpoint_strategy();

    info!(
        strategy = strategy.name(),
        shape = %shape,
        fill_missing = config.fill_missing_from_reference,
        "Starting grid pass"
    );

    let reference_source = match config.strategy {
        StrategyConfig::Snht { reference, .. } => CellReference::Snht(reference),
        StrategyConfig::Pairwise { radius, .. } => CellReference::Neighbors(radius),
    };
    let run_cell = |cell: CellIndex, series: &[f64]| {
        process_cell(&strategy, reference_source, &reference_cm, &shape, cell, series)
    };

    let diagnostics = match (&strategy, config.diagnostics.enabled) {
        (BreakpointStrategy::Snht(_), true) => Some(&config.diagnostics),
        _ => None,
    };
    let mut result = grid_pass(
        &inputs.coords,
        &target_cm,
        diagnostics.map(|d| (d.moving_variance_window, d.acf_max_lag)),
        cancel,
        run_cell,
    )?;
    if matches!(strategy, BreakpointStrategy::Pairwise(_)) {
        result.extension = ResultExtension::Pairwise;
    }

    let summary = &result.summary;
    for outcome in [
        CellOutcome::Homogenized,
        CellOutcome::Unchanged,
        CellOutcome::Skipped,
        CellOutcome::Failed,
    ] {
        counter!("homogenization_cells_total", "outcome" => outcome.as_str())
            .increment(summary.count(outcome) as u64);
    }
    counter!("homogenization_breakpoints_total").increment(summary.breakpoints as u64);
    histogram!("homogenization_grid_pass_duration_seconds")
        .record(summary.duration_ms as f64 / 1000.0);

    info!(
        cells = summary.cells,
        homogenized = summary.homogenized,
        unchanged = summary.unchanged,
        skipped = summary.skipped,
        failed = summary.failed,
        breakpoints = summary.breakpoints,
        duration_ms = summary.duration_ms,
        "Grid pass complete"
    );
    Ok(result)
}

#[derive(Debug, Clone, Copy)]
enum CellReference {
    Snht(ReferenceSource),
    Neighbors(usize),
}

fn process_cell(
    strategy: &BreakpointStrategy,
    source: CellReference,
    reference_cm: &[f64],
    shape: &GridShape,
    cell: CellIndex,
    series: &[f64],
) -> Result<CellRun> {
    if all_missing(series) {
        return Ok(CellRun {
            outcome: CellOutcome::Unchanged,
            corrected: series.to_vec(),
            breakpoints: 0,
        });
    }

    let skipped = || CellRun {
        outcome: CellOutcome::Skipped,
        corrected: series.to_vec(),
        breakpoints: 0,
    };

    let correction = match source {
        CellReference::Snht(ReferenceSource::Collocated) => {
            let start = cell.linear(shape.lons) * shape.times;
            let reference = &reference_cm[start..start + shape.times];
            strategy.homogenize(series, &ReferenceInput::Series(reference))?
        }
        CellReference::Snht(ReferenceSource::NeighborMean { radius }) => {
            let Some(mean) = neighbor_mean(reference_cm, shape, cell, radius) else {
                debug!(lat = cell.lat, lon = cell.lon, "No valid neighbors");
                return Ok(skipped());
            };
            strategy.homogenize(series, &ReferenceInput::Series(&mean))?
        }
        CellReference::Neighbors(radius) => {
            let neighbors = find_valid_neighbors(reference_cm, shape, cell, radius);
            if neighbors.is_empty() {
                debug!(lat = cell.lat, lon = cell.lon, "No valid neighbors");
                return Ok(skipped());
            }
            strategy.homogenize(series, &ReferenceInput::Neighbors(&neighbors))?
        }
    };

    // The index-0 anchor is not a detected break.
    let breakpoints = correction.breakpoints.iter().filter(|&&b| b > 0).count();
    Ok(CellRun {
        outcome: if breakpoints == 0 {
            CellOutcome::Unchanged
        } else {
            CellOutcome::Homogenized
        },
        corrected: correction.corrected,
        breakpoints,
    })
}

type DiagnosticSlots<'a> = (&'a mut [f64], &'a mut [f64], &'a mut [f64]);

/// Run `run_cell` over every cell in parallel and assemble the result.
///
/// `diagnostics` is `(moving_variance_window, acf_max_lag)` when SNHT
/// diagnostics are wanted.
pub(crate) fn grid_pass<F>(
    coords: &GridCoords,
    target_cm: &[f64],
    diagnostics: Option<(usize, usize)>,
    cancel: Option<&CancelToken>,
    run_cell: F,
) -> Result<HomogenizationResult>
where
    F: Fn(CellIndex, &[f64]) -> Result<CellRun> + Sync,
{
    let started = Instant::now();
    let shape = coords.shape();
    let (times, cells, lons) = (shape.times, shape.cells(), shape.lons);
    if times == 0 {
        return Err(HomogenizationError::EmptyTimeAxis);
    }
    if target_cm.len() != shape.len() {
        return Err(HomogenizationError::shape_mismatch(
            &[shape.len()],
            &[target_cm.len()],
        ));
    }

    let mut corrected_cm = vec![f64::NAN; shape.len()];
    let mut original_cm = vec![f64::NAN; shape.len()];
    let (mv_window, max_lag) = diagnostics.unwrap_or((0, 0));
    let with_diagnostics = diagnostics.is_some() && max_lag > 0;
    let mut mv_cm = vec![f64::NAN; if with_diagnostics { shape.len() } else { 0 }];
    let mut acf_original = vec![f64::NAN; if with_diagnostics { cells * max_lag } else { 0 }];
    let mut acf_corrected = vec![f64::NAN; if with_diagnostics { cells * max_lag } else { 0 }];

    let diagnostic_slots: Vec<Option<DiagnosticSlots<'_>>> = if with_diagnostics {
        mv_cm
            .chunks_mut(times)
            .zip(acf_original.chunks_mut(max_lag))
            .zip(acf_corrected.chunks_mut(max_lag))
            .map(|((mv, ao), ac)| Some((mv, ao, ac)))
            .collect()
    } else {
        (0..cells).map(|_| None).collect()
    };

    let statuses: Vec<CellStatus> = corrected_cm
        .par_chunks_mut(times)
        .zip(original_cm.par_chunks_mut(times))
        .zip(diagnostic_slots.into_par_iter())
        .enumerate()
        .map(|(linear, ((corrected, original), slots))| {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                return Err(HomogenizationError::Cancelled);
            }
            let cell = CellIndex::from_linear(linear, lons);
            let series = &target_cm[linear * times..(linear + 1) * times];

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_cell(cell, series)))
                .unwrap_or_else(|payload| {
                    Err(HomogenizationError::numeric_failure(format!(
                        "cell computation panicked: {}",
                        panic_message(payload.as_ref())
                    )))
                });
            let run = match outcome {
                Ok(run) if run.corrected.len() == times => run,
                Ok(run) => {
                    let err = HomogenizationError::shape_mismatch(&[times], &[run.corrected.len()]);
                    return Ok(fail_cell(cell, &err, corrected, original, slots));
                }
                Err(HomogenizationError::Cancelled) => return Err(HomogenizationError::Cancelled),
                Err(err) => return Ok(fail_cell(cell, &err, corrected, original, slots)),
            };

            original.copy_from_slice(series);
            corrected.copy_from_slice(&run.corrected);
            if let Some((mv, ao, ac)) = slots {
                mv.copy_from_slice(&moving_variance_difference(corrected, original, mv_window));
                ao.copy_from_slice(&autocorrelation(original, max_lag));
                ac.copy_from_slice(&autocorrelation(corrected, max_lag));
            }
            Ok(CellStatus {
                outcome: run.outcome,
                breakpoints: run.breakpoints,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut summary = GridPassSummary::default();
    for status in &statuses {
        summary.record(status);
    }
    summary.duration_ms = started.elapsed().as_millis() as u64;

    let extension = if with_diagnostics {
        ResultExtension::Snht(SnhtDiagnostics {
            moving_variance: transpose(&mv_cm, cells, times),
            acf_original: transpose(&acf_original, cells, max_lag),
            acf_corrected: transpose(&acf_corrected, cells, max_lag),
            max_lag,
        })
    } else {
        ResultExtension::Basic
    };

    Ok(HomogenizationResult {
        coords: coords.clone(),
        original: transpose(&original_cm, cells, times),
        corrected: transpose(&corrected_cm, cells, times),
        extension,
        summary,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn fail_cell(
    cell: CellIndex,
    err: &HomogenizationError,
    corrected: &mut [f64],
    original: &mut [f64],
    slots: Option<DiagnosticSlots<'_>>,
) -> CellStatus {
    warn!(lat = cell.lat, lon = cell.lon, error = %err, "Cell homogenization failed");
    corrected.fill(f64::NAN);
    original.fill(f64::NAN);
    if let Some((mv, ao, ac)) = slots {
        mv.fill(f64::NAN);
        ao.fill(f64::NAN);
        ac.fill(f64::NAN);
    }
    CellStatus {
        outcome: CellOutcome::Failed,
        breakpoints: 0,
    }
}
