//! Month-stratified LOESS uncertainty.
//!
//! For every cell and calendar month, the values of that month are smoothed
//! against time with the month's span and the uncertainty is the absolute
//! residual `|observed - smoothed|`. Stratifying by month keeps the seasonal
//! cycle out of the residuals.

pub mod loess;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::UncertaintyConfig;
use crate::error::{HomogenizationError, Result};
use crate::orchestrator::HomogenizationResult;
use crate::stats::all_missing;
use crate::time::month_positions;
use crate::types::{transpose, CellIndex, GridCoords, GridShape};

pub use loess::loess;

/// Fewer finite values than this in a month leave that month NaN.
pub const MIN_MONTH_POINTS: usize = 3;

/// Absolute LOESS residuals, `[time][lat][lon]` over `coords`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyGrid {
    pub coords: GridCoords,
    pub data: Vec<f64>,
}

impl UncertaintyGrid {
    pub fn shape(&self) -> GridShape {
        self.coords.shape()
    }
}

/// Estimate the uncertainty of every corrected series in `result`.
///
/// A cell whose smoothing fails is logged and left NaN.
pub fn estimate_uncertainty(
    result: &HomogenizationResult,
    config: &UncertaintyConfig,
) -> Result<UncertaintyGrid> {
    config.validate()?;
    let shape = result.shape();
    if result.corrected.len() != shape.len() {
        return Err(HomogenizationError::shape_mismatch(
            &shape.dims(),
            &[result.corrected.len()],
        ));
    }
    if shape.times == 0 {
        return Err(HomogenizationError::EmptyTimeAxis);
    }

    let months = month_positions(&result.coords.times)?;
    let corrected_cm = transpose(&result.corrected, shape.times, shape.cells());
    let mut uncertainty_cm = vec![f64::NAN; shape.len()];

    uncertainty_cm
        .par_chunks_mut(shape.times)
        .zip(corrected_cm.par_chunks(shape.times))
        .enumerate()
        .for_each(|(linear, (out, series))| {
            match cell_uncertainty(series, &months, config) {
                Ok(residuals) => out.copy_from_slice(&residuals),
                Err(err) => {
                    let cell = CellIndex::from_linear(linear, shape.lons);
                    warn!(lat = cell.lat, lon = cell.lon, error = %err, "Uncertainty estimation failed");
                }
            }
        });

    info!(shape = %shape, "Uncertainty estimation complete");
    Ok(UncertaintyGrid {
        coords: result.coords.clone(),
        data: transpose(&uncertainty_cm, shape.cells(), shape.times),
    })
}

/// Absolute residuals of one series.
///
/// `months[t]` is `(calendar month 0..12, months since the first time step)`.
pub fn cell_uncertainty(
    series: &[f64],
    months: &[(usize, f64)],
    config: &UncertaintyConfig,
) -> Result<Vec<f64>> {
    if series.len() != months.len() {
        return Err(HomogenizationError::shape_mismatch(
            &[months.len()],
            &[series.len()],
        ));
    }

    let mut residuals = vec![f64::NAN; series.len()];
    if all_missing(series) {
        return Ok(residuals);
    }

    for (month, &span) in config.monthly_spans.iter().enumerate() {
        let positions: Vec<usize> = (0..series.len())
            .filter(|&t| months[t].0 == month && series[t].is_finite())
            .collect();
        if positions.len() < MIN_MONTH_POINTS {
            continue;
        }

        let x: Vec<f64> = positions.iter().map(|&t| months[t].1).collect();
        let y: Vec<f64> = positions.iter().map(|&t| series[t]).collect();
        let smoothed = loess(&x, &y, span, config.robust_iterations)?;
        for ((&t, observed), fitted) in positions.iter().zip(&y).zip(&smoothed) {
            residuals[t] = (observed - fitted).abs();
        }
    }
    Ok(residuals)
}
