//! Transfer of an adjustment field to a derived variable.
//!
//! Daily maximum and minimum temperature are not tested on their own: they
//! receive the `corrected - original` field of the homogenized mean
//! temperature.

use tracing::info;

use crate::align::{check_coordinates, common_times};
use crate::error::{HomogenizationError, Result};
use crate::orchestrator::{GridPassSummary, HomogenizationResult, ResultExtension};
use crate::types::GridSeries;

/// Add the adjustments of `base` to `derived`, producing a basic result.
///
/// `derived` must cover the grid and every timestamp of `base`; extra
/// timestamps are dropped. Missing adjustments leave the derived value missing.
pub fn transfer_adjustment(
    base: &HomogenizationResult,
    derived: &GridSeries,
) -> Result<HomogenizationResult> {
    derived.validate()?;
    let shape = base.shape();
    if base.corrected.len() != shape.len() || base.original.len() != shape.len() {
        return Err(HomogenizationError::shape_mismatch(
            &shape.dims(),
            &[base.corrected.len()],
        ));
    }

    let base_descending = base.coords.latitudes.len() > 1
        && base.coords.latitudes[0] > base.coords.latitudes[base.coords.latitudes.len() - 1];
    let derived = if derived.latitudes_descending() != base_descending {
        derived.flip_latitudes()
    } else {
        derived.clone()
    };
    check_coordinates("longitude", &base.coords.longitudes, &derived.longitudes)?;
    check_coordinates("latitude", &base.coords.latitudes, &derived.latitudes)?;

    let derived_epochs = derived.time.epoch_seconds()?;
    let (times, base_idx, derived_idx) = common_times(&base.coords.times, &derived_epochs);
    if times.len() != base.coords.times.len() {
        return Err(HomogenizationError::grid_mismatch(format!(
            "derived grid covers {} of {} base timestamps",
            times.len(),
            base.coords.times.len()
        )));
    }
    // Base times are strictly increasing, so the intersection keeps their order.
    debug_assert!(base_idx.iter().enumerate().all(|(i, &j)| i == j));

    let original = derived.select_times(&derived_idx).data;
    let corrected: Vec<f64> = original
        .iter()
        .zip(base.corrections())
        .map(|(value, adjustment)| value + adjustment)
        .collect();

    info!(shape = %shape, "Transferred adjustment field");
    Ok(HomogenizationResult {
        coords: base.coords.clone(),
        original,
        corrected,
        extension: ResultExtension::Basic,
        summary: GridPassSummary {
            cells: shape.cells(),
            ..GridPassSummary::default()
        },
    })
}
