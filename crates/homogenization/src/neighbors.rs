//! Spatial neighbor lookup for reference series.

use crate::strategy::pairwise;
use crate::types::{CellIndex, GridShape};

/// Series of every cell within a square window of half-width `radius`.
///
/// `cell_major` is a `[lat][lon][time]` array (see
/// [`crate::types::GridSeries::to_cell_major`]). The center cell, series
/// that are entirely missing and series of the wrong length are excluded.
/// An empty result means the cell has no usable neighbors.
pub fn find_valid_neighbors<'a>(
    cell_major: &'a [f64],
    shape: &GridShape,
    cell: CellIndex,
    radius: usize,
) -> Vec<&'a [f64]> {
    let times = shape.times;
    let lat_range = cell.lat.saturating_sub(radius)..(cell.lat + radius + 1).min(shape.lats);
    let lon_range = cell.lon.saturating_sub(radius)..(cell.lon + radius + 1).min(shape.lons);

    let mut neighbors = Vec::new();
    for lat in lat_range {
        for lon in lon_range.clone() {
            if lat == cell.lat && lon == cell.lon {
                continue;
            }
            let start = CellIndex::new(lat, lon).linear(shape.lons) * times;
            let Some(series) = cell_major.get(start..start + times) else {
                continue;
            };
            if series.len() == times && series.iter().any(|v| v.is_finite()) {
                neighbors.push(series);
            }
        }
    }
    neighbors
}

/// Per-time-step mean of the valid neighbors of `cell`.
///
/// `None` when the cell has no usable neighbors.
pub fn neighbor_mean(
    cell_major: &[f64],
    shape: &GridShape,
    cell: CellIndex,
    radius: usize,
) -> Option<Vec<f64>> {
    let neighbors = find_valid_neighbors(cell_major, shape, cell, radius);
    if neighbors.is_empty() {
        return None;
    }
    pairwise::neighbor_means(&neighbors, shape.times).ok()
}
