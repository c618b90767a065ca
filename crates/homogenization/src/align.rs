//! Time alignment of a target grid against its reference grid.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::error::{HomogenizationError, Result};
use crate::time::TimeAxis;
use crate::types::{GridCoords, GridSeries};

/// Maximum coordinate disagreement (degrees) tolerated between the grids.
const COORD_TOLERANCE: f64 = 1e-4;

/// Target and reference restricted to their common timestamps.
///
/// Both grids carry a canonical `seconds since 1970-01-01` time axis and the
/// reference latitudes follow the target's orientation.
#[derive(Debug, Clone)]
pub struct AlignedInputs {
    pub coords: GridCoords,
    pub target: GridSeries,
    pub reference: GridSeries,
}

impl AlignedInputs {
    pub fn is_empty(&self) -> bool {
        self.coords.times.is_empty()
    }
}

/// Sorted intersection of the two decoded time axes.
///
/// Returns the common Unix-second timestamps and, for each, its position in
/// `a` and in `b`. Duplicate timestamps keep their first occurrence.
pub fn common_times(a: &[i64], b: &[i64]) -> (Vec<i64>, Vec<usize>, Vec<usize>) {
    let mut b_pos: HashMap<i64, usize> = HashMap::with_capacity(b.len());
    for (i, &t) in b.iter().enumerate() {
        b_pos.entry(t).or_insert(i);
    }

    let mut matched: Vec<(i64, usize, usize)> = Vec::new();
    let mut seen: HashSet<i64> = HashSet::with_capacity(a.len());
    for (i, &t) in a.iter().enumerate() {
        if !seen.insert(t) {
            continue;
        }
        if let Some(&j) = b_pos.get(&t) {
            matched.push((t, i, j));
        }
    }
    matched.sort_by_key(|&(t, _, _)| t);

    let times = matched.iter().map(|m| m.0).collect();
    let a_idx = matched.iter().map(|m| m.1).collect();
    let b_idx = matched.iter().map(|m| m.2).collect();
    (times, a_idx, b_idx)
}

/// Decode both time axes, intersect them and subset both grids.
///
/// An empty intersection is not an error here; the grid pass rejects it.
/// Spatial coordinates must agree (after flipping a reference whose
/// latitudes run the other way).
pub fn align(target: &GridSeries, reference: &GridSeries) -> Result<AlignedInputs> {
    target.validate()?;
    reference.validate()?;

    let reference = if target.latitudes_descending() != reference.latitudes_descending() {
        debug!("Flipping reference latitudes to match target orientation");
        reference.flip_latitudes()
    } else {
        reference.clone()
    };
    check_coordinates("longitude", &target.longitudes, &reference.longitudes)?;
    check_coordinates("latitude", &target.latitudes, &reference.latitudes)?;

    let target_epochs = target.time.epoch_seconds()?;
    let reference_epochs = reference.time.epoch_seconds()?;
    let (times, target_idx, reference_idx) = common_times(&target_epochs, &reference_epochs);

    info!(
        target_times = target_epochs.len(),
        reference_times = reference_epochs.len(),
        common_times = times.len(),
        "Aligned time axes"
    );

    let canonical = TimeAxis::from_epoch_seconds(&times);
    let mut target = target.select_times(&target_idx);
    target.time = canonical.clone();
    let mut reference = reference.select_times(&reference_idx);
    reference.time = canonical;

    Ok(AlignedInputs {
        coords: GridCoords {
            longitudes: target.longitudes.clone(),
            latitudes: target.latitudes.clone(),
            times,
        },
        target,
        reference,
    })
}

pub(crate) fn check_coordinates(name: &str, target: &[f64], reference: &[f64]) -> Result<()> {
    if target.len() != reference.len() {
        return Err(HomogenizationError::grid_mismatch(format!(
            "{} length {} vs reference {}",
            name,
            target.len(),
            reference.len()
        )));
    }
    if let Some((i, (a, b))) = target
        .iter()
        .zip(reference)
        .enumerate()
        .find(|(_, (a, b))| (*a - *b).abs() > COORD_TOLERANCE)
    {
        return Err(HomogenizationError::grid_mismatch(format!(
            "{} differs at index {}: {} vs {}",
            name, i, a, b
        )));
    }
    Ok(())
}
