//! Integration tests: align → homogenize → estimate_uncertainty on synthetic grids.
//!
//! Series are built so the expected breakpoints and offsets can be worked
//! out by hand (see `test_utils::generators`).

use homogenization::{
    align, estimate_uncertainty, homogenize, transfer_adjustment, AlignedInputs,
    BreakpointStrategy, CancelToken, GridSeries, HomogenizationConfig, HomogenizationError,
    PairwiseParams, ReferenceInput, ReferenceSource, SegmentRules, SnhtParams, StrategyConfig,
    TimeAxis, TimeUnits, UncertaintyConfig, Variable, WindowAlignment,
};
use test_utils::{
    assert_approx_eq, assert_slice_approx_eq, broadcast_series, coords, grid_from_fn,
    monthly_times, noise_series, seasonal_series, step_series, units, with_gaps, with_offset,
};

fn grid(times: &[i64], lats: usize, lons: usize, data: Vec<f64>) -> GridSeries {
    GridSeries::new(
        coords::longitudes(lons),
        coords::latitudes(lats),
        TimeAxis::from_epoch_seconds(times),
        data,
    )
    .unwrap()
}

fn single_cell(target: Vec<f64>, reference: Vec<f64>) -> AlignedInputs {
    let times = monthly_times(2011, 1, target.len());
    align(&grid(&times, 1, 1, target), &grid(&times, 1, 1, reference)).unwrap()
}

fn snht_config(sd_factor: f64) -> HomogenizationConfig {
    HomogenizationConfig {
        strategy: StrategyConfig::Snht {
            sd_factor,
            min_valid_points: 24,
            reference: ReferenceSource::Collocated,
        },
        ..HomogenizationConfig::default()
    }
}

/// Reference with a unit step at 24; target = reference + 5 before the step.
fn scenario_b() -> (Vec<f64>, Vec<f64>) {
    let reference = step_series(48, 24, 0.0, 1.0);
    let target = with_offset(&reference, 0..24, 5.0);
    (target, reference)
}

#[test]
fn test_identical_series_is_unchanged() {
    let reference: Vec<f64> = seasonal_series(120, 15.0, 8.0)
        .iter()
        .zip(noise_series(120, 3, 0.5))
        .map(|(s, n)| s + n)
        .collect();
    let inputs = single_cell(reference.clone(), reference);

    let result = homogenize(&inputs, &snht_config(1.0), None).unwrap();
    assert_eq!(result.corrected, result.original);
    assert_eq!(result.summary.breakpoints, 0);
    assert_eq!(result.summary.unchanged, 1);
}

#[test]
fn test_single_step_is_corrected() {
    let (target, reference) = scenario_b();
    let strategy = snht_config(0.95).breakpoint_strategy();
    let correction = strategy
        .homogenize(&target, &ReferenceInput::Series(&reference))
        .unwrap();
    assert_eq!(correction.breakpoints, vec![0, 24]);
    assert_eq!(correction.reference, reference);
    assert_approx_eq!(correction.adjustments()[0], -5.0, 1e-9);
    assert_eq!(correction.adjustments()[30], 0.0);

    let inputs = single_cell(target.clone(), reference.clone());
    let result = homogenize(&inputs, &snht_config(0.95), None).unwrap();
    assert_eq!(result.summary.homogenized, 1);
    assert_eq!(result.summary.breakpoints, 1);
    assert_eq!(result.original, target);

    let shifts = result.corrections();
    for t in 0..24 {
        assert_approx_eq!(shifts[t], -5.0, 0.5);
    }
    assert_slice_approx_eq!(&result.corrected[..], &reference[..], 1e-9);
}

#[test]
fn test_lagged_windows_shift_by_one() {
    let (target, reference) = scenario_b();
    let config = HomogenizationConfig {
        window_alignment: WindowAlignment::Lagged,
        ..snht_config(0.95)
    };
    let result = homogenize(&single_cell(target, reference), &config, None).unwrap();
    // Before = [0, 23) at offset 5, after = [23, 48) with one offset point.
    assert_approx_eq!(result.corrections()[0], 5.0 / 25.0 - 5.0, 1e-9);
    assert_eq!(result.corrections()[30], 0.0);
}

#[test]
fn test_insufficient_data_leaves_series_untouched() {
    let (target, reference) = scenario_b();
    // 23 usable points, one short of the minimum.
    let gaps: Vec<usize> = (0..25).collect();
    let sparse = with_gaps(&target, &gaps);

    let result = homogenize(&single_cell(sparse.clone(), reference), &snht_config(0.95), None)
        .unwrap();
    assert_slice_approx_eq!(&result.corrected[..], &sparse[..], 0.0);
    assert_eq!(result.summary.breakpoints, 0);
    assert_eq!(result.summary.unchanged, 1);
}

#[test]
fn test_constant_reference_yields_no_breakpoints() {
    let reference = vec![4.0; 60];
    let target = with_offset(&vec![4.0; 60], 0..30, 3.0);
    let strategy = snht_config(1.0).breakpoint_strategy();
    let correction = strategy
        .homogenize(&target, &ReferenceInput::Series(&reference))
        .unwrap();
    assert!(correction.breakpoints.is_empty());
    assert_eq!(correction.corrected, target);
}

#[test]
fn test_breakpoint_lists_are_well_formed() {
    let rules = SegmentRules::default();
    let strategy = BreakpointStrategy::Snht(SnhtParams {
        sd_factor: 0.3,
        min_valid_points: 24,
        rules,
    });

    for seed in 0..20 {
        let reference: Vec<f64> = seasonal_series(144, 10.0, 5.0)
            .iter()
            .zip(noise_series(144, seed, 1.0))
            .map(|(s, n)| s + n)
            .collect();
        let mut target = with_offset(&reference, 0..40, 2.0);
        target = with_offset(&target, 90..144, -1.5);
        let target: Vec<f64> = target
            .iter()
            .zip(noise_series(144, seed + 100, 0.3))
            .map(|(s, n)| s + n)
            .collect();

        let bps = strategy
            .detect(&target, &ReferenceInput::Series(&reference))
            .unwrap();
        if let Some(&first) = bps.first() {
            assert_eq!(first, 0, "seed {}", seed);
        }
        for pair in bps.windows(2) {
            assert!(pair[1] > pair[0], "seed {}: {:?}", seed, bps);
            assert!(
                pair[1] - pair[0] >= rules.min_segment_length,
                "seed {}: {:?}",
                seed,
                bps
            );
        }
    }
}

#[test]
fn test_correction_only_sees_its_windows() {
    let (mut target, reference) = scenario_b();
    target.extend(std::iter::repeat(0.0).take(48));
    let mut reference = reference;
    reference.extend(std::iter::repeat(1.0).take(48));
    for t in 48..96 {
        target[t] = reference[t];
    }

    let strategy = BreakpointStrategy::Snht(SnhtParams::default());
    let input = ReferenceInput::Series(&reference);
    let base = strategy.correct(&target, &input, &[0, 24]).unwrap();

    // Windows around 24 are [0, 48); values beyond them must not matter.
    let mut perturbed = target.clone();
    perturbed[70] += 100.0;
    perturbed[95] -= 42.0;
    let moved = strategy.correct(&perturbed, &input, &[0, 24]).unwrap();
    assert_eq!(&base[..24], &moved[..24]);
}

#[test]
fn test_pairwise_flat_offset_does_not_run_away() {
    let times = monthly_times(2011, 1, 48);
    let target = grid(&times, 3, 3, vec![10.0; 48 * 9]);
    let reference = grid(&times, 3, 3, vec![0.0; 48 * 9]);
    let inputs = align(&target, &reference).unwrap();

    let config = HomogenizationConfig {
        strategy: StrategyConfig::Pairwise {
            threshold_factor: 3.0,
            radius: 1,
        },
        ..HomogenizationConfig::default()
    };
    let result = homogenize(&inputs, &config, None).unwrap();
    assert_eq!(result.corrected, result.original);
    assert_eq!(result.summary.breakpoints, 0);
    assert!(result.diagnostics().is_none());

    let center: Vec<f64> = vec![10.0; 48];
    let neighbor = vec![0.0; 48];
    let neighbors: Vec<&[f64]> = vec![neighbor.as_slice(); 8];
    let strategy = BreakpointStrategy::Pairwise(PairwiseParams::default());
    let bps = strategy
        .detect(&center, &ReferenceInput::Neighbors(&neighbors))
        .unwrap();
    assert_eq!(bps, vec![0]);
}

#[test]
fn test_pairwise_without_neighbors_is_skipped() {
    let (target, reference) = scenario_b();
    let result = homogenize(
        &single_cell(target.clone(), reference),
        &Variable::WindSpeed.preset(),
        None,
    )
    .unwrap();
    assert_eq!(result.summary.skipped, 1);
    assert_eq!(result.corrected, target);
}

#[test]
fn test_neighbor_mean_reference_grid() {
    let times = monthly_times(2011, 1, 60);
    let (lats, lons) = (4, 5);
    let base = step_series(60, 30, 0.0, 1.0);
    let reference = broadcast_series(&base, lats, lons);
    let target = grid_from_fn(60, lats, lons, |t, lat, lon| {
        let shift = if lat == 1 && lon == 2 && t < 30 { 4.0 } else { 0.0 };
        base[t] + shift
    });
    let inputs = align(&grid(&times, lats, lons, target), &grid(&times, lats, lons, reference))
        .unwrap();

    // A clean step scores exactly n - 1 on both sides, so loosen the factor.
    let config = HomogenizationConfig {
        strategy: StrategyConfig::Snht {
            sd_factor: 0.95,
            min_valid_points: 24,
            reference: ReferenceSource::NeighborMean { radius: 3 },
        },
        ..Variable::Precipitation.preset()
    };
    let result = homogenize(&inputs, &config, None).unwrap();
    let shape = result.shape();
    assert_eq!(result.summary.cells, 20);
    assert_eq!(result.summary.homogenized, 1);
    assert_eq!(result.summary.breakpoints, 1);

    // The offset cell is pulled back onto its neighbors.
    for t in 0..60 {
        assert_approx_eq!(result.corrected[shape.index(t, 1, 2)], base[t], 1e-9);
    }
    // Untouched cells stay untouched.
    for t in 0..60 {
        assert_eq!(result.corrected[shape.index(t, 3, 4)], base[t]);
    }

    let diagnostics = result.diagnostics().unwrap();
    assert_eq!(diagnostics.moving_variance.len(), shape.len());
    assert_eq!(diagnostics.acf_original.len(), 12 * shape.cells());
}

#[test]
fn test_grid_pass_matches_per_cell_strategy() {
    let times = monthly_times(2000, 1, 72);
    let (lats, lons) = (3, 4);
    let reference = grid_from_fn(72, lats, lons, |t, lat, lon| {
        (t as f64 * 0.3 + lat as f64).sin() * 3.0 + lon as f64
    });
    let target = grid_from_fn(72, lats, lons, |t, lat, lon| {
        let r = (t as f64 * 0.3 + lat as f64).sin() * 3.0 + lon as f64;
        let step_at = 20 + 6 * lon + 3 * lat;
        if t < step_at {
            r + 2.0 + lat as f64
        } else {
            r
        }
    });
    let target_grid = grid(&times, lats, lons, target);
    let reference_grid = grid(&times, lats, lons, reference);
    let inputs = align(&target_grid, &reference_grid).unwrap();

    let config = snht_config(0.9);
    let result = homogenize(&inputs, &config, None).unwrap();
    let strategy = config.breakpoint_strategy();
    let shape = result.shape();

    for lat in 0..lats {
        for lon in 0..lons {
            let cell = homogenization::CellIndex::new(lat, lon);
            let series = target_grid.cell_series(cell);
            let reference = reference_grid.cell_series(cell);
            let expected = strategy
                .homogenize(&series, &ReferenceInput::Series(&reference))
                .unwrap();
            for t in 0..72 {
                assert_eq!(result.corrected[shape.index(t, lat, lon)], expected.corrected[t]);
            }
        }
    }
}

#[test]
fn test_gap_filling_reports_filled_original() {
    let (target, reference) = scenario_b();
    let gappy = with_gaps(&target, &[5, 40]);
    let config = HomogenizationConfig {
        fill_missing_from_reference: true,
        ..snht_config(0.95)
    };
    let result = homogenize(&single_cell(gappy, reference.clone()), &config, None).unwrap();
    assert_eq!(result.original[5], reference[5]);
    assert_eq!(result.original[40], reference[40]);
    assert!(result.corrected.iter().all(|v| v.is_finite()));
}

#[test]
fn test_cancelled_pass_returns_error() {
    let (target, reference) = scenario_b();
    let token = CancelToken::new();
    token.cancel();
    let result = homogenize(&single_cell(target, reference), &snht_config(1.0), Some(&token));
    assert!(matches!(result, Err(HomogenizationError::Cancelled)));
}

#[test]
fn test_disjoint_time_axes_fail_the_run() {
    let target = grid(&monthly_times(2000, 1, 24), 1, 1, vec![1.0; 24]);
    let reference = grid(&monthly_times(2010, 1, 24), 1, 1, vec![1.0; 24]);
    let inputs = align(&target, &reference).unwrap();
    assert!(inputs.is_empty());
    assert!(matches!(
        homogenize(&inputs, &HomogenizationConfig::default(), None),
        Err(HomogenizationError::EmptyTimeAxis)
    ));
}

/// Offsets of `times` from the origin of `units`, in its unit.
fn offsets(times: &[i64], units: &TimeUnits) -> Vec<f64> {
    let origin = units.epoch.timestamp();
    let step = units.unit.seconds() as i64;
    times.iter().map(|t| ((t - origin) / step) as f64).collect()
}

#[test]
fn test_mixed_time_units_align() {
    let times = monthly_times(2011, 1, 36);
    let days_since_1950 = TimeUnits::parse(units::DAYS_SINCE_1950).unwrap();
    let hours_since_1900 = TimeUnits::parse(units::HOURS_SINCE_1900).unwrap();

    let target = GridSeries::new(
        coords::longitudes(1),
        coords::latitudes(1),
        TimeAxis::new(days_since_1950, offsets(&times, &days_since_1950)),
        vec![1.0; 36],
    )
    .unwrap();
    let reference = GridSeries::new(
        coords::longitudes(1),
        coords::latitudes(1),
        TimeAxis::new(hours_since_1900, offsets(&times[12..], &hours_since_1900)),
        vec![2.0; 24],
    )
    .unwrap();

    let inputs = align(&target, &reference).unwrap();
    assert_eq!(inputs.coords.times, times[12..].to_vec());
    assert_eq!(inputs.target.data, vec![1.0; 24]);
    assert_eq!(inputs.reference.data, vec![2.0; 24]);

    // Aligned axes are expressed in Unix seconds.
    let unix = TimeUnits::parse(units::SECONDS_SINCE_1970).unwrap();
    assert_eq!(inputs.target.time.units.epoch, unix.epoch);
    assert_eq!(inputs.target.time.units.unit, unix.unit);
}

#[test]
fn test_uncertainty_of_smooth_seasonal_cycle_is_zero() {
    let series = seasonal_series(120, 12.0, 6.0);
    let inputs = single_cell(series.clone(), series);
    let result = homogenize(&inputs, &snht_config(1.0), None).unwrap();

    let uncertainty = estimate_uncertainty(&result, &UncertaintyConfig::default()).unwrap();
    assert_eq!(uncertainty.coords, result.coords);
    for value in &uncertainty.data {
        assert!(value.abs() < 1e-6, "residual {}", value);
    }
}

#[test]
fn test_uncertainty_two_point_months_are_nan() {
    // 14 months: only January and February have a second (and no third) point,
    // so every stratum has fewer than three values.
    let series = seasonal_series(14, 0.0, 1.0);
    let inputs = single_cell(series.clone(), series);
    let result = homogenize(&inputs, &snht_config(1.0), None).unwrap();
    let uncertainty = estimate_uncertainty(&result, &UncertaintyConfig::default()).unwrap();
    assert!(uncertainty.data.iter().all(|v| v.is_nan()));
}

#[test]
fn test_transfer_adjustment_to_derived_variable() {
    let (target, reference) = scenario_b();
    let times = monthly_times(2011, 1, 48);
    let inputs = single_cell(target, reference);
    let mean = homogenize(&inputs, &snht_config(0.95), None).unwrap();

    let maximum: Vec<f64> = (0..48).map(|t| 20.0 + t as f64 * 0.1).collect();
    let derived = grid(&times, 1, 1, maximum.clone());
    let transferred = transfer_adjustment(&mean, &derived).unwrap();

    assert_eq!(transferred.original, maximum);
    assert_approx_eq!(transferred.corrected[0], maximum[0] - 5.0, 1e-9);
    assert_approx_eq!(transferred.corrected[47], maximum[47], 1e-9);
    assert!(transferred.diagnostics().is_none());
}
