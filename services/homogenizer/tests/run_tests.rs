//! End-to-end tests for the homogenizer service: config files, JSON grids,
//! the run pipeline and adjustment transfer.

use std::fs;

use homogenization::{GridSeries, StrategyConfig, TimeAxis, TimeUnits};
use homogenizer::{
    load_run_config, parse_run_config, read_grid, read_result, write_grid, write_result,
    ReferenceGrid,
};
use test_utils::{
    assert_approx_eq, broadcast_series, coords, monthly_times, service_config_dir, step_series,
    temp_test_dir, units, with_offset, write_test_file, SAMPLE_RUN_YAML,
};

const TEMPERATURE_RUN: &str = r#"
variable:
  name: mean_air_temperature
  units: degC
reference:
  offset: -273.15
homogenization:
  strategy:
    method: snht
    sd_factor: 0.95
  fill_missing_from_reference: true
"#;

const MAXIMUM_RUN: &str = r#"
variable:
  name: maximum_air_temperature
  units: degC
homogenization:
  uncertainty:
    robust_iterations: 0
"#;

fn seconds_grid(times: &[i64], lats: usize, lons: usize, data: Vec<f64>) -> GridSeries {
    GridSeries::new(
        coords::longitudes(lons),
        coords::latitudes(lats),
        TimeAxis::from_epoch_seconds(times),
        data,
    )
    .unwrap()
}

/// Same grid stored with `days since 1950-01-01` offsets.
fn days_grid(times: &[i64], lats: usize, lons: usize, data: Vec<f64>) -> GridSeries {
    let units = TimeUnits::parse(units::DAYS_SINCE_1950).unwrap();
    let origin = units.epoch.timestamp();
    let values = times.iter().map(|t| ((t - origin) / 86_400) as f64).collect();
    GridSeries::new(
        coords::longitudes(lons),
        coords::latitudes(lats),
        TimeAxis::new(units, values),
        data,
    )
    .unwrap()
}

// ============================================================================
// Configuration files
// ============================================================================

#[test]
fn test_shipped_configs_load() {
    let dir = service_config_dir("homogenizer");
    let mut loaded = 0;
    for entry in fs::read_dir(&dir).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().and_then(|s| s.to_str()) != Some("yaml") {
            continue;
        }
        let config = load_run_config(&path).unwrap();
        config
            .homogenization_config()
            .unwrap_or_else(|e| panic!("{:?}: {:#}", path, e));
        loaded += 1;
    }
    assert!(loaded >= 4, "expected the shipped run configs in {:?}", dir);
}

#[test]
fn test_sample_yaml_substitutes_environment() {
    std::env::set_var("SD_FACTOR", "1.3");
    let config = parse_run_config(SAMPLE_RUN_YAML).unwrap();
    std::env::remove_var("SD_FACTOR");

    assert_eq!(config.variable.name, "accumulated_precipitation");
    match config.homogenization_config().unwrap().strategy {
        StrategyConfig::Snht { sd_factor, .. } => assert_eq!(sd_factor, 1.3),
        other => panic!("unexpected strategy {:?}", other),
    }
}

#[test]
fn test_missing_config_file_is_reported() {
    let dir = temp_test_dir();
    let err = load_run_config(dir.path().join("absent.yaml")).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to read run config"));
}

// ============================================================================
// Grid files
// ============================================================================

#[test]
fn test_grid_file_round_trip_keeps_units_and_gaps() {
    let dir = temp_test_dir();
    let times = monthly_times(1990, 1, 3);
    let grid = days_grid(&times, 1, 2, vec![1.0, f64::NAN, 3.0, 4.0, 5.0, 6.0]);

    let path = dir.path().join("grid.json");
    write_grid(&path, &grid).unwrap();
    let back = read_grid(&path).unwrap();

    assert_eq!(back.time.units.epoch, grid.time.units.epoch);
    assert_eq!(back.time.epoch_seconds().unwrap(), times);
    assert!(back.data[1].is_nan());
    assert_eq!(back.data[5], 6.0);
}

#[test]
fn test_malformed_grid_file_fails() {
    let dir = temp_test_dir();
    let path = write_test_file(dir.path(), "bad.json", r#"{"longitudes": [1.0]}"#);
    assert!(read_grid(&path).is_err());
}

// ============================================================================
// Pipeline
// ============================================================================

#[test]
fn test_run_and_transfer_end_to_end() {
    let dir = temp_test_dir();
    let (lats, lons) = (2, 2);
    let times = monthly_times(2011, 1, 48);

    // Reference in kelvin, target in degrees Celsius with a +5 offset before 2013.
    let reference_c = step_series(48, 24, 0.0, 1.0);
    let target_c = with_offset(&reference_c, 0..24, 5.0);
    let reference_k: Vec<f64> = reference_c.iter().map(|v| v + 273.15).collect();

    write_grid(
        dir.path().join("tg.json"),
        &days_grid(&times, lats, lons, broadcast_series(&target_c, lats, lons)),
    )
    .unwrap();
    write_grid(
        dir.path().join("era5.json"),
        &seconds_grid(&times, lats, lons, broadcast_series(&reference_k, lats, lons)),
    )
    .unwrap();
    let config_path = write_test_file(dir.path(), "tg.yaml", TEMPERATURE_RUN);

    let config = load_run_config(&config_path).unwrap();
    let target = read_grid(dir.path().join("tg.json")).unwrap();
    let reference = ReferenceGrid::Direct(read_grid(dir.path().join("era5.json")).unwrap());
    let document = homogenizer::run(&config, &target, &reference, None).unwrap();

    assert_eq!(document.strategy, "SNHT");
    assert_eq!(document.summary.cells, 4);
    assert_eq!(document.summary.homogenized, 4);
    assert_eq!(document.summary.breakpoints, 4);
    assert_eq!(document.time.values.len(), 48);
    assert_eq!(document.time.values[0], times[0] as f64);

    for t in 0..48 {
        for cell in 0..lats * lons {
            let value = document.corrected[t * lats * lons + cell].unwrap();
            assert_approx_eq!(value, reference_c[t], 1e-6);
        }
    }
    let diagnostics = document.diagnostics.as_ref().unwrap();
    assert_eq!(diagnostics.max_lag, 12);
    assert_eq!(diagnostics.acf_original.len(), 12 * lats * lons);
    assert_eq!(document.uncertainty.as_ref().unwrap().len(), 48 * lats * lons);

    // Persist, reload and hand the adjustments to the maximum temperature.
    let result_path = dir.path().join("tg_result.json");
    write_result(&result_path, &document).unwrap();
    let base = read_result(&result_path).unwrap();
    assert_eq!(base, document);

    let maximum = seconds_grid(&times, lats, lons, vec![30.0; 48 * lats * lons]);
    let derived_config = parse_run_config(MAXIMUM_RUN).unwrap();
    let transferred = homogenizer::transfer(&derived_config, &base, &maximum).unwrap();

    assert_eq!(transferred.strategy, "transfer:mean_air_temperature");
    assert!(transferred.diagnostics.is_none());
    assert_approx_eq!(transferred.corrected[0].unwrap(), 25.0, 1e-6);
    assert_approx_eq!(transferred.corrected[47 * lats * lons].unwrap(), 30.0, 1e-6);
    assert_eq!(transferred.original[0], Some(30.0));
}

#[test]
fn test_wind_components_build_the_reference() {
    let times = monthly_times(2000, 1, 36);
    let len = 36 * 2 * 2;
    let u = seconds_grid(&times, 2, 2, vec![3.0; len]);
    let v = seconds_grid(&times, 2, 2, vec![4.0; len]);
    let target = seconds_grid(&times, 2, 2, vec![f64::NAN; len]);

    let config = parse_run_config(
        "variable:\n  name: wind_speed\n  units: m s-1\nhomogenization:\n  fill_missing_from_reference: true\n",
    )
    .unwrap();
    let document =
        homogenizer::run(&config, &target, &ReferenceGrid::WindComponents { u, v }, None).unwrap();

    // The all-missing target is filled with the derived speed and left as is.
    assert!(document.original.iter().all(|v| *v == Some(5.0)));
    assert_eq!(document.corrected, document.original);
    assert_eq!(document.summary.unchanged, 4);
}

#[test]
fn test_disjoint_periods_fail_the_run() {
    let target = seconds_grid(&monthly_times(1990, 1, 24), 1, 1, vec![1.0; 24]);
    let reference = seconds_grid(&monthly_times(2010, 1, 24), 1, 1, vec![1.0; 24]);
    let config = parse_run_config(TEMPERATURE_RUN).unwrap();

    let err = homogenizer::run(&config, &target, &ReferenceGrid::Direct(reference), None)
        .unwrap_err();
    assert!(format!("{:#}", err).contains("Grid pass failed"));
}
