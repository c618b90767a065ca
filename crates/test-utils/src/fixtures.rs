//! Common test fixtures for homogenization tests.

/// CF time units strings used by the source products.
pub mod units {
    /// Canonical units of aligned grids and of reanalysis files.
    pub const SECONDS_SINCE_1970: &str = "seconds since 1970-01-01 00:00:00";

    /// Units of the station-based gridded observations.
    pub const DAYS_SINCE_1950: &str = "days since 1950-01-01 00:00";

    /// Hourly units with a non-midnight origin.
    pub const HOURS_SINCE_1900: &str = "hours since 1900-01-01 00:00:00.0";
}

/// Small regular lon/lat grids.
pub mod coords {
    /// Longitudes at 0.1° spacing starting at 6.0°E.
    pub fn longitudes(n: usize) -> Vec<f64> {
        (0..n).map(|i| 6.0 + i as f64 * 0.1).collect()
    }

    /// Latitudes at 0.1° spacing starting at 36.0°N (south to north).
    pub fn latitudes(n: usize) -> Vec<f64> {
        (0..n).map(|i| 36.0 + i as f64 * 0.1).collect()
    }
}

/// A YAML run configuration exercising environment substitution.
pub const SAMPLE_RUN_YAML: &str = r#"
variable:
  name: accumulated_precipitation
  units: mm
homogenization:
  strategy:
    method: snht
    sd_factor: ${SD_FACTOR:-1.0}
    reference:
      kind: neighbor_mean
      radius: 3
  window_size: 24
  min_segment_length: 12
"#;
