//! Generators for synthetic climate-like series and grids.
//!
//! Everything here is deterministic so expected values can be worked out by
//! hand. Grids are flat `[time][lat][lon]` vectors.

use chrono::{NaiveDate, TimeZone, Utc};

/// Unix timestamps of the first day of `count` consecutive months.
///
/// # Example
///
/// ```
/// use test_utils::monthly_times;
///
/// let times = monthly_times(1970, 1, 2);
/// assert_eq!(times, vec![0, 31 * 86_400]);
/// ```
pub fn monthly_times(year: i32, month: u32, count: usize) -> Vec<i64> {
    let mut out = Vec::with_capacity(count);
    let (mut y, mut m) = (year, month.clamp(1, 12));
    for _ in 0..count {
        if let Some(dt) = NaiveDate::from_ymd_opt(y, m, 1).and_then(|d| d.and_hms_opt(0, 0, 0)) {
            out.push(Utc.from_utc_datetime(&dt).timestamp());
        }
        m += 1;
        if m > 12 {
            m = 1;
            y += 1;
        }
    }
    out
}

/// A series equal to `before` on `[0, at)` and `after` on `[at, len)`.
pub fn step_series(len: usize, at: usize, before: f64, after: f64) -> Vec<f64> {
    (0..len).map(|i| if i < at { before } else { after }).collect()
}

/// Copy of `series` with `offset` added on `range`.
pub fn with_offset(series: &[f64], range: std::ops::Range<usize>, offset: f64) -> Vec<f64> {
    series
        .iter()
        .enumerate()
        .map(|(i, v)| if range.contains(&i) { v + offset } else { *v })
        .collect()
}

/// Monthly seasonal cycle `mean + amplitude * sin(2π t / 12)`.
pub fn seasonal_series(len: usize, mean: f64, amplitude: f64) -> Vec<f64> {
    (0..len)
        .map(|t| mean + amplitude * (2.0 * std::f64::consts::PI * t as f64 / 12.0).sin())
        .collect()
}

/// Deterministic noise in `[-scale, scale]`.
pub fn noise_series(len: usize, seed: u32, scale: f64) -> Vec<f64> {
    (0..len)
        .map(|t| {
            let h = simple_hash(t as u32, 0, seed);
            let unit = (h % 20_001) as f64 / 10_000.0 - 1.0;
            unit * scale
        })
        .collect()
}

/// Copy of `series` with NaN at `positions`.
pub fn with_gaps(series: &[f64], positions: &[usize]) -> Vec<f64> {
    let mut out = series.to_vec();
    for &p in positions {
        if let Some(v) = out.get_mut(p) {
            *v = f64::NAN;
        }
    }
    out
}

/// A `[time][lat][lon]` grid with `value(t, lat, lon)` at each position.
pub fn grid_from_fn(
    times: usize,
    lats: usize,
    lons: usize,
    value: impl Fn(usize, usize, usize) -> f64,
) -> Vec<f64> {
    let mut data = Vec::with_capacity(times * lats * lons);
    for t in 0..times {
        for lat in 0..lats {
            for lon in 0..lons {
                data.push(value(t, lat, lon));
            }
        }
    }
    data
}

/// A `[time][lat][lon]` grid where every cell carries the same series.
pub fn broadcast_series(series: &[f64], lats: usize, lons: usize) -> Vec<f64> {
    grid_from_fn(series.len(), lats, lons, |t, _, _| series[t])
}

/// Simple deterministic hash for reproducible test data.
fn simple_hash(x: u32, y: u32, seed: u32) -> u32 {
    let mut h = seed;
    h = h.wrapping_mul(31).wrapping_add(x);
    h = h.wrapping_mul(31).wrapping_add(y);
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;
    h
}
