//! NaN-aware statistics shared by the detectors, diagnostics and smoothers.
//!
//! Missing values are represented as NaN throughout; every helper here
//! ignores non-finite values unless documented otherwise.

/// Mean of the finite values, or NaN when there are none.
pub fn nanmean(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for &v in values {
        if v.is_finite() {
            sum += v;
            count += 1;
        }
    }
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Population standard deviation (ddof = 0) of the finite values.
///
/// NaN when there are no finite values.
pub fn nanstd(values: &[f64]) -> f64 {
    let m = nanmean(values);
    if m.is_nan() {
        return f64::NAN;
    }
    let mut ss = 0.0;
    let mut count = 0usize;
    for &v in values {
        if v.is_finite() {
            ss += (v - m).powi(2);
            count += 1;
        }
    }
    (ss / count as f64).sqrt()
}

/// Arithmetic mean of a slice assumed to be fully finite.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (ddof = 1) of the finite values.
///
/// NaN when fewer than two finite values are present.
pub fn sample_variance(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.len() < 2 {
        return f64::NAN;
    }
    let m = mean(&finite);
    finite.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (finite.len() - 1) as f64
}

/// True when every value is non-finite (or the slice is empty).
pub fn all_missing(values: &[f64]) -> bool {
    values.iter().all(|v| !v.is_finite())
}

/// First index of every run of consecutive indices.
///
/// `indices` must be sorted ascending. `[3, 4, 5, 9, 10, 20]` yields
/// `[3, 9, 20]`.
pub fn run_starts(indices: &[usize]) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut previous: Option<usize> = None;
    for &idx in indices {
        match previous {
            Some(p) if idx == p + 1 => {}
            _ => starts.push(idx),
        }
        previous = Some(idx);
    }
    starts
}
