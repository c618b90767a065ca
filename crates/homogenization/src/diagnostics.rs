//! Validation diagnostics for SNHT results.

use crate::stats::{nanmean, sample_variance};

/// Centered rolling sample variance.
///
/// The window around `i` spans `[i - w/2, i + (w-1)/2]`, clipped to the
/// series. Windows with fewer than two finite values give NaN.
pub fn rolling_variance(series: &[f64], window: usize) -> Vec<f64> {
    let n = series.len();
    let back = window / 2;
    let forward = window.saturating_sub(1) / 2;
    (0..n)
        .map(|i| {
            let start = i.saturating_sub(back);
            let end = (i + forward + 1).min(n);
            sample_variance(&series[start..end])
        })
        .collect()
}

/// `rolling_variance(corrected) - rolling_variance(original)`.
///
/// All NaN when the corrected series has no finite value.
pub fn moving_variance_difference(corrected: &[f64], original: &[f64], window: usize) -> Vec<f64> {
    if corrected.iter().all(|v| !v.is_finite()) {
        return vec![f64::NAN; corrected.len()];
    }
    rolling_variance(corrected, window)
        .into_iter()
        .zip(rolling_variance(original, window))
        .map(|(c, o)| c - o)
        .collect()
}

/// Autocorrelation for lags `1..=max_lag`.
///
/// Missing values are skipped pairwise: the mean and the denominator use the
/// finite values, each lag's numerator only the pairs where both ends are
/// finite. Lags beyond the series, an all-missing or a constant series give NaN.
pub fn autocorrelation(series: &[f64], max_lag: usize) -> Vec<f64> {
    let mut acf = vec![f64::NAN; max_lag];
    let m = nanmean(series);
    if m.is_nan() {
        return acf;
    }

    let denominator: f64 = series
        .iter()
        .filter(|v| v.is_finite())
        .map(|v| (v - m).powi(2))
        .sum();
    if !(denominator > 0.0) {
        return acf;
    }

    for (slot, lag) in acf.iter_mut().zip(1..=max_lag) {
        if lag >= series.len() {
            break;
        }
        let numerator: f64 = series
            .iter()
            .zip(&series[lag..])
            .filter(|(a, b)| a.is_finite() && b.is_finite())
            .map(|(a, b)| (a - m) * (b - m))
            .sum();
        *slot = numerator / denominator;
    }
    acf
}
