//! Locally weighted linear regression (LOWESS).
//!
//! Each point is fitted by a weighted straight line over its `floor(frac · n)`
//! nearest neighbors in `x` (at least two), with tricube distance weights. Optional
//! robustifying passes downweight large residuals with bisquare weights.

use nalgebra::{Matrix2, Vector2};

use crate::error::{HomogenizationError, Result};

/// Relative determinant below which the local line is replaced by a weighted mean.
const SINGULAR_EPS: f64 = 1e-12;

/// Smooth `y` against `x` and return the fitted values in input order.
///
/// `x` need not be sorted. All values must be finite.
pub fn loess(x: &[f64], y: &[f64], frac: f64, robust_iterations: usize) -> Result<Vec<f64>> {
    if x.len() != y.len() {
        return Err(HomogenizationError::shape_mismatch(&[x.len()], &[y.len()]));
    }
    if !(frac > 0.0 && frac <= 1.0) {
        return Err(HomogenizationError::invalid_config(format!(
            "LOESS span must be in (0, 1], got {}",
            frac
        )));
    }
    if x.iter().chain(y).any(|v| !v.is_finite()) {
        return Err(HomogenizationError::numeric_failure(
            "LOESS input contains non-finite values",
        ));
    }

    let n = x.len();
    if n < 2 {
        return Ok(y.to_vec());
    }
    let k = window_points(frac, n);

    // Residual scale under which the fit is already exact.
    let tolerance = 1e-10 * y.iter().fold(1.0_f64, |m, v| m.max(v.abs()));

    let mut robustness = vec![1.0; n];
    let mut fitted = fit_pass(x, y, k, &robustness);

    for _ in 0..robust_iterations {
        let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(a, b)| (a - b).abs()).collect();
        let scale = median(&residuals);
        if !(scale > tolerance) {
            break;
        }
        for (w, r) in robustness.iter_mut().zip(&residuals) {
            *w = bisquare(r / (6.0 * scale));
        }
        fitted = fit_pass(x, y, k, &robustness);
    }
    Ok(fitted)
}

/// Number of nearest points in each local fit. Truncates `frac · n`, with a
/// small guard so that exact products are not lost to rounding.
fn window_points(frac: f64, n: usize) -> usize {
    ((frac * n as f64 + 1e-10).floor() as usize).clamp(2, n)
}

fn fit_pass(x: &[f64], y: &[f64], k: usize, robustness: &[f64]) -> Vec<f64> {
    let mut distances = vec![0.0; x.len()];
    (0..x.len())
        .map(|i| {
            for (d, &xj) in distances.iter_mut().zip(x) {
                *d = (xj - x[i]).abs();
            }
            let radius = kth_smallest(&distances, k);
            local_fit(x, y, i, &distances, radius, robustness)
        })
        .collect()
}

fn local_fit(
    x: &[f64],
    y: &[f64],
    i: usize,
    distances: &[f64],
    radius: f64,
    robustness: &[f64],
) -> f64 {
    let (mut sw, mut swx, mut swxx, mut swy, mut swxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for j in 0..x.len() {
        let distance_weight = if radius > 0.0 {
            tricube(distances[j] / radius)
        } else if distances[j] == 0.0 {
            1.0
        } else {
            0.0
        };
        let w = distance_weight * robustness[j];
        if w == 0.0 {
            continue;
        }
        let dx = x[j] - x[i];
        sw += w;
        swx += w * dx;
        swxx += w * dx * dx;
        swy += w * y[j];
        swxy += w * dx * y[j];
    }
    if !(sw > 0.0) {
        return y[i];
    }

    let normal = Matrix2::new(sw, swx, swx, swxx);
    let scale = sw * swxx;
    if scale > 0.0 && normal.determinant().abs() > SINGULAR_EPS * scale {
        if let Some(solution) = normal.lu().solve(&Vector2::new(swy, swxy)) {
            // Evaluated at dx = 0, the intercept is the fitted value.
            return solution[0];
        }
    }
    swy / sw
}

fn tricube(u: f64) -> f64 {
    if u >= 1.0 {
        0.0
    } else {
        (1.0 - u.powi(3)).powi(3)
    }
}

fn bisquare(u: f64) -> f64 {
    if u.abs() >= 1.0 {
        0.0
    } else {
        (1.0 - u * u).powi(2)
    }
}

fn kth_smallest(values: &[f64], k: usize) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted[k.saturating_sub(1).min(sorted.len() - 1)]
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n == 0 {
        f64::NAN
    } else if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}
