//! Shared test utilities for the homogenization workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Synthetic series and grid generators
//! - Common test fixtures (CF units, coordinates, run configurations)
//! - Temporary directories and service config paths
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{assert_approx_eq, step_series, with_offset};
//! ```

pub mod fixtures;
pub mod generators;
pub mod paths;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;
pub use paths::*;

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Element-wise approximate equality of two slices.
///
/// NaN matches NaN, so missing-value positions can be compared too.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_slice_approx_eq;
///
/// assert_slice_approx_eq!(&[1.0, f64::NAN], &[1.0001, f64::NAN], 0.001);
/// ```
#[macro_export]
macro_rules! assert_slice_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: &[f64] = $left;
        let right: &[f64] = $right;
        assert_eq!(left.len(), right.len(), "slice lengths differ");
        for (i, (l, r)) in left.iter().zip(right.iter()).enumerate() {
            if l.is_nan() && r.is_nan() {
                continue;
            }
            let diff = (l - r).abs();
            if !(diff <= $epsilon as f64) {
                panic!(
                    "assertion failed at index {}: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                    i, l, r, diff, $epsilon
                );
            }
        }
    }};
}
