//! Error types for homogenization.

use thiserror::Error;

/// Errors that can occur while aligning, homogenizing or estimating uncertainty.
///
/// Insufficient data and missing neighbors are not errors: they are reported
/// per cell through [`crate::orchestrator::CellOutcome`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HomogenizationError {
    /// Two series or arrays that must share a shape do not.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Target and reference grids disagree on their spatial coordinates.
    #[error("grid mismatch: {0}")]
    GridMismatch(String),

    /// The target and reference share no timestamps.
    #[error("no common timestamps between target and reference")]
    EmptyTimeAxis,

    /// A time axis or its CF units string is unusable.
    #[error("invalid time axis: {0}")]
    InvalidTimeAxis(String),

    /// The time axis uses a calendar other than the Gregorian family.
    #[error("unsupported calendar: {0}")]
    UnsupportedCalendar(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    InvalidConfig(String),

    /// A numeric routine could not produce a result.
    #[error("numeric failure: {0}")]
    NumericFailure(String),

    /// The grid pass was cancelled between cells.
    #[error("grid pass cancelled")]
    Cancelled,
}

impl HomogenizationError {
    /// Create a ShapeMismatch error.
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Create a GridMismatch error.
    pub fn grid_mismatch(msg: impl Into<String>) -> Self {
        Self::GridMismatch(msg.into())
    }

    /// Create an InvalidTimeAxis error.
    pub fn invalid_time_axis(msg: impl Into<String>) -> Self {
        Self::InvalidTimeAxis(msg.into())
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a NumericFailure error.
    pub fn numeric_failure(msg: impl Into<String>) -> Self {
        Self::NumericFailure(msg.into())
    }
}

/// Result type for homogenization operations.
pub type Result<T> = std::result::Result<T, HomogenizationError>;
