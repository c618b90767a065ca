//! Homogenization of Gridded Climate Time Series
//!
//! This crate detects and corrects breakpoints (abrupt, non-climatic shifts
//! such as instrument changes) in every cell of a gridded monthly product by
//! comparing it against an independent reference product. It provides:
//!
//! - **Time alignment**: intersect two grids stored with different CF time
//!   units and epochs
//! - **Two strategies**: SNHT against a reference series, or pairwise
//!   comparison against the mean of spatial neighbors
//! - **Parallel grid pass**: cells run independently on rayon workers
//! - **Uncertainty**: month-stratified LOESS residuals of the corrected series
//!
//! # Architecture
//!
//! ```text
//! target GridSeries ──┐
//!                     ├─► align() ──► AlignedInputs
//! reference GridSeries┘                    │
//!                                          ▼
//!                     homogenize(inputs, config, cancel)
//!                                          │
//!                     per cell: reference / neighbors
//!                               BreakpointStrategy::{Snht, Pairwise}
//!                               detect ──► correct ──► diagnostics
//!                                          │
//!                                          ▼
//!                              HomogenizationResult
//!                                          │
//!                     estimate_uncertainty(result, config.uncertainty)
//!                                          │
//!                                          ▼
//!                                  UncertaintyGrid
//! ```
//!
//! # Example
//!
//! ```ignore
//! use homogenization::{align, estimate_uncertainty, homogenize, Variable};
//!
//! let config = Variable::Precipitation.preset();
//! let inputs = align(&eobs, &era5)?;
//! let result = homogenize(&inputs, &config, None)?;
//! let uncertainty = estimate_uncertainty(&result, &config.uncertainty)?;
//! ```

pub mod adjustment;
pub mod align;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod neighbors;
pub mod orchestrator;
pub mod stats;
pub mod strategy;
pub mod time;
pub mod types;
pub mod uncertainty;

// Re-export commonly used types at crate root
pub use adjustment::transfer_adjustment;
pub use align::{align, AlignedInputs};
pub use config::{
    DiagnosticsConfig, HomogenizationConfig, ReferenceSource, StrategyConfig, UncertaintyConfig,
    Variable, WindowAlignment,
};
pub use error::{HomogenizationError, Result};
pub use neighbors::{find_valid_neighbors, neighbor_mean};
pub use orchestrator::{
    homogenize, CancelToken, CellOutcome, GridPassSummary, HomogenizationResult, ResultExtension,
    SnhtDiagnostics,
};
pub use strategy::{
    BreakpointStrategy, PairwiseParams, ReferenceInput, SegmentRules, SeriesCorrection, SnhtParams,
};
pub use time::{Calendar, TimeAxis, TimeUnit, TimeUnits};
pub use types::{CellIndex, GridCoords, GridSeries, GridShape};
pub use uncertainty::{estimate_uncertainty, UncertaintyGrid};
