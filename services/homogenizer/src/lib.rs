//! Homogenizer batch service
//!
//! Reads a target and a reference grid, runs the homogenization pipeline and
//! writes a JSON result document for persistence.

pub mod config_loader;
pub mod io;
pub mod pipeline;

pub use config_loader::{load_run_config, parse_run_config, RunConfig, VariableMetadata};
pub use io::{read_grid, read_result, write_grid, write_result, GridDocument, ResultDocument};
pub use pipeline::{run, transfer, ReferenceGrid};
