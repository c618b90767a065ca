//! One batch run: prepare the reference, align, homogenize, estimate uncertainty.

use anyhow::{Context, Result};
use tracing::info;

use homogenization::{
    align, estimate_uncertainty, homogenize, transfer_adjustment, CancelToken, GridSeries,
};

use crate::config_loader::RunConfig;
use crate::io::ResultDocument;

/// Reference input of a run.
#[derive(Debug, Clone)]
pub enum ReferenceGrid {
    /// Already the target variable (after the configured unit conversion).
    Direct(GridSeries),
    /// Eastward and northward wind components; speed is their magnitude.
    WindComponents { u: GridSeries, v: GridSeries },
}

impl ReferenceGrid {
    fn resolve(&self, config: &RunConfig) -> Result<GridSeries> {
        let grid = match self {
            Self::Direct(grid) => grid.clone(),
            Self::WindComponents { u, v } => GridSeries::magnitude(u, v)
                .context("Failed to derive wind speed from reference components")?,
        };
        Ok(config.reference.apply(&grid))
    }
}

/// Homogenize `target` against `reference` as configured by `config`.
pub fn run(
    config: &RunConfig,
    target: &GridSeries,
    reference: &ReferenceGrid,
    cancel: Option<&CancelToken>,
) -> Result<ResultDocument> {
    let settings = config.homogenization_config()?;
    let reference = reference.resolve(config)?;

    let inputs = align(target, &reference).context("Failed to align target and reference")?;
    let result = homogenize(&inputs, &settings, cancel)
        .with_context(|| format!("Grid pass failed for '{}'", config.variable.name))?;
    let uncertainty = estimate_uncertainty(&result, &settings.uncertainty)?;

    info!(
        variable = %config.variable.name,
        strategy = settings.strategy.name(),
        cells = result.summary.cells,
        homogenized = result.summary.homogenized,
        failed = result.summary.failed,
        breakpoints = result.summary.breakpoints,
        "Run complete"
    );

    Ok(ResultDocument::new(
        config.variable.clone(),
        settings.strategy.name(),
        &result,
        Some(&uncertainty),
    ))
}

/// Apply the adjustments of a stored base run to a derived variable.
///
/// Only the uncertainty settings of `config` are used.
pub fn transfer(
    config: &RunConfig,
    base: &ResultDocument,
    derived: &GridSeries,
) -> Result<ResultDocument> {
    let settings = config.homogenization_config()?;
    let base_result = base.to_result()?;

    let result = transfer_adjustment(&base_result, derived).with_context(|| {
        format!(
            "Failed to transfer '{}' adjustments to '{}'",
            base.variable.name, config.variable.name
        )
    })?;
    let uncertainty = estimate_uncertainty(&result, &settings.uncertainty)?;

    info!(
        base = %base.variable.name,
        variable = %config.variable.name,
        cells = result.summary.cells,
        "Transferred adjustments"
    );

    let strategy = format!("transfer:{}", base.variable.name);
    Ok(ResultDocument::new(
        config.variable.clone(),
        &strategy,
        &result,
        Some(&uncertainty),
    ))
}
