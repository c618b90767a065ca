//! JSON documents exchanged with the persistence side.
//!
//! Grids are `[time][lat][lon]` arrays with `null` for missing values, since
//! JSON has no NaN. The time axis keeps its CF units string so products with
//! different epochs can be read as they are stored.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use homogenization::{
    GridCoords, GridPassSummary, GridSeries, HomogenizationResult, ResultExtension, TimeAxis,
    TimeUnits, UncertaintyGrid,
};

use crate::config_loader::VariableMetadata;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeDocument {
    pub units: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar: Option<String>,
    pub values: Vec<f64>,
}

/// A gridded variable as read from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDocument {
    pub longitudes: Vec<f64>,
    pub latitudes: Vec<f64>,
    pub time: TimeDocument,
    pub data: Vec<Option<f64>>,
}

impl GridDocument {
    pub fn from_grid(grid: &GridSeries) -> Self {
        Self {
            longitudes: grid.longitudes.clone(),
            latitudes: grid.latitudes.clone(),
            time: TimeDocument {
                units: grid.time.units.to_cf_string(),
                calendar: Some(grid.time.units.calendar.as_str().to_string()),
                values: grid.time.values.clone(),
            },
            data: to_nullable(&grid.data),
        }
    }

    pub fn into_grid(self) -> Result<GridSeries> {
        let mut units = TimeUnits::parse(&self.time.units)?;
        if let Some(calendar) = &self.time.calendar {
            units = units.with_calendar(calendar)?;
        }
        let grid = GridSeries::new(
            self.longitudes,
            self.latitudes,
            TimeAxis::new(units, self.time.values),
            from_nullable(&self.data),
        )?;
        Ok(grid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsDocument {
    pub max_lag: usize,
    /// `[time][lat][lon]`
    pub moving_variance: Vec<Option<f64>>,
    /// `[lag][lat][lon]`, lags `1..=max_lag`
    pub acf_original: Vec<Option<f64>>,
    pub acf_corrected: Vec<Option<f64>>,
}

/// Everything a run hands to persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub variable: VariableMetadata,
    pub strategy: String,
    pub longitudes: Vec<f64>,
    pub latitudes: Vec<f64>,
    /// Always `seconds since 1970-01-01 00:00:00`.
    pub time: TimeDocument,
    pub original: Vec<Option<f64>>,
    pub corrected: Vec<Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<DiagnosticsDocument>,
    /// `[time][lat][lon]` month-stratified residuals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<Vec<Option<f64>>>,
    pub summary: GridPassSummary,
}

impl ResultDocument {
    pub fn new(
        variable: VariableMetadata,
        strategy: &str,
        result: &HomogenizationResult,
        uncertainty: Option<&UncertaintyGrid>,
    ) -> Self {
        let canonical = TimeAxis::from_epoch_seconds(&result.coords.times);
        let diagnostics = result.diagnostics().map(|d| DiagnosticsDocument {
            max_lag: d.max_lag,
            moving_variance: to_nullable(&d.moving_variance),
            acf_original: to_nullable(&d.acf_original),
            acf_corrected: to_nullable(&d.acf_corrected),
        });

        Self {
            variable,
            strategy: strategy.to_string(),
            longitudes: result.coords.longitudes.clone(),
            latitudes: result.coords.latitudes.clone(),
            time: TimeDocument {
                units: canonical.units.to_cf_string(),
                calendar: None,
                values: canonical.values,
            },
            original: to_nullable(&result.original),
            corrected: to_nullable(&result.corrected),
            diagnostics,
            uncertainty: uncertainty.map(|u| to_nullable(&u.data)),
            summary: result.summary.clone(),
        }
    }

    /// Rebuild the original/corrected pair of a stored run.
    ///
    /// Diagnostics are not carried over; the adjustment field is all that a
    /// derived variable needs.
    pub fn to_result(&self) -> Result<HomogenizationResult> {
        let times = TimeAxis::new(TimeUnits::parse(&self.time.units)?, self.time.values.clone())
            .epoch_seconds()?;
        let coords = GridCoords {
            longitudes: self.longitudes.clone(),
            latitudes: self.latitudes.clone(),
            times,
        };
        let expected = coords.shape().len();
        anyhow::ensure!(
            self.original.len() == expected && self.corrected.len() == expected,
            "Stored result arrays do not match its coordinates ({} values expected)",
            expected
        );

        Ok(HomogenizationResult {
            coords,
            original: from_nullable(&self.original),
            corrected: from_nullable(&self.corrected),
            extension: ResultExtension::Basic,
            summary: self.summary.clone(),
        })
    }
}

fn to_nullable(values: &[f64]) -> Vec<Option<f64>> {
    values
        .iter()
        .map(|&v| if v.is_finite() { Some(v) } else { None })
        .collect()
}

fn from_nullable(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().map(|v| v.unwrap_or(f64::NAN)).collect()
}

// ============================================================================
// File access
// ============================================================================

pub fn read_grid<P: AsRef<Path>>(path: P) -> Result<GridSeries> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read grid from {:?}", path.as_ref()))?;
    let document: GridDocument = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse grid JSON from {:?}", path.as_ref()))?;
    document
        .into_grid()
        .with_context(|| format!("Invalid grid in {:?}", path.as_ref()))
}

pub fn write_grid<P: AsRef<Path>>(path: P, grid: &GridSeries) -> Result<()> {
    write_json(path, &GridDocument::from_grid(grid))
}

pub fn read_result<P: AsRef<Path>>(path: P) -> Result<ResultDocument> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read result from {:?}", path.as_ref()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse result JSON from {:?}", path.as_ref()))
}

pub fn write_result<P: AsRef<Path>>(path: P, document: &ResultDocument) -> Result<()> {
    write_json(path, document)
}

fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    fs::write(path.as_ref(), json)
        .with_context(|| format!("Failed to write {:?}", path.as_ref()))
}
