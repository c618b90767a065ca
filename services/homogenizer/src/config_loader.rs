//! Run configuration loader for the homogenizer
//!
//! A run file names the variable being processed, how the reference product
//! is brought to the variable's units, and optionally overrides the
//! variable's preset homogenization settings:
//!
//! ```yaml
//! variable:
//!   name: accumulated_precipitation
//!   units: mm
//! reference:
//!   scale: 1000.0
//! homogenization:
//!   strategy:
//!     method: snht
//!     sd_factor: ${SD_FACTOR:-1.0}
//! ```
//!
//! Supports environment variable substitution using ${VAR} syntax.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use homogenization::{GridSeries, HomogenizationConfig, Variable};

// ============================================================================
// Run Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub variable: VariableMetadata,
    #[serde(default)]
    pub reference: ReferencePreparation,
    /// Replaces the variable's preset when present.
    #[serde(default)]
    pub homogenization: Option<HomogenizationConfig>,
}

/// Name and units written alongside every output array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableMetadata {
    pub name: String,
    pub units: String,
    #[serde(default)]
    pub long_name: Option<String>,
}

/// Linear conversion `value * scale + offset` applied to the reference grid
/// before alignment (e.g. metres to millimetres, kelvin to degrees Celsius).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePreparation {
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
}

impl Default for ReferencePreparation {
    fn default() -> Self {
        Self {
            scale: default_scale(),
            offset: 0.0,
        }
    }
}

fn default_scale() -> f64 {
    1.0
}

impl ReferencePreparation {
    pub fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.offset == 0.0
    }

    pub fn apply(&self, grid: &GridSeries) -> GridSeries {
        if self.is_identity() {
            return grid.clone();
        }
        let (scale, offset) = (self.scale, self.offset);
        grid.map_values(|v| v * scale + offset)
    }
}

impl RunConfig {
    /// Effective homogenization settings for this run.
    ///
    /// An explicit `homogenization` block wins over the variable preset;
    /// `HOMOGENIZATION_*` environment variables override either.
    pub fn homogenization_config(&self) -> Result<HomogenizationConfig> {
        let base = match &self.homogenization {
            Some(config) => config.clone(),
            None => Variable::from_name(&self.variable.name)
                .map(|v| v.preset())
                .with_context(|| {
                    format!(
                        "No preset for variable '{}'; add a homogenization block",
                        self.variable.name
                    )
                })?,
        };
        let config = base.with_env_overrides();
        config
            .validate()
            .with_context(|| format!("Invalid homogenization config for '{}'", self.variable.name))?;
        Ok(config)
    }
}

// ============================================================================
// Loading Functions
// ============================================================================

/// Load and parse a run configuration with environment variable substitution
pub fn load_run_config<P: AsRef<Path>>(path: P) -> Result<RunConfig> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read run config from {:?}", path.as_ref()))?;

    parse_run_config(&content)
        .with_context(|| format!("Failed to load run config from {:?}", path.as_ref()))
}

/// Parse run configuration YAML after environment variable substitution
pub fn parse_run_config(content: &str) -> Result<RunConfig> {
    let expanded = expand_env_vars(content)?;

    let config: RunConfig =
        serde_yaml::from_str(&expanded).with_context(|| "Failed to parse run config YAML")?;

    validate_run_config(&config)?;

    Ok(config)
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in YAML content
/// Supports ${VAR} and ${VAR:-default} syntax
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::new();
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'

            let mut var_expr = String::new();
            let mut brace_count = 1;

            while brace_count > 0 {
                match chars.next() {
                    Some('{') => {
                        brace_count += 1;
                        var_expr.push('{');
                    }
                    Some('}') => {
                        brace_count -= 1;
                        if brace_count > 0 {
                            var_expr.push('}');
                        }
                    }
                    Some(c) => var_expr.push(c),
                    None => anyhow::bail!("Unclosed variable substitution: ${{{}", var_expr),
                }
            }

            let value = resolve_var_expr(&var_expr)?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

/// Resolve variable expression (supports VAR and VAR:-default syntax)
fn resolve_var_expr(expr: &str) -> Result<String> {
    if let Some((var_name, default)) = expr.split_once(":-") {
        match std::env::var(var_name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim()).with_context(|| format!("Environment variable {} not set", expr))
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_run_config(config: &RunConfig) -> Result<()> {
    anyhow::ensure!(
        !config.variable.name.trim().is_empty(),
        "Variable name cannot be empty"
    );

    let prep = &config.reference;
    anyhow::ensure!(
        prep.scale.is_finite() && prep.scale != 0.0,
        "Reference scale must be finite and non-zero, got {}",
        prep.scale
    );
    anyhow::ensure!(
        prep.offset.is_finite(),
        "Reference offset must be finite, got {}",
        prep.offset
    );

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
