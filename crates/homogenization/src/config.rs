//! Configuration for a homogenization run.

use serde::{Deserialize, Serialize};

use crate::error::{HomogenizationError, Result};
use crate::strategy::{BreakpointStrategy, PairwiseParams, SegmentRules, SnhtParams};

/// Monthly LOESS spans of the published monthly products, January to December.
pub const DEFAULT_MONTHLY_SPANS: [f64; 12] =
    [0.5, 0.45, 0.5, 0.5, 0.45, 0.4, 0.4, 0.4, 0.4, 0.5, 0.45, 0.45];

/// Configuration for one variable's homogenization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomogenizationConfig {
    /// Breakpoint detection strategy and its parameters.
    pub strategy: StrategyConfig,

    /// Points on each side of a breakpoint used to estimate its offset.
    pub window_size: usize,

    /// Minimum spacing between accepted breakpoints (12 = one year of months).
    pub min_segment_length: usize,

    /// Placement of the offset windows around a breakpoint.
    pub window_alignment: WindowAlignment,

    /// Fill gaps in the target with the collocated reference value first.
    pub fill_missing_from_reference: bool,

    /// SNHT validation diagnostics.
    pub diagnostics: DiagnosticsConfig,

    /// Month-stratified LOESS uncertainty.
    pub uncertainty: UncertaintyConfig,
}

impl Default for HomogenizationConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyConfig::default(),
            window_size: 24,
            min_segment_length: 12,
            window_alignment: WindowAlignment::Aligned,
            fill_missing_from_reference: false,
            diagnostics: DiagnosticsConfig::default(),
            uncertainty: UncertaintyConfig::default(),
        }
    }
}

impl HomogenizationConfig {
    /// Load configuration from environment variables on top of the defaults.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `HOMOGENIZATION_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(size) = env_parse("HOMOGENIZATION_WINDOW_SIZE") {
            self.window_size = size;
        }

        if let Some(len) = env_parse("HOMOGENIZATION_MIN_SEGMENT_LENGTH") {
            self.min_segment_length = len;
        }

        if let Ok(val) = std::env::var("HOMOGENIZATION_WINDOW_ALIGNMENT") {
            self.window_alignment = WindowAlignment::from_str(&val);
        }

        if let Ok(val) = std::env::var("HOMOGENIZATION_FILL_MISSING") {
            self.fill_missing_from_reference = val.to_lowercase() == "true" || val == "1";
        }

        match &mut self.strategy {
            StrategyConfig::Snht {
                sd_factor,
                min_valid_points,
                ..
            } => {
                if let Some(f) = env_parse("HOMOGENIZATION_SD_FACTOR") {
                    *sd_factor = f;
                }
                if let Some(n) = env_parse("HOMOGENIZATION_MIN_VALID_POINTS") {
                    *min_valid_points = n;
                }
            }
            StrategyConfig::Pairwise {
                threshold_factor,
                radius,
            } => {
                if let Some(f) = env_parse("HOMOGENIZATION_THRESHOLD_FACTOR") {
                    *threshold_factor = f;
                }
                if let Some(r) = env_parse("HOMOGENIZATION_RADIUS") {
                    *radius = r;
                }
            }
        }

        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(HomogenizationError::invalid_config("window_size must be > 0"));
        }

        if self.min_segment_length == 0 {
            return Err(HomogenizationError::invalid_config(
                "min_segment_length must be > 0",
            ));
        }

        match &self.strategy {
            StrategyConfig::Snht {
                sd_factor,
                reference,
                ..
            } => {
                if !sd_factor.is_finite() || *sd_factor < 0.0 {
                    return Err(HomogenizationError::invalid_config(
                        "sd_factor must be a finite value >= 0",
                    ));
                }
                if let ReferenceSource::NeighborMean { radius: 0 } = reference {
                    return Err(HomogenizationError::invalid_config(
                        "neighbor mean radius must be > 0",
                    ));
                }
            }
            StrategyConfig::Pairwise {
                threshold_factor,
                radius,
            } => {
                if !threshold_factor.is_finite() || *threshold_factor < 0.0 {
                    return Err(HomogenizationError::invalid_config(
                        "threshold_factor must be a finite value >= 0",
                    ));
                }
                if *radius == 0 {
                    return Err(HomogenizationError::invalid_config("radius must be > 0"));
                }
            }
        }

        self.diagnostics.validate()?;
        self.uncertainty.validate()
    }

    /// Segmentation rules shared by both strategies.
    pub fn segment_rules(&self) -> SegmentRules {
        SegmentRules {
            window_size: self.window_size,
            min_segment_length: self.min_segment_length,
            alignment: self.window_alignment,
        }
    }

    /// The per-cell strategy described by this configuration.
    pub fn breakpoint_strategy(&self) -> BreakpointStrategy {
        let rules = self.segment_rules();
        match self.strategy {
            StrategyConfig::Snht {
                sd_factor,
                min_valid_points,
                ..
            } => BreakpointStrategy::Snht(SnhtParams {
                sd_factor,
                min_valid_points,
                rules,
            }),
            StrategyConfig::Pairwise {
                threshold_factor, ..
            } => BreakpointStrategy::Pairwise(PairwiseParams {
                threshold_factor,
                rules,
            }),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Breakpoint detection strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Standard Normal Homogeneity Test against a reference series.
    Snht {
        #[serde(default = "default_sd_factor")]
        sd_factor: f64,
        #[serde(default = "default_min_valid_points")]
        min_valid_points: usize,
        #[serde(default)]
        reference: ReferenceSource,
    },
    /// Comparison against the mean of spatial neighbors.
    Pairwise {
        #[serde(default = "default_threshold_factor")]
        threshold_factor: f64,
        #[serde(default = "default_pairwise_radius")]
        radius: usize,
    },
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::Snht {
            sd_factor: default_sd_factor(),
            min_valid_points: default_min_valid_points(),
            reference: ReferenceSource::Collocated,
        }
    }
}

impl StrategyConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Snht { .. } => "SNHT",
            Self::Pairwise { .. } => "pairwise",
        }
    }
}

fn default_sd_factor() -> f64 {
    1.0
}

fn default_min_valid_points() -> usize {
    24
}

fn default_threshold_factor() -> f64 {
    3.0
}

fn default_pairwise_radius() -> usize {
    15
}

/// Where an SNHT cell takes its reference series from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReferenceSource {
    /// The reference grid's value at the same cell.
    #[default]
    Collocated,
    /// Mean of the reference grid's cells within `radius` (center excluded).
    NeighborMean { radius: usize },
}

/// Placement of the before/after windows around a breakpoint `b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowAlignment {
    /// Before = `[b - w, b)`, after = `[b, b + w)`.
    #[default]
    Aligned,
    /// Both windows start one step early: before = `[b - w - 1, b - 1)`,
    /// after = `[b - 1, b + w)`. Reproduces the legacy products.
    Lagged,
}

impl WindowAlignment {
    /// Parse from string (case-insensitive), defaulting to `Aligned`.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "lagged" | "legacy" => Self::Lagged,
            _ => Self::Aligned,
        }
    }
}

/// Diagnostics attached to SNHT results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub enabled: bool,
    /// Autocorrelation lags 1..=acf_max_lag are stored per cell.
    pub acf_max_lag: usize,
    /// Centered rolling window for the moving variance.
    pub moving_variance_window: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            acf_max_lag: 12,
            moving_variance_window: 12,
        }
    }
}

impl DiagnosticsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enabled && (self.acf_max_lag == 0 || self.moving_variance_window == 0) {
            return Err(HomogenizationError::invalid_config(
                "acf_max_lag and moving_variance_window must be > 0",
            ));
        }
        Ok(())
    }
}

/// Month-stratified LOESS uncertainty settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UncertaintyConfig {
    /// LOESS span (fraction of points) for January..December.
    pub monthly_spans: [f64; 12],
    /// Robustifying iterations after the initial fit.
    pub robust_iterations: usize,
}

impl Default for UncertaintyConfig {
    fn default() -> Self {
        Self {
            monthly_spans: DEFAULT_MONTHLY_SPANS,
            robust_iterations: 1,
        }
    }
}

impl UncertaintyConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some((month, span)) = self
            .monthly_spans
            .iter()
            .enumerate()
            .find(|(_, s)| !(**s > 0.0 && **s <= 1.0))
        {
            return Err(HomogenizationError::invalid_config(format!(
                "monthly span for month {} must be in (0, 1], got {}",
                month + 1,
                span
            )));
        }
        Ok(())
    }
}

/// Climate variables with tuned presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    MeanAirTemperature,
    RelativeHumidity,
    Precipitation,
    WindSpeed,
}

impl Variable {
    /// Parse from a variable name (case-insensitive, common aliases accepted).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "mean_air_temperature" | "air_temperature" | "temperature" | "tg" => {
                Some(Self::MeanAirTemperature)
            }
            "relative_humidity" | "mean_relative_humidity" | "humidity" | "hu" => {
                Some(Self::RelativeHumidity)
            }
            "precipitation" | "accumulated_precipitation" | "rr" => Some(Self::Precipitation),
            "wind_speed" | "mean_wind_speed" | "fg" => Some(Self::WindSpeed),
            _ => None,
        }
    }

    /// Recommended configuration for this variable.
    ///
    /// Precipitation is too local for a collocated reference and compares
    /// against a narrow neighbor mean; wind speed uses the pairwise method.
    pub fn preset(&self) -> HomogenizationConfig {
        let base = HomogenizationConfig::default();
        match self {
            Self::MeanAirTemperature | Self::RelativeHumidity => HomogenizationConfig {
                fill_missing_from_reference: true,
                ..base
            },
            Self::Precipitation => HomogenizationConfig {
                strategy: StrategyConfig::Snht {
                    sd_factor: 1.0,
                    min_valid_points: default_min_valid_points(),
                    reference: ReferenceSource::NeighborMean { radius: 3 },
                },
                fill_missing_from_reference: true,
                ..base
            },
            Self::WindSpeed => HomogenizationConfig {
                strategy: StrategyConfig::Pairwise {
                    threshold_factor: 3.0,
                    radius: 15,
                },
                fill_missing_from_reference: true,
                diagnostics: DiagnosticsConfig {
                    enabled: false,
                    ..DiagnosticsConfig::default()
                },
                ..base
            },
        }
    }
}
