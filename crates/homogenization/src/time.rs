//! Time axis handling for CF-style gridded data.
//!
//! Observation and reference products rarely agree on how they store time:
//! one may count days since 2011-01-01, the other seconds since the Unix
//! epoch. Every axis is decoded to Unix seconds before any comparison.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HomogenizationError, Result};

/// Unit of a CF time offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Parse from a CF unit word (case-insensitive, singular or plural).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => Some(Self::Seconds),
            "min" | "mins" | "minute" | "minutes" => Some(Self::Minutes),
            "h" | "hr" | "hrs" | "hour" | "hours" => Some(Self::Hours),
            "d" | "day" | "days" => Some(Self::Days),
            _ => None,
        }
    }

    /// Number of seconds in one unit.
    pub fn seconds(&self) -> f64 {
        match self {
            Self::Seconds => 1.0,
            Self::Minutes => 60.0,
            Self::Hours => 3_600.0,
            Self::Days => 86_400.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
        }
    }
}

/// Calendar of a time axis.
///
/// Only the Gregorian family is supported; for dates after 1582 the
/// standard and proleptic Gregorian calendars coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Calendar {
    #[default]
    Standard,
    ProlepticGregorian,
}

impl Calendar {
    /// Parse a CF calendar attribute.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "standard" | "gregorian" => Ok(Self::Standard),
            "proleptic_gregorian" => Ok(Self::ProlepticGregorian),
            other => Err(HomogenizationError::UnsupportedCalendar(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::ProlepticGregorian => "proleptic_gregorian",
        }
    }
}

/// Decoded form of a CF `units` attribute such as `"days since 2011-01-01"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeUnits {
    pub unit: TimeUnit,
    pub epoch: DateTime<Utc>,
    #[serde(default)]
    pub calendar: Calendar,
}

impl TimeUnits {
    /// `seconds since 1970-01-01 00:00:00`, the canonical representation.
    pub fn unix_seconds() -> Self {
        Self {
            unit: TimeUnit::Seconds,
            // The default UTC datetime is the Unix epoch.
            epoch: DateTime::<Utc>::default(),
            calendar: Calendar::ProlepticGregorian,
        }
    }

    /// Parse a CF units string (`"<unit> since <reference>"`).
    ///
    /// The reference may be a date, a date with a time (space or `T`
    /// separated) and an optional `Z`/`UTC` suffix.
    pub fn parse(units: &str) -> Result<Self> {
        let trimmed = units.trim();
        let (unit_part, reference) = trimmed
            .split_once(" since ")
            .ok_or_else(|| HomogenizationError::invalid_time_axis(trimmed))?;

        let unit = TimeUnit::parse(unit_part.trim())
            .ok_or_else(|| HomogenizationError::invalid_time_axis(trimmed))?;
        let epoch = parse_reference(reference.trim())
            .ok_or_else(|| HomogenizationError::invalid_time_axis(trimmed))?;

        Ok(Self {
            unit,
            epoch,
            calendar: Calendar::Standard,
        })
    }

    /// Set the calendar from a CF `calendar` attribute.
    pub fn with_calendar(mut self, calendar: &str) -> Result<Self> {
        self.calendar = Calendar::parse(calendar)?;
        Ok(self)
    }

    /// Convert one offset to whole Unix seconds (rounded to the nearest second).
    pub fn to_epoch_seconds(&self, offset: f64) -> Option<i64> {
        if !offset.is_finite() {
            return None;
        }
        let seconds = (offset * self.unit.seconds()).round();
        if seconds.abs() > i64::MAX as f64 / 2.0 {
            return None;
        }
        Some(self.epoch.timestamp() + seconds as i64)
    }

    /// Render back to a CF units string.
    pub fn to_cf_string(&self) -> String {
        format!(
            "{} since {}",
            self.unit.as_str(),
            self.epoch.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

impl std::fmt::Display for TimeUnits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_cf_string())
    }
}

fn parse_reference(s: &str) -> Option<DateTime<Utc>> {
    let s = s
        .trim_end_matches("UTC")
        .trim_end_matches('Z')
        .trim()
        .replace('T', " ");

    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&s, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }

    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

/// A time coordinate: raw offsets plus the units needed to decode them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeAxis {
    pub units: TimeUnits,
    pub values: Vec<f64>,
}

impl TimeAxis {
    pub fn new(units: TimeUnits, values: Vec<f64>) -> Self {
        Self { units, values }
    }

    /// Build a canonical axis from Unix seconds.
    pub fn from_epoch_seconds(seconds: &[i64]) -> Self {
        Self {
            units: TimeUnits::unix_seconds(),
            values: seconds.iter().map(|&s| s as f64).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Decode every offset to Unix seconds.
    pub fn epoch_seconds(&self) -> Result<Vec<i64>> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                self.units.to_epoch_seconds(v).ok_or_else(|| {
                    HomogenizationError::invalid_time_axis(format!(
                        "offset {} at index {} cannot be decoded with '{}'",
                        v, i, self.units
                    ))
                })
            })
            .collect()
    }
}

/// Convert Unix seconds to a UTC datetime.
pub fn datetime_from_epoch(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

/// Calendar month (0-based) and months elapsed since the first timestamp.
///
/// Returns `(month0, months_since_start)` per timestamp. The second value is
/// the abscissa used for month-stratified smoothing.
pub fn month_positions(times: &[i64]) -> Result<Vec<(usize, f64)>> {
    let dates: Vec<DateTime<Utc>> = times
        .iter()
        .map(|&t| {
            datetime_from_epoch(t).ok_or_else(|| {
                HomogenizationError::invalid_time_axis(format!("timestamp {} out of range", t))
            })
        })
        .collect::<Result<_>>()?;

    let Some(first) = dates.first() else {
        return Ok(Vec::new());
    };
    let (y0, m0) = (first.year(), first.month0() as i32);

    Ok(dates
        .iter()
        .map(|d| {
            let elapsed = (d.year() - y0) * 12 + (d.month0() as i32 - m0);
            (d.month0() as usize, elapsed as f64)
        })
        .collect())
}
