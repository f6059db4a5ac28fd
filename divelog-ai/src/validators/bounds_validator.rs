//! Bounds validator
//!
//! # Rules
//! Each rule yields at most one warning, in this order:
//! 1. Depth: missing, or outside (0, 400] m
//! 2. Time: missing, or outside (0, 1800] s
//! 3. Temperature: outside [-2, 40] °C (absence is not reported)
//! 4. Date: later than the processing date (absence is not reported)
//!
//! Out-of-range values are kept on the record and flagged, never dropped.
//!
//! # Usability
//! A record is usable when depth or time is present without a warning.

use chrono::{Local, NaiveDate};
use tracing::debug;

use crate::types::{MetricCorrection, NormalizedMetrics, ValidatedDiveMetricRecord};

/// Plausibility limits
#[derive(Debug, Clone, PartialEq)]
pub struct MetricBounds {
    /// Exclusive lower bound is 0; this is the inclusive ceiling
    pub max_depth_meters: f64,
    /// Exclusive lower bound is 0; this is the inclusive ceiling
    pub max_dive_time_seconds: u32,
    pub min_water_celsius: f64,
    pub max_water_celsius: f64,
}

impl Default for MetricBounds {
    fn default() -> Self {
        Self {
            max_depth_meters: 400.0,
            max_dive_time_seconds: 1800,
            min_water_celsius: -2.0,
            max_water_celsius: 40.0,
        }
    }
}

/// Turns normalized metrics into validated records
#[derive(Debug, Clone, Default)]
pub struct MetricValidator {
    bounds: MetricBounds,
}

impl MetricValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bounds(bounds: MetricBounds) -> Self {
        Self { bounds }
    }

    pub fn bounds(&self) -> &MetricBounds {
        &self.bounds
    }

    /// Validate against `today` as the processing date
    pub fn validate(&self, metrics: NormalizedMetrics, today: NaiveDate) -> ValidatedDiveMetricRecord {
        self.assemble(metrics, today, None)
    }

    /// Validate against the local calendar date
    pub fn validate_now(&self, metrics: NormalizedMetrics) -> ValidatedDiveMetricRecord {
        self.validate(metrics, Local::now().date_naive())
    }

    /// New record for `original` with `correction` applied
    ///
    /// The result has a fresh id and `supersedes = original.record_id()`;
    /// `original` is left as it was.
    pub fn correct(
        &self,
        original: &ValidatedDiveMetricRecord,
        correction: &MetricCorrection,
        today: NaiveDate,
    ) -> ValidatedDiveMetricRecord {
        let metrics = correction.apply_to(original.metrics());
        self.assemble(metrics, today, Some(original.record_id()))
    }

    fn assemble(
        &self,
        metrics: NormalizedMetrics,
        today: NaiveDate,
        supersedes: Option<uuid::Uuid>,
    ) -> ValidatedDiveMetricRecord {
        let mut warnings = Vec::new();
        let b = &self.bounds;

        let depth_ok = match metrics.max_depth_meters {
            None => {
                warnings.push("depth field missing".to_string());
                false
            }
            Some(depth) if depth.is_finite() && depth > 0.0 && depth <= b.max_depth_meters => true,
            Some(depth) => {
                warnings.push(format!(
                    "depth value implausible: {} m (expected greater than 0 and at most {} m)",
                    depth, b.max_depth_meters
                ));
                false
            }
        };

        let time_ok = match metrics.dive_time_seconds {
            None => {
                warnings.push("time field missing".to_string());
                false
            }
            Some(seconds) if seconds > 0 && seconds <= b.max_dive_time_seconds => true,
            Some(seconds) => {
                warnings.push(format!(
                    "time value implausible: {} s (expected greater than 0 and at most {} s)",
                    seconds, b.max_dive_time_seconds
                ));
                false
            }
        };

        if let Some(temp) = metrics.water_temperature_celsius {
            let in_range =
                temp.is_finite() && temp >= b.min_water_celsius && temp <= b.max_water_celsius;
            if !in_range {
                warnings.push(format!(
                    "temperature value implausible: {} °C (expected between {} and {} °C)",
                    temp, b.min_water_celsius, b.max_water_celsius
                ));
            }
        }

        if let Some(date) = metrics.dive_date {
            if date > today {
                warnings.push(format!("date in the future: {} (processed on {})", date, today));
            }
        }

        let is_usable = depth_ok || time_ok;

        debug!(
            source_image_id = %metrics.source_image_id,
            is_usable,
            warnings = warnings.len(),
            supersedes = ?supersedes,
            "Validated dive metrics"
        );

        ValidatedDiveMetricRecord::assemble(metrics, warnings, is_usable, supersedes)
    }
}

impl ValidatedDiveMetricRecord {
    /// Correct this record with the default bounds; see [`MetricValidator::correct`]
    pub fn corrected(&self, correction: &MetricCorrection, today: NaiveDate) -> ValidatedDiveMetricRecord {
        MetricValidator::new().correct(self, correction, today)
    }
}
