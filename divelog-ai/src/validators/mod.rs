//! Validation layer
//!
//! Applies domain bounds to [`NormalizedMetrics`](crate::types::NormalizedMetrics)
//! and assembles the persistence-ready record. Validation never fails: problems
//! become warnings and `is_usable = false`.

pub mod bounds_validator;

pub use bounds_validator::{MetricBounds, MetricValidator};
