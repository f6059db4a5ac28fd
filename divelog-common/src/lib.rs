//! # Divelog Common Library
//!
//! Shared code for the divelog services including:
//! - Error type shared by all crates
//! - Configuration loading and root folder resolution
//! - Event types (DiveLogEvent enum) and the EventBus
//! - SSE helpers
//! - Dive time display formatting

pub mod config;
pub mod error;
pub mod events;
pub mod human_time;
pub mod sse;

pub use error::{Error, Result};
