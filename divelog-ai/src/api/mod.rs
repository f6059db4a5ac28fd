//! HTTP API handlers for divelog-ai
//!
//! REST endpoints for analysis, batches and records plus SSE streams.

pub mod analyze;
pub mod batch;
pub mod health;
pub mod records;
pub mod sse;

pub use analyze::analyze_routes;
pub use batch::batch_routes;
pub use health::health_routes;
pub use records::record_routes;
pub use sse::{batch_event_stream, event_stream};
