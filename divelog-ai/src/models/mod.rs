//! Data models for divelog-ai
//!
//! - Batch session state machine and per-image outcomes

pub mod batch_session;

pub use batch_session::{
    BatchItemOutcome, BatchItemStatus, BatchProgress, BatchReport, BatchSession, BatchState,
    StateTransition,
};
