//! Utility modules

pub mod retry;

pub use retry::{retry_on_lock, retry_with_backoff, RetryPolicy};
