//! Dive metric workflows
//!
//! - [`pipeline`]: one image, ingest → normalize → validate
//! - [`batch`]: many images with bounded concurrency, retries and cancellation
//! - [`folder_scanner`]: image discovery for folder imports

pub mod batch;
pub mod folder_scanner;
pub mod pipeline;

pub use batch::{BatchItem, BatchProcessor, BatchSource, SharedBatchSession};
pub use folder_scanner::{ImageFolderScanner, ScanError};
pub use pipeline::DiveMetricPipeline;
