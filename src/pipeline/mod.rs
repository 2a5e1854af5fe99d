//! Per-sample preprocessing pipeline over external command-line tools.

pub mod processor;
pub mod tools;

pub use processor::{process_sample, PipelineConfig, PipelineError};
