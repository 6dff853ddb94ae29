//! Command-line entry points.

pub mod common;
pub mod enrich;
pub mod history;
pub mod jobs;
pub mod ocr;
pub mod serve;
