//! Extraction pipeline for health data exports.
//!
//! Streams the export document, classifies records of one metric, reconciles
//! overlapping sleep intervals, buckets everything into calendar days and
//! writes the derived series as a JSON document.

pub mod aggregator;
pub mod classifier;
pub mod pipeline;
pub mod reader;
pub mod reconciler;
pub mod series;
pub mod writer;

pub use health_core as core;
pub use pipeline::{extract_metric, run_extraction, ExtractionResult, ExtractionStats};
