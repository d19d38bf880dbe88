//! Shared building blocks for health export extraction.
//!
//! Holds the record and bucket models, the metric catalog, configuration,
//! error types, calendar/time handling and the pure statistics primitives used
//! by the extraction pipeline in `health-data`.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod settings;
pub mod statistics;
pub mod time_utils;

pub use config::ExtractionConfig;
pub use error::{HealthError, RecordSkipped, Result};
pub use metrics::{MetricClass, MetricKind, SleepCategory};
