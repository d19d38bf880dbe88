use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors that abort a metric extraction run.
#[derive(Error, Debug)]
pub enum HealthError {
    /// The export path does not resolve to a readable file.
    #[error("Source export not found: {path}")]
    SourceNotFound { path: PathBuf },

    /// The underlying markup could not be tokenized.
    #[error("Malformed source {path} at byte {offset}: {message}")]
    MalformedSource {
        path: PathBuf,
        offset: u64,
        message: String,
    },

    /// The output destination could not be created or written.
    #[error("Failed to write output {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A metric name did not resolve to any catalog entry.
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A JSON document could not be parsed or produced.
    #[error("Failed to process JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the health crates.
pub type Result<T> = std::result::Result<T, HealthError>;

/// Why a single record was dropped. Never fatal; tallied into the run's
/// skipped count.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordSkipped {
    #[error("missing mandatory attribute `{0}`")]
    MissingAttribute(&'static str),

    #[error("invalid timestamp \"{0}\"")]
    InvalidTimestamp(String),

    #[error("invalid value \"{0}\"")]
    InvalidValue(String),

    #[error("unsupported unit \"{0}\"")]
    UnsupportedUnit(String),

    #[error("value {0} outside the valid range")]
    OutOfRange(f64),

    #[error("end time precedes start time")]
    EndBeforeStart,

    #[error("interval has non-positive duration")]
    NonPositiveDuration,

    #[error("interval of {0:.1}h exceeds the maximum duration")]
    ExceedsMaxDuration(f64),

    #[error("interval arrived after night {0} was already reconciled")]
    LateInterval(chrono::NaiveDate),
}

impl RecordSkipped {
    /// Stable short label used as the key in skip breakdowns.
    pub fn reason(&self) -> &'static str {
        match self {
            RecordSkipped::MissingAttribute(_) => "missing_attribute",
            RecordSkipped::InvalidTimestamp(_) => "invalid_timestamp",
            RecordSkipped::InvalidValue(_) => "invalid_value",
            RecordSkipped::UnsupportedUnit(_) => "unsupported_unit",
            RecordSkipped::OutOfRange(_) => "out_of_range",
            RecordSkipped::EndBeforeStart => "end_before_start",
            RecordSkipped::NonPositiveDuration => "non_positive_duration",
            RecordSkipped::ExceedsMaxDuration(_) => "exceeds_max_duration",
            RecordSkipped::LateInterval(_) => "late_interval",
        }
    }
}
