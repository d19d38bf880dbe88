use clap::Parser;
use std::path::PathBuf;

use crate::config::ExtractionConfig;
use crate::error::Result;
use crate::metrics::MetricKind;
use crate::time_utils::Granularity;

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Extract per-metric daily, monthly and yearly aggregates from a health export
#[derive(Parser, Debug, Clone)]
#[command(
    name = "health-extract",
    about = "Extract per-metric aggregates from a health data export",
    version
)]
pub struct Settings {
    /// Path to the export XML document
    #[arg(long, default_value = "apple_health_export/export.xml")]
    pub source: PathBuf,

    /// Metric to extract (identifier or alias); repeat for several
    #[arg(long = "metric", required = true)]
    pub metrics: Vec<String>,

    /// Directory receiving one JSON document per metric
    #[arg(long, default_value = "data")]
    pub output_dir: PathBuf,

    /// JSON file with extraction options
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Granularities to emit (repeatable); daily buckets are always written
    #[arg(long = "granularity", value_parser = ["day", "month", "year"])]
    pub granularities: Vec<String>,

    /// Rolling average window in days
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub rolling_window: Option<u32>,

    /// Histogram bin count
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub histogram_bins: Option<u32>,

    /// Local hour at which a new night starts (0-23)
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=23))]
    pub night_boundary_hour: Option<u32>,

    /// Preferred source label for overlapping intervals (repeatable, most preferred first)
    #[arg(long = "prefer-source")]
    pub source_priority: Vec<String>,

    /// Timezone for calendar dates: "source", "auto" or an IANA name
    #[arg(long)]
    pub timezone: Option<String>,

    /// Drop daytime sleep intervals
    #[arg(long)]
    pub exclude_naps: bool,

    /// Records are ordered by start time; reconcile nights incrementally
    #[arg(long)]
    pub sorted_input: bool,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Settings {
    /// Parse from an explicit argument list.
    pub fn load_from_args(args: Vec<std::ffi::OsString>) -> Self {
        let mut settings = Settings::parse_from(args);
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }

    /// Resolve every `--metric` value against the catalog.
    pub fn resolve_metrics(&self) -> Result<Vec<MetricKind>> {
        let mut out = Vec::new();
        for name in &self.metrics {
            let metric = MetricKind::resolve(name)?;
            if !out.contains(&metric) {
                out.push(metric);
            }
        }
        Ok(out)
    }

    /// Build the extraction config: defaults, then the config file, then any
    /// option given on the command line.
    pub fn extraction_config(&self) -> Result<ExtractionConfig> {
        let mut config = match &self.config {
            Some(path) => ExtractionConfig::load_from(path)?,
            None => ExtractionConfig::default(),
        };

        if !self.granularities.is_empty() {
            config.granularities = self
                .granularities
                .iter()
                .filter_map(|g| match g.as_str() {
                    "day" => Some(Granularity::Day),
                    "month" => Some(Granularity::Month),
                    "year" => Some(Granularity::Year),
                    _ => None,
                })
                .collect();
        }
        if let Some(w) = self.rolling_window {
            config.rolling_window_size = w as usize;
        }
        if let Some(b) = self.histogram_bins {
            config.histogram_bins = b as usize;
        }
        if let Some(h) = self.night_boundary_hour {
            config.night_boundary_hour = h;
        }
        if !self.source_priority.is_empty() {
            config.source_priority = self.source_priority.clone();
        }
        if let Some(tz) = &self.timezone {
            config.timezone = tz.clone();
        }
        if self.exclude_naps {
            config.exclude_naps = true;
        }
        if self.sorted_input {
            config.sorted_input = true;
        }

        config.validate()?;
        Ok(config)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
