//! Extraction configuration.
//!
//! [`ExtractionConfig`] is passed explicitly into every pipeline stage; there
//! are no process-wide defaults beyond [`Default`].

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HealthError, Result};
use crate::time_utils::{Granularity, LocalClock};

/// Largest `output_precision` that still rounds to a finite value.
pub const MAX_OUTPUT_PRECISION: u32 = 15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Granularities emitted in the output. Daily buckets are always emitted
    /// because the rolling and cumulative series are aligned to them.
    pub granularities: BTreeSet<Granularity>,
    /// Trailing window of the rolling average, in daily buckets.
    pub rolling_window_size: usize,
    /// Number of bins of the daily-value histogram.
    pub histogram_bins: usize,
    /// Local hour at which a new night starts.
    pub night_boundary_hour: u32,
    /// Preferred source labels, most preferred first.
    pub source_priority: Vec<String>,
    /// `"source"`, `"auto"` or an IANA zone name.
    pub timezone: String,
    /// Decimal places kept in the written document.
    pub output_precision: u32,
    /// Drop daytime sleep intervals instead of attributing them to a night.
    pub exclude_naps: bool,
    /// Local hour from which a sleep interval counts as a nap.
    pub nap_start_hour: u32,
    /// Intervals longer than this are treated as recording errors.
    pub max_interval_hours: f64,
    /// The export lists records in start order, so nights can be reconciled
    /// and released as soon as later nights begin. When unset, every sleep
    /// interval is held in memory until the stream ends.
    pub sorted_input: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            granularities: [Granularity::Day, Granularity::Month, Granularity::Year]
                .into_iter()
                .collect(),
            rolling_window_size: 7,
            histogram_bins: 20,
            night_boundary_hour: 18,
            source_priority: Vec::new(),
            timezone: "source".to_string(),
            output_precision: 2,
            exclude_naps: false,
            nap_start_hour: 9,
            max_interval_hours: 24.0,
            sorted_input: false,
        }
    }
}

impl ExtractionConfig {
    /// Load a JSON config file. Keys that are absent take their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HealthError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values outside their documented ranges.
    pub fn validate(&self) -> Result<()> {
        if self.rolling_window_size < 1 {
            return Err(HealthError::Config(
                "rolling_window_size must be >= 1".to_string(),
            ));
        }
        if self.histogram_bins < 1 {
            return Err(HealthError::Config("histogram_bins must be >= 1".to_string()));
        }
        if self.night_boundary_hour > 23 {
            return Err(HealthError::Config(format!(
                "night_boundary_hour must be 0-23, got {}",
                self.night_boundary_hour
            )));
        }
        if self.nap_start_hour > 23 {
            return Err(HealthError::Config(format!(
                "nap_start_hour must be 0-23, got {}",
                self.nap_start_hour
            )));
        }
        if self.output_precision > MAX_OUTPUT_PRECISION {
            return Err(HealthError::Config(format!(
                "output_precision must be 0-{}, got {}",
                MAX_OUTPUT_PRECISION, self.output_precision
            )));
        }
        if self.max_interval_hours.is_nan() || self.max_interval_hours <= 0.0 {
            return Err(HealthError::Config(
                "max_interval_hours must be positive".to_string(),
            ));
        }
        self.clock()?;
        Ok(())
    }

    /// Resolve the configured timezone into a [`LocalClock`].
    pub fn clock(&self) -> Result<LocalClock> {
        LocalClock::from_setting(&self.timezone)
    }

    /// Rank of `source` in the priority list; unlisted sources rank last.
    pub fn source_rank(&self, source: &str) -> usize {
        self.source_priority
            .iter()
            .position(|s| s == source)
            .unwrap_or(self.source_priority.len())
    }

    pub fn emits(&self, granularity: Granularity) -> bool {
        granularity == Granularity::Day || self.granularities.contains(&granularity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ExtractionConfig::default();
        assert_eq!(config.rolling_window_size, 7);
        assert_eq!(config.histogram_bins, 20);
        assert_eq!(config.night_boundary_hour, 18);
        assert!(config.source_priority.is_empty());
        assert!(config.emits(Granularity::Day));
        assert!(config.emits(Granularity::Month));
        assert!(config.emits(Granularity::Year));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let config = ExtractionConfig {
            rolling_window_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(HealthError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_boundary_hour() {
        let config = ExtractionConfig {
            night_boundary_hour: 24,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_output_precision_bound() {
        let at_limit = ExtractionConfig {
            output_precision: MAX_OUTPUT_PRECISION,
            ..Default::default()
        };
        assert!(at_limit.validate().is_ok());

        let too_precise = ExtractionConfig {
            output_precision: 400,
            ..Default::default()
        };
        assert!(matches!(too_precise.validate(), Err(HealthError::Config(_))));
    }

    #[test]
    fn test_daily_is_always_emitted() {
        let config = ExtractionConfig {
            granularities: [Granularity::Year].into_iter().collect(),
            ..Default::default()
        };
        assert!(config.emits(Granularity::Day));
        assert!(!config.emits(Granularity::Month));
        assert!(config.emits(Granularity::Year));
    }

    #[test]
    fn test_validate_rejects_unknown_timezone() {
        let config = ExtractionConfig {
            timezone: "Not/AZone".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_source_rank() {
        let config = ExtractionConfig {
            source_priority: vec!["Watch".to_string(), "iPhone".to_string()],
            ..Default::default()
        };
        assert_eq!(config.source_rank("Watch"), 0);
        assert_eq!(config.source_rank("iPhone"), 1);
        assert_eq!(config.source_rank("SleepApp"), 2);
    }

    #[test]
    fn test_load_from_partial_file() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"rolling_window_size": 14, "granularities": ["day", "year"]}"#,
        )
        .expect("write");

        let config = ExtractionConfig::load_from(&path).expect("load");
        assert_eq!(config.rolling_window_size, 14);
        assert!(!config.emits(Granularity::Month));
        assert_eq!(config.histogram_bins, 20);
    }

    #[test]
    fn test_load_from_invalid_values() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"histogram_bins": 0}"#).expect("write");
        assert!(ExtractionConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_load_from_missing_file() {
        let tmp = TempDir::new().expect("tempdir");
        let err = ExtractionConfig::load_from(&tmp.path().join("nope.json")).unwrap_err();
        assert!(err.to_string().contains("nope.json"));
    }
}
