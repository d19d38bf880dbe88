//! Metric catalog.
//!
//! Every metric the extractor understands is one [`MetricKind`] variant. The
//! variant fixes the HealthKit identifier to match, the aggregation class, the
//! canonical unit and how raw values are coerced into it.

use serde::{Deserialize, Serialize};

use crate::error::{HealthError, RecordSkipped};

// ── MetricClass ───────────────────────────────────────────────────────────────

/// Aggregation semantics of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricClass {
    /// Bucket value is the sum of contributing values (steps, energy, distance).
    Additive,
    /// Bucket value is the mean of contributing samples (resting heart rate).
    PointSample,
    /// Bucket value is the summed interval duration per category (sleep).
    Duration,
}

// ── SleepCategory ─────────────────────────────────────────────────────────────

/// Category of an interval-valued sleep record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepCategory {
    InBed,
    Awake,
    AsleepUnspecified,
    AsleepCore,
    AsleepDeep,
    AsleepRem,
    Unknown,
}

impl SleepCategory {
    /// Map a raw HealthKit category value to a sleep category.
    ///
    /// Unmapped strings become [`SleepCategory::Unknown`] rather than failing.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim() {
            "HKCategoryValueSleepAnalysisInBed" => SleepCategory::InBed,
            "HKCategoryValueSleepAnalysisAwake" => SleepCategory::Awake,
            "HKCategoryValueSleepAnalysisAsleep" | "HKCategoryValueSleepAnalysisAsleepUnspecified" => {
                SleepCategory::AsleepUnspecified
            }
            "HKCategoryValueSleepAnalysisAsleepCore" => SleepCategory::AsleepCore,
            "HKCategoryValueSleepAnalysisAsleepDeep" => SleepCategory::AsleepDeep,
            "HKCategoryValueSleepAnalysisAsleepREM" => SleepCategory::AsleepRem,
            _ => SleepCategory::Unknown,
        }
    }

    /// `true` for every asleep-* category.
    pub fn is_asleep(self) -> bool {
        matches!(
            self,
            SleepCategory::AsleepUnspecified
                | SleepCategory::AsleepCore
                | SleepCategory::AsleepDeep
                | SleepCategory::AsleepRem
        )
    }

    /// Conflict priority during reconciliation. Higher wins the overlap.
    pub fn priority(self) -> u8 {
        match self {
            c if c.is_asleep() => 2,
            SleepCategory::Awake => 1,
            _ => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SleepCategory::InBed => "in_bed",
            SleepCategory::Awake => "awake",
            SleepCategory::AsleepUnspecified => "asleep_unspecified",
            SleepCategory::AsleepCore => "asleep_core",
            SleepCategory::AsleepDeep => "asleep_deep",
            SleepCategory::AsleepRem => "asleep_rem",
            SleepCategory::Unknown => "unknown",
        }
    }
}

// ── MetricKind ────────────────────────────────────────────────────────────────

/// The closed set of extractable metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    StepCount,
    ActiveEnergyBurned,
    BasalEnergyBurned,
    DistanceWalkingRunning,
    FlightsClimbed,
    RestingHeartRate,
    HeartRate,
    SleepAnalysis,
}

/// Conversion factors into a metric's canonical unit.
type UnitTable = &'static [(&'static str, f64)];

const COUNT_UNITS: UnitTable = &[("count", 1.0)];
const ENERGY_UNITS: UnitTable = &[("kcal", 1.0), ("Cal", 1.0), ("kJ", 1.0 / 4.184)];
const DISTANCE_UNITS: UnitTable = &[("km", 1.0), ("mi", 1.60934), ("m", 0.001)];
const RATE_UNITS: UnitTable = &[("count/min", 1.0)];

impl MetricKind {
    pub const ALL: [MetricKind; 8] = [
        MetricKind::StepCount,
        MetricKind::ActiveEnergyBurned,
        MetricKind::BasalEnergyBurned,
        MetricKind::DistanceWalkingRunning,
        MetricKind::FlightsClimbed,
        MetricKind::RestingHeartRate,
        MetricKind::HeartRate,
        MetricKind::SleepAnalysis,
    ];

    /// HealthKit type identifier matched against the `type` attribute.
    pub fn identifier(self) -> &'static str {
        match self {
            MetricKind::StepCount => "HKQuantityTypeIdentifierStepCount",
            MetricKind::ActiveEnergyBurned => "HKQuantityTypeIdentifierActiveEnergyBurned",
            MetricKind::BasalEnergyBurned => "HKQuantityTypeIdentifierBasalEnergyBurned",
            MetricKind::DistanceWalkingRunning => "HKQuantityTypeIdentifierDistanceWalkingRunning",
            MetricKind::FlightsClimbed => "HKQuantityTypeIdentifierFlightsClimbed",
            MetricKind::RestingHeartRate => "HKQuantityTypeIdentifierRestingHeartRate",
            MetricKind::HeartRate => "HKQuantityTypeIdentifierHeartRate",
            MetricKind::SleepAnalysis => "HKCategoryTypeIdentifierSleepAnalysis",
        }
    }

    /// Short name accepted on the command line.
    pub fn alias(self) -> &'static str {
        match self {
            MetricKind::StepCount => "steps",
            MetricKind::ActiveEnergyBurned => "active-energy",
            MetricKind::BasalEnergyBurned => "basal-energy",
            MetricKind::DistanceWalkingRunning => "distance",
            MetricKind::FlightsClimbed => "flights",
            MetricKind::RestingHeartRate => "resting-hr",
            MetricKind::HeartRate => "heart-rate",
            MetricKind::SleepAnalysis => "sleep",
        }
    }

    /// File stem of the written output document.
    pub fn slug(self) -> &'static str {
        match self {
            MetricKind::StepCount => "step_count",
            MetricKind::ActiveEnergyBurned => "active_energy",
            MetricKind::BasalEnergyBurned => "basal_energy",
            MetricKind::DistanceWalkingRunning => "distance",
            MetricKind::FlightsClimbed => "flights_climbed",
            MetricKind::RestingHeartRate => "resting_hr",
            MetricKind::HeartRate => "heart_rate",
            MetricKind::SleepAnalysis => "sleep",
        }
    }

    pub fn class(self) -> MetricClass {
        match self {
            MetricKind::StepCount
            | MetricKind::ActiveEnergyBurned
            | MetricKind::BasalEnergyBurned
            | MetricKind::DistanceWalkingRunning
            | MetricKind::FlightsClimbed => MetricClass::Additive,
            MetricKind::RestingHeartRate | MetricKind::HeartRate => MetricClass::PointSample,
            MetricKind::SleepAnalysis => MetricClass::Duration,
        }
    }

    pub fn canonical_unit(self) -> &'static str {
        match self {
            MetricKind::StepCount | MetricKind::FlightsClimbed => "count",
            MetricKind::ActiveEnergyBurned | MetricKind::BasalEnergyBurned => "kcal",
            MetricKind::DistanceWalkingRunning => "km",
            MetricKind::RestingHeartRate | MetricKind::HeartRate => "count/min",
            MetricKind::SleepAnalysis => "min",
        }
    }

    /// Whether a record spanning several buckets is pro-rated across them
    /// instead of being attributed whole to its anchor bucket.
    pub fn is_splittable(self) -> bool {
        matches!(self, MetricKind::DistanceWalkingRunning)
    }

    /// Daily goals reported as "days at or above" counts in the summary.
    pub fn day_thresholds(self) -> &'static [f64] {
        match self {
            MetricKind::StepCount => &[10_000.0],
            MetricKind::DistanceWalkingRunning => &[5.0, 10.0],
            _ => &[],
        }
    }

    /// `true` when the metric is expressed as categorised time intervals.
    pub fn is_interval(self) -> bool {
        self.class() == MetricClass::Duration
    }

    fn units(self) -> UnitTable {
        match self {
            MetricKind::StepCount | MetricKind::FlightsClimbed => COUNT_UNITS,
            MetricKind::ActiveEnergyBurned | MetricKind::BasalEnergyBurned => ENERGY_UNITS,
            MetricKind::DistanceWalkingRunning => DISTANCE_UNITS,
            MetricKind::RestingHeartRate | MetricKind::HeartRate => RATE_UNITS,
            MetricKind::SleepAnalysis => &[],
        }
    }

    /// Exclusive lower and inclusive upper bound for a plausible value in the
    /// canonical unit.
    fn valid_range(self) -> (f64, f64) {
        match self {
            MetricKind::RestingHeartRate => (0.0, 200.0),
            MetricKind::HeartRate => (0.0, 250.0),
            _ => (0.0, f64::INFINITY),
        }
    }

    /// Resolve a HealthKit identifier (exact, case-sensitive) or an alias.
    pub fn resolve(name: &str) -> Result<Self, HealthError> {
        MetricKind::ALL
            .into_iter()
            .find(|m| m.identifier() == name || m.alias() == name || m.slug() == name)
            .ok_or_else(|| HealthError::UnknownMetric(name.to_string()))
    }

    /// Parse a raw numeric value and coerce it to the canonical unit.
    ///
    /// `unit` of `None` means the source omitted it; the canonical unit is
    /// assumed.
    pub fn coerce_quantity(self, raw: &str, unit: Option<&str>) -> Result<f64, RecordSkipped> {
        let value: f64 = raw
            .trim()
            .parse()
            .map_err(|_| RecordSkipped::InvalidValue(raw.to_string()))?;
        if !value.is_finite() {
            return Err(RecordSkipped::InvalidValue(raw.to_string()));
        }

        let factor = match unit {
            None => 1.0,
            Some(u) => self
                .units()
                .iter()
                .find(|(name, _)| *name == u)
                .map(|(_, f)| *f)
                .ok_or_else(|| RecordSkipped::UnsupportedUnit(u.to_string()))?,
        };
        let converted = value * factor;

        let (lo, hi) = self.valid_range();
        if converted <= lo || converted > hi {
            return Err(RecordSkipped::OutOfRange(converted));
        }
        Ok(converted)
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.identifier())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── resolve ───────────────────────────────────────────────────────────────

    #[test]
    fn test_resolve_identifier_and_alias() {
        assert_eq!(
            MetricKind::resolve("HKQuantityTypeIdentifierStepCount").unwrap(),
            MetricKind::StepCount
        );
        assert_eq!(MetricKind::resolve("sleep").unwrap(), MetricKind::SleepAnalysis);
        assert_eq!(MetricKind::resolve("resting_hr").unwrap(), MetricKind::RestingHeartRate);
    }

    #[test]
    fn test_resolve_is_case_sensitive() {
        assert!(matches!(
            MetricKind::resolve("hkquantitytypeidentifierstepcount"),
            Err(HealthError::UnknownMetric(_))
        ));
    }

    #[test]
    fn test_every_metric_has_unique_identifier() {
        let mut ids: Vec<&str> = MetricKind::ALL.iter().map(|m| m.identifier()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), MetricKind::ALL.len());
    }

    #[test]
    fn test_day_thresholds() {
        assert_eq!(MetricKind::StepCount.day_thresholds(), &[10_000.0]);
        assert_eq!(MetricKind::DistanceWalkingRunning.day_thresholds(), &[5.0, 10.0]);
        assert!(MetricKind::HeartRate.day_thresholds().is_empty());
    }

    // ── coerce_quantity ───────────────────────────────────────────────────────

    #[test]
    fn test_coerce_rejects_nan() {
        let err = MetricKind::StepCount.coerce_quantity("NaN", Some("count")).unwrap_err();
        assert_eq!(err, RecordSkipped::InvalidValue("NaN".to_string()));
    }

    #[test]
    fn test_coerce_rejects_non_numeric() {
        assert!(matches!(
            MetricKind::StepCount.coerce_quantity("lots", None),
            Err(RecordSkipped::InvalidValue(_))
        ));
    }

    #[test]
    fn test_coerce_converts_miles_to_km() {
        let km = MetricKind::DistanceWalkingRunning
            .coerce_quantity("2", Some("mi"))
            .unwrap();
        assert!((km - 3.21868).abs() < 1e-9);
    }

    #[test]
    fn test_coerce_converts_kilojoules() {
        let kcal = MetricKind::ActiveEnergyBurned
            .coerce_quantity("418.4", Some("kJ"))
            .unwrap();
        assert!((kcal - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_coerce_missing_unit_assumes_canonical() {
        let v = MetricKind::StepCount.coerce_quantity("120", None).unwrap();
        assert_eq!(v, 120.0);
    }

    #[test]
    fn test_coerce_unknown_unit_is_skipped() {
        assert_eq!(
            MetricKind::StepCount.coerce_quantity("10", Some("furlong")),
            Err(RecordSkipped::UnsupportedUnit("furlong".to_string()))
        );
    }

    #[test]
    fn test_coerce_range_filters() {
        assert!(matches!(
            MetricKind::StepCount.coerce_quantity("0", None),
            Err(RecordSkipped::OutOfRange(_))
        ));
        assert!(matches!(
            MetricKind::RestingHeartRate.coerce_quantity("240", None),
            Err(RecordSkipped::OutOfRange(_))
        ));
        assert_eq!(
            MetricKind::RestingHeartRate
                .coerce_quantity("200", None)
                .unwrap(),
            200.0
        );
    }

    // ── SleepCategory ─────────────────────────────────────────────────────────

    #[test]
    fn test_sleep_category_mapping() {
        assert_eq!(
            SleepCategory::from_raw("HKCategoryValueSleepAnalysisAsleepREM"),
            SleepCategory::AsleepRem
        );
        assert_eq!(
            SleepCategory::from_raw("HKCategoryValueSleepAnalysisAsleep"),
            SleepCategory::AsleepUnspecified
        );
        assert_eq!(SleepCategory::from_raw("Napping"), SleepCategory::Unknown);
    }

    #[test]
    fn test_sleep_priority_asleep_outranks_in_bed() {
        assert!(SleepCategory::AsleepCore.priority() > SleepCategory::InBed.priority());
        assert!(SleepCategory::Awake.priority() > SleepCategory::InBed.priority());
        assert_eq!(
            SleepCategory::AsleepDeep.priority(),
            SleepCategory::AsleepRem.priority()
        );
        assert!(!SleepCategory::Unknown.is_asleep());
    }
}
