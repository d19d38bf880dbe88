use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::metrics::{MetricClass, SleepCategory};
use crate::time_utils::Granularity;

/// A single `Record` element as read from the export, before coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// HealthKit type identifier.
    pub metric_type: String,
    /// Originating device or app; `"Unknown"` when absent.
    pub source_label: String,
    /// Unit as written in the export, if any.
    pub unit: Option<String>,
    /// Raw `value` attribute (numeric text or a category name).
    pub value: String,
    pub start_time: DateTime<FixedOffset>,
    /// Equal to `start_time` for instantaneous samples.
    pub end_time: DateTime<FixedOffset>,
}

/// Coerced value of a normalized record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    /// Numeric value in the metric's canonical unit.
    Quantity(f64),
    /// Enumerated value of an interval metric.
    Category(SleepCategory),
}

/// A record restricted to one metric, value coerced to the canonical unit.
///
/// Invariant: `end_time >= start_time`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub source_label: String,
    pub value: MetricValue,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
}

impl NormalizedRecord {
    pub fn duration_seconds(&self) -> i64 {
        (self.end_time - self.start_time).num_seconds()
    }
}

/// An interval-valued record with its category.
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub category: SleepCategory,
    pub source_label: String,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
}

impl Interval {
    /// Length of the interval in minutes.
    pub fn duration_minutes(&self) -> f64 {
        (self.end_time - self.start_time).num_seconds() as f64 / 60.0
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }
}

/// Aggregated values for one calendar span. Frozen once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Calendar key: `YYYY-MM-DD`, `YYYY-MM` or `YYYY`.
    pub key: String,
    /// First calendar day of the span.
    pub start: NaiveDate,
    /// Number of contributing records (0 for gap buckets).
    pub count: u64,
    pub sum: f64,
    pub mean: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Headline value: sum, mean or time asleep depending on metric class.
    pub value: f64,
    /// Minutes per sleep category. Empty for non-interval metrics.
    #[serde(default)]
    pub categories: BTreeMap<SleepCategory, f64>,
    /// Sum of all asleep-* categories in minutes, for interval metrics.
    #[serde(default)]
    pub time_asleep: Option<f64>,
    /// Distinct source labels that contributed.
    #[serde(default)]
    pub sources: BTreeSet<String>,
}

impl Bucket {
    /// An empty bucket used to fill calendar gaps.
    pub fn gap(key: String, start: NaiveDate) -> Self {
        Self {
            key,
            start,
            count: 0,
            sum: 0.0,
            mean: 0.0,
            min: None,
            max: None,
            value: 0.0,
            categories: BTreeMap::new(),
            time_asleep: None,
            sources: BTreeSet::new(),
        }
    }

    pub fn is_gap(&self) -> bool {
        self.count == 0
    }

    /// Minutes recorded under `category`, zero if none.
    pub fn category_minutes(&self, category: SleepCategory) -> f64 {
        self.categories.get(&category).copied().unwrap_or(0.0)
    }
}

/// Contiguous, ascending buckets of one granularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub granularity: Granularity,
    pub class: MetricClass,
    pub buckets: Vec<Bucket>,
}

impl TimeSeries {
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Headline values in bucket order.
    pub fn values(&self) -> Vec<f64> {
        self.buckets.iter().map(|b| b.value).collect()
    }

    /// Headline values of buckets that received at least one record.
    pub fn observed_values(&self) -> Vec<f64> {
        self.buckets
            .iter()
            .filter(|b| !b.is_gap())
            .map(|b| b.value)
            .collect()
    }
}

/// A single dated value of a derived series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub date: String,
    pub value: f64,
}

/// One histogram bin; `bin_end` is exclusive except for the last bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub bin_start: f64,
    pub bin_end: f64,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p10: f64,
    pub median: f64,
    pub p90: f64,
}

/// Number of days whose value reached `threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCount {
    pub threshold: f64,
    pub days: u64,
}

/// Whole-range aggregates over a finalized daily series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub mean: f64,
    pub total: f64,
    pub min: f64,
    pub max: f64,
    /// Days with at least one record.
    pub days_recorded: u64,
    /// First day holding the minimum value.
    pub min_date: Option<String>,
    /// First day holding the maximum value.
    pub max_date: Option<String>,
    pub histogram: Vec<HistogramBin>,
    pub percentiles: Percentiles,
    #[serde(default)]
    pub thresholds: Vec<ThresholdCount>,
}
