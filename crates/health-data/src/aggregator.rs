//! Calendar bucketing of normalized records.
//!
//! Records are accumulated per local day. Monthly and yearly series are rolled
//! up from the finished daily series in [`crate::series`].

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use health_core::metrics::{MetricClass, MetricKind, SleepCategory};
use health_core::models::{Bucket, Interval, MetricValue, NormalizedRecord, TimeSeries};
use health_core::time_utils::{Granularity, LocalClock};
use tracing::debug;

// ── BucketAccumulator ─────────────────────────────────────────────────────────

/// Running totals for one calendar span.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketAccumulator {
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Minutes per sleep category.
    pub categories: BTreeMap<SleepCategory, f64>,
    pub sources: BTreeSet<String>,
}

impl BucketAccumulator {
    /// Add one numeric contribution.
    pub fn add_value(&mut self, value: f64, source: &str) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        if !self.sources.contains(source) {
            self.sources.insert(source.to_string());
        }
    }

    /// Add a reconciled interval; its length in minutes is the value.
    pub fn add_interval(&mut self, interval: &Interval) {
        let minutes = interval.duration_minutes();
        self.add_value(minutes, &interval.source_label);
        *self.categories.entry(interval.category).or_insert(0.0) += minutes;
    }

    /// Fold another accumulator into this one.
    pub fn merge(&mut self, other: &BucketAccumulator) {
        self.count += other.count;
        self.sum += other.sum;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        for (category, minutes) in &other.categories {
            *self.categories.entry(*category).or_insert(0.0) += minutes;
        }
        self.sources.extend(other.sources.iter().cloned());
    }

    /// Reopen a finalized bucket so it can be rolled up further.
    pub fn from_bucket(bucket: &Bucket) -> Self {
        Self {
            count: bucket.count,
            sum: bucket.sum,
            min: bucket.min,
            max: bucket.max,
            categories: bucket.categories.clone(),
            sources: bucket.sources.clone(),
        }
    }

    /// Freeze into a [`Bucket`] whose headline value follows `class`.
    pub fn finalize(&self, key: String, start: NaiveDate, class: MetricClass) -> Bucket {
        if self.count == 0 {
            return Bucket::gap(key, start);
        }
        let mean = self.sum / self.count as f64;
        let time_asleep = match class {
            MetricClass::Duration => Some(
                self.categories
                    .iter()
                    .filter(|(c, _)| c.is_asleep())
                    .map(|(_, m)| m)
                    .sum(),
            ),
            _ => None,
        };
        let value = match class {
            MetricClass::Additive => self.sum,
            MetricClass::PointSample => mean,
            MetricClass::Duration => time_asleep.unwrap_or(0.0),
        };

        Bucket {
            key,
            start,
            count: self.count,
            sum: self.sum,
            mean,
            min: self.min,
            max: self.max,
            value,
            categories: self.categories.clone(),
            time_asleep,
            sources: self.sources.clone(),
        }
    }
}

// ── Aggregator ────────────────────────────────────────────────────────────────

/// Groups one metric's records into local calendar days.
pub struct Aggregator {
    metric: MetricKind,
    clock: LocalClock,
    daily: BTreeMap<NaiveDate, BucketAccumulator>,
    records: u64,
}

impl Aggregator {
    pub fn new(metric: MetricKind, clock: LocalClock) -> Self {
        Self {
            metric,
            clock,
            daily: BTreeMap::new(),
            records: 0,
        }
    }

    /// Number of records or intervals added so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn daily(&self) -> &BTreeMap<NaiveDate, BucketAccumulator> {
        &self.daily
    }

    /// Add a quantity record.
    ///
    /// Splittable metrics are pro-rated over the local days the record spans;
    /// everything else lands wholly on the local day of its start.
    pub fn add_record(&mut self, record: &NormalizedRecord) {
        let MetricValue::Quantity(value) = record.value else {
            return;
        };
        self.records += 1;

        if self.metric.is_splittable() {
            let start = self.clock.local(&record.start_time);
            let end = self.clock.local(&record.end_time);
            for (day, share) in day_shares(start, end) {
                self.daily
                    .entry(day)
                    .or_default()
                    .add_value(value * share, &record.source_label);
            }
        } else {
            let day = self.clock.local_date(&record.start_time);
            self.daily
                .entry(day)
                .or_default()
                .add_value(value, &record.source_label);
        }
    }

    /// Add a reconciled interval to the bucket of its night.
    pub fn add_interval(&mut self, night: NaiveDate, interval: &Interval) {
        self.records += 1;
        self.daily.entry(night).or_default().add_interval(interval);
    }

    /// Contiguous daily series from the first to the last observed day.
    pub fn daily_series(&self) -> TimeSeries {
        let class = self.metric.class();
        let buckets = contiguous_buckets(Granularity::Day, class, &self.daily);
        debug!(
            "{} daily buckets for {} ({} observed)",
            buckets.len(),
            self.metric,
            self.daily.len()
        );
        TimeSeries {
            granularity: Granularity::Day,
            class,
            buckets,
        }
    }
}

/// Finalize `spans` (keyed by bucket start) into contiguous buckets.
/// Spans without an accumulator become gap buckets.
pub(crate) fn contiguous_buckets(
    granularity: Granularity,
    class: MetricClass,
    spans: &BTreeMap<NaiveDate, BucketAccumulator>,
) -> Vec<Bucket> {
    let mut buckets = Vec::with_capacity(spans.len());
    let (Some(&first), Some(&last)) = (spans.keys().next(), spans.keys().next_back()) else {
        return buckets;
    };
    let empty = BucketAccumulator::default();
    let mut start = first;
    while start <= last {
        let acc = spans.get(&start).unwrap_or(&empty);
        buckets.push(acc.finalize(granularity.key(start), start, class));
        start = granularity.next_start(start);
    }
    buckets
}

/// Linear share of `[start, end)` falling on each local day.
///
/// Shares sum to 1. A zero-length span is wholly attributed to its start day.
fn day_shares(start: NaiveDateTime, end: NaiveDateTime) -> Vec<(NaiveDate, f64)> {
    let mut pieces = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let day = cursor.date();
        let midnight = (day + Duration::days(1)).and_hms_opt(0, 0, 0).unwrap_or(end);
        let piece_end = midnight.min(end);
        let seconds = (piece_end - cursor).num_milliseconds() as f64;
        if seconds > 0.0 {
            pieces.push((day, seconds));
        }
        cursor = piece_end;
    }

    let total: f64 = pieces.iter().map(|(_, s)| s).sum();
    if total <= 0.0 {
        return vec![(start.date(), 1.0)];
    }
    pieces.into_iter().map(|(d, s)| (d, s / total)).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use health_core::time_utils::parse_timestamp;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn quantity(value: f64, start: &str, end: &str) -> NormalizedRecord {
        NormalizedRecord {
            source_label: "Watch".to_string(),
            value: MetricValue::Quantity(value),
            start_time: parse_timestamp(start).unwrap(),
            end_time: parse_timestamp(end).unwrap(),
        }
    }

    fn interval(category: SleepCategory, start: &str, end: &str) -> Interval {
        Interval {
            category,
            source_label: "Watch".to_string(),
            start_time: parse_timestamp(start).unwrap(),
            end_time: parse_timestamp(end).unwrap(),
        }
    }

    // ── daily bucketing ───────────────────────────────────────────────────────

    #[test]
    fn test_additive_daily_sum_with_gap() {
        let mut agg = Aggregator::new(MetricKind::StepCount, LocalClock::Source);
        agg.add_record(&quantity(100.0, "2024-01-01 08:00:00 +0000", "2024-01-01 08:10:00 +0000"));
        agg.add_record(&quantity(50.0, "2024-01-01 12:00:00 +0000", "2024-01-01 12:05:00 +0000"));
        agg.add_record(&quantity(70.0, "2024-01-03 09:00:00 +0000", "2024-01-03 09:05:00 +0000"));

        let series = agg.daily_series();
        let keys: Vec<&str> = series.buckets.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["2024-01-01", "2024-01-02", "2024-01-03"]);
        assert_eq!(series.values(), vec![150.0, 0.0, 70.0]);
        assert!(series.buckets[1].is_gap());
        assert_eq!(series.buckets[0].count, 2);
    }

    #[test]
    fn test_local_date_follows_source_offset() {
        let mut agg = Aggregator::new(MetricKind::StepCount, LocalClock::Source);
        // 23:30 at +0200 is 21:30 UTC; the bucket is the wall-clock day.
        agg.add_record(&quantity(10.0, "2024-01-01 23:30:00 +0200", "2024-01-01 23:40:00 +0200"));
        assert!(agg.daily().contains_key(&date("2024-01-01")));
    }

    #[test]
    fn test_point_sample_mean_min_max() {
        let mut agg = Aggregator::new(MetricKind::HeartRate, LocalClock::Source);
        for v in [60.0, 80.0, 70.0] {
            agg.add_record(&quantity(v, "2024-01-01 10:00:00 +0000", "2024-01-01 10:00:00 +0000"));
        }
        let bucket = &agg.daily_series().buckets[0];
        assert_eq!(bucket.value, 70.0);
        assert_eq!(bucket.min, Some(60.0));
        assert_eq!(bucket.max, Some(80.0));
        assert_eq!(bucket.sum, 210.0);
    }

    #[test]
    fn test_empty_aggregator_has_no_buckets() {
        let agg = Aggregator::new(MetricKind::StepCount, LocalClock::Source);
        assert!(agg.daily_series().is_empty());
    }

    // ── pro-ration ────────────────────────────────────────────────────────────

    #[test]
    fn test_splittable_record_prorated_over_midnight() {
        let mut agg = Aggregator::new(MetricKind::DistanceWalkingRunning, LocalClock::Source);
        agg.add_record(&quantity(4.0, "2024-01-01 23:30:00 +0000", "2024-01-02 00:30:00 +0000"));

        let series = agg.daily_series();
        assert_eq!(series.len(), 2);
        assert!((series.buckets[0].value - 2.0).abs() < 1e-9);
        assert!((series.buckets[1].value - 2.0).abs() < 1e-9);
        let total: f64 = series.values().iter().sum();
        assert!((total - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_non_splittable_record_stays_on_start_day() {
        let mut agg = Aggregator::new(MetricKind::StepCount, LocalClock::Source);
        agg.add_record(&quantity(400.0, "2024-01-01 23:30:00 +0000", "2024-01-02 00:30:00 +0000"));
        let series = agg.daily_series();
        assert_eq!(series.len(), 1);
        assert_eq!(series.buckets[0].key, "2024-01-01");
    }

    #[test]
    fn test_day_shares_ending_at_midnight() {
        let start = date("2024-01-01").and_hms_opt(22, 0, 0).unwrap();
        let end = date("2024-01-02").and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(day_shares(start, end), vec![(date("2024-01-01"), 1.0)]);
    }

    #[test]
    fn test_day_shares_zero_length() {
        let at = date("2024-01-01").and_hms_opt(12, 0, 0).unwrap();
        assert_eq!(day_shares(at, at), vec![(date("2024-01-01"), 1.0)]);
    }

    // ── intervals ─────────────────────────────────────────────────────────────

    #[test]
    fn test_intervals_land_on_night_bucket() {
        let mut agg = Aggregator::new(MetricKind::SleepAnalysis, LocalClock::Source);
        let night = date("2024-01-01");
        agg.add_interval(
            night,
            &interval(SleepCategory::InBed, "2024-01-01 22:00:00 +0000", "2024-01-01 22:30:00 +0000"),
        );
        agg.add_interval(
            night,
            &interval(SleepCategory::AsleepCore, "2024-01-01 22:30:00 +0000", "2024-01-02 01:30:00 +0000"),
        );
        agg.add_interval(
            night,
            &interval(SleepCategory::AsleepRem, "2024-01-02 01:30:00 +0000", "2024-01-02 02:00:00 +0000"),
        );

        let series = agg.daily_series();
        assert_eq!(series.len(), 1);
        let bucket = &series.buckets[0];
        assert_eq!(bucket.key, "2024-01-01");
        assert_eq!(bucket.time_asleep, Some(210.0));
        assert_eq!(bucket.value, 210.0);
        assert_eq!(bucket.sum, 240.0);
        assert_eq!(bucket.category_minutes(SleepCategory::InBed), 30.0);
    }
}
