//! Derived series and summary statistics.
//!
//! Everything here is a pure function of a finished daily [`TimeSeries`].

use std::collections::BTreeMap;

use chrono::NaiveDate;
use health_core::metrics::MetricClass;
use health_core::models::{SeriesPoint, SummaryStatistics, ThresholdCount, TimeSeries};
use health_core::statistics::{cumulative, histogram, percentiles, rolling_average};
use health_core::time_utils::Granularity;

use crate::aggregator::{contiguous_buckets, BucketAccumulator};

/// Re-aggregate a daily series at a coarser `granularity`.
///
/// Buckets are merged from their underlying counts and sums, so point-sample
/// means are weighted by contributing records rather than by days.
pub fn rollup(daily: &TimeSeries, granularity: Granularity) -> TimeSeries {
    let mut spans: BTreeMap<NaiveDate, BucketAccumulator> = BTreeMap::new();
    for bucket in &daily.buckets {
        let acc = spans.entry(granularity.bucket_start(bucket.start)).or_default();
        if !bucket.is_gap() {
            acc.merge(&BucketAccumulator::from_bucket(bucket));
        }
    }
    TimeSeries {
        granularity,
        class: daily.class,
        buckets: contiguous_buckets(granularity, daily.class, &spans),
    }
}

/// Trailing rolling average aligned to `daily`. Gap days count as zero.
pub fn rolling_series(daily: &TimeSeries, window: usize) -> Vec<SeriesPoint> {
    points(daily, rolling_average(&daily.values(), window))
}

/// Running total aligned to `daily`.
pub fn cumulative_series(daily: &TimeSeries) -> Vec<SeriesPoint> {
    points(daily, cumulative(&daily.values()))
}

fn points(daily: &TimeSeries, values: Vec<f64>) -> Vec<SeriesPoint> {
    daily
        .buckets
        .iter()
        .zip(values)
        .map(|(b, value)| SeriesPoint {
            date: b.key.clone(),
            value,
        })
        .collect()
}

/// Whole-range statistics over the days that received records.
///
/// Point-sample means are weighted by record count; other classes average the
/// headline value per observed day. `thresholds` are counted as days whose
/// value is at or above each one.
pub fn summarize(daily: &TimeSeries, bins: usize, thresholds: &[f64]) -> SummaryStatistics {
    let observed: Vec<(&str, f64)> = daily
        .buckets
        .iter()
        .filter(|b| !b.is_gap())
        .map(|b| (b.key.as_str(), b.value))
        .collect();
    if observed.is_empty() {
        return SummaryStatistics::default();
    }
    let values: Vec<f64> = observed.iter().map(|(_, v)| *v).collect();

    let total: f64 = values.iter().sum();
    let mean = match daily.class {
        MetricClass::PointSample => {
            let (sum, count) = daily
                .buckets
                .iter()
                .fold((0.0, 0u64), |(s, c), b| (s + b.sum, c + b.count));
            if count == 0 {
                0.0
            } else {
                sum / count as f64
            }
        }
        MetricClass::Additive | MetricClass::Duration => total / values.len() as f64,
    };

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let first_day_at = |target: f64| {
        observed
            .iter()
            .find(|(_, v)| *v == target)
            .map(|(key, _)| key.to_string())
    };

    SummaryStatistics {
        mean,
        total,
        min,
        max,
        days_recorded: values.len() as u64,
        min_date: first_day_at(min),
        max_date: first_day_at(max),
        histogram: histogram(&values, bins),
        percentiles: percentiles(&values),
        thresholds: thresholds
            .iter()
            .map(|&threshold| ThresholdCount {
                threshold,
                days: values.iter().filter(|v| **v >= threshold).count() as u64,
            })
            .collect(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
