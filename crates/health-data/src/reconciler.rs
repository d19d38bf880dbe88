//! Interval reconciliation for sleep-style metrics.
//!
//! Several sources (phone, watch, third-party apps) record the same night.
//! Intervals are grouped by night anchor day and each night is collapsed into
//! one timeline in which no two retained intervals overlap, so aggregation
//! never counts the same minutes twice.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Timelike};
use health_core::config::ExtractionConfig;
use health_core::error::RecordSkipped;
use health_core::metrics::SleepCategory;
use health_core::models::{Interval, MetricValue, NormalizedRecord};
use health_core::time_utils::LocalClock;
use tracing::debug;

// ── Interval admission ────────────────────────────────────────────────────────

/// Outcome of turning a normalized record into an interval.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Accepted(Interval),
    /// A daytime nap while naps are excluded. Not a skip.
    Nap,
}

/// Convert a normalized record into an [`Interval`], applying the duration
/// and nap filters from `config`.
pub fn admit(
    record: NormalizedRecord,
    config: &ExtractionConfig,
    clock: &LocalClock,
) -> Result<Admission, RecordSkipped> {
    let category = match record.value {
        MetricValue::Category(c) => c,
        MetricValue::Quantity(v) => return Err(RecordSkipped::InvalidValue(v.to_string())),
    };

    let seconds = record.duration_seconds();
    if seconds <= 0 {
        return Err(RecordSkipped::NonPositiveDuration);
    }
    let hours = seconds as f64 / 3600.0;
    if hours > config.max_interval_hours {
        return Err(RecordSkipped::ExceedsMaxDuration(hours));
    }

    if config.exclude_naps {
        let hour = clock.local(&record.start_time).hour();
        if hour >= config.nap_start_hour && hour < config.night_boundary_hour {
            return Ok(Admission::Nap);
        }
    }

    Ok(Admission::Accepted(Interval {
        category,
        source_label: record.source_label,
        start_time: record.start_time,
        end_time: record.end_time,
    }))
}

// ── NightGrouper ──────────────────────────────────────────────────────────────

/// Intervals attributed to one night anchor day.
#[derive(Debug, Clone, PartialEq)]
pub struct NightGroup {
    pub night: NaiveDate,
    pub intervals: Vec<Interval>,
}

/// Buffers intervals per night until they can be reconciled.
///
/// With sorted input a night is released once an interval two or more nights
/// later arrives; intervals that show up for an already released night are
/// rejected. Without sorted input everything is held until [`drain_all`].
///
/// [`drain_all`]: NightGrouper::drain_all
pub struct NightGrouper {
    clock: LocalClock,
    boundary_hour: u32,
    open: BTreeMap<NaiveDate, Vec<Interval>>,
    latest: Option<NaiveDate>,
    released_through: Option<NaiveDate>,
}

impl NightGrouper {
    pub fn new(clock: LocalClock, boundary_hour: u32) -> Self {
        Self {
            clock,
            boundary_hour,
            open: BTreeMap::new(),
            latest: None,
            released_through: None,
        }
    }

    /// Add an interval to its night's group and return the night.
    pub fn push(&mut self, interval: Interval) -> Result<NaiveDate, RecordSkipped> {
        let night = self
            .clock
            .night_anchor(&interval.start_time, self.boundary_hour);
        if self.released_through.is_some_and(|r| night <= r) {
            return Err(RecordSkipped::LateInterval(night));
        }
        self.latest = Some(self.latest.map_or(night, |l| l.max(night)));
        self.open.entry(night).or_default().push(interval);
        Ok(night)
    }

    /// Release nights that later input can no longer reach.
    ///
    /// An interval anchored to night `n` may still end on day `n + 1`, so
    /// nights up to `latest - 2` are safe to close.
    pub fn drain_ready(&mut self) -> Vec<NightGroup> {
        let Some(latest) = self.latest else {
            return Vec::new();
        };
        let horizon = latest - Duration::days(2);
        let still_open = self.open.split_off(&(horizon + Duration::days(1)));
        let ready = std::mem::replace(&mut self.open, still_open);
        if let Some((&last, _)) = ready.iter().next_back() {
            self.released_through = Some(self.released_through.map_or(last, |r| r.max(last)));
        }
        Self::into_groups(ready)
    }

    /// Release every buffered night.
    pub fn drain_all(&mut self) -> Vec<NightGroup> {
        let ready = std::mem::take(&mut self.open);
        if let Some((&last, _)) = ready.iter().next_back() {
            self.released_through = Some(self.released_through.map_or(last, |r| r.max(last)));
        }
        Self::into_groups(ready)
    }

    /// Number of nights currently buffered.
    pub fn pending_nights(&self) -> usize {
        self.open.len()
    }

    fn into_groups(map: BTreeMap<NaiveDate, Vec<Interval>>) -> Vec<NightGroup> {
        map.into_iter()
            .map(|(night, intervals)| NightGroup { night, intervals })
            .collect()
    }
}

// ── Reconciler ────────────────────────────────────────────────────────────────

/// Collapses one night's intervals into a non-overlapping timeline.
///
/// 1. Sort by start, then end, then source priority (first seen wins ties).
/// 2. Merge overlapping intervals of the same category into one span.
/// 3. Resolve cross-category overlaps by category priority: higher priority
///    spans are placed first and lower ones keep only the uncovered parts.
///    Within equal priority the earlier-starting span keeps the overlap and
///    the later one starts where it ends, or is dropped if nothing is left.
pub struct Reconciler<'a> {
    config: &'a ExtractionConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(config: &'a ExtractionConfig) -> Self {
        Self { config }
    }

    /// Reconcile a night's intervals. Idempotent.
    pub fn reconcile(&self, mut intervals: Vec<Interval>) -> Vec<Interval> {
        let input_len = intervals.len();
        intervals.retain(|i| i.end_time > i.start_time);

        // Stable sort keeps arrival order as the final tie-break.
        intervals.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then(a.end_time.cmp(&b.end_time))
                .then(
                    self.config
                        .source_rank(&a.source_label)
                        .cmp(&self.config.source_rank(&b.source_label)),
                )
        });

        let mut spans = merge_same_category(intervals);
        spans.sort_by(|a, b| b.category.priority().cmp(&a.category.priority()));

        let mut timeline: Vec<Interval> = Vec::with_capacity(spans.len());
        for span in spans {
            for piece in uncovered_pieces(&span, &timeline) {
                let at = timeline.partition_point(|t| t.start_time < piece.start_time);
                timeline.insert(at, piece);
            }
        }

        debug!(
            "Reconciled {} intervals into {} spans",
            input_len,
            timeline.len()
        );
        timeline
    }
}

/// Merge overlapping spans of the same category. `sorted` must be ordered by
/// start time; the first span of a merged run keeps its source label.
fn merge_same_category(sorted: Vec<Interval>) -> Vec<Interval> {
    let mut out: Vec<Interval> = Vec::with_capacity(sorted.len());
    let mut open: HashMap<SleepCategory, usize> = HashMap::new();

    for interval in sorted {
        if let Some(&idx) = open.get(&interval.category) {
            let span = &mut out[idx];
            if interval.start_time < span.end_time {
                if interval.end_time > span.end_time {
                    span.end_time = interval.end_time;
                }
                continue;
            }
        }
        open.insert(interval.category, out.len());
        out.push(interval);
    }
    out
}

/// Parts of `span` not covered by `taken`. `taken` must be sorted by start
/// and non-overlapping.
fn uncovered_pieces(span: &Interval, taken: &[Interval]) -> Vec<Interval> {
    let offset = *span.start_time.offset();
    let at = |t: DateTime<FixedOffset>| t.with_timezone(&offset);
    let piece = |start: DateTime<FixedOffset>, end: DateTime<FixedOffset>| Interval {
        category: span.category,
        source_label: span.source_label.clone(),
        start_time: at(start),
        end_time: at(end),
    };

    let mut pieces = Vec::new();
    let mut cursor = span.start_time;
    for t in taken.iter().filter(|t| t.overlaps(span)) {
        if t.start_time > cursor {
            pieces.push(piece(cursor, t.start_time));
        }
        if t.end_time > cursor {
            cursor = t.end_time;
        }
    }
    if cursor < span.end_time {
        pieces.push(piece(cursor, span.end_time));
    }
    pieces
}

// ── Tests ─────────────────────────────────────────────────────────────────────
