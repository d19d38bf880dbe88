//! Record classification.
//!
//! Filters the element stream down to `Record` elements of one metric, pulls
//! their typed fields out and coerces the value. Records that cannot be used
//! are counted in a [`SkipCounter`] and never abort the run.

use std::collections::BTreeMap;

use health_core::error::{RecordSkipped, Result};
use health_core::metrics::{MetricKind, SleepCategory};
use health_core::models::{MetricValue, NormalizedRecord, RawRecord};
use health_core::time_utils::parse_timestamp;
use serde::Serialize;
use tracing::debug;

use crate::reader::ElementEvent;

/// Tag name of health-sample elements.
pub const RECORD_TAG: &str = "Record";

/// Source label used when `sourceName` is absent.
pub const UNKNOWN_SOURCE: &str = "Unknown";

// ── SkipCounter ───────────────────────────────────────────────────────────────

/// Tally of dropped records, with a breakdown by reason.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SkipCounter {
    total: u64,
    by_reason: BTreeMap<&'static str, u64>,
}

impl SkipCounter {
    pub fn record(&mut self, skip: &RecordSkipped) {
        self.total += 1;
        *self.by_reason.entry(skip.reason()).or_insert(0) += 1;
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn by_reason(&self) -> &BTreeMap<&'static str, u64> {
        &self.by_reason
    }

    pub fn merge(&mut self, other: &SkipCounter) {
        self.total += other.total;
        for (reason, n) in &other.by_reason {
            *self.by_reason.entry(*reason).or_insert(0) += *n;
        }
    }
}

// ── Field extraction ──────────────────────────────────────────────────────────

/// `true` when `event` opens a `Record` whose `type` equals `identifier`.
pub fn matches_metric(event: &ElementEvent, identifier: &str) -> bool {
    event.opens() && event.name == RECORD_TAG && event.attr("type") == Some(identifier)
}

/// Pull the typed fields out of a `Record` element.
///
/// `value` and `startDate` are mandatory. A missing `endDate` makes the
/// record instantaneous.
pub fn extract_raw(event: &ElementEvent) -> std::result::Result<RawRecord, RecordSkipped> {
    let metric_type = event
        .attr("type")
        .ok_or(RecordSkipped::MissingAttribute("type"))?;
    let value = event
        .attr("value")
        .ok_or(RecordSkipped::MissingAttribute("value"))?;
    let start_raw = event
        .attr("startDate")
        .ok_or(RecordSkipped::MissingAttribute("startDate"))?;

    let start_time = parse_timestamp(start_raw)
        .ok_or_else(|| RecordSkipped::InvalidTimestamp(start_raw.to_string()))?;
    let end_time = match event.attr("endDate") {
        Some(end_raw) => parse_timestamp(end_raw)
            .ok_or_else(|| RecordSkipped::InvalidTimestamp(end_raw.to_string()))?,
        None => start_time,
    };
    if end_time < start_time {
        return Err(RecordSkipped::EndBeforeStart);
    }

    Ok(RawRecord {
        metric_type: metric_type.to_string(),
        source_label: event
            .attr("sourceName")
            .unwrap_or(UNKNOWN_SOURCE)
            .to_string(),
        unit: event.attr("unit").map(str::to_string),
        value: value.to_string(),
        start_time,
        end_time,
    })
}

/// Coerce a raw record's value for `metric`.
pub fn normalize(
    raw: RawRecord,
    metric: MetricKind,
) -> std::result::Result<NormalizedRecord, RecordSkipped> {
    let value = if metric.is_interval() {
        MetricValue::Category(SleepCategory::from_raw(&raw.value))
    } else {
        MetricValue::Quantity(metric.coerce_quantity(&raw.value, raw.unit.as_deref())?)
    };

    Ok(NormalizedRecord {
        source_label: raw.source_label,
        value,
        start_time: raw.start_time,
        end_time: raw.end_time,
    })
}

// ── RecordClassifier ──────────────────────────────────────────────────────────

/// Lazy adapter from element events to normalized records of one metric.
///
/// Fatal stream errors are passed through; per-record problems are absorbed
/// into [`RecordClassifier::skipped`].
pub struct RecordClassifier<I> {
    events: I,
    metric: MetricKind,
    matched: u64,
    skipped: SkipCounter,
}

impl<I> RecordClassifier<I>
where
    I: Iterator<Item = Result<ElementEvent>>,
{
    pub fn new(events: I, metric: MetricKind) -> Self {
        Self {
            events,
            metric,
            matched: 0,
            skipped: SkipCounter::default(),
        }
    }

    /// Records whose type matched, including skipped ones.
    pub fn matched(&self) -> u64 {
        self.matched
    }

    pub fn skipped(&self) -> &SkipCounter {
        &self.skipped
    }

    /// Give back the underlying event stream.
    pub fn into_inner(self) -> I {
        self.events
    }
}

impl<I> Iterator for RecordClassifier<I>
where
    I: Iterator<Item = Result<ElementEvent>>,
{
    type Item = Result<NormalizedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let event = match self.events.next()? {
                Ok(ev) => ev,
                Err(e) => return Some(Err(e)),
            };
            if !matches_metric(&event, self.metric.identifier()) {
                continue;
            }
            self.matched += 1;

            match extract_raw(&event).and_then(|raw| normalize(raw, self.metric)) {
                Ok(record) => return Some(Ok(record)),
                Err(skip) => {
                    debug!("Skipping record at byte {}: {}", event.offset, skip);
                    self.skipped.record(&skip);
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
