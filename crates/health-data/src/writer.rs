//! Output documents.
//!
//! One JSON document per metric, written through a temp file in the target
//! directory and renamed into place so readers never see a partial file.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use health_core::error::{HealthError, Result};
use health_core::metrics::{MetricKind, SleepCategory};
use health_core::models::{
    Bucket, HistogramBin, Percentiles, SeriesPoint, SummaryStatistics, ThresholdCount,
    TimeSeries,
};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::info;

/// Round `value` to `places` decimal places.
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}

// ── Schema ────────────────────────────────────────────────────────────────────

/// One bucket as written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketEntry {
    /// `YYYY-MM-DD`, `YYYY-MM` or `YYYY`.
    pub date: String,
    pub value: f64,
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_asleep: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub categories: BTreeMap<SleepCategory, f64>,
    /// Source labels that contributed to the bucket.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub sources: BTreeSet<String>,
}

impl BucketEntry {
    fn from_bucket(bucket: &Bucket, places: u32) -> Self {
        let r = |v: f64| round_to(v, places);
        Self {
            date: bucket.key.clone(),
            value: r(bucket.value),
            count: bucket.count,
            min: bucket.min.map(r),
            max: bucket.max.map(r),
            time_asleep: bucket.time_asleep.map(r),
            categories: bucket
                .categories
                .iter()
                .map(|(c, m)| (*c, r(*m)))
                .collect(),
            sources: bucket.sources.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub mean: f64,
    pub total: f64,
    pub min: f64,
    pub max: f64,
    pub days_recorded: u64,
    pub min_date: Option<String>,
    pub max_date: Option<String>,
    pub histogram: Vec<HistogramBin>,
    pub percentiles: Percentiles,
    /// Days at or above each daily goal of the metric.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub thresholds: Vec<ThresholdCount>,
}

/// The per-metric document consumed by charting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDocument {
    pub metric: String,
    pub unit: String,
    pub daily: Vec<BucketEntry>,
    pub monthly: Vec<BucketEntry>,
    pub yearly: Vec<BucketEntry>,
    pub rolling_average: Vec<SeriesPoint>,
    pub cumulative: Vec<SeriesPoint>,
    pub summary: SummaryEntry,
    pub skipped_count: u64,
}

/// Inputs of an [`OutputDocument`] before rounding.
pub struct DocumentParts<'a> {
    pub metric: MetricKind,
    pub daily: Option<&'a TimeSeries>,
    pub monthly: Option<&'a TimeSeries>,
    pub yearly: Option<&'a TimeSeries>,
    pub rolling_average: &'a [SeriesPoint],
    pub cumulative: &'a [SeriesPoint],
    pub summary: &'a SummaryStatistics,
    pub skipped_count: u64,
}

impl OutputDocument {
    /// Assemble the document, rounding every number to `places`. A `None`
    /// series is written as an empty array.
    pub fn build(parts: DocumentParts<'_>, places: u32) -> Self {
        let r = |v: f64| round_to(v, places);
        let entries = |series: Option<&TimeSeries>| -> Vec<BucketEntry> {
            series
                .map(|s| {
                    s.buckets
                        .iter()
                        .map(|b| BucketEntry::from_bucket(b, places))
                        .collect()
                })
                .unwrap_or_default()
        };
        let points = |series: &[SeriesPoint]| -> Vec<SeriesPoint> {
            series
                .iter()
                .map(|p| SeriesPoint {
                    date: p.date.clone(),
                    value: r(p.value),
                })
                .collect()
        };

        let summary = parts.summary;
        Self {
            metric: parts.metric.identifier().to_string(),
            unit: parts.metric.canonical_unit().to_string(),
            daily: entries(parts.daily),
            monthly: entries(parts.monthly),
            yearly: entries(parts.yearly),
            rolling_average: points(parts.rolling_average),
            cumulative: points(parts.cumulative),
            summary: SummaryEntry {
                mean: r(summary.mean),
                total: r(summary.total),
                min: r(summary.min),
                max: r(summary.max),
                days_recorded: summary.days_recorded,
                min_date: summary.min_date.clone(),
                max_date: summary.max_date.clone(),
                histogram: summary
                    .histogram
                    .iter()
                    .map(|b| HistogramBin {
                        bin_start: r(b.bin_start),
                        bin_end: r(b.bin_end),
                        count: b.count,
                    })
                    .collect(),
                percentiles: Percentiles {
                    p10: r(summary.percentiles.p10),
                    median: r(summary.percentiles.median),
                    p90: r(summary.percentiles.p90),
                },
                thresholds: summary.thresholds.clone(),
            },
            skipped_count: parts.skipped_count,
        }
    }
}

// ── Writing ───────────────────────────────────────────────────────────────────

/// Path of `metric`'s document inside `output_dir`.
pub fn output_path(output_dir: &Path, metric: MetricKind) -> PathBuf {
    output_dir.join(format!("{}.json", metric.slug()))
}

/// Serialize `document` to `path` atomically, creating parent directories.
pub fn write_document(document: &OutputDocument, path: &Path) -> Result<()> {
    let body = serde_json::to_vec_pretty(document)?;
    write_atomic(path, &body)?;
    info!(
        "Wrote {} ({} daily buckets, {} skipped)",
        path.display(),
        document.daily.len(),
        document.skipped_count
    );
    Ok(())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let write_err = |source: std::io::Error| HealthError::Write {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(write_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
