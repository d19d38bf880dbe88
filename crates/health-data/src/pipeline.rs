//! Extraction pipeline for one metric.
//!
//! Streams the export once: reader → classifier → (reconciler) → aggregator,
//! then derives the coarser series and statistics and assembles the output
//! document.

use std::path::{Path, PathBuf};
use std::time::Instant;

use health_core::config::ExtractionConfig;
use health_core::error::Result;
use health_core::metrics::MetricKind;
use health_core::time_utils::Granularity;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::classifier::{RecordClassifier, SkipCounter};
use crate::reader::StreamReader;
use crate::reconciler::{admit, Admission, NightGroup, NightGrouper, Reconciler};
use crate::series::{cumulative_series, rollup, rolling_series, summarize};
use crate::writer::{output_path, write_document, DocumentParts, OutputDocument};

// ── Public types ──────────────────────────────────────────────────────────────

/// Counters collected during one extraction run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionStats {
    /// Start and self-closing elements read from the export.
    pub elements_scanned: u64,
    /// `Record` elements of the requested type, skipped ones included.
    pub records_matched: u64,
    /// Records or reconciled intervals that reached a bucket.
    pub records_aggregated: u64,
    pub skipped: SkipCounter,
    /// Daytime intervals dropped by the nap filter.
    pub naps_excluded: u64,
    pub nights_reconciled: u64,
    pub elapsed_seconds: f64,
}

/// The complete output of [`extract_metric`].
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub metric: MetricKind,
    pub document: OutputDocument,
    pub stats: ExtractionStats,
}

// ── Public functions ──────────────────────────────────────────────────────────

/// Run the extraction pipeline for `metric` over the export at `source`.
///
/// Fatal errors (missing or malformed source, bad configuration) abort the
/// run. Per-record problems are counted in the result's skip counter.
pub fn extract_metric(
    source: &Path,
    metric: MetricKind,
    config: &ExtractionConfig,
) -> Result<ExtractionResult> {
    let started = Instant::now();
    let clock = config.clock()?;
    let reader = StreamReader::open(source)?;
    let mut classifier = RecordClassifier::new(reader, metric);
    let mut aggregator = Aggregator::new(metric, clock);
    let mut stats = ExtractionStats::default();
    let mut skipped = SkipCounter::default();

    // ── Step 1: Stream and bucket ─────────────────────────────────────────────
    if metric.is_interval() {
        let reconciler = Reconciler::new(config);
        let mut grouper = NightGrouper::new(clock, config.night_boundary_hour);

        for record in classifier.by_ref() {
            match admit(record?, config, &clock) {
                Ok(Admission::Accepted(interval)) => {
                    if let Err(skip) = grouper.push(interval) {
                        warn!("Dropping interval: {}", skip);
                        skipped.record(&skip);
                    }
                }
                Ok(Admission::Nap) => stats.naps_excluded += 1,
                Err(skip) => {
                    debug!("Skipping interval: {}", skip);
                    skipped.record(&skip);
                }
            }
            if config.sorted_input {
                for group in grouper.drain_ready() {
                    reconcile_night(&reconciler, group, &mut aggregator, &mut stats);
                }
            }
        }
        if !config.sorted_input {
            debug!("Reconciling {} buffered nights", grouper.pending_nights());
        }
        for group in grouper.drain_all() {
            reconcile_night(&reconciler, group, &mut aggregator, &mut stats);
        }
    } else {
        for record in classifier.by_ref() {
            aggregator.add_record(&record?);
        }
    }

    stats.records_matched = classifier.matched();
    skipped.merge(classifier.skipped());
    stats.elements_scanned = classifier.into_inner().elements_read();
    stats.records_aggregated = aggregator.records();
    stats.skipped = skipped;

    // ── Step 2: Derive series ─────────────────────────────────────────────────
    let daily = aggregator.daily_series();
    let monthly = config
        .emits(Granularity::Month)
        .then(|| rollup(&daily, Granularity::Month));
    let yearly = config
        .emits(Granularity::Year)
        .then(|| rollup(&daily, Granularity::Year));
    let rolling = rolling_series(&daily, config.rolling_window_size);
    let cumulative = cumulative_series(&daily);
    let summary = summarize(&daily, config.histogram_bins, metric.day_thresholds());

    // ── Step 3: Assemble ──────────────────────────────────────────────────────
    let document = OutputDocument::build(
        DocumentParts {
            metric,
            daily: Some(&daily),
            monthly: monthly.as_ref(),
            yearly: yearly.as_ref(),
            rolling_average: &rolling,
            cumulative: &cumulative,
            summary: &summary,
            skipped_count: stats.skipped.total(),
        },
        config.output_precision,
    );

    stats.elapsed_seconds = started.elapsed().as_secs_f64();
    info!(
        "{}: {} elements scanned, {} matched, {} aggregated, {} skipped, {} naps excluded, {} nights in {:.2}s",
        metric,
        stats.elements_scanned,
        stats.records_matched,
        stats.records_aggregated,
        stats.skipped.total(),
        stats.naps_excluded,
        stats.nights_reconciled,
        stats.elapsed_seconds
    );

    Ok(ExtractionResult {
        metric,
        document,
        stats,
    })
}

/// Extract `metric` and write its document into `output_dir`.
///
/// Nothing is written when extraction fails.
pub fn run_extraction(
    source: &Path,
    metric: MetricKind,
    config: &ExtractionConfig,
    output_dir: &Path,
) -> Result<(ExtractionResult, PathBuf)> {
    let result = extract_metric(source, metric, config)?;
    let path = output_path(output_dir, metric);
    write_document(&result.document, &path)?;
    Ok((result, path))
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn reconcile_night(
    reconciler: &Reconciler<'_>,
    group: NightGroup,
    aggregator: &mut Aggregator,
    stats: &mut ExtractionStats,
) {
    let timeline = reconciler.reconcile(group.intervals);
    for interval in &timeline {
        aggregator.add_interval(group.night, interval);
    }
    stats.nights_reconciled += 1;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
