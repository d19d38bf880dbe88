mod bootstrap;

use std::sync::Arc;

use anyhow::Result;
use health_core::settings::Settings;
use health_data::pipeline::run_extraction;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load_from_args(std::env::args_os().collect());

    bootstrap::setup_logging(&settings.log_level)?;

    tracing::info!("health-extract v{} starting", env!("CARGO_PKG_VERSION"));

    let metrics = settings.resolve_metrics()?;
    let config = Arc::new(settings.extraction_config()?);
    bootstrap::ensure_output_dir(&settings.output_dir)?;

    tracing::info!(
        "Source: {}, output: {}, metrics: {}",
        settings.source.display(),
        settings.output_dir.display(),
        metrics
            .iter()
            .map(|m| m.alias())
            .collect::<Vec<_>>()
            .join(", ")
    );

    // Each metric gets its own pass over the export on the blocking pool.
    let mut handles = Vec::with_capacity(metrics.len());
    for metric in metrics {
        let source = settings.source.clone();
        let output_dir = settings.output_dir.clone();
        let config = Arc::clone(&config);
        let handle = tokio::task::spawn_blocking(move || {
            run_extraction(&source, metric, &config, &output_dir)
        });
        handles.push((metric, handle));
    }

    let total = handles.len();
    let mut failures = 0usize;
    for (metric, handle) in handles {
        match handle.await {
            Ok(Ok((result, path))) => {
                tracing::info!(
                    "{} -> {} ({} records, {} skipped)",
                    metric.alias(),
                    path.display(),
                    result.stats.records_aggregated,
                    result.stats.skipped.total()
                );
            }
            Ok(Err(e)) => {
                tracing::error!("{} failed: {}", metric.alias(), e);
                failures += 1;
            }
            Err(e) => {
                tracing::error!("{} task panicked: {}", metric.alias(), e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} extractions failed", failures, total);
    }
    tracing::info!("All {} extractions complete", total);
    Ok(())
}
