use crate::models::{HistogramBin, Percentiles};

// ── Percentile helper ─────────────────────────────────────────────────────────

/// Compute the `p`-th percentile of a **sorted** slice using standard linear
/// interpolation (the same algorithm used by NumPy's `percentile` function).
///
/// Returns `0.0` for an empty slice.
pub fn percentile(sorted_data: &[f64], p: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }
    let len = sorted_data.len();
    if len == 1 {
        return sorted_data[0];
    }
    let rank = (p / 100.0) * (len as f64 - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted_data[lo];
    }
    let frac = rank - lo as f64;
    sorted_data[lo] + frac * (sorted_data[hi] - sorted_data[lo])
}

/// p10 / median / p90 of an unsorted sample.
pub fn percentiles(values: &[f64]) -> Percentiles {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Percentiles {
        p10: percentile(&sorted, 10.0),
        median: percentile(&sorted, 50.0),
        p90: percentile(&sorted, 90.0),
    }
}

// ── Smoothing ─────────────────────────────────────────────────────────────────

/// Trailing moving average over `window` values.
///
/// The first `window - 1` positions average everything seen so far instead of
/// being undefined. A `window` of 0 is treated as 1.
pub fn rolling_average(values: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut running = 0.0;
    for (i, v) in values.iter().enumerate() {
        running += v;
        if i >= window {
            running -= values[i - window];
        }
        let n = (i + 1).min(window);
        out.push(running / n as f64);
    }
    out
}

/// Running total; `out[i] == values[0..=i].sum()`.
pub fn cumulative(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .scan(0.0, |acc, v| {
            *acc += v;
            Some(*acc)
        })
        .collect()
}

// ── Histogram ─────────────────────────────────────────────────────────────────

/// Fixed-bin-count histogram spanning the observed min–max of `values`.
///
/// Bins are half-open except the last, which includes the maximum. When all
/// values are equal the bins span `[min, min + 1]`. Returns no bins for an
/// empty sample.
pub fn histogram(values: &[f64], bins: usize) -> Vec<HistogramBin> {
    if values.is_empty() || bins == 0 {
        return Vec::new();
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = if max > min { max - min } else { 1.0 };
    let width = span / bins as f64;

    let mut counts = vec![0u64; bins];
    for v in values {
        let idx = (((v - min) / width).floor() as usize).min(bins - 1);
        counts[idx] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| HistogramBin {
            bin_start: min + width * i as f64,
            bin_end: if i + 1 == bins {
                min + span
            } else {
                min + width * (i + 1) as f64
            },
            count,
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
