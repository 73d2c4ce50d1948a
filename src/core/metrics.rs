use serde::Serialize;

use super::engine::percentile;
use super::types::TerminalDistribution;

/// Bin count used for terminal-balance histograms.
pub const DEFAULT_HISTOGRAM_BINS: usize = 60;

/// Largest bin count a projection request may ask for.
pub const MAX_HISTOGRAM_BINS: usize = 1_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSummary {
    pub median: f64,
    pub p5: f64,
    pub p95: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl TerminalSummary {
    /// Width of the 5th–95th percentile band.
    pub fn spread(&self) -> f64 {
        self.p95 - self.p5
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u32,
    pub frequency: f64,
}

/// Compound annual growth rate from `start_value` to `end_value`.
///
/// `None` when either value or the horizon is non-positive; a median terminal
/// balance at or below zero is an expected outcome under the normal model.
pub fn cagr(start_value: f64, end_value: f64, years: f64) -> Option<f64> {
    if !(start_value > 0.0 && end_value > 0.0 && years > 0.0) {
        return None;
    }
    let rate = (end_value / start_value).powf(1.0 / years) - 1.0;
    rate.is_finite().then_some(rate)
}

pub fn summarize_terminal(terminal: &TerminalDistribution) -> Option<TerminalSummary> {
    let values = terminal.values();
    if values.is_empty() {
        return None;
    }

    let mut scratch = values.to_vec();
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;

    Some(TerminalSummary {
        median: percentile(&mut scratch, 50.0),
        p5: percentile(&mut scratch, 5.0),
        p95: percentile(&mut scratch, 95.0),
        mean,
        min,
        max,
    })
}

/// Equal-width bins between min and max; the last bin is closed on the right.
pub fn histogram(values: &[f64], num_bins: usize) -> Vec<HistogramBin> {
    if values.is_empty() || num_bins == 0 {
        return Vec::new();
    }

    let min_val = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max_val = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let n = values.len() as f64;

    if max_val - min_val <= 0.0 || !(max_val - min_val).is_finite() {
        return vec![HistogramBin {
            lower: min_val,
            upper: max_val,
            count: values.len() as u32,
            frequency: 1.0,
        }];
    }

    let bin_width = (max_val - min_val) / num_bins as f64;
    let mut bins: Vec<HistogramBin> = (0..num_bins)
        .map(|i| HistogramBin {
            lower: min_val + i as f64 * bin_width,
            upper: if i == num_bins - 1 {
                max_val
            } else {
                min_val + (i + 1) as f64 * bin_width
            },
            count: 0,
            frequency: 0.0,
        })
        .collect();

    for &val in values {
        let idx = (((val - min_val) / bin_width).floor() as usize).min(num_bins - 1);
        bins[idx].count += 1;
    }

    for bin in &mut bins {
        bin.frequency = f64::from(bin.count) / n;
    }
    bins
}
