//! Regime analysis: return statistics bucketed by an indicator's value
//!
//! [`analyze`] splits the feature range into bins and reports per-bin return
//! statistics. [`continuous`] returns the raw feature/return pairs with their
//! correlation, and [`summarize`] reports overall statistics plus a quartile
//! breakdown. All three use only rows where both the feature and the return
//! are defined.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AnalysisError, EngineResult};
use crate::stats;

/// Aligned columns an analysis reads
#[derive(Debug, Clone, Copy)]
pub struct RegimeInput<'a> {
    pub timestamps: &'a [i64],
    pub equity: &'a [f64],
    pub feature_name: &'a str,
    pub feature: &'a [Option<f64>],
    pub return_name: &'a str,
    pub returns: &'a [Option<f64>],
}

/// One usable row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairedPoint {
    pub timestamp: i64,
    pub equity_value: f64,
    pub feature_value: f64,
    pub return_value: f64,
}

impl RegimeInput<'_> {
    /// Rows where feature and return are both defined and finite
    pub fn paired(&self) -> Vec<PairedPoint> {
        self.timestamps
            .iter()
            .zip(self.equity)
            .zip(self.feature.iter().zip(self.returns))
            .filter_map(|((ts, eq), (f, r))| match (f, r) {
                (Some(f), Some(r)) if f.is_finite() && r.is_finite() => Some(PairedPoint {
                    timestamp: *ts,
                    equity_value: *eq,
                    feature_value: *f,
                    return_value: *r,
                }),
                _ => None,
            })
            .collect()
    }
}

/// A result, or an explicit marker that no rows were usable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegimeOutcome<T> {
    Ready(T),
    NoData(NoData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoData {
    pub feature: String,
    pub return_column: String,
    pub reason: String,
}

impl<T> RegimeOutcome<T> {
    fn no_data(input: &RegimeInput<'_>) -> Self {
        RegimeOutcome::NoData(NoData {
            feature: input.feature_name.to_string(),
            return_column: input.return_name.to_string(),
            reason: "no rows where both the feature and the return are defined".to_string(),
        })
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, RegimeOutcome::NoData(_))
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            RegimeOutcome::Ready(v) => Some(v),
            RegimeOutcome::NoData(_) => None,
        }
    }

    pub fn into_ready(self) -> Option<T> {
        match self {
            RegimeOutcome::Ready(v) => Some(v),
            RegimeOutcome::NoData(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

// ============================================================================
// Binned analysis
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucketing {
    EqualWidth,
    /// Used when the feature is constant or has fewer distinct values than bins
    Quantile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinRange {
    pub bin_id: usize,
    pub range_start: f64,
    pub range_end: f64,
    pub range_label: String,
    /// Bin exists only to keep the requested count; no edges were left for it
    pub collapsed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinStatistics {
    pub bin_id: usize,
    pub count: usize,
    pub return_mean: Option<f64>,
    pub return_std: Option<f64>,
    pub sharpe_like: f64,
    pub win_rate: f64,
    pub feature_min: Option<f64>,
    pub feature_max: Option<f64>,
    pub feature_mean: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubsetRow {
    pub timestamp: i64,
    pub equity_value: f64,
    pub feature_value: f64,
    pub return_value: f64,
    pub bin_id: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub feature: String,
    pub return_column: String,
    pub n_bins: usize,
    pub effective_bins: usize,
    pub bucketing: Bucketing,
    pub feature_range: ValueRange,
    pub total_observations: usize,
    pub bin_ranges: Vec<BinRange>,
    pub bin_statistics: Vec<BinStatistics>,
    pub raw_merged_subset: Vec<SubsetRow>,
}

/// Largest bin count a request may ask for
pub const MAX_BINS: usize = 1_000;

fn range_label(start: f64, end: f64) -> String {
    format!("[{start:.4}, {end:.4}]")
}

/// Bin edges for the observed feature values (ascending, at least two)
fn plan_edges(sorted: &[f64], n_bins: usize) -> (Vec<f64>, Bucketing) {
    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    let mut distinct = sorted.to_vec();
    distinct.dedup();

    if min < max && distinct.len() >= n_bins {
        return (stats::linspace(min, max, n_bins), Bucketing::EqualWidth);
    }

    let target = n_bins.min(distinct.len()).max(1);
    let mut edges: Vec<f64> = (0..=target)
        .filter_map(|i| stats::percentile(sorted, i as f64 * 100.0 / target as f64))
        .collect();
    edges.dedup();
    if edges.len() < 2 {
        edges = vec![min, max];
    }
    (edges, Bucketing::Quantile)
}

/// Bin index of `x`: count of interior edges at or below it, clipped to the last bin
fn assign_bin(x: f64, edges: &[f64]) -> usize {
    let effective = edges.len() - 1;
    let interior = &edges[1..effective];
    interior.partition_point(|e| *e <= x).min(effective - 1)
}

/// Bucket rows by feature value and report per-bin return statistics.
/// Always reports `n_bins` ranges; bins without observations carry null
/// statistics and zero sharpe/win rate.
pub fn analyze(input: &RegimeInput<'_>, n_bins: usize) -> EngineResult<RegimeOutcome<AnalysisResult>> {
    if !(2..=MAX_BINS).contains(&n_bins) {
        return Err(AnalysisError::validation(format!(
            "n_bins must be between 2 and {MAX_BINS}, got {n_bins}"
        )));
    }

    let rows = input.paired();
    if rows.is_empty() {
        return Ok(RegimeOutcome::no_data(input));
    }

    let features: Vec<f64> = rows.iter().map(|r| r.feature_value).collect();
    let sorted = stats::sorted_finite(&features);
    let (edges, bucketing) = plan_edges(&sorted, n_bins);
    let effective_bins = edges.len() - 1;
    let last_edge = edges[effective_bins];

    let bin_ranges: Vec<BinRange> = (0..n_bins)
        .map(|bin_id| {
            let (start, end, collapsed) = if bin_id < effective_bins {
                (edges[bin_id], edges[bin_id + 1], false)
            } else {
                (last_edge, last_edge, true)
            };
            BinRange {
                bin_id,
                range_start: start,
                range_end: end,
                range_label: range_label(start, end),
                collapsed,
            }
        })
        .collect();

    let subset: Vec<SubsetRow> = rows
        .iter()
        .map(|r| SubsetRow {
            timestamp: r.timestamp,
            equity_value: r.equity_value,
            feature_value: r.feature_value,
            return_value: r.return_value,
            bin_id: assign_bin(r.feature_value, &edges),
        })
        .collect();

    let bin_statistics: Vec<BinStatistics> = (0..n_bins)
        .map(|bin_id| {
            let returns: Vec<f64> = subset
                .iter()
                .filter(|r| r.bin_id == bin_id)
                .map(|r| r.return_value)
                .collect();
            let feature_values: Vec<f64> = subset
                .iter()
                .filter(|r| r.bin_id == bin_id)
                .map(|r| r.feature_value)
                .collect();
            let mean = stats::mean(&returns);
            let std = stats::sample_std(&returns);
            let feature_bounds = stats::min_max(&feature_values);
            BinStatistics {
                bin_id,
                count: returns.len(),
                return_mean: mean,
                return_std: std,
                sharpe_like: stats::sharpe_like(mean, std),
                win_rate: stats::win_rate(&returns),
                feature_min: feature_bounds.map(|(lo, _)| lo),
                feature_max: feature_bounds.map(|(_, hi)| hi),
                feature_mean: stats::mean(&feature_values),
            }
        })
        .collect();

    debug!(
        feature = input.feature_name,
        returns = input.return_name,
        n_bins,
        effective_bins,
        rows = subset.len(),
        "Regime analysis complete"
    );

    Ok(RegimeOutcome::Ready(AnalysisResult {
        feature: input.feature_name.to_string(),
        return_column: input.return_name.to_string(),
        n_bins,
        effective_bins,
        bucketing,
        feature_range: ValueRange {
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        },
        total_observations: subset.len(),
        bin_ranges,
        bin_statistics,
        raw_merged_subset: subset,
    }))
}

// ============================================================================
// Continuous
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousResult {
    pub feature: String,
    pub return_column: String,
    pub total_observations: usize,
    /// Pearson correlation; null below two points or for a constant side
    pub correlation: Option<f64>,
    pub points: Vec<PairedPoint>,
}

pub fn continuous(input: &RegimeInput<'_>) -> RegimeOutcome<ContinuousResult> {
    let points = input.paired();
    if points.is_empty() {
        return RegimeOutcome::no_data(input);
    }
    let xs: Vec<f64> = points.iter().map(|p| p.feature_value).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.return_value).collect();

    RegimeOutcome::Ready(ContinuousResult {
        feature: input.feature_name.to_string(),
        return_column: input.return_name.to_string(),
        total_observations: points.len(),
        correlation: stats::pearson(&xs, &ys),
        points,
    })
}

// ============================================================================
// Summary
// ============================================================================

pub const QUARTILE_LABELS: [&str; 4] = ["Q1 (Low)", "Q2", "Q3", "Q4 (High)"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuartileBucket {
    pub label: String,
    /// Exclusive lower edge; null for the first quartile
    pub lower: Option<f64>,
    /// Inclusive upper edge; null for the last quartile
    pub upper: Option<f64>,
    pub count: usize,
    pub mean_return: Option<f64>,
    pub win_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub feature: String,
    pub return_column: String,
    pub total_observations: usize,
    pub correlation: Option<f64>,
    pub mean_return: Option<f64>,
    pub std_return: Option<f64>,
    pub sharpe_ratio: f64,
    pub win_rate: f64,
    pub feature_range: ValueRange,
    pub return_range: ValueRange,
    /// 25th, 50th and 75th feature percentiles
    pub quartile_edges: [f64; 3],
    pub quartile_performance: Vec<QuartileBucket>,
}

/// Overall statistics and quartile buckets: Q1 <= p25 < Q2 <= p50 < Q3 <= p75 < Q4
pub fn summarize(input: &RegimeInput<'_>) -> RegimeOutcome<PerformanceSummary> {
    let points = input.paired();
    if points.is_empty() {
        return RegimeOutcome::no_data(input);
    }
    let xs: Vec<f64> = points.iter().map(|p| p.feature_value).collect();
    let ys: Vec<f64> = points.iter().map(|p| p.return_value).collect();
    let sorted = stats::sorted_finite(&xs);

    let pct = |q: f64| stats::percentile(&sorted, q).unwrap_or(sorted[0]);
    let edges = [pct(25.0), pct(50.0), pct(75.0)];

    let quartile_of = |x: f64| -> usize {
        if x <= edges[0] {
            0
        } else if x <= edges[1] {
            1
        } else if x <= edges[2] {
            2
        } else {
            3
        }
    };

    let quartile_performance = (0..4)
        .map(|q| {
            let returns: Vec<f64> = points
                .iter()
                .filter(|p| quartile_of(p.feature_value) == q)
                .map(|p| p.return_value)
                .collect();
            QuartileBucket {
                label: QUARTILE_LABELS[q].to_string(),
                lower: (q > 0).then(|| edges[q - 1]),
                upper: (q < 3).then(|| edges[q]),
                count: returns.len(),
                mean_return: stats::mean(&returns),
                win_rate: stats::win_rate(&returns),
            }
        })
        .collect();

    let mean = stats::mean(&ys);
    let std = stats::sample_std(&ys);
    let (fmin, fmax) = stats::min_max(&xs).unwrap_or((sorted[0], sorted[0]));
    let (rmin, rmax) = stats::min_max(&ys).unwrap_or((0.0, 0.0));

    RegimeOutcome::Ready(PerformanceSummary {
        feature: input.feature_name.to_string(),
        return_column: input.return_name.to_string(),
        total_observations: points.len(),
        correlation: stats::pearson(&xs, &ys),
        mean_return: mean,
        std_return: std,
        sharpe_ratio: stats::sharpe_like(mean, std),
        win_rate: stats::win_rate(&ys),
        feature_range: ValueRange { min: fmin, max: fmax },
        return_range: ValueRange { min: rmin, max: rmax },
        quartile_edges: edges,
        quartile_performance,
    })
}
