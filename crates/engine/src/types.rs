//! Types for the regime analysis engine
//!
//! Timestamps are epoch milliseconds throughout.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{AnalysisError, EngineResult};

/// A single OHLCV bar. Volume may be missing on ingest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: Option<f64>,
}

/// A stored bar before validation; any column may be absent
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RawBar {
    pub timestamp: i64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

impl RawBar {
    /// Promote to a [`PriceBar`] when all four OHLC fields are present
    pub fn complete(&self) -> Option<PriceBar> {
        Some(PriceBar {
            timestamp: self.timestamp,
            open: self.open?,
            high: self.high?,
            low: self.low?,
            close: self.close?,
            volume: self.volume,
        })
    }
}

/// A point on the equity curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub value: f64,
}

/// Price input columns an indicator can require
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceColumn {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl PriceColumn {
    pub const OHLC: [PriceColumn; 4] = [
        PriceColumn::Open,
        PriceColumn::High,
        PriceColumn::Low,
        PriceColumn::Close,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PriceColumn::Open => "open",
            PriceColumn::High => "high",
            PriceColumn::Low => "low",
            PriceColumn::Close => "close",
            PriceColumn::Volume => "volume",
        }
    }
}

impl fmt::Display for PriceColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Columnar OHLCV price series. A column is `None` when the source lacks it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceFrame {
    timestamps: Vec<i64>,
    open: Option<Vec<f64>>,
    high: Option<Vec<f64>>,
    low: Option<Vec<f64>>,
    close: Option<Vec<f64>>,
    volume: Option<Vec<f64>>,
}

impl PriceFrame {
    /// Build from complete bars. Bars are sorted and duplicate timestamps dropped;
    /// the volume column exists only if every bar carries one.
    pub fn from_bars(bars: &[PriceBar]) -> Self {
        let mut bars = bars.to_vec();
        bars.sort_by_key(|b| b.timestamp);
        bars.dedup_by_key(|b| b.timestamp);

        let volume = if !bars.is_empty() && bars.iter().all(|b| b.volume.is_some()) {
            Some(bars.iter().map(|b| b.volume.unwrap_or_default()).collect())
        } else {
            None
        };

        Self {
            timestamps: bars.iter().map(|b| b.timestamp).collect(),
            open: Some(bars.iter().map(|b| b.open).collect()),
            high: Some(bars.iter().map(|b| b.high).collect()),
            low: Some(bars.iter().map(|b| b.low).collect()),
            close: Some(bars.iter().map(|b| b.close).collect()),
            volume,
        }
    }

    /// Build from explicit columns. Every present column must match `timestamps` in length.
    pub fn from_columns(
        timestamps: Vec<i64>,
        open: Option<Vec<f64>>,
        high: Option<Vec<f64>>,
        low: Option<Vec<f64>>,
        close: Option<Vec<f64>>,
        volume: Option<Vec<f64>>,
    ) -> EngineResult<Self> {
        let n = timestamps.len();
        for (column, values) in [
            (PriceColumn::Open, &open),
            (PriceColumn::High, &high),
            (PriceColumn::Low, &low),
            (PriceColumn::Close, &close),
            (PriceColumn::Volume, &volume),
        ] {
            if let Some(values) = values {
                if values.len() != n {
                    return Err(AnalysisError::validation(format!(
                        "column '{}' has {} rows, expected {}",
                        column,
                        values.len(),
                        n
                    )));
                }
            }
        }
        if timestamps.windows(2).any(|w| w[0] >= w[1]) {
            return Err(AnalysisError::validation(
                "price timestamps must be strictly increasing",
            ));
        }
        Ok(Self {
            timestamps,
            open,
            high,
            low,
            close,
            volume,
        })
    }

    /// Replace the volume column
    pub fn with_volume(mut self, volume: Vec<f64>) -> EngineResult<Self> {
        if volume.len() != self.timestamps.len() {
            return Err(AnalysisError::validation(format!(
                "volume has {} rows, expected {}",
                volume.len(),
                self.timestamps.len()
            )));
        }
        self.volume = Some(volume);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn column(&self, column: PriceColumn) -> Option<&[f64]> {
        match column {
            PriceColumn::Open => self.open.as_deref(),
            PriceColumn::High => self.high.as_deref(),
            PriceColumn::Low => self.low.as_deref(),
            PriceColumn::Close => self.close.as_deref(),
            PriceColumn::Volume => self.volume.as_deref(),
        }
    }

    pub fn has(&self, column: PriceColumn) -> bool {
        self.column(column).is_some()
    }

    /// The set of columns present in this frame
    pub fn columns(&self) -> BTreeSet<PriceColumn> {
        [
            PriceColumn::Open,
            PriceColumn::High,
            PriceColumn::Low,
            PriceColumn::Close,
            PriceColumn::Volume,
        ]
        .into_iter()
        .filter(|c| self.has(*c))
        .collect()
    }

    /// Column lookup that reports which indicator needed it when absent
    pub fn require(&self, column: PriceColumn, indicator: &str) -> EngineResult<&[f64]> {
        self.column(column)
            .ok_or_else(|| AnalysisError::missing_column(indicator, column))
    }

    /// Check a whole column contract at once
    pub fn require_all(&self, columns: &[PriceColumn], indicator: &str) -> EngineResult<()> {
        for column in columns {
            self.require(*column, indicator)?;
        }
        Ok(())
    }

    /// Median spacing between consecutive bars
    pub fn sampling_interval_ms(&self) -> Option<i64> {
        median_interval(&self.timestamps)
    }
}

/// Median positive spacing of a sorted timestamp list
pub fn median_interval(timestamps: &[i64]) -> Option<i64> {
    let mut gaps: Vec<i64> = timestamps
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| *d > 0)
        .collect();
    if gaps.is_empty() {
        return None;
    }
    gaps.sort_unstable();
    Some(gaps[gaps.len() / 2])
}

/// Where a series came from. Synthetic series record the seed that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeriesOrigin {
    /// Calculated in-process from a price series
    Computed,
    /// Read back from the run store
    Precomputed,
    /// Retrieved from a network source
    Live { source: String },
    /// Generated by the seeded fallback generator
    Synthetic { seed: u64 },
}

impl SeriesOrigin {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, SeriesOrigin::Synthetic { .. })
    }

    pub fn is_live(&self) -> bool {
        matches!(self, SeriesOrigin::Live { .. })
    }
}

/// An independently timestamped indicator series.
///
/// The primary output is always `values`; auxiliary columns ride along in `aux`
/// with the same length and ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSeries {
    pub name: String,
    pub timestamps: Vec<i64>,
    pub values: Vec<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aux: BTreeMap<String, Vec<f64>>,
    pub origin: SeriesOrigin,
}

impl IndicatorSeries {
    /// Build from `(timestamp, value)` pairs. Non-finite values are dropped and
    /// the result is sorted by timestamp with duplicates removed.
    pub fn from_points(
        name: impl Into<String>,
        origin: SeriesOrigin,
        points: impl IntoIterator<Item = (i64, f64)>,
    ) -> Self {
        let mut builder = SeriesBuilder::new(name);
        for (ts, value) in points {
            builder.push(ts, value, &[]);
        }
        builder.finish(origin)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = (i64, f64)> + '_ {
        self.timestamps.iter().copied().zip(self.values.iter().copied())
    }

    pub fn aux_column(&self, key: &str) -> Option<&[f64]> {
        self.aux.get(key).map(Vec::as_slice)
    }

    pub fn is_sorted(&self) -> bool {
        self.timestamps.windows(2).all(|w| w[0] < w[1])
    }
}

/// Row-wise accumulator for indicator output with optional auxiliary columns
pub struct SeriesBuilder {
    name: String,
    aux_keys: Vec<&'static str>,
    rows: Vec<(i64, f64, Vec<f64>)>,
}

impl SeriesBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aux_keys: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn with_aux(mut self, keys: &[&'static str]) -> Self {
        self.aux_keys = keys.to_vec();
        self
    }

    /// Append a row; rows with a non-finite primary value are skipped
    pub fn push(&mut self, timestamp: i64, value: f64, aux: &[f64]) {
        if !value.is_finite() {
            return;
        }
        debug_assert_eq!(aux.len(), self.aux_keys.len());
        self.rows.push((timestamp, value, aux.to_vec()));
    }

    pub fn finish(mut self, origin: SeriesOrigin) -> IndicatorSeries {
        self.rows.sort_by_key(|(ts, _, _)| *ts);
        self.rows.dedup_by_key(|(ts, _, _)| *ts);

        let mut aux: BTreeMap<String, Vec<f64>> = self
            .aux_keys
            .iter()
            .map(|k| (k.to_string(), Vec::with_capacity(self.rows.len())))
            .collect();
        let mut timestamps = Vec::with_capacity(self.rows.len());
        let mut values = Vec::with_capacity(self.rows.len());

        for (ts, value, extra) in self.rows {
            timestamps.push(ts);
            values.push(value);
            for (key, x) in self.aux_keys.iter().zip(extra) {
                if let Some(column) = aux.get_mut(*key) {
                    column.push(x);
                }
            }
        }

        IndicatorSeries {
            name: self.name,
            timestamps,
            values,
            aux,
            origin,
        }
    }
}

/// Which externally sourced indicator subset a session loads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisContext {
    /// Sentiment and dominance style signals
    Crypto,
    /// Volatility index, yield and put/call style signals
    Index,
    /// No external signals
    #[default]
    Neutral,
}

impl AnalysisContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisContext::Crypto => "crypto",
            AnalysisContext::Index => "index",
            AnalysisContext::Neutral => "neutral",
        }
    }
}

impl fmt::Display for AnalysisContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisContext {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "crypto" | "btc" | "digital" => Ok(AnalysisContext::Crypto),
            "index" | "indices" | "equity" | "stocks" => Ok(AnalysisContext::Index),
            "" | "none" | "neutral" => Ok(AnalysisContext::Neutral),
            other => Err(AnalysisError::validation(format!(
                "unknown analysis context '{other}' (expected crypto, index or none)"
            ))),
        }
    }
}

/// A validated run identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId(String);

impl RunId {
    const MAX_LEN: usize = 128;

    /// Accepts ASCII letters, digits, `-`, `_` and `.`; rejects empty, over-long
    /// and dot-only identifiers.
    pub fn parse(raw: &str) -> EngineResult<Self> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(AnalysisError::validation("run identifier is empty"));
        }
        if id.len() > Self::MAX_LEN {
            return Err(AnalysisError::validation(format!(
                "run identifier longer than {} characters",
                Self::MAX_LEN
            )));
        }
        if id.chars().all(|c| c == '.') {
            return Err(AnalysisError::validation(format!(
                "malformed run identifier '{id}'"
            )));
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(AnalysisError::validation(format!(
                "malformed run identifier '{id}': invalid character '{bad}'"
            )));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RunId {
    type Error = AnalysisError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RunId::parse(&value)
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.0
    }
}

/// Non-fatal degraded-mode notice: something was missing and a fallback was used
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedWarning {
    /// What was affected (indicator name, "price_series", ...)
    pub subject: String,
    pub reason: String,
    /// The fallback applied, if any
    pub fallback: Option<String>,
}

impl DegradedWarning {
    pub fn skipped(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            reason: reason.into(),
            fallback: None,
        }
    }

    pub fn fallback(
        subject: impl Into<String>,
        reason: impl Into<String>,
        fallback: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            reason: reason.into(),
            fallback: Some(fallback.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_frame_drops_volume_when_any_bar_lacks_it() {
        let bars = vec![
            PriceBar { timestamp: 2, open: 1.0, high: 2.0, low: 0.5, close: 1.5, volume: Some(10.0) },
            PriceBar { timestamp: 1, open: 1.0, high: 2.0, low: 0.5, close: 1.5, volume: None },
        ];
        let frame = PriceFrame::from_bars(&bars);
        assert_eq!(frame.timestamps(), &[1, 2]);
        assert!(!frame.has(PriceColumn::Volume));
        assert!(frame.has(PriceColumn::Close));

        let err = frame.require(PriceColumn::Volume, "volume_ma_ratio").unwrap_err();
        assert!(matches!(err, AnalysisError::MissingColumn { column: PriceColumn::Volume, .. }));
    }

    #[test]
    fn test_series_builder_sorts_and_skips_non_finite() {
        let mut builder = SeriesBuilder::new("x").with_aux(&["extra"]);
        builder.push(30, 3.0, &[0.3]);
        builder.push(10, 1.0, &[0.1]);
        builder.push(20, f64::NAN, &[0.2]);
        let series = builder.finish(SeriesOrigin::Computed);

        assert_eq!(series.timestamps, vec![10, 30]);
        assert_eq!(series.values, vec![1.0, 3.0]);
        assert_eq!(series.aux_column("extra"), Some(&[0.1, 0.3][..]));
        assert!(series.is_sorted());
    }

    #[test]
    fn test_run_id_validation() {
        assert!(RunId::parse("run_2024-01.a").is_ok());
        assert!(RunId::parse("").is_err());
        assert!(RunId::parse("..").is_err());
        assert!(RunId::parse("../etc/passwd").is_err());
        assert!(RunId::parse("has space").is_err());
    }

    #[test]
    fn test_context_parsing() {
        assert_eq!("Crypto".parse::<AnalysisContext>().unwrap(), AnalysisContext::Crypto);
        assert_eq!("indices".parse::<AnalysisContext>().unwrap(), AnalysisContext::Index);
        assert_eq!("".parse::<AnalysisContext>().unwrap(), AnalysisContext::Neutral);
        assert!("forex".parse::<AnalysisContext>().is_err());
    }

    #[test]
    fn test_median_interval() {
        assert_eq!(median_interval(&[0, 60, 120, 300]), Some(60));
        assert_eq!(median_interval(&[5]), None);
    }
}
