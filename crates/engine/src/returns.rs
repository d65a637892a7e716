//! Return columns derived from the equity curve
//!
//! Base columns (`equity_return`, `forward_return_1`, `forward_return_5`,
//! `cumulative_return`) are built with every merged table. Custom forward
//! horizons are computed on demand and cached per period.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::error::{AnalysisError, EngineResult};

pub const EQUITY_RETURN: &str = "equity_return";
pub const FORWARD_RETURN_1: &str = "forward_return_1";
pub const FORWARD_RETURN_5: &str = "forward_return_5";
pub const CUMULATIVE_RETURN: &str = "cumulative_return";

/// Column names every merged table reserves
pub const BASE_COLUMNS: [&str; 4] = [
    EQUITY_RETURN,
    FORWARD_RETURN_1,
    FORWARD_RETURN_5,
    CUMULATIVE_RETURN,
];

pub type ReturnValues = Arc<Vec<Option<f64>>>;

/// `target / base - 1`; undefined for a zero or non-finite base
fn relative_change(base: f64, target: f64) -> Option<f64> {
    if base == 0.0 || !base.is_finite() || !target.is_finite() {
        return None;
    }
    let r = target / base - 1.0;
    r.is_finite().then_some(r)
}

/// Period-over-period change; the first row is undefined
pub fn equity_returns(equity: &[f64]) -> Vec<Option<f64>> {
    (0..equity.len())
        .map(|i| {
            if i == 0 {
                None
            } else {
                relative_change(equity[i - 1], equity[i])
            }
        })
        .collect()
}

/// Change from row t to row t + period; the last `period` rows are undefined
pub fn forward_returns(equity: &[f64], period: usize) -> Vec<Option<f64>> {
    (0..equity.len())
        .map(|i| {
            equity
                .get(i + period)
                .and_then(|target| relative_change(equity[i], *target))
        })
        .collect()
}

/// Change since the first row
pub fn cumulative_returns(equity: &[f64]) -> Vec<Option<f64>> {
    let Some(first) = equity.first() else {
        return Vec::new();
    };
    equity.iter().map(|v| relative_change(*first, *v)).collect()
}

// ============================================================================
// Horizons
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HorizonUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    /// Raw row count
    Periods,
}

impl HorizonUnit {
    fn millis(&self) -> Option<f64> {
        match self {
            HorizonUnit::Minutes => Some(60_000.0),
            HorizonUnit::Hours => Some(3_600_000.0),
            HorizonUnit::Days => Some(86_400_000.0),
            HorizonUnit::Weeks => Some(604_800_000.0),
            HorizonUnit::Periods => None,
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            HorizonUnit::Minutes => "m",
            HorizonUnit::Hours => "h",
            HorizonUnit::Days => "d",
            HorizonUnit::Weeks => "w",
            HorizonUnit::Periods => "",
        }
    }
}

/// A forward-return horizon, either a calendar duration or a row count
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Horizon {
    pub value: f64,
    pub unit: HorizonUnit,
}

impl Horizon {
    pub fn periods(n: i64) -> Self {
        Self {
            value: n as f64,
            unit: HorizonUnit::Periods,
        }
    }

    pub fn calendar(value: f64, unit: HorizonUnit) -> Self {
        Self { value, unit }
    }

    /// Translate to a positive row count. Calendar horizons use the sampling
    /// interval and round to the nearest row, never below one.
    pub fn to_periods(&self, sampling_interval_ms: Option<i64>) -> EngineResult<usize> {
        if !self.value.is_finite() || self.value <= 0.0 {
            return Err(AnalysisError::validation(format!(
                "forward horizon must be positive, got {self}"
            )));
        }
        match self.unit.millis() {
            None => {
                if self.value.fract() != 0.0 {
                    return Err(AnalysisError::validation(format!(
                        "period horizon must be a whole number, got {}",
                        self.value
                    )));
                }
                self.checked_periods(self.value)
            }
            Some(unit_ms) => {
                let interval = sampling_interval_ms.filter(|i| *i > 0).ok_or_else(|| {
                    AnalysisError::validation(format!(
                        "cannot translate horizon {self}: sampling interval unknown"
                    ))
                })?;
                let periods = (self.value * unit_ms / interval as f64).round();
                Ok(self.checked_periods(periods)?.max(1))
            }
        }
    }

    /// Row count that fits an `i64`; larger horizons are a range error
    fn checked_periods(&self, periods: f64) -> EngineResult<usize> {
        if !periods.is_finite() || periods >= i64::MAX as f64 {
            return Err(AnalysisError::validation(format!(
                "forward horizon {self} is out of range"
            )));
        }
        Ok(periods as usize)
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

impl FromStr for Horizon {
    type Err = AnalysisError;

    /// `"12"` is a row count; `"30m"`, `"4h"`, `"2d"`, `"1w"` are calendar spans
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().to_lowercase();
        let split = raw
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(raw.len());
        let (number, suffix) = raw.split_at(split);

        let value: f64 = number.trim().parse().map_err(|_| {
            AnalysisError::validation(format!("invalid forward horizon '{s}'"))
        })?;
        let unit = match suffix.trim() {
            "" | "p" | "periods" | "bars" => HorizonUnit::Periods,
            "m" | "min" | "minutes" => HorizonUnit::Minutes,
            "h" | "hours" => HorizonUnit::Hours,
            "d" | "days" => HorizonUnit::Days,
            "w" | "weeks" => HorizonUnit::Weeks,
            other => {
                return Err(AnalysisError::validation(format!(
                    "unknown horizon unit '{other}' in '{s}'"
                )))
            }
        };
        Ok(Horizon { value, unit })
    }
}

// ============================================================================
// Return column selection
// ============================================================================

/// Which return series an analysis request targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReturnColumn {
    EquityReturn,
    CumulativeReturn,
    #[default]
    ForwardReturn1,
    ForwardReturn5,
    ForwardCustom { horizon: Horizon },
}

impl ReturnColumn {
    /// Resolve a selector name; `horizon` is required for `forward_custom`
    pub fn parse(selector: &str, horizon: Option<Horizon>) -> EngineResult<Self> {
        match selector.trim().to_lowercase().as_str() {
            EQUITY_RETURN | "equity" => Ok(ReturnColumn::EquityReturn),
            CUMULATIVE_RETURN | "cumulative" => Ok(ReturnColumn::CumulativeReturn),
            FORWARD_RETURN_1 => Ok(ReturnColumn::ForwardReturn1),
            FORWARD_RETURN_5 => Ok(ReturnColumn::ForwardReturn5),
            "forward_return_custom" | "forward_custom" | "forward" => horizon
                .map(|horizon| ReturnColumn::ForwardCustom { horizon })
                .ok_or_else(|| {
                    AnalysisError::validation("forward_custom requires a forward horizon")
                }),
            other => Err(AnalysisError::validation(format!(
                "unknown return column '{other}'"
            ))),
        }
    }

    /// Name of the base column, `None` for custom horizons
    pub fn base_column(&self) -> Option<&'static str> {
        match self {
            ReturnColumn::EquityReturn => Some(EQUITY_RETURN),
            ReturnColumn::CumulativeReturn => Some(CUMULATIVE_RETURN),
            ReturnColumn::ForwardReturn1 => Some(FORWARD_RETURN_1),
            ReturnColumn::ForwardReturn5 => Some(FORWARD_RETURN_5),
            ReturnColumn::ForwardCustom { .. } => None,
        }
    }
}

/// Column name for a custom forward return of `period` rows
pub fn custom_column_name(period: usize) -> String {
    format!("forward_return_custom_{period}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReturnKind {
    Forward,
}

/// Derived return columns keyed by (kind, period), computed once per session
#[derive(Debug, Default)]
pub struct ReturnCache {
    entries: BTreeMap<(ReturnKind, usize), ReturnValues>,
}

impl ReturnCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward returns over `period` rows; validates `period > 0`
    pub fn forward(&mut self, equity: &[f64], period: i64) -> EngineResult<ReturnValues> {
        if period <= 0 {
            return Err(AnalysisError::validation(format!(
                "forward period must be positive, got {period}"
            )));
        }
        let key = (ReturnKind::Forward, period as usize);
        if let Some(cached) = self.entries.get(&key) {
            return Ok(Arc::clone(cached));
        }
        debug!(period, "Computing custom forward returns");
        let values = Arc::new(forward_returns(equity, period as usize));
        self.entries.insert(key, Arc::clone(&values));
        Ok(values)
    }

    pub fn contains(&self, kind: ReturnKind, period: usize) -> bool {
        self.entries.contains_key(&(kind, period))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached forward columns as (name, values), in period order
    pub fn forward_columns(&self) -> impl Iterator<Item = (String, ReturnValues)> + '_ {
        self.entries
            .iter()
            .filter(|((kind, _), _)| *kind == ReturnKind::Forward)
            .map(|((_, period), values)| (custom_column_name(*period), Arc::clone(values)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_returns_trailing_rows_undefined() {
        let equity = [100.0, 110.0, 121.0, 133.1];
        let fwd = forward_returns(&equity, 2);
        assert!((fwd[0].unwrap() - 0.21).abs() < 1e-12);
        assert!((fwd[1].unwrap() - 0.21).abs() < 1e-12);
        assert_eq!(fwd[2], None);
        assert_eq!(fwd[3], None);
    }

    #[test]
    fn test_zero_base_yields_none() {
        let equity = [0.0, 10.0, 11.0];
        assert_eq!(equity_returns(&equity)[1], None);
        assert_eq!(forward_returns(&equity, 1)[0], None);
        assert_eq!(cumulative_returns(&equity)[2], None);
    }

    #[test]
    fn test_cumulative_starts_at_zero() {
        let cum = cumulative_returns(&[50.0, 55.0, 45.0]);
        assert_eq!(cum[0], Some(0.0));
        assert!((cum[1].unwrap() - 0.1).abs() < 1e-12);
        assert!((cum[2].unwrap() + 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_horizon_parsing_and_translation() {
        let h: Horizon = "4h".parse().unwrap();
        assert_eq!(h.unit, HorizonUnit::Hours);
        assert_eq!(h.to_periods(Some(3_600_000)).unwrap(), 4);
        assert_eq!(h.to_periods(Some(86_400_000)).unwrap(), 1);

        let raw: Horizon = "12".parse().unwrap();
        assert_eq!(raw.to_periods(None).unwrap(), 12);

        assert!("0h".parse::<Horizon>().unwrap().to_periods(Some(60_000)).is_err());
        assert!("3y".parse::<Horizon>().is_err());
        assert!("2d".parse::<Horizon>().unwrap().to_periods(None).is_err());
    }

    #[test]
    fn test_oversized_horizon_is_range_error() {
        let err = Horizon::periods(i64::MAX).to_periods(None).unwrap_err();
        assert!(err.to_string().contains("out of range"));

        let weeks = Horizon::calendar(1e300, HorizonUnit::Weeks);
        let err = weeks.to_periods(Some(60_000)).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_cache_computes_once_and_rejects_non_positive() {
        let equity = [1.0, 2.0, 4.0];
        let mut cache = ReturnCache::new();

        let a = cache.forward(&equity, 1).unwrap();
        let b = cache.forward(&equity, 1).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(ReturnKind::Forward, 1));

        assert!(matches!(cache.forward(&equity, 0), Err(AnalysisError::Validation(_))));
        assert!(matches!(cache.forward(&equity, -3), Err(AnalysisError::Validation(_))));
    }

    #[test]
    fn test_return_column_selector() {
        assert_eq!(ReturnColumn::parse("forward_return_5", None).unwrap(), ReturnColumn::ForwardReturn5);
        assert!(ReturnColumn::parse("forward_custom", None).is_err());
        assert!(ReturnColumn::parse("alpha", None).is_err());
    }
}
