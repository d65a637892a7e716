//! Timestamp alignment of indicator series onto the equity curve
//!
//! Each equity row takes the indicator value whose timestamp is closest in
//! absolute distance, in either direction. Ties go to the earlier timestamp.
//! This can read an indicator value from slightly after the equity timestamp.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{AnalysisError, EngineResult};
use crate::manager::IndicatorSet;
use crate::returns::{
    self, ReturnValues, CUMULATIVE_RETURN, EQUITY_RETURN, FORWARD_RETURN_1, FORWARD_RETURN_5,
};
use crate::types::{EquityPoint, IndicatorSeries};

/// Equity rows with aligned indicator and return columns. Null marks a value
/// that is undefined for that row.
#[derive(Debug, Clone, Default)]
pub struct MergedTable {
    timestamps: Vec<i64>,
    equity: Vec<f64>,
    columns: BTreeMap<String, ReturnValues>,
    order: Vec<String>,
}

/// One row for presentation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedRow {
    pub timestamp: i64,
    pub equity_value: f64,
    pub values: BTreeMap<String, Option<f64>>,
}

impl MergedTable {
    /// Table of just the equity curve; columns are added with [`MergedTable::insert_column`]
    pub fn new(timestamps: Vec<i64>, equity: Vec<f64>) -> EngineResult<Self> {
        if timestamps.len() != equity.len() {
            return Err(AnalysisError::validation(format!(
                "{} timestamps for {} equity values",
                timestamps.len(),
                equity.len()
            )));
        }
        Ok(Self {
            timestamps,
            equity,
            columns: BTreeMap::new(),
            order: Vec::new(),
        })
    }

    /// Add or replace a column; its length must match the row count
    pub fn insert_column(&mut self, name: impl Into<String>, values: ReturnValues) -> EngineResult<()> {
        let name = name.into();
        if values.len() != self.len() {
            return Err(AnalysisError::validation(format!(
                "column '{name}' has {} rows, table has {}",
                values.len(),
                self.len()
            )));
        }
        if !self.columns.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.columns.insert(name, values);
        Ok(())
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

    pub fn equity(&self) -> &[f64] {
        &self.equity
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns.get(name).map(|c| c.as_slice())
    }

    /// Shared handle to a column
    pub fn column_values(&self, name: &str) -> Option<ReturnValues> {
        self.columns.get(name).map(Arc::clone)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Column names in insertion order
    pub fn column_names(&self) -> &[String] {
        &self.order
    }

    /// Rows where every column is defined
    pub fn complete_rows(&self) -> MergedTable {
        let keep: Vec<usize> = (0..self.len())
            .filter(|i| self.columns.values().all(|c| c[*i].is_some()))
            .collect();

        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                let kept: Vec<Option<f64>> = keep.iter().map(|i| values[*i]).collect();
                (name.clone(), Arc::new(kept))
            })
            .collect();

        MergedTable {
            timestamps: keep.iter().map(|i| self.timestamps[*i]).collect(),
            equity: keep.iter().map(|i| self.equity[*i]).collect(),
            columns,
            order: self.order.clone(),
        }
    }

    pub fn rows(&self) -> Vec<MergedRow> {
        (0..self.len())
            .map(|i| MergedRow {
                timestamp: self.timestamps[i],
                equity_value: self.equity[i],
                values: self
                    .order
                    .iter()
                    .map(|name| (name.clone(), self.columns[name][i]))
                    .collect(),
            })
            .collect()
    }
}

/// Value of `series` nearest to each target timestamp
pub fn nearest_join(targets: &[i64], series: &IndicatorSeries) -> Vec<Option<f64>> {
    let ts = &series.timestamps;
    if ts.is_empty() {
        return vec![None; targets.len()];
    }

    targets
        .iter()
        .map(|t| {
            let after = ts.partition_point(|x| x < t);
            let idx = if after == 0 {
                0
            } else if after == ts.len() {
                ts.len() - 1
            } else {
                let before = after - 1;
                // tie goes to the earlier timestamp
                if t - ts[before] <= ts[after] - t {
                    before
                } else {
                    after
                }
            };
            let v = series.values[idx];
            v.is_finite().then_some(v)
        })
        .collect()
}

/// Merge the equity curve with every series in the set and the base return
/// columns. Equity must be sorted by timestamp with unique timestamps.
pub fn merge(equity: &[EquityPoint], indicators: &IndicatorSet) -> EngineResult<MergedTable> {
    let timestamps: Vec<i64> = equity.iter().map(|p| p.timestamp).collect();
    let values: Vec<f64> = equity.iter().map(|p| p.value).collect();
    if timestamps.windows(2).any(|w| w[0] >= w[1]) {
        return Err(AnalysisError::validation(
            "equity timestamps must be strictly increasing",
        ));
    }

    let mut table = MergedTable::new(timestamps, values)?;
    table.insert_column(EQUITY_RETURN, Arc::new(returns::equity_returns(&table.equity)))?;
    table.insert_column(FORWARD_RETURN_1, Arc::new(returns::forward_returns(&table.equity, 1)))?;
    table.insert_column(FORWARD_RETURN_5, Arc::new(returns::forward_returns(&table.equity, 5)))?;
    table.insert_column(CUMULATIVE_RETURN, Arc::new(returns::cumulative_returns(&table.equity)))?;

    for (name, loaded) in indicators.iter() {
        let aligned = nearest_join(&table.timestamps, &loaded.series);
        table.insert_column(name, Arc::new(aligned))?;
    }

    debug!(rows = table.len(), columns = table.column_names().len(), "Merged table built");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorCategory;
    use crate::types::SeriesOrigin;

    fn series(name: &str, points: &[(i64, f64)]) -> IndicatorSeries {
        IndicatorSeries::from_points(name, SeriesOrigin::Precomputed, points.iter().copied())
    }

    #[test]
    fn test_nearest_join_picks_closest_either_side() {
        let s = series("x", &[(10, 1.0), (20, 2.0), (30, 3.0)]);
        let joined = nearest_join(&[0, 14, 16, 25, 100], &s);
        assert_eq!(joined, vec![Some(1.0), Some(1.0), Some(2.0), Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_nearest_join_tie_prefers_earlier() {
        let s = series("x", &[(10, 1.0), (20, 2.0)]);
        assert_eq!(nearest_join(&[15], &s), vec![Some(1.0)]);
    }

    #[test]
    fn test_nearest_join_reads_future_value() {
        // equity at t=19 takes the indicator from t=20
        let s = series("x", &[(0, 1.0), (20, 2.0)]);
        assert_eq!(nearest_join(&[19], &s), vec![Some(2.0)]);
    }

    #[test]
    fn test_nearest_join_empty_series_is_null() {
        let s = series("x", &[]);
        assert_eq!(nearest_join(&[1, 2], &s), vec![None, None]);
    }

    #[test]
    fn test_merge_builds_returns_and_indicator_columns() {
        let equity: Vec<EquityPoint> = (0..8)
            .map(|i| EquityPoint { timestamp: i * 10, value: 100.0 + i as f64 })
            .collect();
        let mut set = IndicatorSet::new();
        set.insert(series("sig", &[(0, 0.5), (40, 0.7)]), IndicatorCategory::Precomputed);

        let table = merge(&equity, &set).unwrap();
        assert_eq!(table.len(), 8);
        assert_eq!(table.column_names().len(), 5);
        assert_eq!(table.column(EQUITY_RETURN).unwrap()[0], None);
        assert_eq!(table.column(FORWARD_RETURN_5).unwrap()[3], None);
        assert!(table.column(FORWARD_RETURN_5).unwrap()[2].is_some());
        assert_eq!(table.column("sig").unwrap()[7], Some(0.7));

        // first row lacks equity_return, rows 3.. lack forward_return_5
        let complete = table.complete_rows();
        assert_eq!(complete.timestamps(), &[10, 20]);
    }

    #[test]
    fn test_merge_rejects_unsorted_equity() {
        let equity = vec![
            EquityPoint { timestamp: 10, value: 1.0 },
            EquityPoint { timestamp: 5, value: 1.0 },
        ];
        assert!(merge(&equity, &IndicatorSet::new()).is_err());
    }
}
