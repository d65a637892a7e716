//! Analysis session: one run's merged data plus cached derived columns
//!
//! A session loads the equity curve, assembles the indicator set, merges
//! everything onto the equity timestamps, and then answers any number of
//! analysis requests. Custom forward-return horizons are computed lazily
//! and cached for the session's lifetime.
//!
//! Every request analyzes the complete rows of the merged table: rows with a
//! null in any indicator or base return column are dropped, together with the
//! rows where the requested custom return is undefined. Other cached custom
//! horizons do not take part, so a request's rows never depend on earlier
//! requests.

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::data_source::SourcePolicy;
use crate::error::{AnalysisError, EngineResult};
use crate::manager::{CatalogEntry, IndicatorManager, IndicatorSet, PriceOrigin};
use crate::merge::{self, MergedTable};
use crate::regime::{
    self, AnalysisResult, ContinuousResult, PerformanceSummary, RegimeInput, RegimeOutcome,
};
use crate::returns::{custom_column_name, ReturnCache, ReturnColumn, ReturnValues};
use crate::store::RunStore;
use crate::types::{AnalysisContext, DegradedWarning, EquityPoint, RunId};

pub struct AnalysisSession {
    run_id: RunId,
    context: AnalysisContext,
    equity: Vec<EquityPoint>,
    indicators: IndicatorSet,
    table: MergedTable,
    returns: ReturnCache,
}

impl AnalysisSession {
    /// Load a run and assemble its indicator set.
    ///
    /// Fails with `Validation` for a malformed run id and with
    /// `DataUnavailable` when the run has no equity curve.
    pub async fn open(
        store: &dyn RunStore,
        policy: &SourcePolicy,
        config: &EngineConfig,
        run_id: &str,
        context: AnalysisContext,
    ) -> EngineResult<Self> {
        let run = RunId::parse(run_id)?;
        let equity = store.equity(&run).await?;
        if equity.is_empty() {
            return Err(AnalysisError::DataUnavailable(format!(
                "no equity series for run '{run}'"
            )));
        }
        let equity = normalize_equity(equity);

        let indicators = IndicatorManager::new(store, policy, config)
            .assemble(&run, context, &equity)
            .await?;

        Self::from_parts(run, context, equity, indicators)
    }

    /// Build from already-loaded parts
    pub fn from_parts(
        run_id: RunId,
        context: AnalysisContext,
        equity: Vec<EquityPoint>,
        indicators: IndicatorSet,
    ) -> EngineResult<Self> {
        if equity.is_empty() {
            return Err(AnalysisError::DataUnavailable(format!(
                "no equity series for run '{run_id}'"
            )));
        }
        let equity = normalize_equity(equity);
        let table = merge::merge(&equity, &indicators)?;

        for warning in indicators.warnings() {
            warn!(run = %run_id, subject = %warning.subject, reason = %warning.reason, "Degraded input");
        }
        info!(
            run = %run_id,
            context = %context,
            rows = table.len(),
            indicators = indicators.len(),
            "Analysis session ready"
        );

        Ok(Self {
            run_id,
            context,
            equity,
            indicators,
            table,
            returns: ReturnCache::new(),
        })
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn context(&self) -> AnalysisContext {
        self.context
    }

    pub fn equity(&self) -> &[EquityPoint] {
        &self.equity
    }

    pub fn indicator_set(&self) -> &IndicatorSet {
        &self.indicators
    }

    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.indicators.catalog()
    }

    pub fn warnings(&self) -> &[DegradedWarning] {
        self.indicators.warnings()
    }

    pub fn price_origin(&self) -> Option<&PriceOrigin> {
        self.indicators.price_origin()
    }

    /// Columns a request may use as its feature
    pub fn feature_names(&self) -> Vec<&str> {
        self.table.column_names().iter().map(String::as_str).collect()
    }

    /// Merged table including every custom forward column computed so far
    pub fn merged_table(&self) -> MergedTable {
        let mut table = self.table.clone();
        for (name, values) in self.returns.forward_columns() {
            // lengths match by construction
            if let Err(e) = table.insert_column(name, values) {
                warn!(error = %e, "Cached return column dropped");
            }
        }
        table
    }

    /// [`AnalysisSession::merged_table`] restricted to fully defined rows
    pub fn complete_rows(&self) -> MergedTable {
        self.merged_table().complete_rows()
    }

    /// Resolve a return selector to its column name and values
    pub fn return_series(&mut self, column: &ReturnColumn) -> EngineResult<(String, ReturnValues)> {
        if let Some(name) = column.base_column() {
            let values = self.table.column_values(name).ok_or_else(|| {
                AnalysisError::validation(format!("return column '{name}' missing from table"))
            })?;
            return Ok((name.to_string(), values));
        }

        let ReturnColumn::ForwardCustom { horizon } = column else {
            return Err(AnalysisError::validation("unsupported return column"));
        };
        let periods = horizon.to_periods(self.indicators.sampling_interval_ms())?;
        let period = i64::try_from(periods).map_err(|_| {
            AnalysisError::validation(format!("forward horizon {horizon} is out of range"))
        })?;
        let values = self.returns.forward(self.table.equity(), period)?;
        Ok((custom_column_name(periods), values))
    }

    /// Complete rows of the merged table plus the requested return column
    pub fn analysis_rows(&mut self, column: &ReturnColumn) -> EngineResult<(String, MergedTable)> {
        let (return_name, return_values) = self.return_series(column)?;
        let mut table = self.table.clone();
        if !table.has_column(&return_name) {
            table.insert_column(return_name.as_str(), return_values)?;
        }
        let complete = table.complete_rows();
        debug!(
            run = %self.run_id,
            returns = %return_name,
            rows = table.len(),
            complete = complete.len(),
            "Null rows dropped"
        );
        Ok((return_name, complete))
    }

    fn with_input<T>(
        &mut self,
        feature: &str,
        column: &ReturnColumn,
        f: impl FnOnce(&RegimeInput<'_>) -> T,
    ) -> EngineResult<T> {
        if !self.table.has_column(feature) {
            return Err(AnalysisError::validation(format!(
                "unknown feature '{feature}' for run '{}'",
                self.run_id
            )));
        }
        let (return_name, rows) = self.analysis_rows(column)?;
        let (Some(feature_values), Some(return_values)) =
            (rows.column(feature), rows.column(&return_name))
        else {
            return Err(AnalysisError::validation(format!(
                "columns '{feature}' and '{return_name}' missing after null drop"
            )));
        };
        let input = RegimeInput {
            timestamps: rows.timestamps(),
            equity: rows.equity(),
            feature_name: feature,
            feature: feature_values,
            return_name: &return_name,
            returns: return_values,
        };
        Ok(f(&input))
    }

    /// Bucket returns by `feature` into `n_bins` ranges
    pub fn analyze(
        &mut self,
        feature: &str,
        n_bins: usize,
        column: &ReturnColumn,
    ) -> EngineResult<RegimeOutcome<AnalysisResult>> {
        self.with_input(feature, column, |input| regime::analyze(input, n_bins))?
    }

    pub fn continuous(
        &mut self,
        feature: &str,
        column: &ReturnColumn,
    ) -> EngineResult<RegimeOutcome<ContinuousResult>> {
        self.with_input(feature, column, regime::continuous)
    }

    pub fn summarize(
        &mut self,
        feature: &str,
        column: &ReturnColumn,
    ) -> EngineResult<RegimeOutcome<PerformanceSummary>> {
        self.with_input(feature, column, regime::summarize)
    }
}

/// Sort by timestamp and keep the first point for duplicate timestamps
fn normalize_equity(mut equity: Vec<EquityPoint>) -> Vec<EquityPoint> {
    equity.sort_by_key(|p| p.timestamp);
    equity.dedup_by_key(|p| p.timestamp);
    equity
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::indicators::IndicatorCategory;
    use crate::returns::Horizon;
    use crate::store::MemoryRunStore;
    use crate::types::{IndicatorSeries, SeriesOrigin};

    fn hourly_equity(n: usize) -> Vec<EquityPoint> {
        (0..n)
            .map(|i| EquityPoint {
                timestamp: i as i64 * 3_600_000,
                value: 1_000.0 * (1.0 + 0.001 * (i as f64 * 0.7).sin()) + i as f64,
            })
            .collect()
    }

    fn session_with_signal(n: usize) -> AnalysisSession {
        let equity = hourly_equity(n);
        let mut set = IndicatorSet::new();
        set.insert(
            IndicatorSeries::from_points(
                "signal",
                SeriesOrigin::Precomputed,
                equity.iter().enumerate().map(|(i, p)| (p.timestamp, (i % 10) as f64)),
            ),
            IndicatorCategory::Precomputed,
        );
        set.set_sampling_interval_ms(Some(3_600_000));
        AnalysisSession::from_parts(RunId::parse("s").unwrap(), AnalysisContext::Neutral, equity, set).unwrap()
    }

    #[tokio::test]
    async fn test_open_without_equity_is_data_unavailable() {
        let store = MemoryRunStore::new();
        let config = EngineConfig::default();
        let policy = SourcePolicy::synthetic_only(1);
        let err = AnalysisSession::open(&store, &policy, &config, "ghost", AnalysisContext::Neutral)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AnalysisError::DataUnavailable(_)));
        assert!(err.is_session_fatal());
    }

    #[tokio::test]
    async fn test_open_rejects_malformed_run_id() {
        let store = MemoryRunStore::new();
        let config = EngineConfig::default();
        let policy = SourcePolicy::synthetic_only(1);
        let err = AnalysisSession::open(&store, &policy, &config, "../x", AnalysisContext::Neutral)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AnalysisError::Validation(_)));
    }

    #[test]
    fn test_unknown_feature_is_validation_error() {
        let mut session = session_with_signal(50);
        let err = session
            .analyze("not_a_column", 10, &ReturnColumn::ForwardReturn1)
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(_)));
    }

    #[test]
    fn test_custom_horizon_cached_and_exposed() {
        let mut session = session_with_signal(60);
        let column = ReturnColumn::ForwardCustom { horizon: "4h".parse().unwrap() };

        let first = session.analyze("signal", 5, &column).unwrap();
        assert!(!first.is_no_data());
        assert!(session.merged_table().has_column("forward_return_custom_4"));

        let (_, a) = session.return_series(&column).unwrap();
        let (_, b) = session.return_series(&column).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_non_positive_custom_period_rejected() {
        let mut session = session_with_signal(20);
        let column = ReturnColumn::ForwardCustom { horizon: Horizon::periods(0) };
        assert!(matches!(
            session.summarize("signal", &column),
            Err(AnalysisError::Validation(_))
        ));
    }

    #[test]
    fn test_summary_and_continuous_share_rows() {
        let mut session = session_with_signal(40);
        let summary = session
            .summarize("signal", &ReturnColumn::ForwardReturn1)
            .unwrap()
            .into_ready()
            .unwrap();
        let continuous = session
            .continuous("signal", &ReturnColumn::ForwardReturn1)
            .unwrap()
            .into_ready()
            .unwrap();
        // row 0 lacks equity_return, the last five lack forward_return_5
        assert_eq!(summary.total_observations, 34);
        assert_eq!(continuous.total_observations, 34);
    }

    #[test]
    fn test_requests_use_complete_rows_only() {
        let mut session = session_with_signal(40);
        let before = session
            .analyze("signal", 4, &ReturnColumn::ForwardReturn1)
            .unwrap()
            .into_ready()
            .unwrap();
        assert_eq!(before.total_observations, session.complete_rows().len());
        assert_eq!(before.raw_merged_subset.first().unwrap().timestamp, 3_600_000);

        for column in [ReturnColumn::EquityReturn, ReturnColumn::CumulativeReturn] {
            let result = session.analyze("signal", 4, &column).unwrap().into_ready().unwrap();
            assert_eq!(result.total_observations, 34);
        }

        let long = ReturnColumn::ForwardCustom { horizon: Horizon::periods(8) };
        let result = session.analyze("signal", 4, &long).unwrap().into_ready().unwrap();
        assert_eq!(result.total_observations, 31);
        assert_eq!(session.complete_rows().len(), 31);
        let (name, rows) = session.analysis_rows(&long).unwrap();
        assert_eq!(name, "forward_return_custom_8");
        assert_eq!(rows.len(), 31);

        // a cached longer horizon does not shrink later requests
        let after = session
            .analyze("signal", 4, &ReturnColumn::ForwardReturn1)
            .unwrap()
            .into_ready()
            .unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_oversized_horizon_is_validation_error() {
        let mut session = session_with_signal(20);
        let column = ReturnColumn::ForwardCustom { horizon: Horizon::periods(i64::MAX) };
        let err = session.analyze("signal", 4, &column).unwrap_err();
        assert!(matches!(err, AnalysisError::Validation(ref msg) if msg.contains("out of range")));
    }
}
