//! Indicator assembly for one run
//!
//! Loads three groups into one [`IndicatorSet`]:
//! 1. precomputed series stored with the run
//! 2. technical and price-action indicators computed from the run's price bars
//!    (or a seeded synthetic walk when none are stored)
//! 3. external context signals for the requested [`AnalysisContext`]
//!
//! Missing optional inputs never abort assembly; each skip or fallback is
//! logged and recorded as a [`DegradedWarning`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::data_source::{SeriesRequest, SourcePolicy};
use crate::error::{AnalysisError, EngineResult};
use crate::indicators::{
    build_indicator, merge_params, params, IndicatorCategory, IndicatorKind, IndicatorParams,
};
use crate::returns::BASE_COLUMNS;
use crate::store::RunStore;
use crate::synthetic::{self, WalkParams};
use crate::types::{
    median_interval, AnalysisContext, DegradedWarning, EquityPoint, IndicatorSeries, PriceBar,
    PriceColumn, PriceFrame, RawBar, RunId, SeriesOrigin,
};

/// A loaded series and the group it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedIndicator {
    pub series: IndicatorSeries,
    pub category: IndicatorCategory,
}

/// Where the session's price bars came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PriceOrigin {
    Stored {
        instrument: String,
        volume_synthesized: bool,
    },
    Synthetic {
        seed: u64,
    },
}

/// One row of the indicator listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    pub category: IndicatorCategory,
    pub origin: SeriesOrigin,
    pub points: usize,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
}

/// Named indicator series available to a session
#[derive(Debug, Clone, Default)]
pub struct IndicatorSet {
    entries: BTreeMap<String, LoadedIndicator>,
    warnings: Vec<DegradedWarning>,
    price_origin: Option<PriceOrigin>,
    sampling_interval_ms: Option<i64>,
}

impl IndicatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a series. Empty series, names already taken, and names reserved for
    /// return columns are refused with a warning; returns whether it was added.
    pub fn insert(&mut self, series: IndicatorSeries, category: IndicatorCategory) -> bool {
        let name = series.name.clone();
        let refusal = if series.is_empty() {
            Some("series has no usable points")
        } else if BASE_COLUMNS.contains(&name.as_str()) {
            Some("name is reserved for a return column")
        } else if self.entries.contains_key(&name) {
            Some("an indicator with this name is already loaded")
        } else {
            None
        };

        if let Some(reason) = refusal {
            warn!(indicator = %name, category = %category, reason, "Skipping indicator");
            self.warnings.push(DegradedWarning::skipped(name, reason));
            return false;
        }

        self.entries.insert(name, LoadedIndicator { series, category });
        true
    }

    pub fn push_warning(&mut self, warning: DegradedWarning) {
        self.warnings.push(warning);
    }

    pub fn get(&self, name: &str) -> Option<&LoadedIndicator> {
        self.entries.get(name)
    }

    pub fn series(&self, name: &str) -> Option<&IndicatorSeries> {
        self.entries.get(name).map(|e| &e.series)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LoadedIndicator)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names_in(&self, category: IndicatorCategory) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.category == category)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn warnings(&self) -> &[DegradedWarning] {
        &self.warnings
    }

    pub fn price_origin(&self) -> Option<&PriceOrigin> {
        self.price_origin.as_ref()
    }

    /// Spacing of the price bars the technical set was computed on
    pub fn sampling_interval_ms(&self) -> Option<i64> {
        self.sampling_interval_ms
    }

    pub fn set_sampling_interval_ms(&mut self, interval: Option<i64>) {
        self.sampling_interval_ms = interval;
    }

    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.entries
            .iter()
            .map(|(name, e)| CatalogEntry {
                name: name.clone(),
                category: e.category,
                origin: e.series.origin.clone(),
                points: e.series.len(),
                first_timestamp: e.series.timestamps.first().copied(),
                last_timestamp: e.series.timestamps.last().copied(),
            })
            .collect()
    }
}

/// Builds an [`IndicatorSet`] for a run
pub struct IndicatorManager<'a> {
    store: &'a dyn RunStore,
    policy: &'a SourcePolicy,
    config: &'a EngineConfig,
}

impl<'a> IndicatorManager<'a> {
    pub fn new(store: &'a dyn RunStore, policy: &'a SourcePolicy, config: &'a EngineConfig) -> Self {
        Self {
            store,
            policy,
            config,
        }
    }

    pub async fn assemble(
        &self,
        run: &RunId,
        context: AnalysisContext,
        equity: &[EquityPoint],
    ) -> EngineResult<IndicatorSet> {
        let mut set = IndicatorSet::new();

        self.load_precomputed(run, &mut set).await;

        let frame = self.load_prices(run, equity, &mut set).await?;
        set.set_sampling_interval_ms(
            frame
                .sampling_interval_ms()
                .or_else(|| median_interval(&equity.iter().map(|p| p.timestamp).collect::<Vec<_>>())),
        );
        compute_price_indicators(&frame, self.config, &mut set);

        self.load_external(context, equity, &mut set).await;

        info!(
            run = %run,
            context = %context,
            indicators = set.len(),
            warnings = set.warnings().len(),
            "Indicator set assembled"
        );
        Ok(set)
    }

    async fn load_precomputed(&self, run: &RunId, set: &mut IndicatorSet) {
        let names = match self.store.precomputed_names(run).await {
            Ok(names) => names,
            Err(e) => {
                warn!(run = %run, error = %e, "Precomputed indicators unavailable");
                set.push_warning(DegradedWarning::skipped("precomputed", e.to_string()));
                return;
            }
        };

        for name in names {
            match self.store.precomputed(run, &name).await {
                Ok(points) => {
                    let series = IndicatorSeries::from_points(
                        name.as_str(),
                        SeriesOrigin::Precomputed,
                        points.into_iter().filter_map(|(ts, v)| v.map(|v| (ts, v))),
                    );
                    debug!(indicator = %name, points = series.len(), "Loaded precomputed series");
                    set.insert(series, IndicatorCategory::Precomputed);
                }
                Err(e) => {
                    warn!(indicator = %name, error = %e, "Failed to read precomputed series");
                    set.push_warning(DegradedWarning::skipped(name, e.to_string()));
                }
            }
        }
    }

    /// First instrument with complete OHLC bars, else a synthetic walk over the equity span
    async fn load_prices(
        &self,
        run: &RunId,
        equity: &[EquityPoint],
        set: &mut IndicatorSet,
    ) -> EngineResult<PriceFrame> {
        match self.store.instruments(run).await {
            Ok(instruments) => {
                for instrument in instruments {
                    match self.store.price_bars(run, &instrument).await {
                        Ok(raw) => {
                            if let Some(frame) = self.stored_frame(&instrument, &raw, set)? {
                                return Ok(frame);
                            }
                        }
                        Err(e) => {
                            warn!(instrument = %instrument, error = %e, "Failed to read price bars");
                            set.push_warning(DegradedWarning::skipped(
                                format!("price_bars:{instrument}"),
                                e.to_string(),
                            ));
                        }
                    }
                }
            }
            Err(e) => {
                warn!(run = %run, error = %e, "Instrument listing failed");
                set.push_warning(DegradedWarning::skipped("price_bars", e.to_string()));
            }
        }

        let params = self.walk_params(equity);
        let seed = synthetic::derive_seed(self.config.synthetic_seed, "ohlcv");
        let frame = synthetic::random_walk_frame(&params, seed)?;

        warn!(run = %run, bars = frame.len(), seed, "No stored price bars, using synthetic prices");
        set.push_warning(DegradedWarning::fallback(
            "price_series",
            "no stored bars with complete OHLC columns",
            format!("synthetic random walk (seed {seed})"),
        ));
        set.price_origin = Some(PriceOrigin::Synthetic { seed });
        Ok(frame)
    }

    fn stored_frame(
        &self,
        instrument: &str,
        raw: &[RawBar],
        set: &mut IndicatorSet,
    ) -> EngineResult<Option<PriceFrame>> {
        let bars: Vec<PriceBar> = raw.iter().filter_map(RawBar::complete).collect();
        if bars.is_empty() {
            warn!(instrument, rows = raw.len(), "No complete OHLC bars for instrument");
            set.push_warning(DegradedWarning::skipped(
                format!("price_bars:{instrument}"),
                "no rows with complete OHLC columns",
            ));
            return Ok(None);
        }
        if bars.len() < raw.len() {
            debug!(instrument, dropped = raw.len() - bars.len(), "Dropped incomplete bars");
        }

        let mut frame = PriceFrame::from_bars(&bars);
        let volume_synthesized = !frame.has(PriceColumn::Volume);
        if volume_synthesized {
            let seed = synthetic::derive_seed(self.config.synthetic_seed, "volume");
            let volume = match (
                frame.column(PriceColumn::High),
                frame.column(PriceColumn::Low),
                frame.column(PriceColumn::Close),
            ) {
                (Some(h), Some(l), Some(c)) => {
                    synthetic::synthesize_volume(h, l, c, self.config.volume_base, seed)
                }
                _ => {
                    return Err(AnalysisError::validation(format!(
                        "price frame for {instrument} lost its OHLC columns"
                    )))
                }
            };
            frame = frame.with_volume(volume)?;

            warn!(instrument, seed, "Volume missing, synthesized from true range");
            set.push_warning(DegradedWarning::fallback(
                "volume",
                format!("{instrument} bars carry no volume"),
                format!("volume synthesized from true range (seed {seed})"),
            ));
        }

        info!(instrument, bars = frame.len(), volume_synthesized, "Loaded stored price bars");
        set.price_origin = Some(PriceOrigin::Stored {
            instrument: instrument.to_string(),
            volume_synthesized,
        });
        Ok(Some(frame))
    }

    fn walk_params(&self, equity: &[EquityPoint]) -> WalkParams {
        let timestamps: Vec<i64> = equity.iter().map(|p| p.timestamp).collect();
        let (start, interval_ms, length) = match (
            timestamps.first(),
            timestamps.last(),
            median_interval(&timestamps),
        ) {
            (Some(first), Some(last), Some(interval)) => {
                let bars = ((last - first) / interval) as usize + 1;
                (*first, interval, bars.min(self.config.max_synthetic_bars))
            }
            (Some(first), _, _) => (
                *first,
                self.config.synthetic_interval_ms,
                self.config.synthetic_bars,
            ),
            _ => (0, self.config.synthetic_interval_ms, self.config.synthetic_bars),
        };

        WalkParams {
            start,
            interval_ms,
            length,
            start_price: self.config.synthetic_start_price,
            volume_base: self.config.volume_base,
        }
    }

    async fn load_external(
        &self,
        context: AnalysisContext,
        equity: &[EquityPoint],
        set: &mut IndicatorSet,
    ) {
        let (Some(first), Some(last)) = (equity.first(), equity.last()) else {
            return;
        };
        let request = SeriesRequest::covering(
            first.timestamp,
            last.timestamp,
            self.config.external_interval_ms,
        );

        for kind in IndicatorKind::for_context(context) {
            let Some(signal) = kind.market_signal() else {
                continue;
            };
            let (series, warning) = self.policy.resolve(signal, &request).await;
            if let Some(warning) = warning {
                set.push_warning(warning);
            }
            set.insert(series, IndicatorCategory::External);
        }
    }
}

/// Parameter overrides the engine config imposes on specific indicators
fn config_overrides(kind: IndicatorKind, config: &EngineConfig) -> IndicatorParams {
    match kind {
        IndicatorKind::OpeningGap => params(&[("threshold_pct", config.gap_threshold_pct)]),
        _ => IndicatorParams::new(),
    }
}

/// Run every technical and price-action indicator over a frame. Indicators
/// whose column contract the frame cannot meet are skipped with a warning.
pub fn compute_price_indicators(frame: &PriceFrame, config: &EngineConfig, set: &mut IndicatorSet) {
    for kind in IndicatorKind::technical()
        .iter()
        .chain(IndicatorKind::price_action())
    {
        let indicator = build_indicator(*kind);
        let p = merge_params(indicator.default_parameters(), &config_overrides(*kind, config));

        match indicator.calculate(frame, &p) {
            Ok(series) => {
                set.insert(series, indicator.category());
            }
            Err(e) => {
                warn!(indicator = indicator.name(), error = %e, "Indicator skipped");
                set.push_warning(DegradedWarning::skipped(indicator.name(), e.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRunStore;

    fn equity(n: usize, step_ms: i64) -> Vec<EquityPoint> {
        (0..n)
            .map(|i| EquityPoint {
                timestamp: i as i64 * step_ms,
                value: 10_000.0 + i as f64,
            })
            .collect()
    }

    fn raw_bars(n: usize, with_volume: bool) -> Vec<RawBar> {
        (0..n)
            .map(|i| {
                let close = 100.0 + (i as f64 * 0.4).sin() * 3.0 + i as f64 * 0.1;
                RawBar {
                    timestamp: i as i64 * 3_600_000,
                    open: Some(close - 0.3),
                    high: Some(close + 1.0),
                    low: Some(close - 1.0),
                    close: Some(close),
                    volume: with_volume.then_some(1_000.0 + i as f64),
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_synthetic_prices_when_none_stored() {
        let store = MemoryRunStore::new();
        let run = RunId::parse("r1").unwrap();
        let eq = equity(200, 3_600_000);
        store.insert_equity("r1", eq.clone());

        let config = EngineConfig::default();
        let policy = SourcePolicy::synthetic_only(config.synthetic_seed);
        let manager = IndicatorManager::new(&store, &policy, &config);
        let set = manager.assemble(&run, AnalysisContext::Neutral, &eq).await.unwrap();

        assert!(matches!(set.price_origin(), Some(PriceOrigin::Synthetic { .. })));
        assert!(set.warnings().iter().any(|w| w.subject == "price_series"));
        assert!(set.contains("rsi"));
        assert!(set.contains("volume_ma_ratio"));
        assert_eq!(set.sampling_interval_ms(), Some(3_600_000));
        assert!(set.names_in(IndicatorCategory::External).is_empty());
    }

    #[tokio::test]
    async fn test_missing_volume_is_synthesized() {
        let store = MemoryRunStore::new();
        let run = RunId::parse("r2").unwrap();
        let eq = equity(150, 3_600_000);
        store.insert_equity("r2", eq.clone());
        store.insert_bars("r2", "BTCUSDT", raw_bars(150, false));

        let config = EngineConfig::default();
        let policy = SourcePolicy::synthetic_only(1);
        let set = IndicatorManager::new(&store, &policy, &config)
            .assemble(&run, AnalysisContext::Crypto, &eq)
            .await
            .unwrap();

        assert_eq!(
            set.price_origin(),
            Some(&PriceOrigin::Stored { instrument: "BTCUSDT".into(), volume_synthesized: true })
        );
        assert!(set.contains("volume_ma_ratio"));
        assert!(set.contains("fear_greed"));
        assert!(set.contains("btc_dominance"));
        assert!(set.warnings().iter().any(|w| w.subject == "volume"));
    }

    #[tokio::test]
    async fn test_precomputed_series_are_loaded_first() {
        let store = MemoryRunStore::new();
        let run = RunId::parse("r3").unwrap();
        let eq = equity(100, 3_600_000);
        store.insert_equity("r3", eq.clone());
        store.insert_bars("r3", "SPY", raw_bars(100, true));
        store.insert_indicator("r3", "rsi", vec![(0, Some(40.0)), (3_600_000, None)]);
        store.insert_indicator("r3", "empty_signal", vec![(0, None)]);

        let config = EngineConfig::default();
        let policy = SourcePolicy::synthetic_only(1);
        let set = IndicatorManager::new(&store, &policy, &config)
            .assemble(&run, AnalysisContext::Index, &eq)
            .await
            .unwrap();

        let rsi = set.get("rsi").unwrap();
        assert_eq!(rsi.category, IndicatorCategory::Precomputed);
        assert_eq!(rsi.series.len(), 1);
        assert!(!set.contains("empty_signal"));
        assert!(set.contains("vix"));
        assert!(set.contains("treasury_10y"));
        assert!(set.contains("put_call_ratio"));
        assert!(set.warnings().iter().any(|w| w.subject == "rsi"));
    }

    #[test]
    fn test_close_only_frame_skips_with_warnings() {
        let frame = PriceFrame::from_columns(
            (0..60).collect(),
            None,
            None,
            None,
            Some((0..60).map(|i| 100.0 + i as f64).collect()),
            None,
        )
        .unwrap();
        let mut set = IndicatorSet::new();
        compute_price_indicators(&frame, &EngineConfig::default(), &mut set);

        assert!(set.contains("rsi"));
        assert!(set.contains("price_momentum"));
        assert!(!set.contains("atr"));
        assert!(!set.contains("opening_gap"));
        assert!(set.warnings().iter().any(|w| w.subject == "atr"));
    }
}
