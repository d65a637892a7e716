//! External context data sources
//!
//! Two interchangeable strategies implement [`DataSource`]: a live network fetch
//! and a deterministic seeded generator. [`SourcePolicy`] tries live first when
//! enabled and falls back to synthetic data, returning a warning on fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::MarketContextClient;
use crate::config::EngineConfig;
use crate::error::{AnalysisError, EngineResult};
use crate::synthetic::{self, SignalProfile};
use crate::types::{DegradedWarning, IndicatorSeries, SeriesOrigin};

/// External market context signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketSignal {
    /// Crypto sentiment index, 0..100
    FearGreed,
    /// BTC share of total crypto market cap, percent
    BtcDominance,
    /// Equity volatility index
    VolatilityIndex,
    /// 10-year treasury yield, percent
    TreasuryYield,
    PutCallRatio,
}

impl MarketSignal {
    pub fn key(&self) -> &'static str {
        match self {
            MarketSignal::FearGreed => "fear_greed",
            MarketSignal::BtcDominance => "btc_dominance",
            MarketSignal::VolatilityIndex => "vix",
            MarketSignal::TreasuryYield => "treasury_10y",
            MarketSignal::PutCallRatio => "put_call_ratio",
        }
    }

    /// Plausible range and dynamics used by the synthetic generator
    pub fn profile(&self) -> SignalProfile {
        match self {
            MarketSignal::FearGreed => SignalProfile {
                lower: 0.0,
                upper: 100.0,
                mean: 50.0,
                volatility: 6.0,
                reversion: 0.08,
                integral: true,
            },
            MarketSignal::BtcDominance => SignalProfile {
                lower: 35.0,
                upper: 75.0,
                mean: 52.0,
                volatility: 0.6,
                reversion: 0.02,
                integral: false,
            },
            MarketSignal::VolatilityIndex => SignalProfile {
                lower: 10.0,
                upper: 80.0,
                mean: 19.0,
                volatility: 1.8,
                reversion: 0.06,
                integral: false,
            },
            MarketSignal::TreasuryYield => SignalProfile {
                lower: 0.5,
                upper: 6.0,
                mean: 3.5,
                volatility: 0.05,
                reversion: 0.01,
                integral: false,
            },
            MarketSignal::PutCallRatio => SignalProfile {
                lower: 0.4,
                upper: 1.6,
                mean: 0.95,
                volatility: 0.08,
                reversion: 0.2,
                integral: false,
            },
        }
    }
}

/// A regular timestamp grid to cover
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesRequest {
    pub start: i64,
    pub interval_ms: i64,
    pub length: usize,
}

impl SeriesRequest {
    pub fn new(start: i64, interval_ms: i64, length: usize) -> Self {
        Self {
            start,
            interval_ms: interval_ms.max(1),
            length,
        }
    }

    /// Grid spanning `[first, last]` inclusive, aligned down to the interval
    pub fn covering(first: i64, last: i64, interval_ms: i64) -> Self {
        let interval_ms = interval_ms.max(1);
        let start = first.div_euclid(interval_ms) * interval_ms;
        let span = (last.max(first) - start) / interval_ms;
        Self::new(start, interval_ms, span as usize + 1)
    }

    pub fn end(&self) -> i64 {
        self.start + self.interval_ms * self.length.saturating_sub(1) as i64
    }

    pub fn timestamps(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.length).map(move |i| self.start + self.interval_ms * i as i64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStrategy {
    LiveFetch,
    DeterministicSynthetic,
}

/// A provider of external context series
#[async_trait]
pub trait DataSource: Send + Sync {
    fn strategy(&self) -> SourceStrategy;

    async fn fetch(&self, signal: MarketSignal, request: &SeriesRequest) -> EngineResult<IndicatorSeries>;
}

/// Seeded generator; never fails
#[derive(Debug, Clone, Copy)]
pub struct DeterministicSynthetic {
    base_seed: u64,
}

impl DeterministicSynthetic {
    pub fn new(base_seed: u64) -> Self {
        Self { base_seed }
    }

    pub fn seed_for(&self, signal: MarketSignal) -> u64 {
        synthetic::derive_seed(self.base_seed, signal.key())
    }

    pub fn generate(&self, signal: MarketSignal, request: &SeriesRequest) -> IndicatorSeries {
        let seed = self.seed_for(signal);
        let values = synthetic::mean_reverting_path(&signal.profile(), seed, request.length);
        IndicatorSeries::from_points(
            signal.key(),
            SeriesOrigin::Synthetic { seed },
            request.timestamps().zip(values),
        )
    }
}

#[async_trait]
impl DataSource for DeterministicSynthetic {
    fn strategy(&self) -> SourceStrategy {
        SourceStrategy::DeterministicSynthetic
    }

    async fn fetch(&self, signal: MarketSignal, request: &SeriesRequest) -> EngineResult<IndicatorSeries> {
        Ok(self.generate(signal, request))
    }
}

/// Network retrieval through [`MarketContextClient`]
#[derive(Clone)]
pub struct LiveFetch {
    client: MarketContextClient,
}

impl LiveFetch {
    pub fn new(client: MarketContextClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DataSource for LiveFetch {
    fn strategy(&self) -> SourceStrategy {
        SourceStrategy::LiveFetch
    }

    async fn fetch(&self, signal: MarketSignal, request: &SeriesRequest) -> EngineResult<IndicatorSeries> {
        let points = self
            .client
            .fetch_history(signal, request)
            .await
            .map_err(|e| AnalysisError::Fetch(format!("{}: {e}", signal.key())))?;

        let series = IndicatorSeries::from_points(
            signal.key(),
            SeriesOrigin::Live {
                source: signal.key().to_string(),
            },
            points,
        );
        if series.is_empty() {
            return Err(AnalysisError::Fetch(format!(
                "{}: source returned no points",
                signal.key()
            )));
        }
        Ok(series)
    }
}

/// Live-first resolution with a synthetic fallback
pub struct SourcePolicy {
    live: Option<Box<dyn DataSource>>,
    synthetic: DeterministicSynthetic,
}

impl SourcePolicy {
    pub fn synthetic_only(seed: u64) -> Self {
        Self {
            live: None,
            synthetic: DeterministicSynthetic::new(seed),
        }
    }

    pub fn with_live(live: Box<dyn DataSource>, seed: u64) -> Self {
        Self {
            live: Some(live),
            synthetic: DeterministicSynthetic::new(seed),
        }
    }

    /// Build from config; a client that cannot be constructed disables live fetch
    pub fn from_config(config: &EngineConfig) -> Self {
        if !config.live_fetch.enabled {
            return Self::synthetic_only(config.synthetic_seed);
        }
        let timeout = Duration::from_millis(config.live_fetch.timeout_ms);
        match MarketContextClient::new(timeout) {
            Ok(client) => {
                let client = client.with_base_urls(
                    &config.live_fetch.sentiment_base_url,
                    &config.live_fetch.chart_base_url,
                );
                Self::with_live(Box::new(LiveFetch::new(client)), config.synthetic_seed)
            }
            Err(e) => {
                warn!(error = %e, "HTTP client unavailable, live fetch disabled");
                Self::synthetic_only(config.synthetic_seed)
            }
        }
    }

    pub fn live_enabled(&self) -> bool {
        self.live.is_some()
    }

    /// Resolve one signal. The warning is set when a live attempt failed.
    pub async fn resolve(
        &self,
        signal: MarketSignal,
        request: &SeriesRequest,
    ) -> (IndicatorSeries, Option<DegradedWarning>) {
        let Some(live) = &self.live else {
            debug!(signal = signal.key(), "Using synthetic context series");
            return (self.synthetic.generate(signal, request), None);
        };

        match live.fetch(signal, request).await {
            Ok(series) => {
                debug!(signal = signal.key(), points = series.len(), "Live context series");
                (series, None)
            }
            Err(e) => {
                warn!(signal = signal.key(), error = %e, "Live fetch failed, using synthetic series");
                let series = self.synthetic.generate(signal, request);
                let warning = DegradedWarning::fallback(
                    signal.key(),
                    e.to_string(),
                    format!("synthetic series (seed {})", self.synthetic.seed_for(signal)),
                );
                (series, Some(warning))
            }
        }
    }
}
