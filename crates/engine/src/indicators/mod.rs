//! Indicator library
//!
//! Every indicator implements [`Indicator`]: it declares the price columns it
//! needs, its default parameters, and computes an [`IndicatorSeries`] from a
//! [`PriceFrame`]. [`build_indicator`] is the single factory over
//! [`IndicatorKind`]; [`IndicatorKind::parse`] resolves category/type names.

pub mod external;
pub mod price_action;
pub mod technical;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::data_source::MarketSignal;
use crate::error::{AnalysisError, EngineResult};
use crate::types::{AnalysisContext, IndicatorSeries, PriceColumn, PriceFrame};

pub use external::ExternalIndicator;

/// Named numeric parameters; missing keys fall back to defaults
pub type IndicatorParams = BTreeMap<String, f64>;

/// Broad grouping used in listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorCategory {
    Technical,
    PriceAction,
    External,
    Precomputed,
}

impl IndicatorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorCategory::Technical => "technical",
            IndicatorCategory::PriceAction => "price_action",
            IndicatorCategory::External => "external",
            IndicatorCategory::Precomputed => "precomputed",
        }
    }
}

impl fmt::Display for IndicatorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every computable indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    // technical
    Rsi,
    Macd,
    BollingerBands,
    Sma,
    Ema,
    Atr,
    Stochastic,
    WilliamsR,
    Cci,
    Roc,
    // price action
    VolumeMaRatio,
    TrueRangeVolatility,
    DailyRangeRatio,
    OpeningGap,
    CandleBody,
    PriceMomentum,
    VolumeMomentum,
    PriceAcceleration,
    // external
    FearGreed,
    BtcDominance,
    VolatilityIndex,
    TreasuryYield,
    PutCallRatio,
}

const TECHNICAL: &[IndicatorKind] = &[
    IndicatorKind::Rsi,
    IndicatorKind::Macd,
    IndicatorKind::BollingerBands,
    IndicatorKind::Sma,
    IndicatorKind::Ema,
    IndicatorKind::Atr,
    IndicatorKind::Stochastic,
    IndicatorKind::WilliamsR,
    IndicatorKind::Cci,
    IndicatorKind::Roc,
];

const PRICE_ACTION: &[IndicatorKind] = &[
    IndicatorKind::VolumeMaRatio,
    IndicatorKind::TrueRangeVolatility,
    IndicatorKind::DailyRangeRatio,
    IndicatorKind::OpeningGap,
    IndicatorKind::CandleBody,
    IndicatorKind::PriceMomentum,
    IndicatorKind::VolumeMomentum,
    IndicatorKind::PriceAcceleration,
];

const EXTERNAL: &[IndicatorKind] = &[
    IndicatorKind::FearGreed,
    IndicatorKind::BtcDominance,
    IndicatorKind::VolatilityIndex,
    IndicatorKind::TreasuryYield,
    IndicatorKind::PutCallRatio,
];

impl IndicatorKind {
    /// Series name used in merged tables
    pub fn key(&self) -> &'static str {
        match self {
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::Macd => "macd",
            IndicatorKind::BollingerBands => "bollinger_pct_b",
            IndicatorKind::Sma => "sma",
            IndicatorKind::Ema => "ema",
            IndicatorKind::Atr => "atr",
            IndicatorKind::Stochastic => "stochastic_k",
            IndicatorKind::WilliamsR => "williams_r",
            IndicatorKind::Cci => "cci",
            IndicatorKind::Roc => "roc",
            IndicatorKind::VolumeMaRatio => "volume_ma_ratio",
            IndicatorKind::TrueRangeVolatility => "true_range_volatility",
            IndicatorKind::DailyRangeRatio => "daily_range_ratio",
            IndicatorKind::OpeningGap => "opening_gap",
            IndicatorKind::CandleBody => "candle_body",
            IndicatorKind::PriceMomentum => "price_momentum",
            IndicatorKind::VolumeMomentum => "volume_momentum",
            IndicatorKind::PriceAcceleration => "price_acceleration",
            IndicatorKind::FearGreed => MarketSignal::FearGreed.key(),
            IndicatorKind::BtcDominance => MarketSignal::BtcDominance.key(),
            IndicatorKind::VolatilityIndex => MarketSignal::VolatilityIndex.key(),
            IndicatorKind::TreasuryYield => MarketSignal::TreasuryYield.key(),
            IndicatorKind::PutCallRatio => MarketSignal::PutCallRatio.key(),
        }
    }

    pub fn category(&self) -> IndicatorCategory {
        if TECHNICAL.contains(self) {
            IndicatorCategory::Technical
        } else if PRICE_ACTION.contains(self) {
            IndicatorCategory::PriceAction
        } else {
            IndicatorCategory::External
        }
    }

    pub fn technical() -> &'static [IndicatorKind] {
        TECHNICAL
    }

    pub fn price_action() -> &'static [IndicatorKind] {
        PRICE_ACTION
    }

    pub fn external() -> &'static [IndicatorKind] {
        EXTERNAL
    }

    pub fn all() -> impl Iterator<Item = IndicatorKind> {
        TECHNICAL
            .iter()
            .chain(PRICE_ACTION)
            .chain(EXTERNAL)
            .copied()
    }

    /// The context signal behind an external kind
    pub fn market_signal(&self) -> Option<MarketSignal> {
        match self {
            IndicatorKind::FearGreed => Some(MarketSignal::FearGreed),
            IndicatorKind::BtcDominance => Some(MarketSignal::BtcDominance),
            IndicatorKind::VolatilityIndex => Some(MarketSignal::VolatilityIndex),
            IndicatorKind::TreasuryYield => Some(MarketSignal::TreasuryYield),
            IndicatorKind::PutCallRatio => Some(MarketSignal::PutCallRatio),
            _ => None,
        }
    }

    /// External signals loaded for a context
    pub fn for_context(context: AnalysisContext) -> &'static [IndicatorKind] {
        match context {
            AnalysisContext::Crypto => &[IndicatorKind::FearGreed, IndicatorKind::BtcDominance],
            AnalysisContext::Index => &[
                IndicatorKind::VolatilityIndex,
                IndicatorKind::TreasuryYield,
                IndicatorKind::PutCallRatio,
            ],
            AnalysisContext::Neutral => &[],
        }
    }

    /// Resolve a `(category, type)` pair. Type names are case-insensitive and
    /// accept common aliases ("bb", "bollinger", "williams_%r", "vix", ...).
    pub fn parse(category: &str, kind: &str) -> EngineResult<Self> {
        let unknown = || AnalysisError::UnknownIndicator {
            category: category.to_string(),
            kind: kind.to_string(),
        };

        let normalized = kind.trim().to_lowercase().replace(['-', ' '], "_");
        let parsed = match normalized.as_str() {
            "rsi" => IndicatorKind::Rsi,
            "macd" => IndicatorKind::Macd,
            "bb" | "bollinger" | "bollinger_bands" | "bollinger_pct_b" => IndicatorKind::BollingerBands,
            "sma" => IndicatorKind::Sma,
            "ema" => IndicatorKind::Ema,
            "atr" => IndicatorKind::Atr,
            "stoch" | "stochastic" | "stochastic_k" => IndicatorKind::Stochastic,
            "williams_r" | "williams_%r" | "%r" | "willr" => IndicatorKind::WilliamsR,
            "cci" => IndicatorKind::Cci,
            "roc" => IndicatorKind::Roc,
            "volume_ma_ratio" | "volume_ratio" => IndicatorKind::VolumeMaRatio,
            "true_range_volatility" | "tr_volatility" => IndicatorKind::TrueRangeVolatility,
            "daily_range_ratio" | "range_ratio" => IndicatorKind::DailyRangeRatio,
            "opening_gap" | "gap" => IndicatorKind::OpeningGap,
            "candle_body" | "body_ratio" => IndicatorKind::CandleBody,
            "price_momentum" | "momentum" => IndicatorKind::PriceMomentum,
            "volume_momentum" => IndicatorKind::VolumeMomentum,
            "price_acceleration" | "acceleration" => IndicatorKind::PriceAcceleration,
            "fear_greed" | "fear_and_greed" => IndicatorKind::FearGreed,
            "btc_dominance" | "dominance" => IndicatorKind::BtcDominance,
            "vix" | "volatility_index" => IndicatorKind::VolatilityIndex,
            "treasury_10y" | "treasury_yield" | "tnx" => IndicatorKind::TreasuryYield,
            "put_call_ratio" | "put_call" | "pcr" => IndicatorKind::PutCallRatio,
            _ => return Err(unknown()),
        };

        let wanted = match category.trim().to_lowercase().replace('-', "_").as_str() {
            "technical" => IndicatorCategory::Technical,
            "price_action" | "priceaction" => IndicatorCategory::PriceAction,
            "external" | "market" => IndicatorCategory::External,
            _ => return Err(unknown()),
        };
        if parsed.category() != wanted {
            return Err(unknown());
        }
        Ok(parsed)
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A computable indicator
pub trait Indicator: Send + Sync {
    fn kind(&self) -> IndicatorKind;

    fn name(&self) -> &str {
        self.kind().key()
    }

    fn category(&self) -> IndicatorCategory {
        self.kind().category()
    }

    /// Price columns that must be present for [`Indicator::calculate`] to succeed
    fn required_columns(&self) -> &'static [PriceColumn];

    fn default_parameters(&self) -> IndicatorParams;

    /// Compute the series. Fails with `MissingColumn` when a required column is
    /// absent; warm-up rows are dropped.
    fn calculate(&self, prices: &PriceFrame, params: &IndicatorParams) -> EngineResult<IndicatorSeries>;

    /// Compute with default parameters
    fn calculate_default(&self, prices: &PriceFrame) -> EngineResult<IndicatorSeries> {
        self.calculate(prices, &self.default_parameters())
    }
}

/// Build an indicator for the given kind
pub fn build_indicator(kind: IndicatorKind) -> Box<dyn Indicator> {
    match kind {
        IndicatorKind::Rsi => Box::new(technical::Rsi),
        IndicatorKind::Macd => Box::new(technical::Macd),
        IndicatorKind::BollingerBands => Box::new(technical::Bollinger),
        IndicatorKind::Sma => Box::new(technical::Sma),
        IndicatorKind::Ema => Box::new(technical::Ema),
        IndicatorKind::Atr => Box::new(technical::Atr),
        IndicatorKind::Stochastic => Box::new(technical::Stochastic),
        IndicatorKind::WilliamsR => Box::new(technical::WilliamsR),
        IndicatorKind::Cci => Box::new(technical::Cci),
        IndicatorKind::Roc => Box::new(technical::Roc),
        IndicatorKind::VolumeMaRatio => Box::new(price_action::VolumeMaRatio),
        IndicatorKind::TrueRangeVolatility => Box::new(price_action::TrueRangeVolatility),
        IndicatorKind::DailyRangeRatio => Box::new(price_action::DailyRangeRatio),
        IndicatorKind::OpeningGap => Box::new(price_action::OpeningGap),
        IndicatorKind::CandleBody => Box::new(price_action::CandleBody),
        IndicatorKind::PriceMomentum => Box::new(price_action::PriceMomentum),
        IndicatorKind::VolumeMomentum => Box::new(price_action::VolumeMomentum),
        IndicatorKind::PriceAcceleration => Box::new(price_action::PriceAcceleration),
        IndicatorKind::FearGreed
        | IndicatorKind::BtcDominance
        | IndicatorKind::VolatilityIndex
        | IndicatorKind::TreasuryYield
        | IndicatorKind::PutCallRatio => Box::new(ExternalIndicator::new(kind)),
    }
}

/// Defaults overlaid with caller overrides
pub fn merge_params(defaults: IndicatorParams, overrides: &IndicatorParams) -> IndicatorParams {
    let mut merged = defaults;
    for (k, v) in overrides {
        merged.insert(k.clone(), *v);
    }
    merged
}

/// Build a parameter map from literal pairs
pub fn params(pairs: &[(&str, f64)]) -> IndicatorParams {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// Positive whole-number parameter, e.g. a lookback period
pub(crate) fn period_param(params: &IndicatorParams, key: &str, default: usize) -> EngineResult<usize> {
    let Some(raw) = params.get(key) else {
        return Ok(default);
    };
    if !raw.is_finite() || *raw < 1.0 || raw.fract() != 0.0 {
        return Err(AnalysisError::validation(format!(
            "parameter '{key}' must be a positive integer, got {raw}"
        )));
    }
    Ok(*raw as usize)
}

pub(crate) fn float_param(params: &IndicatorParams, key: &str, default: f64) -> EngineResult<f64> {
    match params.get(key) {
        None => Ok(default),
        Some(v) if v.is_finite() => Ok(*v),
        Some(v) => Err(AnalysisError::validation(format!(
            "parameter '{key}' must be finite, got {v}"
        ))),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::types::{PriceBar, PriceFrame};

    /// Deterministic zig-zag uptrend with full OHLCV
    pub fn make_frame(n: usize) -> PriceFrame {
        let bars: Vec<PriceBar> = (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.5;
                let wobble = if i % 3 == 0 { -1.2 } else { 0.8 };
                let close = base + wobble;
                let open = base - wobble * 0.5;
                PriceBar {
                    timestamp: i as i64 * 3_600_000,
                    open,
                    high: open.max(close) + 0.6,
                    low: open.min(close) - 0.6,
                    close,
                    volume: Some(1_000.0 + (i % 7) as f64 * 150.0),
                }
            })
            .collect();
        PriceFrame::from_bars(&bars)
    }

    /// Same bars without a volume column
    pub fn make_frame_without_volume(n: usize) -> PriceFrame {
        let frame = make_frame(n);
        let bars: Vec<PriceBar> = (0..n)
            .map(|i| PriceBar {
                timestamp: frame.timestamps()[i],
                open: frame.column(crate::types::PriceColumn::Open).unwrap()[i],
                high: frame.column(crate::types::PriceColumn::High).unwrap()[i],
                low: frame.column(crate::types::PriceColumn::Low).unwrap()[i],
                close: frame.column(crate::types::PriceColumn::Close).unwrap()[i],
                volume: None,
            })
            .collect();
        PriceFrame::from_bars(&bars)
    }

    /// Close-only frame
    pub fn make_close_only(closes: &[f64]) -> PriceFrame {
        PriceFrame::from_columns(
            (0..closes.len() as i64).collect(),
            None,
            None,
            None,
            Some(closes.to_vec()),
            None,
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_aliases_and_checks_category() {
        assert_eq!(IndicatorKind::parse("technical", "BB").unwrap(), IndicatorKind::BollingerBands);
        assert_eq!(IndicatorKind::parse("price-action", "gap").unwrap(), IndicatorKind::OpeningGap);
        assert_eq!(IndicatorKind::parse("external", "vix").unwrap(), IndicatorKind::VolatilityIndex);

        let err = IndicatorKind::parse("technical", "opening_gap").unwrap_err();
        assert!(matches!(err, AnalysisError::UnknownIndicator { .. }));
        assert!(IndicatorKind::parse("technical", "ichimoku").is_err());
    }

    #[test]
    fn test_factory_covers_every_kind() {
        for kind in IndicatorKind::all() {
            let indicator = build_indicator(kind);
            assert_eq!(indicator.kind(), kind);
            assert_eq!(indicator.name(), kind.key());
        }
        assert_eq!(IndicatorKind::all().count(), 23);
    }

    #[test]
    fn test_context_signals() {
        assert_eq!(IndicatorKind::for_context(AnalysisContext::Crypto).len(), 2);
        assert_eq!(IndicatorKind::for_context(AnalysisContext::Index).len(), 3);
        assert!(IndicatorKind::for_context(AnalysisContext::Neutral).is_empty());
    }

    #[test]
    fn test_period_param_validation() {
        let p = params(&[("period", 2.5)]);
        assert!(period_param(&p, "period", 14).is_err());
        assert_eq!(period_param(&IndicatorParams::new(), "period", 14).unwrap(), 14);
    }
}
