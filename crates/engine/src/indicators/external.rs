//! External context indicators
//!
//! These do not read price columns. Through the [`Indicator`] trait they
//! produce the deterministic synthetic series covering the price span;
//! live retrieval goes through [`crate::data_source::SourcePolicy`].

use super::{params, period_param, Indicator, IndicatorKind, IndicatorParams};
use crate::data_source::{DeterministicSynthetic, MarketSignal, SeriesRequest};
use crate::error::{AnalysisError, EngineResult};
use crate::types::{IndicatorSeries, PriceColumn, PriceFrame};

const DAY_MS: f64 = 86_400_000.0;

pub struct ExternalIndicator {
    kind: IndicatorKind,
}

impl ExternalIndicator {
    /// `kind` must be one of the external kinds
    pub fn new(kind: IndicatorKind) -> Self {
        Self { kind }
    }

    pub fn signal(&self) -> EngineResult<MarketSignal> {
        self.kind.market_signal().ok_or_else(|| {
            AnalysisError::validation(format!("{} is not an external signal", self.kind))
        })
    }
}

impl Indicator for ExternalIndicator {
    fn kind(&self) -> IndicatorKind {
        self.kind
    }

    fn required_columns(&self) -> &'static [PriceColumn] {
        &[]
    }

    fn default_parameters(&self) -> IndicatorParams {
        params(&[("seed", 42.0), ("interval_ms", DAY_MS), ("length", 365.0)])
    }

    /// Covers the frame's time span; an empty frame yields `length` points from epoch
    fn calculate(&self, prices: &PriceFrame, p: &IndicatorParams) -> EngineResult<IndicatorSeries> {
        let signal = self.signal()?;
        let seed = match p.get("seed") {
            None => 42,
            Some(v) if v.is_finite() && *v >= 0.0 && v.fract() == 0.0 => *v as u64,
            Some(v) => {
                return Err(AnalysisError::validation(format!(
                    "parameter 'seed' must be a non-negative integer, got {v}"
                )))
            }
        };
        let interval_ms = period_param(p, "interval_ms", DAY_MS as usize)? as i64;

        let request = match (prices.timestamps().first(), prices.timestamps().last()) {
            (Some(first), Some(last)) => SeriesRequest::covering(*first, *last, interval_ms),
            _ => SeriesRequest::new(0, interval_ms, period_param(p, "length", 365)?),
        };

        Ok(DeterministicSynthetic::new(seed).generate(signal, &request))
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::make_frame;
    use super::*;

    #[test]
    fn test_external_covers_price_span_deterministically() {
        let frame = make_frame(24 * 10); // ten days of hourly bars
        let indicator = ExternalIndicator::new(IndicatorKind::FearGreed);

        let a = indicator.calculate_default(&frame).unwrap();
        let b = indicator.calculate_default(&frame).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 10);
        assert!(a.values.iter().all(|v| (0.0..=100.0).contains(v)));
        assert!(a.origin.is_synthetic());
    }

    #[test]
    fn test_external_without_prices_uses_length() {
        let indicator = ExternalIndicator::new(IndicatorKind::TreasuryYield);
        let series = indicator
            .calculate(&PriceFrame::default(), &params(&[("length", 30.0)]))
            .unwrap();
        assert_eq!(series.len(), 30);
        assert!(series.values.iter().all(|v| (0.5..=6.0).contains(v)));
    }

    #[test]
    fn test_non_external_kind_is_rejected() {
        let indicator = ExternalIndicator::new(IndicatorKind::Rsi);
        assert!(indicator.calculate_default(&make_frame(5)).is_err());
    }
}
