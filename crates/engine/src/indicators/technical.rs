//! Technical indicators over OHLCV bars
//!
//! RSI, MACD, Bollinger, SMA, EMA, ATR and stochastic %K run on the `ta` crate;
//! Williams %R, CCI and ROC are computed directly. Each drops its warm-up rows.

use std::collections::VecDeque;
use std::fmt;

use ta::indicators::{
    AverageTrueRange, BollingerBands, ExponentialMovingAverage, FastStochastic,
    MovingAverageConvergenceDivergence, RelativeStrengthIndex, SimpleMovingAverage,
};
use ta::{Close, High, Low, Next};

use super::{float_param, params, period_param, Indicator, IndicatorKind, IndicatorParams};
use crate::error::{AnalysisError, EngineResult};
use crate::types::{IndicatorSeries, PriceColumn, PriceFrame, SeriesBuilder, SeriesOrigin};

const CLOSE: &[PriceColumn] = &[PriceColumn::Close];
const HLC: &[PriceColumn] = &[PriceColumn::High, PriceColumn::Low, PriceColumn::Close];

// ============================================================================
// Helpers
// ============================================================================

/// Bar view handed to `ta` indicators that read high/low/close
struct Hlc {
    high: f64,
    low: f64,
    close: f64,
}

impl High for Hlc {
    fn high(&self) -> f64 {
        self.high
    }
}

impl Low for Hlc {
    fn low(&self) -> f64 {
        self.low
    }
}

impl Close for Hlc {
    fn close(&self) -> f64 {
        self.close
    }
}

fn hlc_bars<'a>(prices: &'a PriceFrame, name: &str) -> EngineResult<impl Iterator<Item = Hlc> + 'a> {
    let high = prices.require(PriceColumn::High, name)?;
    let low = prices.require(PriceColumn::Low, name)?;
    let close = prices.require(PriceColumn::Close, name)?;
    Ok(high
        .iter()
        .zip(low)
        .zip(close)
        .map(|((h, l), c)| Hlc {
            high: *h,
            low: *l,
            close: *c,
        }))
}

fn bad_params(name: &str, err: impl fmt::Debug) -> AnalysisError {
    AnalysisError::validation(format!("invalid parameters for {name}: {err:?}"))
}

fn pct_distance(close: f64, reference: f64) -> f64 {
    (close - reference) / reference * 100.0
}

// ============================================================================
// 1. RSI
// ============================================================================

pub struct Rsi;

impl Indicator for Rsi {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Rsi
    }

    fn required_columns(&self) -> &'static [PriceColumn] {
        CLOSE
    }

    fn default_parameters(&self) -> IndicatorParams {
        params(&[("period", 14.0)])
    }

    fn calculate(&self, prices: &PriceFrame, p: &IndicatorParams) -> EngineResult<IndicatorSeries> {
        let close = prices.require(PriceColumn::Close, self.name())?;
        let period = period_param(p, "period", 14)?;
        let mut rsi = RelativeStrengthIndex::new(period).map_err(|e| bad_params(self.name(), e))?;

        let mut out = SeriesBuilder::new(self.name());
        for (i, (ts, c)) in prices.timestamps().iter().zip(close).enumerate() {
            let value = rsi.next(*c);
            if i >= period {
                out.push(*ts, value, &[]);
            }
        }
        Ok(out.finish(SeriesOrigin::Computed))
    }
}

// ============================================================================
// 2. MACD (value = MACD line)
// ============================================================================

pub struct Macd;

impl Indicator for Macd {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Macd
    }

    fn required_columns(&self) -> &'static [PriceColumn] {
        CLOSE
    }

    fn default_parameters(&self) -> IndicatorParams {
        params(&[("fast", 12.0), ("slow", 26.0), ("signal", 9.0)])
    }

    fn calculate(&self, prices: &PriceFrame, p: &IndicatorParams) -> EngineResult<IndicatorSeries> {
        let close = prices.require(PriceColumn::Close, self.name())?;
        let fast = period_param(p, "fast", 12)?;
        let slow = period_param(p, "slow", 26)?;
        let signal = period_param(p, "signal", 9)?;
        if fast >= slow {
            return Err(AnalysisError::validation(format!(
                "macd fast period ({fast}) must be below slow period ({slow})"
            )));
        }
        let mut macd = MovingAverageConvergenceDivergence::new(fast, slow, signal)
            .map_err(|e| bad_params(self.name(), e))?;

        let warmup = slow + signal - 2;
        let mut out = SeriesBuilder::new(self.name()).with_aux(&["signal", "histogram"]);
        for (i, (ts, c)) in prices.timestamps().iter().zip(close).enumerate() {
            let o = macd.next(*c);
            if i >= warmup {
                out.push(*ts, o.macd, &[o.signal, o.histogram]);
            }
        }
        Ok(out.finish(SeriesOrigin::Computed))
    }
}

// ============================================================================
// 3. Bollinger Bands (value = %B)
// ============================================================================

pub struct Bollinger;

impl Indicator for Bollinger {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::BollingerBands
    }

    fn required_columns(&self) -> &'static [PriceColumn] {
        CLOSE
    }

    fn default_parameters(&self) -> IndicatorParams {
        params(&[("period", 20.0), ("std_dev", 2.0)])
    }

    fn calculate(&self, prices: &PriceFrame, p: &IndicatorParams) -> EngineResult<IndicatorSeries> {
        let close = prices.require(PriceColumn::Close, self.name())?;
        let period = period_param(p, "period", 20)?;
        let multiplier = float_param(p, "std_dev", 2.0)?;
        let mut bb = BollingerBands::new(period, multiplier).map_err(|e| bad_params(self.name(), e))?;

        let mut out = SeriesBuilder::new(self.name()).with_aux(&["upper", "middle", "lower", "bandwidth"]);
        for (i, (ts, c)) in prices.timestamps().iter().zip(close).enumerate() {
            let o = bb.next(*c);
            if i + 1 < period {
                continue;
            }
            // flat window: upper == lower, %B undefined and skipped
            let pct_b = (c - o.lower) / (o.upper - o.lower);
            let bandwidth = (o.upper - o.lower) / o.average;
            out.push(*ts, pct_b, &[o.upper, o.average, o.lower, bandwidth]);
        }
        Ok(out.finish(SeriesOrigin::Computed))
    }
}

// ============================================================================
// 4-5. Moving averages (value = average, aux = close distance %)
// ============================================================================

pub struct Sma;

impl Indicator for Sma {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Sma
    }

    fn required_columns(&self) -> &'static [PriceColumn] {
        CLOSE
    }

    fn default_parameters(&self) -> IndicatorParams {
        params(&[("period", 20.0)])
    }

    fn calculate(&self, prices: &PriceFrame, p: &IndicatorParams) -> EngineResult<IndicatorSeries> {
        let close = prices.require(PriceColumn::Close, self.name())?;
        let period = period_param(p, "period", 20)?;
        let mut sma = SimpleMovingAverage::new(period).map_err(|e| bad_params(self.name(), e))?;

        let mut out = SeriesBuilder::new(self.name()).with_aux(&["close_distance_pct"]);
        for (i, (ts, c)) in prices.timestamps().iter().zip(close).enumerate() {
            let avg = sma.next(*c);
            if i + 1 >= period {
                out.push(*ts, avg, &[pct_distance(*c, avg)]);
            }
        }
        Ok(out.finish(SeriesOrigin::Computed))
    }
}

pub struct Ema;

impl Indicator for Ema {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Ema
    }

    fn required_columns(&self) -> &'static [PriceColumn] {
        CLOSE
    }

    fn default_parameters(&self) -> IndicatorParams {
        params(&[("period", 20.0)])
    }

    fn calculate(&self, prices: &PriceFrame, p: &IndicatorParams) -> EngineResult<IndicatorSeries> {
        let close = prices.require(PriceColumn::Close, self.name())?;
        let period = period_param(p, "period", 20)?;
        let mut ema = ExponentialMovingAverage::new(period).map_err(|e| bad_params(self.name(), e))?;

        let mut out = SeriesBuilder::new(self.name()).with_aux(&["close_distance_pct"]);
        for (i, (ts, c)) in prices.timestamps().iter().zip(close).enumerate() {
            let avg = ema.next(*c);
            if i + 1 >= period {
                out.push(*ts, avg, &[pct_distance(*c, avg)]);
            }
        }
        Ok(out.finish(SeriesOrigin::Computed))
    }
}

// ============================================================================
// 6. ATR
// ============================================================================

pub struct Atr;

impl Indicator for Atr {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Atr
    }

    fn required_columns(&self) -> &'static [PriceColumn] {
        HLC
    }

    fn default_parameters(&self) -> IndicatorParams {
        params(&[("period", 14.0)])
    }

    fn calculate(&self, prices: &PriceFrame, p: &IndicatorParams) -> EngineResult<IndicatorSeries> {
        let bars = hlc_bars(prices, self.name())?;
        let period = period_param(p, "period", 14)?;
        let mut atr = AverageTrueRange::new(period).map_err(|e| bad_params(self.name(), e))?;

        let mut out = SeriesBuilder::new(self.name()).with_aux(&["atr_pct"]);
        for (i, (ts, bar)) in prices.timestamps().iter().zip(bars).enumerate() {
            let value = atr.next(&bar);
            if i >= period {
                out.push(*ts, value, &[value / bar.close * 100.0]);
            }
        }
        Ok(out.finish(SeriesOrigin::Computed))
    }
}

// ============================================================================
// 7. Stochastic (value = %K, aux = %D)
// ============================================================================

pub struct Stochastic;

impl Indicator for Stochastic {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Stochastic
    }

    fn required_columns(&self) -> &'static [PriceColumn] {
        HLC
    }

    fn default_parameters(&self) -> IndicatorParams {
        params(&[("period", 14.0), ("smooth", 3.0)])
    }

    fn calculate(&self, prices: &PriceFrame, p: &IndicatorParams) -> EngineResult<IndicatorSeries> {
        let bars = hlc_bars(prices, self.name())?;
        let period = period_param(p, "period", 14)?;
        let smooth = period_param(p, "smooth", 3)?;
        let mut k = FastStochastic::new(period).map_err(|e| bad_params(self.name(), e))?;
        let mut d = SimpleMovingAverage::new(smooth).map_err(|e| bad_params(self.name(), e))?;

        let warmup = period + smooth - 2;
        let mut out = SeriesBuilder::new(self.name()).with_aux(&["d"]);
        for (i, (ts, bar)) in prices.timestamps().iter().zip(bars).enumerate() {
            let k_value = k.next(&bar);
            let d_value = d.next(k_value);
            if i >= warmup {
                out.push(*ts, k_value, &[d_value]);
            }
        }
        Ok(out.finish(SeriesOrigin::Computed))
    }
}

// ============================================================================
// 8. Williams %R
// ============================================================================

pub struct WilliamsR;

impl Indicator for WilliamsR {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::WilliamsR
    }

    fn required_columns(&self) -> &'static [PriceColumn] {
        HLC
    }

    fn default_parameters(&self) -> IndicatorParams {
        params(&[("period", 14.0)])
    }

    fn calculate(&self, prices: &PriceFrame, p: &IndicatorParams) -> EngineResult<IndicatorSeries> {
        let high = prices.require(PriceColumn::High, self.name())?;
        let low = prices.require(PriceColumn::Low, self.name())?;
        let close = prices.require(PriceColumn::Close, self.name())?;
        let period = period_param(p, "period", 14)?;

        let mut out = SeriesBuilder::new(self.name());
        for i in (period - 1)..prices.len() {
            let window = i + 1 - period..=i;
            let hh = high[window.clone()].iter().copied().fold(f64::MIN, f64::max);
            let ll = low[window].iter().copied().fold(f64::MAX, f64::min);
            // zero range yields NaN and the row is skipped
            let value = -100.0 * (hh - close[i]) / (hh - ll);
            out.push(prices.timestamps()[i], value, &[]);
        }
        Ok(out.finish(SeriesOrigin::Computed))
    }
}

// ============================================================================
// 9. CCI
// ============================================================================

pub struct Cci;

impl Indicator for Cci {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Cci
    }

    fn required_columns(&self) -> &'static [PriceColumn] {
        HLC
    }

    fn default_parameters(&self) -> IndicatorParams {
        params(&[("period", 20.0), ("constant", 0.015)])
    }

    fn calculate(&self, prices: &PriceFrame, p: &IndicatorParams) -> EngineResult<IndicatorSeries> {
        let high = prices.require(PriceColumn::High, self.name())?;
        let low = prices.require(PriceColumn::Low, self.name())?;
        let close = prices.require(PriceColumn::Close, self.name())?;
        let period = period_param(p, "period", 20)?;
        let constant = float_param(p, "constant", 0.015)?;

        let typical: Vec<f64> = (0..prices.len())
            .map(|i| (high[i] + low[i] + close[i]) / 3.0)
            .collect();
        let mut window: VecDeque<f64> = VecDeque::with_capacity(period);

        let mut out = SeriesBuilder::new(self.name());
        for (i, tp) in typical.iter().enumerate() {
            window.push_back(*tp);
            if window.len() > period {
                window.pop_front();
            }
            if window.len() < period {
                continue;
            }
            let sma = window.iter().sum::<f64>() / period as f64;
            let mad = window.iter().map(|x| (x - sma).abs()).sum::<f64>() / period as f64;
            out.push(prices.timestamps()[i], (tp - sma) / (constant * mad), &[]);
        }
        Ok(out.finish(SeriesOrigin::Computed))
    }
}

// ============================================================================
// 10. Rate of change (percent)
// ============================================================================

pub struct Roc;

impl Indicator for Roc {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Roc
    }

    fn required_columns(&self) -> &'static [PriceColumn] {
        CLOSE
    }

    fn default_parameters(&self) -> IndicatorParams {
        params(&[("period", 10.0)])
    }

    fn calculate(&self, prices: &PriceFrame, p: &IndicatorParams) -> EngineResult<IndicatorSeries> {
        let close = prices.require(PriceColumn::Close, self.name())?;
        let period = period_param(p, "period", 10)?;

        let mut out = SeriesBuilder::new(self.name());
        for i in period..prices.len() {
            let base = close[i - period];
            out.push(prices.timestamps()[i], (close[i] - base) / base * 100.0, &[]);
        }
        Ok(out.finish(SeriesOrigin::Computed))
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{make_close_only, make_frame, make_frame_without_volume};
    use super::super::build_indicator;
    use super::*;
    use crate::stats;

    fn trailing_mean(values: &[f64], period: usize) -> Option<f64> {
        stats::mean(&values[values.len() - period..])
    }

    #[test]
    fn test_every_technical_indicator_runs_on_full_bars() {
        let frame = make_frame(120);
        for kind in IndicatorKind::technical() {
            let series = build_indicator(*kind).calculate_default(&frame).unwrap();
            assert!(!series.is_empty(), "{kind} produced no rows");
            assert!(series.is_sorted());
            assert!(series.values.iter().all(|v| v.is_finite()));
            assert!(series.len() < frame.len(), "{kind} kept warm-up rows");
        }
    }

    #[test]
    fn test_volume_is_not_required_by_technical_set() {
        let frame = make_frame_without_volume(80);
        for kind in IndicatorKind::technical() {
            assert!(build_indicator(*kind).calculate_default(&frame).is_ok());
        }
    }

    #[test]
    fn test_rsi_is_bounded_and_drops_warmup() {
        let frame = make_frame(60);
        let series = Rsi.calculate_default(&frame).unwrap();
        assert_eq!(series.len(), 60 - 14);
        assert_eq!(series.timestamps[0], frame.timestamps()[14]);
        assert!(series.values.iter().all(|v| (0.0..=100.0).contains(v)));
    }

    #[test]
    fn test_atr_needs_high_low() {
        let frame = make_close_only(&[1.0, 2.0, 3.0]);
        let err = Atr.calculate_default(&frame).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingColumn { column: PriceColumn::High, .. }));
    }

    #[test]
    fn test_close_only_frame_supports_close_indicators() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0).collect();
        let frame = make_close_only(&closes);
        assert!(Sma.calculate_default(&frame).is_ok());
        assert!(Macd.calculate_default(&frame).is_ok());
        assert!(Cci.calculate_default(&frame).is_err());
    }

    #[test]
    fn test_roc_matches_direct_formula() {
        let frame = make_close_only(&[100.0, 110.0, 121.0]);
        let series = Roc.calculate(&frame, &params(&[("period", 1.0)])).unwrap();
        assert_eq!(series.len(), 2);
        assert!((series.values[0] - 10.0).abs() < 1e-9);
        assert!((series.values[1] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_williams_r_range() {
        let series = WilliamsR.calculate_default(&make_frame(50)).unwrap();
        assert!(series.values.iter().all(|v| (-100.0..=0.0).contains(v)));
    }

    #[test]
    fn test_macd_rejects_inverted_periods() {
        let frame = make_frame(60);
        let bad = params(&[("fast", 30.0), ("slow", 10.0)]);
        assert!(matches!(Macd.calculate(&frame, &bad), Err(AnalysisError::Validation(_))));
    }

    #[test]
    fn test_sma_matches_trailing_mean() {
        let frame = make_frame(40);
        let series = Sma.calculate_default(&frame).unwrap();
        let close = frame.column(PriceColumn::Close).unwrap();
        let expected = trailing_mean(close, 20).unwrap();
        assert!((series.values.last().unwrap() - expected).abs() < 1e-9);
    }
}
