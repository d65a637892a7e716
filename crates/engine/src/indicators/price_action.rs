//! Price-action indicators
//!
//! Bar-shape, gap, momentum and volume measures. Several need the volume
//! column, which may be absent on ingest; those fail with `MissingColumn`
//! and are skipped by the manager.

use super::{float_param, params, period_param, Indicator, IndicatorKind, IndicatorParams};
use crate::error::{AnalysisError, EngineResult};
use crate::stats;
use crate::types::{IndicatorSeries, PriceColumn, PriceFrame, SeriesBuilder, SeriesOrigin};

/// Bars beyond this opening gap (percent) are flagged significant
pub const DEFAULT_GAP_THRESHOLD_PCT: f64 = 0.5;

const CLOSE: &[PriceColumn] = &[PriceColumn::Close];
const VOLUME: &[PriceColumn] = &[PriceColumn::Volume];
const HL: &[PriceColumn] = &[PriceColumn::High, PriceColumn::Low];
const HLC: &[PriceColumn] = &[PriceColumn::High, PriceColumn::Low, PriceColumn::Close];
const OPEN_CLOSE: &[PriceColumn] = &[PriceColumn::Open, PriceColumn::Close];

/// Percent change over `period` bars; undefined where the base is zero
fn pct_change(values: &[f64], period: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| {
            if i < period || values[i - period] == 0.0 {
                f64::NAN
            } else {
                (values[i] / values[i - period] - 1.0) * 100.0
            }
        })
        .collect()
}

fn emit(name: &str, timestamps: &[i64], values: &[f64]) -> IndicatorSeries {
    let mut out = SeriesBuilder::new(name);
    for (ts, v) in timestamps.iter().zip(values) {
        out.push(*ts, *v, &[]);
    }
    out.finish(SeriesOrigin::Computed)
}

// ============================================================================
// Volume
// ============================================================================

/// Volume relative to its moving average
pub struct VolumeMaRatio;

impl Indicator for VolumeMaRatio {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::VolumeMaRatio
    }

    fn required_columns(&self) -> &'static [PriceColumn] {
        VOLUME
    }

    fn default_parameters(&self) -> IndicatorParams {
        params(&[("period", 20.0)])
    }

    fn calculate(&self, prices: &PriceFrame, p: &IndicatorParams) -> EngineResult<IndicatorSeries> {
        let volume = prices.require(PriceColumn::Volume, self.name())?;
        let period = period_param(p, "period", 20)?;
        let ma = stats::rolling_mean(volume, period);

        let mut out = SeriesBuilder::new(self.name()).with_aux(&["volume_ma"]);
        for (i, ts) in prices.timestamps().iter().enumerate() {
            // NaN warm-up and zero averages fall out as non-finite
            out.push(*ts, volume[i] / ma[i], &[ma[i]]);
        }
        Ok(out.finish(SeriesOrigin::Computed))
    }
}

/// Percent change in volume over `period` bars
pub struct VolumeMomentum;

impl Indicator for VolumeMomentum {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::VolumeMomentum
    }

    fn required_columns(&self) -> &'static [PriceColumn] {
        VOLUME
    }

    fn default_parameters(&self) -> IndicatorParams {
        params(&[("period", 10.0)])
    }

    fn calculate(&self, prices: &PriceFrame, p: &IndicatorParams) -> EngineResult<IndicatorSeries> {
        let volume = prices.require(PriceColumn::Volume, self.name())?;
        let period = period_param(p, "period", 10)?;
        Ok(emit(self.name(), prices.timestamps(), &pct_change(volume, period)))
    }
}

// ============================================================================
// Range and volatility
// ============================================================================

/// Rolling standard deviation of true range as a percent of close
pub struct TrueRangeVolatility;

impl Indicator for TrueRangeVolatility {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::TrueRangeVolatility
    }

    fn required_columns(&self) -> &'static [PriceColumn] {
        HLC
    }

    fn default_parameters(&self) -> IndicatorParams {
        params(&[("period", 20.0)])
    }

    fn calculate(&self, prices: &PriceFrame, p: &IndicatorParams) -> EngineResult<IndicatorSeries> {
        let high = prices.require(PriceColumn::High, self.name())?;
        let low = prices.require(PriceColumn::Low, self.name())?;
        let close = prices.require(PriceColumn::Close, self.name())?;
        let period = period_param(p, "period", 20)?;
        if period < 2 {
            return Err(AnalysisError::validation(format!(
                "{} needs a period of at least 2, got {period}",
                self.name()
            )));
        }

        let tr_pct: Vec<f64> = stats::true_range(high, low, close)
            .iter()
            .zip(close)
            .map(|(tr, c)| tr / c * 100.0)
            .collect();
        // the first bar has no previous close, so windows start at bar 1
        let mut volatility = vec![f64::NAN; tr_pct.len()];
        let mut mean = vec![f64::NAN; tr_pct.len()];
        if tr_pct.len() > 1 {
            let std = stats::rolling_std(&tr_pct[1..], period);
            let avg = stats::rolling_mean(&tr_pct[1..], period);
            volatility[1..].copy_from_slice(&std);
            mean[1..].copy_from_slice(&avg);
        }

        let mut out = SeriesBuilder::new(self.name()).with_aux(&["tr_pct_mean"]);
        for (i, ts) in prices.timestamps().iter().enumerate() {
            out.push(*ts, volatility[i], &[mean[i]]);
        }
        Ok(out.finish(SeriesOrigin::Computed))
    }
}

/// Bar range relative to its recent average range
pub struct DailyRangeRatio;

impl Indicator for DailyRangeRatio {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::DailyRangeRatio
    }

    fn required_columns(&self) -> &'static [PriceColumn] {
        HL
    }

    fn default_parameters(&self) -> IndicatorParams {
        params(&[("period", 20.0)])
    }

    fn calculate(&self, prices: &PriceFrame, p: &IndicatorParams) -> EngineResult<IndicatorSeries> {
        let high = prices.require(PriceColumn::High, self.name())?;
        let low = prices.require(PriceColumn::Low, self.name())?;
        let period = period_param(p, "period", 20)?;

        let range: Vec<f64> = high.iter().zip(low).map(|(h, l)| h - l).collect();
        let avg = stats::rolling_mean(&range, period);

        let mut out = SeriesBuilder::new(self.name()).with_aux(&["range"]);
        for (i, ts) in prices.timestamps().iter().enumerate() {
            out.push(*ts, range[i] / avg[i], &[range[i]]);
        }
        Ok(out.finish(SeriesOrigin::Computed))
    }
}

// ============================================================================
// Bar shape
// ============================================================================

/// Open versus previous close, in percent.
/// Aux: direction (+1 up, -1 down, 0 flat) and a significance flag.
pub struct OpeningGap;

impl Indicator for OpeningGap {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::OpeningGap
    }

    fn required_columns(&self) -> &'static [PriceColumn] {
        OPEN_CLOSE
    }

    fn default_parameters(&self) -> IndicatorParams {
        params(&[("threshold_pct", DEFAULT_GAP_THRESHOLD_PCT)])
    }

    fn calculate(&self, prices: &PriceFrame, p: &IndicatorParams) -> EngineResult<IndicatorSeries> {
        let open = prices.require(PriceColumn::Open, self.name())?;
        let close = prices.require(PriceColumn::Close, self.name())?;
        let threshold = float_param(p, "threshold_pct", DEFAULT_GAP_THRESHOLD_PCT)?.abs();

        let mut out = SeriesBuilder::new(self.name()).with_aux(&["direction", "significant"]);
        for i in 1..prices.len() {
            let prev = close[i - 1];
            if prev == 0.0 {
                continue;
            }
            let gap = (open[i] - prev) / prev * 100.0;
            let direction = if gap > 0.0 {
                1.0
            } else if gap < 0.0 {
                -1.0
            } else {
                0.0
            };
            let significant = if gap.abs() > threshold { 1.0 } else { 0.0 };
            out.push(prices.timestamps()[i], gap, &[direction, significant]);
        }
        Ok(out.finish(SeriesOrigin::Computed))
    }
}

/// Body size as a fraction of the bar range (0 for a zero-range bar).
/// Aux: upper and lower wick fractions.
pub struct CandleBody;

impl Indicator for CandleBody {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::CandleBody
    }

    fn required_columns(&self) -> &'static [PriceColumn] {
        &PriceColumn::OHLC
    }

    fn default_parameters(&self) -> IndicatorParams {
        IndicatorParams::new()
    }

    fn calculate(&self, prices: &PriceFrame, _p: &IndicatorParams) -> EngineResult<IndicatorSeries> {
        let open = prices.require(PriceColumn::Open, self.name())?;
        let high = prices.require(PriceColumn::High, self.name())?;
        let low = prices.require(PriceColumn::Low, self.name())?;
        let close = prices.require(PriceColumn::Close, self.name())?;

        let mut out = SeriesBuilder::new(self.name()).with_aux(&["upper_wick", "lower_wick"]);
        for i in 0..prices.len() {
            let range = high[i] - low[i];
            let (body, upper, lower) = if range > 0.0 {
                (
                    (close[i] - open[i]).abs() / range,
                    (high[i] - open[i].max(close[i])) / range,
                    (open[i].min(close[i]) - low[i]) / range,
                )
            } else {
                (0.0, 0.0, 0.0)
            };
            out.push(prices.timestamps()[i], body, &[upper, lower]);
        }
        Ok(out.finish(SeriesOrigin::Computed))
    }
}

// ============================================================================
// Momentum
// ============================================================================

/// Percent change in close over `period` bars
pub struct PriceMomentum;

impl Indicator for PriceMomentum {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::PriceMomentum
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
        Ok(emit(self.name(), prices.timestamps(), &pct_change(close, period)))
    }
}

/// Bar-over-bar change of price momentum
pub struct PriceAcceleration;

impl Indicator for PriceAcceleration {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::PriceAcceleration
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
        let momentum = pct_change(close, period);

        let acceleration: Vec<f64> = (0..momentum.len())
            .map(|i| if i == 0 { f64::NAN } else { momentum[i] - momentum[i - 1] })
            .collect();
        Ok(emit(self.name(), prices.timestamps(), &acceleration))
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::{make_close_only, make_frame, make_frame_without_volume};
    use super::super::build_indicator;
    use super::*;
    use crate::types::PriceBar;

    fn bar(ts: i64, open: f64, high: f64, low: f64, close: f64) -> PriceBar {
        PriceBar {
            timestamp: ts,
            open,
            high,
            low,
            close,
            volume: None,
        }
    }

    #[test]
    fn test_every_price_action_indicator_runs_with_volume() {
        let frame = make_frame(80);
        for kind in IndicatorKind::price_action() {
            let series = build_indicator(*kind).calculate_default(&frame).unwrap();
            assert!(!series.is_empty(), "{kind} produced no rows");
            assert!(series.values.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_volatility_rejects_single_bar_period() {
        let frame = make_frame(40);
        let one = params(&[("period", 1.0)]);
        assert!(matches!(
            TrueRangeVolatility.calculate(&frame, &one),
            Err(AnalysisError::Validation(_))
        ));
        let two = params(&[("period", 2.0)]);
        assert!(TrueRangeVolatility.calculate(&frame, &two).is_ok());
    }

    #[test]
    fn test_volume_indicators_fail_without_volume() {
        let frame = make_frame_without_volume(40);
        for indicator in [build_indicator(IndicatorKind::VolumeMaRatio), build_indicator(IndicatorKind::VolumeMomentum)] {
            let err = indicator.calculate_default(&frame).unwrap_err();
            assert!(matches!(err, AnalysisError::MissingColumn { column: PriceColumn::Volume, .. }));
        }
        assert!(OpeningGap.calculate_default(&frame).is_ok());
        assert!(CandleBody.calculate_default(&frame).is_ok());
    }

    #[test]
    fn test_opening_gap_flags_significance() {
        let frame = PriceFrame::from_bars(&[
            bar(0, 100.0, 101.0, 99.0, 100.0),
            bar(1, 101.0, 102.0, 100.5, 101.5), // +1.0% gap
            bar(2, 101.6, 102.0, 101.0, 101.8), // ~+0.1% gap
            bar(3, 100.0, 102.0, 99.0, 101.0),  // ~-1.77% gap
        ]);
        let series = OpeningGap.calculate_default(&frame).unwrap();
        assert_eq!(series.len(), 3);
        assert!((series.values[0] - 1.0).abs() < 1e-9);

        let significant = series.aux_column("significant").unwrap();
        assert_eq!(significant, &[1.0, 0.0, 1.0]);
        let direction = series.aux_column("direction").unwrap();
        assert_eq!(direction, &[1.0, 1.0, -1.0]);
    }

    #[test]
    fn test_opening_gap_needs_open() {
        let frame = make_close_only(&[1.0, 2.0]);
        let err = OpeningGap.calculate_default(&frame).unwrap_err();
        assert!(matches!(err, AnalysisError::MissingColumn { column: PriceColumn::Open, .. }));
    }

    #[test]
    fn test_candle_body_zero_range_is_zero() {
        let frame = PriceFrame::from_bars(&[
            bar(0, 10.0, 10.0, 10.0, 10.0),
            bar(1, 10.0, 12.0, 9.0, 11.5),
        ]);
        let series = CandleBody.calculate_default(&frame).unwrap();
        assert_eq!(series.values[0], 0.0);
        assert!((series.values[1] - 0.5).abs() < 1e-9);

        let upper = series.aux_column("upper_wick").unwrap();
        let lower = series.aux_column("lower_wick").unwrap();
        assert!((upper[1] - 0.5 / 3.0).abs() < 1e-9);
        assert!((lower[1] - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_momentum_and_acceleration() {
        let frame = make_close_only(&[100.0, 110.0, 132.0]);
        let p = params(&[("period", 1.0)]);
        let momentum = PriceMomentum.calculate(&frame, &p).unwrap();
        assert_eq!(momentum.len(), 2);
        assert!((momentum.values[1] - 20.0).abs() < 1e-9);

        let acceleration = PriceAcceleration.calculate(&frame, &p).unwrap();
        assert_eq!(acceleration.len(), 1);
        assert!((acceleration.values[0] - 10.0).abs() < 1e-9);
    }
}
