//! Liquidity sweep reversal
//!
//! Price pierces a prior swing high/low by a minimum distance, closes back
//! inside with a dominant rejection wick, and the most recent candles show
//! momentum shifting the other way.

use super::indicators::{net_change, pips, swing_high, swing_low, to_f64};
use super::{clamp_confidence, Detector};
use config::DetectorsConfig;
use rust_decimal::Decimal;
use types::{Candle, Direction, PatternCandidate, PatternMetrics, PatternType, Timeframe};

pub struct LiquiditySweepDetector {
    config: DetectorsConfig,
    pip_size: Decimal,
}

impl LiquiditySweepDetector {
    pub fn new(config: DetectorsConfig, pip_size: Decimal) -> Self {
        Self { config, pip_size }
    }

    fn build(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        last: &Candle,
        direction: Direction,
        pierce_pips: f64,
        wick_ratio: f64,
        swept_level: Decimal,
    ) -> PatternCandidate {
        // Confidence grows with rejection depth and the size of the pierce
        let confidence = clamp_confidence(35.0 + wick_ratio * 45.0 + pierce_pips.min(10.0) * 2.0);

        let entry = last.close;
        let (stop_loss, take_profit) = match direction {
            // Short after a swept high: stop beyond the sweep extreme,
            // target twice the risked distance
            Direction::Short => {
                let stop = last.high;
                (stop, entry - (stop - entry) * Decimal::from(2))
            }
            Direction::Long => {
                let stop = last.low;
                (stop, entry + (entry - stop) * Decimal::from(2))
            }
        };

        PatternCandidate {
            symbol: symbol.to_string(),
            timeframe,
            pattern_type: PatternType::LiquiditySweep,
            direction,
            raw_confidence: confidence,
            metrics: PatternMetrics {
                displacement_pips: Some(pips((swept_level - entry).abs(), self.pip_size)),
                wick_ratio: Some(wick_ratio),
                ..PatternMetrics::default()
            },
            entry,
            stop_loss,
            take_profit,
            detected_at: last.open_time,
        }
    }
}

impl Detector for LiquiditySweepDetector {
    fn name(&self) -> &'static str {
        "liquidity_sweep"
    }

    fn min_window(&self) -> usize {
        self.config.sweep_lookback + self.config.sweep_shift_candles + 2
    }

    fn scan(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: &[Candle],
    ) -> Option<PatternCandidate> {
        let last = window.last()?;
        let range = last.range();
        if range.is_zero() {
            return None;
        }

        let min_pierce = Decimal::try_from(self.config.sweep_min_pierce_pips).ok()? * self.pip_size;
        let shift = net_change(window, self.config.sweep_shift_candles)?;

        // Sweep of the prior swing high: reversal short
        if let Some(high) = swing_high(window, self.config.sweep_lookback) {
            let pierce = last.high - high;
            let wick_ratio = to_f64(last.upper_wick() / range);
            if pierce >= min_pierce
                && last.close < high
                && wick_ratio >= self.config.sweep_min_wick_ratio
                && shift < Decimal::ZERO
            {
                return Some(self.build(
                    symbol,
                    timeframe,
                    last,
                    Direction::Short,
                    pips(pierce, self.pip_size),
                    wick_ratio,
                    high,
                ));
            }
        }

        // Sweep of the prior swing low: reversal long
        if let Some(low) = swing_low(window, self.config.sweep_lookback) {
            let pierce = low - last.low;
            let wick_ratio = to_f64(last.lower_wick() / range);
            if pierce >= min_pierce
                && last.close > low
                && wick_ratio >= self.config.sweep_min_wick_ratio
                && shift > Decimal::ZERO
            {
                return Some(self.build(
                    symbol,
                    timeframe,
                    last,
                    Direction::Long,
                    pips(pierce, self.pip_size),
                    wick_ratio,
                    low,
                ));
            }
        }

        None
    }
}
