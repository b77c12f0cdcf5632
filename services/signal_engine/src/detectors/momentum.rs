//! Momentum breakout
//!
//! The last candle's range dwarfs the recent average on surging volume and
//! its close clears the local high/low of the lookback window.

use super::indicators::{average_range, average_volume, swing_high, swing_low, to_f64};
use super::{clamp_confidence, Detector};
use config::DetectorsConfig;
use rust_decimal::Decimal;
use types::{Candle, Direction, PatternCandidate, PatternMetrics, PatternType, Timeframe};

pub struct MomentumBreakoutDetector {
    config: DetectorsConfig,
    pip_size: Decimal,
}

impl MomentumBreakoutDetector {
    pub fn new(config: DetectorsConfig, pip_size: Decimal) -> Self {
        Self { config, pip_size }
    }
}

impl Detector for MomentumBreakoutDetector {
    fn name(&self) -> &'static str {
        "momentum_breakout"
    }

    fn min_window(&self) -> usize {
        self.config.momentum_lookback + 2
    }

    fn scan(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: &[Candle],
    ) -> Option<PatternCandidate> {
        let last = window.last()?;
        let body = &window[..window.len() - 1];
        let avg_range = average_range(&body[body.len() - self.config.momentum_lookback..])?;
        let avg_volume = average_volume(&body[body.len() - self.config.momentum_lookback..])?;
        if avg_range.is_zero() || avg_volume.is_zero() {
            return None;
        }

        let range_ratio = to_f64(last.range() / avg_range);
        let volume_ratio = to_f64(last.volume / avg_volume);
        if range_ratio < self.config.momentum_range_multiple
            || volume_ratio < self.config.momentum_volume_surge
        {
            return None;
        }

        let local_high = swing_high(window, self.config.momentum_lookback)?;
        let local_low = swing_low(window, self.config.momentum_lookback)?;

        let direction = if last.close > local_high {
            Direction::Long
        } else if last.close < local_low {
            Direction::Short
        } else {
            return None;
        };

        let confidence = clamp_confidence(
            30.0 + range_ratio.min(5.0) * 8.0 + volume_ratio.min(4.0) * 8.0,
        );

        let entry = last.close;
        let (stop_loss, take_profit) = match direction {
            // Stop behind the broken level, target one breakout range beyond
            Direction::Long => (local_high.min(last.low + last.range() / Decimal::from(2)), entry + last.range()),
            Direction::Short => (local_low.max(last.high - last.range() / Decimal::from(2)), entry - last.range()),
        };

        Some(PatternCandidate {
            symbol: symbol.to_string(),
            timeframe,
            pattern_type: PatternType::MomentumBreakout,
            direction,
            raw_confidence: confidence,
            metrics: PatternMetrics {
                range_ratio: Some(range_ratio),
                volume_ratio: Some(volume_ratio),
                ..PatternMetrics::default()
            },
            entry,
            stop_loss,
            take_profit,
            detected_at: last.open_time,
        })
    }
}
