//! Three-candle imbalance (gap-fill)
//!
//! A displacement leaves a gap between candle 1's extreme and candle 3's
//! opposite extreme that candle 2 never filled. The candidate trades the
//! fill: back toward the untouched zone.

use super::indicators::{atr, pips};
use super::{clamp_confidence, Detector};
use config::DetectorsConfig;
use rust_decimal::Decimal;
use types::{Candle, Direction, PatternCandidate, PatternMetrics, PatternType, Timeframe};

pub struct ImbalanceDetector {
    config: DetectorsConfig,
    pip_size: Decimal,
}

impl ImbalanceDetector {
    pub fn new(config: DetectorsConfig, pip_size: Decimal) -> Self {
        Self { config, pip_size }
    }
}

impl Detector for ImbalanceDetector {
    fn name(&self) -> &'static str {
        "imbalance"
    }

    fn min_window(&self) -> usize {
        16
    }

    fn scan(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: &[Candle],
    ) -> Option<PatternCandidate> {
        let n = window.len();
        if n < 3 {
            return None;
        }
        let c1 = &window[n - 3];
        let c2 = &window[n - 2];
        let c3 = &window[n - 1];

        let min_gap = Decimal::try_from(self.config.imbalance_min_gap_pips).ok()? * self.pip_size;
        let reference_atr = atr(window, 14)?;

        // Bullish imbalance: gap above c1.high untouched by c2; fill is short
        let (direction, gap_near, gap_far) = if c3.low > c1.high && c2.low > c1.high {
            (Direction::Short, c3.low, c1.high)
        // Bearish imbalance: gap below c1.low untouched by c2; fill is long
        } else if c3.high < c1.low && c2.high < c1.low {
            (Direction::Long, c3.high, c1.low)
        } else {
            return None;
        };

        let gap = (gap_near - gap_far).abs();
        if gap < min_gap {
            return None;
        }

        // Confidence grows with gap size relative to current volatility
        let gap_vs_atr = if reference_atr.is_zero() {
            0.0
        } else {
            super::indicators::to_f64(gap / reference_atr)
        };
        let confidence =
            clamp_confidence(35.0 + pips(gap, self.pip_size).min(15.0) * 2.0 + gap_vs_atr * 10.0);

        let entry = c3.close;
        let (stop_loss, take_profit) = match direction {
            // Short into the bullish gap: target the far edge of the zone
            Direction::Short => (c3.high, gap_far),
            Direction::Long => (c3.low, gap_far),
        };

        Some(PatternCandidate {
            symbol: symbol.to_string(),
            timeframe,
            pattern_type: PatternType::Imbalance,
            direction,
            raw_confidence: confidence,
            metrics: PatternMetrics {
                displacement_pips: Some(pips(gap, self.pip_size)),
                range_ratio: Some(gap_vs_atr),
                ..PatternMetrics::default()
            },
            entry,
            stop_loss,
            take_profit,
            detected_at: c3.open_time,
        })
    }
}
