//! Displacement / order-block retest
//!
//! An impulsive candle displaces price by a minimum pip distance on elevated
//! volume; the zone it launched from becomes an order block. A later retest
//! of that zone in the impulse direction is the candidate.

use super::indicators::{average_volume, pips, to_f64};
use super::{clamp_confidence, Detector};
use config::DetectorsConfig;
use rust_decimal::Decimal;
use types::{Candle, Direction, PatternCandidate, PatternMetrics, PatternType, Timeframe};

pub struct OrderBlockDetector {
    config: DetectorsConfig,
    pip_size: Decimal,
}

struct Impulse {
    index: usize,
    direction: Direction,
    displacement_pips: f64,
    volume_ratio: f64,
    /// Origin zone the retest must touch
    zone_top: Decimal,
    zone_bottom: Decimal,
    /// Impulse extreme, reused as the natural target
    extreme: Decimal,
}

impl OrderBlockDetector {
    pub fn new(config: DetectorsConfig, pip_size: Decimal) -> Self {
        Self { config, pip_size }
    }

    /// Most recent impulse candle in the window body (excluding the last
    /// candle, which is the retest under test)
    fn find_impulse(&self, window: &[Candle]) -> Option<Impulse> {
        let avg_volume = average_volume(&window[..window.len() - 1])?;
        if avg_volume.is_zero() {
            return None;
        }
        let min_displacement =
            Decimal::try_from(self.config.ob_min_displacement_pips).ok()? * self.pip_size;

        for (index, candle) in window[..window.len() - 1].iter().enumerate().rev() {
            let body = candle.body();
            let volume_ratio = to_f64(candle.volume / avg_volume);
            if body >= min_displacement && volume_ratio >= self.config.ob_min_volume_ratio {
                let direction = if candle.is_bullish() {
                    Direction::Long
                } else {
                    Direction::Short
                };
                let (zone_top, zone_bottom, extreme) = match direction {
                    Direction::Long => (candle.open, candle.low, candle.high),
                    Direction::Short => (candle.high, candle.open, candle.low),
                };
                return Some(Impulse {
                    index,
                    direction,
                    displacement_pips: pips(body, self.pip_size),
                    volume_ratio,
                    zone_top,
                    zone_bottom,
                    extreme,
                });
            }
        }
        None
    }
}

impl Detector for OrderBlockDetector {
    fn name(&self) -> &'static str {
        "order_block"
    }

    fn min_window(&self) -> usize {
        10
    }

    fn scan(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: &[Candle],
    ) -> Option<PatternCandidate> {
        let last = window.last()?;
        let impulse = self.find_impulse(window)?;

        // The retest must come after the impulse, not be the impulse itself
        if impulse.index + 1 >= window.len() - 1 {
            return None;
        }

        let tolerance =
            Decimal::try_from(self.config.ob_retest_tolerance_pips).ok()? * self.pip_size;

        let retested = match impulse.direction {
            // Bullish impulse: price dips back into the origin zone
            Direction::Long => {
                last.low <= impulse.zone_top + tolerance && last.close > impulse.zone_bottom
            }
            Direction::Short => {
                last.high >= impulse.zone_bottom - tolerance && last.close < impulse.zone_top
            }
        };
        if !retested {
            return None;
        }

        let confidence = clamp_confidence(
            30.0 + impulse.displacement_pips.min(30.0) + impulse.volume_ratio.min(4.0) * 10.0,
        );

        let entry = last.close;
        let stop_loss = match impulse.direction {
            Direction::Long => impulse.zone_bottom,
            Direction::Short => impulse.zone_top,
        };
        let take_profit = impulse.extreme;

        Some(PatternCandidate {
            symbol: symbol.to_string(),
            timeframe,
            pattern_type: PatternType::OrderBlock,
            direction: impulse.direction,
            raw_confidence: confidence,
            metrics: PatternMetrics {
                displacement_pips: Some(impulse.displacement_pips),
                volume_ratio: Some(impulse.volume_ratio),
                ..PatternMetrics::default()
            },
            entry,
            stop_loss,
            take_profit,
            detected_at: last.open_time,
        })
    }
}
