//! Indicator confluence
//!
//! Four independent reads of the window each cast a directional vote:
//! fast/slow moving-average posture, recent momentum, position against the
//! band mean, and close versus VWAP. Votes carry a dead zone scaled to
//! baseline volatility so hairline differences abstain, and a candidate
//! emerges only when enough votes agree on the same side. The MA-posture
//! vote must be among them: the other three all key off the most recent
//! close, so without the structural read they can line up on a one-candle
//! wiggle in an otherwise flat window.

use super::indicators::{atr, mean, net_change, std_dev, to_f64, vwap, MovingAverage};
use super::{clamp_confidence, Detector};
use config::DetectorsConfig;
use rust_decimal::Decimal;
use types::{Candle, Direction, PatternCandidate, PatternMetrics, PatternType, Timeframe};

const FAST_MA_PERIOD: usize = 5;
const SLOW_MA_PERIOD: usize = 20;
const MOMENTUM_CANDLES: usize = 5;

pub struct ConfluenceDetector {
    config: DetectorsConfig,
    #[allow(dead_code)]
    pip_size: Decimal,
}

fn margin_vote(value: f64, reference: f64, dead_zone: f64) -> Option<Direction> {
    let diff = value - reference;
    if diff > dead_zone {
        Some(Direction::Long)
    } else if diff < -dead_zone {
        Some(Direction::Short)
    } else {
        None
    }
}

impl ConfluenceDetector {
    pub fn new(config: DetectorsConfig, pip_size: Decimal) -> Self {
        Self { config, pip_size }
    }

    /// Fast MA above slow MA votes long, below votes short
    fn ma_vote(&self, window: &[Candle], dead_zone: f64) -> Option<Direction> {
        let mut fast = MovingAverage::new(FAST_MA_PERIOD);
        let mut slow = MovingAverage::new(SLOW_MA_PERIOD);
        for candle in window {
            fast.update(candle.close);
            slow.update(candle.close);
        }
        margin_vote(to_f64(fast.current()?), to_f64(slow.current()?), dead_zone)
    }

    fn momentum_vote(&self, window: &[Candle], dead_zone: f64) -> Option<Direction> {
        let change = net_change(window, MOMENTUM_CANDLES)?;
        margin_vote(to_f64(change), 0.0, dead_zone)
    }

    fn band_vote(&self, window: &[Candle], band_mean: f64, dead_zone: f64) -> Option<Direction> {
        margin_vote(to_f64(window.last()?.close), band_mean, dead_zone)
    }

    fn vwap_vote(&self, window: &[Candle], dead_zone: f64) -> Option<Direction> {
        let anchor = vwap(window)?;
        margin_vote(to_f64(window.last()?.close), to_f64(anchor), dead_zone)
    }
}

impl Detector for ConfluenceDetector {
    fn name(&self) -> &'static str {
        "confluence"
    }

    fn min_window(&self) -> usize {
        SLOW_MA_PERIOD.max(self.config.band_period) + 1
    }

    fn scan(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: &[Candle],
    ) -> Option<PatternCandidate> {
        let last = window.last()?;

        let baseline: Vec<f64> = window[window.len() - self.config.band_period..]
            .iter()
            .map(|c| to_f64(c.close))
            .collect();
        let band_mean = mean(&baseline)?;
        let sigma = std_dev(&baseline)?;
        if sigma == 0.0 {
            return None;
        }

        let ma = self.ma_vote(window, 0.25 * sigma);
        let votes = [
            ma,
            self.momentum_vote(window, sigma),
            self.band_vote(window, band_mean, sigma),
            self.vwap_vote(window, sigma),
        ];

        let long_votes = votes.iter().filter(|v| **v == Some(Direction::Long)).count();
        let short_votes = votes.iter().filter(|v| **v == Some(Direction::Short)).count();

        let (direction, agreeing) = if long_votes >= short_votes {
            (Direction::Long, long_votes)
        } else {
            (Direction::Short, short_votes)
        };
        if agreeing < usize::from(self.config.confluence_min_agreeing) || ma != Some(direction) {
            return None;
        }

        let reference_atr = atr(window, 14)?;
        if reference_atr.is_zero() {
            return None;
        }

        let entry = last.close;
        let (stop_loss, take_profit) = match direction {
            Direction::Long => (entry - reference_atr, entry + reference_atr * Decimal::from(2)),
            Direction::Short => (entry + reference_atr, entry - reference_atr * Decimal::from(2)),
        };

        let confidence = clamp_confidence(30.0 + agreeing as f64 * 12.0);

        Some(PatternCandidate {
            symbol: symbol.to_string(),
            timeframe,
            pattern_type: PatternType::Confluence,
            direction,
            raw_confidence: confidence,
            metrics: PatternMetrics {
                indicators_agreeing: Some(agreeing as u8),
                ..PatternMetrics::default()
            },
            entry,
            stop_loss,
            take_profit,
            detected_at: last.open_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::testkit::{candle, quiet_window};
    use rust_decimal_macros::dec;

    fn detector() -> ConfluenceDetector {
        ConfluenceDetector::new(DetectorsConfig::default(), dec!(0.0001))
    }

    /// Steady 2-pip-per-candle climb: every vote lines up long
    fn trending_window() -> Vec<Candle> {
        (0..30i64)
            .map(|i| {
                let close = dec!(1.1000) + Decimal::from(i * 2) * dec!(0.0001);
                candle(
                    i,
                    close - dec!(0.0002),
                    close + dec!(0.0001),
                    close - dec!(0.0003),
                    close,
                    dec!(100),
                )
            })
            .collect()
    }

    #[test]
    fn test_aligned_trend_produces_candidate() {
        let candidate = detector()
            .scan("EURUSD", Timeframe::M15, &trending_window())
            .expect("confluence expected");
        assert_eq!(candidate.pattern_type, PatternType::Confluence);
        assert_eq!(candidate.direction, Direction::Long);
        assert!(candidate.metrics.indicators_agreeing.unwrap() >= 3);
        assert!(candidate.take_profit > candidate.entry);
        assert!(candidate.stop_loss < candidate.entry);
    }

    #[test]
    fn test_choppy_window_abstains() {
        // Alternating 1-pip wiggles: the close-keyed votes may share the
        // last wiggle's sign, but the MA posture stays inside its dead zone
        // and without it nothing reaches the agreement bar
        let window = quiet_window(30, dec!(1.1000));
        assert!(detector().scan("EURUSD", Timeframe::M15, &window).is_none());
    }

    #[test]
    fn test_close_keyed_votes_alone_cannot_emit() {
        // End the chop on an up-wiggle so momentum, band, and VWAP all lean
        // long together; the flat MA posture still vetoes the candidate
        let window = quiet_window(31, dec!(1.1000));
        assert!(detector().scan("EURUSD", Timeframe::M15, &window).is_none());
    }

    #[test]
    fn test_downtrend_votes_short() {
        let window: Vec<Candle> = (0..30i64)
            .map(|i| {
                let close = dec!(1.1060) - Decimal::from(i * 2) * dec!(0.0001);
                candle(
                    i,
                    close + dec!(0.0002),
                    close + dec!(0.0003),
                    close - dec!(0.0001),
                    close,
                    dec!(100),
                )
            })
            .collect();
        let candidate = detector()
            .scan("EURUSD", Timeframe::M15, &window)
            .expect("confluence expected");
        assert_eq!(candidate.direction, Direction::Short);
    }
}
