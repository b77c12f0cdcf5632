//! Mean-reversion band scalp
//!
//! Price touches a statistical extreme band and the candidate fades the
//! move back toward the mean. The trend guard is mandatory: when the last
//! few candles show a strong directional move, the fade is suppressed
//! rather than fighting it.

use super::indicators::{mean, net_change, pips, std_dev, to_f64};
use super::{clamp_confidence, Detector};
use config::DetectorsConfig;
use rust_decimal::Decimal;
use tracing::debug;
use types::{Candle, Direction, PatternCandidate, PatternMetrics, PatternType, Timeframe};

pub struct BandScalpDetector {
    config: DetectorsConfig,
    pip_size: Decimal,
}

impl BandScalpDetector {
    pub fn new(config: DetectorsConfig, pip_size: Decimal) -> Self {
        Self { config, pip_size }
    }

    /// Strong recent move in the direction the fade would fight
    fn trend_blocks(&self, window: &[Candle], direction: Direction) -> bool {
        let Some(change) = net_change(window, self.config.band_trend_guard_candles) else {
            return false;
        };
        let change_pips = pips(change, self.pip_size);
        match direction {
            // Fading down-moves is blocked while the slide is still strong
            Direction::Long => -change_pips > self.config.band_trend_strength_limit,
            Direction::Short => change_pips > self.config.band_trend_strength_limit,
        }
    }
}

impl Detector for BandScalpDetector {
    fn name(&self) -> &'static str {
        "band_scalp"
    }

    fn min_window(&self) -> usize {
        self.config.band_period + self.config.band_trend_guard_candles + 1
    }

    fn scan(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: &[Candle],
    ) -> Option<PatternCandidate> {
        let last = window.last()?;
        let baseline: Vec<f64> = window[window.len() - 1 - self.config.band_period..window.len() - 1]
            .iter()
            .map(|c| to_f64(c.close))
            .collect();
        let m = mean(&baseline)?;
        let sd = std_dev(&baseline)?;
        if sd == 0.0 {
            return None;
        }

        let close = to_f64(last.close);
        let upper = m + self.config.band_std_devs * sd;
        let lower = m - self.config.band_std_devs * sd;

        let (direction, band_distance) = if close <= lower {
            (Direction::Long, lower - close)
        } else if close >= upper {
            (Direction::Short, close - upper)
        } else {
            return None;
        };

        if self.trend_blocks(window, direction) {
            debug!(%symbol, %timeframe, %direction, "band touch suppressed by trend guard");
            return None;
        }

        let z = (close - m) / sd;
        let confidence = clamp_confidence(40.0 + z.abs().min(4.0) * 12.0 + band_distance / sd * 10.0);

        let entry = last.close;
        let mean_price = Decimal::try_from(m).ok()?;
        let stop_offset = (mean_price - entry).abs() / Decimal::from(2);
        let (stop_loss, take_profit) = match direction {
            Direction::Long => (entry - stop_offset, mean_price),
            Direction::Short => (entry + stop_offset, mean_price),
        };

        Some(PatternCandidate {
            symbol: symbol.to_string(),
            timeframe,
            pattern_type: PatternType::BandScalp,
            direction,
            raw_confidence: confidence,
            metrics: PatternMetrics {
                z_score: Some(z),
                band_width: Some((upper - lower) / m),
                ..PatternMetrics::default()
            },
            entry,
            stop_loss,
            take_profit,
            detected_at: last.open_time,
        })
    }
}
