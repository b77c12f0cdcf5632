//! Volatility-compression breakout
//!
//! Band width from a standard-deviation channel compresses below a
//! percentile of its own recent history, then the last candle closes
//! outside the compressed band. Direction follows the breakout close.

use super::indicators::{mean, std_dev, to_f64};
use super::{clamp_confidence, Detector};
use config::DetectorsConfig;
use rust_decimal::Decimal;
use types::{Candle, Direction, PatternCandidate, PatternMetrics, PatternType, Timeframe};

pub struct SqueezeBreakoutDetector {
    config: DetectorsConfig,
    pip_size: Decimal,
}

impl SqueezeBreakoutDetector {
    pub fn new(config: DetectorsConfig, pip_size: Decimal) -> Self {
        Self { config, pip_size }
    }

    /// Relative channel width (2σ each side over the mean) ending at `end`
    fn width_at(&self, closes: &[f64], end: usize) -> Option<f64> {
        let period = self.config.squeeze_band_period;
        if end < period {
            return None;
        }
        let slice = &closes[end - period..end];
        let m = mean(slice)?;
        let sd = std_dev(slice)?;
        if m == 0.0 {
            return None;
        }
        Some(4.0 * sd / m)
    }
}

impl Detector for SqueezeBreakoutDetector {
    fn name(&self) -> &'static str {
        "squeeze_breakout"
    }

    fn min_window(&self) -> usize {
        self.config.squeeze_band_period * 2 + 1
    }

    fn scan(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: &[Candle],
    ) -> Option<PatternCandidate> {
        let period = self.config.squeeze_band_period;
        let last = window.last()?;
        let closes: Vec<f64> = window.iter().map(|c| to_f64(c.close)).collect();
        let n = closes.len();

        // Width history up to (and excluding) the last candle
        let mut widths = Vec::new();
        for end in period..n {
            if let Some(w) = self.width_at(&closes, end) {
                widths.push(w);
            }
        }
        let prior_width = *widths.last()?;

        // Percentile rank of the pre-breakout width within its own history
        let below = widths.iter().filter(|w| **w <= prior_width).count();
        let percentile = below as f64 * 100.0 / widths.len() as f64;
        if percentile > self.config.squeeze_width_percentile {
            return None;
        }

        // Band boundaries the close must clear
        let baseline = &closes[n - 1 - period..n - 1];
        let m = mean(baseline)?;
        let sd = std_dev(baseline)?;
        let upper = m + 2.0 * sd;
        let lower = m - 2.0 * sd;
        let close = to_f64(last.close);

        let (direction, distance) = if close > upper {
            (Direction::Long, close - upper)
        } else if close < lower {
            (Direction::Short, lower - close)
        } else {
            return None;
        };

        let expansion = if sd > 0.0 { distance / sd } else { 0.0 };
        let confidence = clamp_confidence(40.0 + expansion * 25.0 + (50.0 - percentile).max(0.0) / 2.0);

        let entry = last.close;
        let band_span = Decimal::try_from(upper - lower).ok()?;
        let (stop_loss, take_profit) = match direction {
            Direction::Long => (
                Decimal::try_from(m).ok()?,
                entry + band_span,
            ),
            Direction::Short => (
                Decimal::try_from(m).ok()?,
                entry - band_span,
            ),
        };

        Some(PatternCandidate {
            symbol: symbol.to_string(),
            timeframe,
            pattern_type: PatternType::VolatilityBreakout,
            direction,
            raw_confidence: confidence,
            metrics: PatternMetrics {
                band_width: Some(prior_width),
                z_score: Some(expansion),
                ..PatternMetrics::default()
            },
            entry,
            stop_loss,
            take_profit,
            detected_at: last.open_time,
        })
    }
}
