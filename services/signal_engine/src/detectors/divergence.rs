//! Statistical divergence
//!
//! The last close sits several standard deviations away from its rolling
//! baseline. The candidate trades the reversion back toward the baseline
//! mean; the z-score itself drives confidence.

use super::indicators::{close_z_score, mean, to_f64};
use super::{clamp_confidence, Detector};
use config::DetectorsConfig;
use rust_decimal::Decimal;
use types::{Candle, Direction, PatternCandidate, PatternMetrics, PatternType, Timeframe};

pub struct DivergenceDetector {
    config: DetectorsConfig,
    #[allow(dead_code)]
    pip_size: Decimal,
}

impl DivergenceDetector {
    pub fn new(config: DetectorsConfig, pip_size: Decimal) -> Self {
        Self { config, pip_size }
    }
}

impl Detector for DivergenceDetector {
    fn name(&self) -> &'static str {
        "divergence"
    }

    fn min_window(&self) -> usize {
        self.config.divergence_baseline_period + 1
    }

    fn scan(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: &[Candle],
    ) -> Option<PatternCandidate> {
        let last = window.last()?;
        let period = self.config.divergence_baseline_period;
        let z = close_z_score(window, period)?;
        if z.abs() < self.config.divergence_z_threshold {
            return None;
        }

        // Stretched above the baseline reverts down, and vice versa
        let direction = if z > 0.0 {
            Direction::Short
        } else {
            Direction::Long
        };

        let baseline: Vec<f64> = window[window.len() - 1 - period..window.len() - 1]
            .iter()
            .map(|c| to_f64(c.close))
            .collect();
        let baseline_mean = Decimal::try_from(mean(&baseline)?).ok()?;

        let entry = last.close;
        let reversion = (baseline_mean - entry).abs();
        if reversion.is_zero() {
            return None;
        }
        let (stop_loss, take_profit) = match direction {
            Direction::Short => (entry + reversion / Decimal::from(2), baseline_mean),
            Direction::Long => (entry - reversion / Decimal::from(2), baseline_mean),
        };

        let confidence =
            clamp_confidence(30.0 + (z.abs() - self.config.divergence_z_threshold).min(3.0) * 15.0 + 15.0);

        Some(PatternCandidate {
            symbol: symbol.to_string(),
            timeframe,
            pattern_type: PatternType::Divergence,
            direction,
            raw_confidence: confidence,
            metrics: PatternMetrics {
                z_score: Some(z),
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

    fn detector() -> DivergenceDetector {
        DivergenceDetector::new(DetectorsConfig::default(), dec!(0.0001))
    }

    #[test]
    fn test_stretched_close_reverts_short() {
        let mut window = quiet_window(35, dec!(1.1000));
        let n = window.len();
        // Final close 10 pips above a baseline that wiggles by 1 pip
        window[n - 1] = candle(
            n as i64,
            dec!(1.1001),
            dec!(1.1011),
            dec!(1.1000),
            dec!(1.1010),
            dec!(100),
        );

        let candidate = detector()
            .scan("EURUSD", Timeframe::M15, &window)
            .expect("divergence expected");
        assert_eq!(candidate.pattern_type, PatternType::Divergence);
        assert_eq!(candidate.direction, Direction::Short);
        assert!(candidate.metrics.z_score.unwrap() > 2.0);
        assert!(candidate.take_profit < candidate.entry);
        assert!(candidate.stop_loss > candidate.entry);
    }

    #[test]
    fn test_stretched_close_reverts_long() {
        let mut window = quiet_window(35, dec!(1.1000));
        let n = window.len();
        window[n - 1] = candle(
            n as i64,
            dec!(1.0999),
            dec!(1.1000),
            dec!(1.0989),
            dec!(1.0990),
            dec!(100),
        );

        let candidate = detector()
            .scan("EURUSD", Timeframe::M15, &window)
            .expect("divergence expected");
        assert_eq!(candidate.direction, Direction::Long);
        assert!(candidate.metrics.z_score.unwrap() < -2.0);
    }

    #[test]
    fn test_close_within_threshold_ignored() {
        let window = quiet_window(35, dec!(1.1000));
        assert!(detector().scan("EURUSD", Timeframe::M15, &window).is_none());
    }
}
