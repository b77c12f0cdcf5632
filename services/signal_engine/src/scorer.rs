//! Consensus scorer ("Shield")
//!
//! Blends a detector's raw confidence with market context into a final
//! score in [0, 100] and classifies survivors into an execution mode.
//! Context covers the trading session, the volatility regime, cross-source
//! price agreement, proximity to known support/resistance, and a trend
//! alignment check that mirrors the detector-level guard as a second,
//! independent gate. Candidates below the configured minimum are dropped
//! but still handed to the calibration path as shadow candidates.

use crate::detectors::indicators::{atr, net_change, pips, to_f64};
use chrono::{DateTime, Timelike, Utc};
use config::ScorerConfig;
use rust_decimal::Decimal;
use tracing::debug;
use types::{Candle, Direction, ExecutionMode, PatternCandidate, PatternType};

/// Market context assembled by the engine at scoring time
#[derive(Debug, Clone)]
pub struct ScoreContext {
    pub now: DateTime<Utc>,
    /// Independent price observations for the candidate's symbol; fewer
    /// than two, or two that disagree, cap the achievable score
    pub price_observations: Vec<Decimal>,
    /// Known support/resistance levels for the symbol
    pub sr_levels: Vec<Decimal>,
    /// Closed-candle window on the candidate's timeframe, oldest first
    pub window: Vec<Candle>,
}

/// A candidate that cleared the minimum score, with its mode and final
/// (possibly widened) levels
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: PatternCandidate,
    pub final_score: u8,
    pub mode: ExecutionMode,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_reward: Decimal,
    pub tp_widened: bool,
}

#[derive(Debug, Clone)]
pub enum ScoreVerdict {
    Scored(ScoredCandidate),
    /// Below the minimum score: not published, still shadow-logged
    Dropped {
        candidate: PatternCandidate,
        final_score: u8,
    },
}

pub struct ShieldScorer {
    config: ScorerConfig,
    pip_size: Decimal,
}

impl ShieldScorer {
    pub fn new(config: ScorerConfig, pip_size: Decimal) -> Self {
        Self { config, pip_size }
    }

    pub fn score(&self, candidate: PatternCandidate, ctx: &ScoreContext) -> ScoreVerdict {
        let mut score = candidate.raw_confidence as f64;

        let (session, weight) = self.session(ctx.now);
        score *= weight;

        let volatility_percentile = atr_percentile(&ctx.window);
        if let Some(p) = volatility_percentile {
            if p >= self.config.high_volatility_percentile {
                score -= self.config.high_volatility_penalty;
            }
        }

        if self.fights_strong_trend(&candidate, &ctx.window) {
            score -= self.config.counter_trend_penalty;
        }

        if self.near_sr_level(&candidate, &ctx.sr_levels) {
            score += self.config.sr_proximity_bonus;
        }

        let sources_agree = self.sources_agree(&ctx.price_observations);
        if !sources_agree {
            score = score.min(self.config.disagreement_score_cap as f64);
        }

        let final_score = score.clamp(0.0, 100.0).round() as u8;
        debug!(
            symbol = %candidate.symbol,
            pattern = %candidate.pattern_type,
            raw = candidate.raw_confidence,
            final_score,
            session,
            sources_agree,
            "candidate scored"
        );

        if final_score < self.config.min_score {
            return ScoreVerdict::Dropped {
                candidate,
                final_score,
            };
        }

        let mode = self.classify_mode(&candidate);
        let (take_profit, risk_reward, tp_widened) = self.enforce_rr_floor(&candidate, mode);

        ScoreVerdict::Scored(ScoredCandidate {
            entry: candidate.entry,
            stop_loss: candidate.stop_loss,
            candidate,
            final_score,
            mode,
            take_profit,
            risk_reward,
            tp_widened,
        })
    }

    /// UTC time-of-day session bucket and its weight
    fn session(&self, now: DateTime<Utc>) -> (&'static str, f64) {
        let weights = &self.config.session;
        match now.hour() {
            21 | 22 => ("rollover", weights.rollover),
            23 | 0..=6 => ("asian", weights.asian),
            7..=11 => ("london", weights.london),
            _ => ("new_york", weights.new_york),
        }
    }

    /// Second, independent counter-trend check: a strong net move over the
    /// trend window with the candidate pointed against it
    fn fights_strong_trend(&self, candidate: &PatternCandidate, window: &[Candle]) -> bool {
        let Some(change) = net_change(window, self.config.trend_window) else {
            return false;
        };
        let change_pips = pips(change, self.pip_size);
        if change_pips.abs() < self.config.trend_strength_limit {
            return false;
        }
        match candidate.direction {
            Direction::Long => change_pips < 0.0,
            Direction::Short => change_pips > 0.0,
        }
    }

    fn near_sr_level(&self, candidate: &PatternCandidate, sr_levels: &[Decimal]) -> bool {
        sr_levels.iter().any(|level| {
            pips((candidate.entry - *level).abs(), self.pip_size) <= self.config.sr_proximity_pips
        })
    }

    /// At least two observations, all within the agreement tolerance
    fn sources_agree(&self, observations: &[Decimal]) -> bool {
        let (Some(min), Some(max)) = (observations.iter().min(), observations.iter().max()) else {
            return false;
        };
        observations.len() >= 2
            && pips(*max - *min, self.pip_size) <= self.config.agreement_tolerance_pips
    }

    /// Deterministic mode from pattern type and target distance
    fn classify_mode(&self, candidate: &PatternCandidate) -> ExecutionMode {
        // Band scalps are short-horizon by construction
        if candidate.pattern_type == PatternType::BandScalp {
            return ExecutionMode::Rapid;
        }
        let target_pips = pips(candidate.target_distance(), self.pip_size);
        if target_pips < self.config.rapid_target_threshold_pips {
            ExecutionMode::Rapid
        } else {
            ExecutionMode::Sniper
        }
    }

    /// Meet the mode's reward floor by widening the take-profit; the stop
    /// is never tightened
    fn enforce_rr_floor(
        &self,
        candidate: &PatternCandidate,
        mode: ExecutionMode,
    ) -> (Decimal, Decimal, bool) {
        let floor = match mode {
            ExecutionMode::Rapid => self.config.rapid_rr_floor,
            ExecutionMode::Sniper => self.config.sniper_rr_floor,
        };
        let natural = candidate.risk_reward().unwrap_or(Decimal::ZERO);
        if natural >= floor {
            return (candidate.take_profit, natural, false);
        }

        let widened_distance = candidate.stop_distance() * floor;
        let take_profit = match candidate.direction {
            Direction::Long => candidate.entry + widened_distance,
            Direction::Short => candidate.entry - widened_distance,
        };
        (take_profit, floor, true)
    }
}

/// Percentile rank of the current ATR within the window's own ATR history.
/// Strict rank: a flat-volatility window reads as the 0th percentile, not a
/// high-volatility regime.
fn atr_percentile(window: &[Candle]) -> Option<f64> {
    let mut series = Vec::new();
    for end in 15..=window.len() {
        if let Some(value) = atr(&window[..end], 14) {
            series.push(to_f64(value));
        }
    }
    if series.len() < 10 {
        return None;
    }
    let current = *series.last()?;
    let below = series.iter().filter(|v| **v < current).count();
    Some(below as f64 * 100.0 / series.len() as f64)
}
