//! Pattern detection output: candidate setups produced per scan cycle

use crate::market::Timeframe;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short; handy for symmetric price math
    pub fn sign(&self) -> i64 {
        match self {
            Direction::Long => 1,
            Direction::Short => -1,
        }
    }

    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// The fixed catalog of setup families the registry scans for.
///
/// New patterns are added here (one capability, many variants), not forked
/// into competing engine implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternType {
    /// Sweep of a prior swing high/low with rejection back inside
    LiquiditySweep,
    /// Impulsive displacement followed by a retest of its origin zone
    OrderBlock,
    /// Band-width compression resolving into a directional expansion
    VolatilityBreakout,
    /// Three-candle imbalance (unfilled gap between candles 1 and 3)
    Imbalance,
    /// Range expansion through a local high/low on a volume surge
    MomentumBreakout,
    /// Mean-reversion scalp off a statistical extreme band
    BandScalp,
    /// Z-score of price vs rolling baseline beyond threshold
    Divergence,
    /// K-of-M agreement across independent sub-indicators
    Confluence,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::LiquiditySweep => "liquidity_sweep",
            PatternType::OrderBlock => "order_block",
            PatternType::VolatilityBreakout => "volatility_breakout",
            PatternType::Imbalance => "imbalance",
            PatternType::MomentumBreakout => "momentum_breakout",
            PatternType::BandScalp => "band_scalp",
            PatternType::Divergence => "divergence",
            PatternType::Confluence => "confluence",
        }
    }
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Measured metrics backing a candidate's confidence.
///
/// Detectors fill only the fields they actually measure; confidence must be
/// derived from these, never a constant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternMetrics {
    /// Impulse/displacement size in pips
    pub displacement_pips: Option<f64>,
    /// Rejection wick as a fraction of candle range [0,1]
    pub wick_ratio: Option<f64>,
    /// Candle volume relative to recent average
    pub volume_ratio: Option<f64>,
    /// Z-score of price against the rolling baseline
    pub z_score: Option<f64>,
    /// Std-dev channel width relative to price
    pub band_width: Option<f64>,
    /// Candle range relative to recent average range
    pub range_ratio: Option<f64>,
    /// Sub-indicators agreeing (confluence only)
    pub indicators_agreeing: Option<u8>,
}

/// An unscored detection produced by one detector for one scan cycle.
///
/// Ephemeral: either promoted into a `Signal` by the lifecycle manager or
/// logged as a shadow candidate, then discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternCandidate {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub pattern_type: PatternType,
    pub direction: Direction,
    /// Detector's own confidence in [0, 100]
    pub raw_confidence: u8,
    pub metrics: PatternMetrics,
    /// Proposed entry at detection time
    pub entry: Decimal,
    /// Proposed protective stop
    pub stop_loss: Decimal,
    /// Proposed target (the scorer may widen this, never the stop)
    pub take_profit: Decimal,
    pub detected_at: DateTime<Utc>,
}

impl PatternCandidate {
    /// Distance from entry to stop in price units
    pub fn stop_distance(&self) -> Decimal {
        (self.entry - self.stop_loss).abs()
    }

    /// Distance from entry to target in price units
    pub fn target_distance(&self) -> Decimal {
        (self.take_profit - self.entry).abs()
    }

    /// Natural reward:risk of the proposed levels
    pub fn risk_reward(&self) -> Option<Decimal> {
        let risk = self.stop_distance();
        if risk.is_zero() {
            return None;
        }
        Some(self.target_distance() / risk)
    }
}
