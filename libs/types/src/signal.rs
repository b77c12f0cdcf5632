//! Actionable trading signals and their lifecycle state machine

use crate::market::Timeframe;
use crate::pattern::{Direction, PatternType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Globally unique signal identifier.
///
/// Derived from symbol, pattern type, direction, and the publish timestamp,
/// so all downstream consumers can process idempotently: a duplicate publish
/// attempt carries the same id and is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalId(String);

impl SignalId {
    pub fn derive(
        symbol: &str,
        pattern_type: PatternType,
        direction: Direction,
        published_at: DateTime<Utc>,
    ) -> Self {
        SignalId(format!(
            "{}:{}:{}:{}",
            symbol,
            pattern_type.as_str(),
            direction,
            published_at.timestamp()
        ))
    }

    /// Id for a shadow-tracked candidate that never became a signal.
    ///
    /// Published signals are deduplicated per (symbol, pattern, direction),
    /// so their ids cannot collide; dropped candidates are not, and one
    /// detector can drop on two timeframes in the same instant. The
    /// timeframe is part of the identity to keep those distinct.
    pub fn derive_scoped(
        symbol: &str,
        pattern_type: PatternType,
        direction: Direction,
        timeframe: Timeframe,
        at: DateTime<Utc>,
    ) -> Self {
        SignalId(format!(
            "{}:{}:{}:{}:{}",
            symbol,
            timeframe,
            pattern_type.as_str(),
            direction,
            at.timestamp()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SignalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution-mode classification from the consensus scorer.
///
/// A deterministic function of pattern type and target distance; each mode
/// carries its own risk:reward floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Short horizon, small target distance
    Rapid,
    /// Longer horizon, wider target
    Sniper,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Rapid => write!(f, "RAPID"),
            ExecutionMode::Sniper => write!(f, "SNIPER"),
        }
    }
}

/// Signal lifecycle states.
///
/// CANDIDATE → SCORED → {DROPPED | PUBLISHED} → {FIRED | EXPIRED} →
/// OUTCOME_RECORDED. All other transitions are invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalState {
    Candidate,
    Scored,
    Dropped,
    Published,
    Fired,
    Expired,
    OutcomeRecorded,
}

impl SignalState {
    /// Whether the state machine permits `self` → `next`
    pub fn can_transition_to(&self, next: SignalState) -> bool {
        use SignalState::*;
        matches!(
            (self, next),
            (Candidate, Scored)
                | (Scored, Dropped)
                | (Scored, Published)
                | (Published, Fired)
                | (Published, Expired)
                | (Fired, OutcomeRecorded)
                | (Expired, OutcomeRecorded)
        )
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, SignalState::Dropped | SignalState::OutcomeRecorded)
    }

    /// States counted against the dedupe invariant
    pub fn is_active(&self) -> bool {
        matches!(self, SignalState::Published | SignalState::Fired)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum StateError {
    #[error("invalid signal transition {from:?} -> {to:?}")]
    InvalidTransition { from: SignalState, to: SignalState },
}

/// Dedupe key: at most one signal in {PUBLISHED, FIRED} may exist per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupeKey {
    pub symbol: String,
    pub direction: Direction,
    pub pattern_type: PatternType,
}

/// A scored, classified trading signal owned by the lifecycle manager.
///
/// Never deleted; only transitioned through the defined state machine.
/// Outcomes live in a separate append-only record, never mutated back in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub symbol: String,
    pub pattern_type: PatternType,
    pub direction: Direction,
    pub mode: ExecutionMode,
    /// Final consensus score in [0, 100]
    pub final_score: u8,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    /// Reward:risk after any floor adjustment
    pub risk_reward: Decimal,
    /// True when the take-profit was widened to meet the mode's floor
    pub tp_widened: bool,
    pub published_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: SignalState,
}

impl Signal {
    pub fn dedupe_key(&self) -> DedupeKey {
        DedupeKey {
            symbol: self.symbol.clone(),
            direction: self.direction,
            pattern_type: self.pattern_type,
        }
    }

    /// Validated state transition; the lifecycle manager is the only caller.
    pub fn transition(&mut self, next: SignalState) -> Result<(), StateError> {
        if !self.state.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Distance from entry to stop in price units
    pub fn stop_distance(&self) -> Decimal {
        (self.entry - self.stop_loss).abs()
    }
}

/// Machine-readable reasons an execution gate rejects a fire request.
///
/// These are business outcomes, not faults; every one is logged for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    EmergencyStop,
    Expired,
    BelowThreshold,
    TierLimit,
    DailyLossLimit,
    Cooldown,
}

impl RejectReason {
    pub fn as_code(&self) -> &'static str {
        match self {
            RejectReason::EmergencyStop => "EMERGENCY_STOP",
            RejectReason::Expired => "EXPIRED",
            RejectReason::BelowThreshold => "BELOW_THRESHOLD",
            RejectReason::TierLimit => "TIER_LIMIT",
            RejectReason::DailyLossLimit => "DAILY_LOSS_LIMIT",
            RejectReason::Cooldown => "COOLDOWN",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn signal(state: SignalState) -> Signal {
        let published_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Signal {
            id: SignalId::derive(
                "EURUSD",
                PatternType::OrderBlock,
                Direction::Long,
                published_at,
            ),
            symbol: "EURUSD".to_string(),
            pattern_type: PatternType::OrderBlock,
            direction: Direction::Long,
            mode: ExecutionMode::Rapid,
            final_score: 78,
            entry: dec!(1.1000),
            stop_loss: dec!(1.0995),
            take_profit: dec!(1.1010),
            risk_reward: dec!(2.0),
            tp_widened: false,
            published_at,
            expires_at: published_at + chrono::Duration::minutes(30),
            state,
        }
    }

    #[test]
    fn test_id_derivation_is_deterministic() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let a = SignalId::derive("EURUSD", PatternType::Imbalance, Direction::Short, ts);
        let b = SignalId::derive("EURUSD", PatternType::Imbalance, Direction::Short, ts);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "EURUSD:imbalance:short:1700000000");
    }

    #[test]
    fn test_scoped_ids_distinct_across_timeframes() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let m1 = SignalId::derive_scoped(
            "EURUSD",
            PatternType::Imbalance,
            Direction::Short,
            Timeframe::M1,
            ts,
        );
        let m5 = SignalId::derive_scoped(
            "EURUSD",
            PatternType::Imbalance,
            Direction::Short,
            Timeframe::M5,
            ts,
        );
        assert_ne!(m1, m5);
    }

    #[test]
    fn test_valid_transitions() {
        let mut s = signal(SignalState::Candidate);
        s.transition(SignalState::Scored).unwrap();
        s.transition(SignalState::Published).unwrap();
        s.transition(SignalState::Fired).unwrap();
        s.transition(SignalState::OutcomeRecorded).unwrap();
        assert!(s.state.is_terminal());
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut s = signal(SignalState::Expired);
        let err = s.transition(SignalState::Fired).unwrap_err();
        assert_eq!(
            err,
            StateError::InvalidTransition {
                from: SignalState::Expired,
                to: SignalState::Fired,
            }
        );
        // State unchanged on rejection
        assert_eq!(s.state, SignalState::Expired);
    }

    #[test]
    fn test_dropped_is_terminal() {
        let mut s = signal(SignalState::Scored);
        s.transition(SignalState::Dropped).unwrap();
        assert!(s.state.is_terminal());
        assert!(s.transition(SignalState::Published).is_err());
    }

    #[test]
    fn test_active_states_match_dedupe_invariant() {
        assert!(SignalState::Published.is_active());
        assert!(SignalState::Fired.is_active());
        assert!(!SignalState::Expired.is_active());
        assert!(!SignalState::Scored.is_active());
    }

    #[test]
    fn test_expiry_check() {
        let s = signal(SignalState::Published);
        assert!(!s.is_expired(s.published_at));
        assert!(s.is_expired(s.expires_at + chrono::Duration::milliseconds(1)));
    }
}
