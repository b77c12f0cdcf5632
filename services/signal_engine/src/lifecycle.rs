//! Signal lifecycle manager
//!
//! Owns every signal from publication to its terminal state and enforces
//! the dedupe invariant: at most one signal in {PUBLISHED, FIRED} per
//! (symbol, direction, pattern_type). Publication is idempotent on the
//! derived signal id, and fires happen only through the execution gate.

use crate::error::{EngineError, Result};
use crate::scorer::ScoredCandidate;
use chrono::{DateTime, Duration, Utc};
use config::LifecycleConfig;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::{debug, info};
use types::{DedupeKey, Signal, SignalId, SignalState};

/// Result of a publish attempt
#[derive(Debug, Clone)]
pub enum PublishOutcome {
    Published(Signal),
    /// An active signal already holds this (symbol, direction, pattern) slot
    DuplicateSuppressed(DedupeKey),
    /// Same id already published; idempotent no-op
    AlreadyPublished(SignalId),
}

pub struct SignalBook {
    config: LifecycleConfig,
    signals: DashMap<SignalId, Signal>,
    /// Keys currently held by a PUBLISHED or FIRED signal
    active_keys: Mutex<HashSet<DedupeKey>>,
}

impl SignalBook {
    pub fn new(config: LifecycleConfig) -> Self {
        Self {
            config,
            signals: DashMap::new(),
            active_keys: Mutex::new(HashSet::new()),
        }
    }

    /// Promote a scored candidate into a published signal.
    ///
    /// The dedupe check and key reservation happen under one lock so two
    /// concurrent publishes for the same slot cannot both succeed.
    pub fn publish(&self, scored: &ScoredCandidate, now: DateTime<Utc>) -> PublishOutcome {
        let candidate = &scored.candidate;
        let id = SignalId::derive(
            &candidate.symbol,
            candidate.pattern_type,
            candidate.direction,
            now,
        );

        if self.signals.contains_key(&id) {
            debug!(signal_id = %id, "duplicate publish attempt ignored");
            return PublishOutcome::AlreadyPublished(id);
        }

        let key = DedupeKey {
            symbol: candidate.symbol.clone(),
            direction: candidate.direction,
            pattern_type: candidate.pattern_type,
        };

        {
            let mut active = self.active_keys.lock();
            if active.contains(&key) {
                debug!(
                    symbol = %key.symbol,
                    direction = %key.direction,
                    pattern = %key.pattern_type,
                    "publish suppressed by active signal"
                );
                return PublishOutcome::DuplicateSuppressed(key);
            }
            active.insert(key);
        }

        let signal = Signal {
            id: id.clone(),
            symbol: candidate.symbol.clone(),
            pattern_type: candidate.pattern_type,
            direction: candidate.direction,
            mode: scored.mode,
            final_score: scored.final_score,
            entry: scored.entry,
            stop_loss: scored.stop_loss,
            take_profit: scored.take_profit,
            risk_reward: scored.risk_reward,
            tp_widened: scored.tp_widened,
            published_at: now,
            expires_at: now + Duration::seconds(self.config.signal_ttl_secs),
            state: SignalState::Published,
        };

        info!(
            signal_id = %id,
            symbol = %signal.symbol,
            pattern = %signal.pattern_type,
            direction = %signal.direction,
            mode = %signal.mode,
            score = signal.final_score,
            "signal published"
        );
        self.signals.insert(id, signal.clone());
        PublishOutcome::Published(signal)
    }

    /// Transition a published signal to FIRED. Called only by the execution
    /// gate after authorization; re-validates expiry so an expiry/fire race
    /// resolves to rejection.
    pub fn fire(&self, id: &SignalId, now: DateTime<Utc>) -> Result<Signal> {
        let mut entry = self
            .signals
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownSignal(id.clone()))?;
        if entry.is_expired(now) {
            return Err(types::StateError::InvalidTransition {
                from: entry.state,
                to: SignalState::Fired,
            }
            .into());
        }
        entry.transition(SignalState::Fired)?;
        info!(signal_id = %id, "signal fired");
        Ok(entry.clone())
    }

    /// Expire every published signal past its deadline; returns the newly
    /// expired signals for shadow outcome tracking
    pub fn expire_due(&self, now: DateTime<Utc>) -> Vec<Signal> {
        let mut expired = Vec::new();
        for mut entry in self.signals.iter_mut() {
            if entry.state == SignalState::Published && entry.is_expired(now) {
                if entry.transition(SignalState::Expired).is_ok() {
                    info!(signal_id = %entry.id, "signal expired unfired");
                    expired.push(entry.clone());
                }
            }
        }
        if !expired.is_empty() {
            let mut active = self.active_keys.lock();
            for signal in &expired {
                active.remove(&signal.dedupe_key());
            }
        }
        expired
    }

    /// Close out a FIRED or EXPIRED signal once its outcome is recorded,
    /// releasing its dedupe slot
    pub fn outcome_recorded(&self, id: &SignalId) -> Result<()> {
        let mut entry = self
            .signals
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownSignal(id.clone()))?;
        let was_fired = entry.state == SignalState::Fired;
        entry.transition(SignalState::OutcomeRecorded)?;
        let key = entry.dedupe_key();
        drop(entry);

        // Expired signals released their key at expiry
        if was_fired {
            self.active_keys.lock().remove(&key);
        }
        debug!(signal_id = %id, "outcome recorded");
        Ok(())
    }

    /// Lifecycle state lookup for the outcome query API
    pub fn get(&self, id: &SignalId) -> Option<Signal> {
        self.signals.get(id).map(|s| s.clone())
    }

    /// Whether an active signal currently holds this dedupe slot
    pub fn is_slot_active(&self, key: &DedupeKey) -> bool {
        self.active_keys.lock().contains(key)
    }

    pub fn active_count(&self) -> usize {
        self.active_keys.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::ScoredCandidate;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use types::{
        Direction, ExecutionMode, PatternCandidate, PatternMetrics, PatternType, Timeframe,
    };

    fn scored(symbol: &str, direction: Direction) -> ScoredCandidate {
        let candidate = PatternCandidate {
            symbol: symbol.to_string(),
            timeframe: Timeframe::M5,
            pattern_type: PatternType::OrderBlock,
            direction,
            raw_confidence: 80,
            metrics: PatternMetrics::default(),
            entry: dec!(1.1000),
            stop_loss: dec!(1.0995),
            take_profit: dec!(1.1010),
            detected_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        };
        ScoredCandidate {
            entry: candidate.entry,
            stop_loss: candidate.stop_loss,
            take_profit: candidate.take_profit,
            candidate,
            final_score: 78,
            mode: ExecutionMode::Sniper,
            risk_reward: dec!(2.0),
            tp_widened: false,
        }
    }

    fn book() -> SignalBook {
        SignalBook::new(LifecycleConfig {
            signal_ttl_secs: 1800,
        })
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_publish_then_suppress_same_slot() {
        let book = book();
        let first = book.publish(&scored("EURUSD", Direction::Long), now());
        assert!(matches!(first, PublishOutcome::Published(_)));

        // Same slot one minute later: suppressed by the active signal
        let later = now() + Duration::minutes(1);
        let second = book.publish(&scored("EURUSD", Direction::Long), later);
        assert!(matches!(second, PublishOutcome::DuplicateSuppressed(_)));

        // A different direction is a different slot
        let third = book.publish(&scored("EURUSD", Direction::Short), later);
        assert!(matches!(third, PublishOutcome::Published(_)));
        assert_eq!(book.active_count(), 2);
    }

    #[test]
    fn test_duplicate_id_is_noop() {
        let book = book();
        let PublishOutcome::Published(signal) =
            book.publish(&scored("EURUSD", Direction::Long), now())
        else {
            panic!("expected publish");
        };

        // Re-publishing at the exact same timestamp derives the same id
        let again = book.publish(&scored("EURUSD", Direction::Long), now());
        assert!(matches!(again, PublishOutcome::AlreadyPublished(id) if id == signal.id));
    }

    #[test]
    fn test_fire_then_outcome_releases_slot() {
        let book = book();
        let PublishOutcome::Published(signal) =
            book.publish(&scored("GBPUSD", Direction::Long), now())
        else {
            panic!("expected publish");
        };

        let fired = book.fire(&signal.id, now() + Duration::minutes(5)).unwrap();
        assert_eq!(fired.state, SignalState::Fired);
        // Fired still holds the slot
        assert!(book.is_slot_active(&signal.dedupe_key()));

        book.outcome_recorded(&signal.id).unwrap();
        assert!(!book.is_slot_active(&signal.dedupe_key()));
        assert_eq!(
            book.get(&signal.id).unwrap().state,
            SignalState::OutcomeRecorded
        );
    }

    #[test]
    fn test_expiry_fire_race_resolves_to_rejection() {
        let book = book();
        let PublishOutcome::Published(signal) =
            book.publish(&scored("EURUSD", Direction::Long), now())
        else {
            panic!("expected publish");
        };

        // Fire request processed 1s after the deadline must fail even though
        // the signal is still in PUBLISHED state
        let after_expiry = signal.expires_at + Duration::seconds(1);
        assert!(book.fire(&signal.id, after_expiry).is_err());
    }

    #[test]
    fn test_expire_due_releases_slot_for_republish() {
        let book = book();
        let PublishOutcome::Published(signal) =
            book.publish(&scored("EURUSD", Direction::Long), now())
        else {
            panic!("expected publish");
        };

        let later = signal.expires_at + Duration::seconds(1);
        let expired = book.expire_due(later);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].state, SignalState::Expired);

        // Slot is free again
        let republished = book.publish(&scored("EURUSD", Direction::Long), later);
        assert!(matches!(republished, PublishOutcome::Published(_)));
    }

    #[test]
    fn test_expired_signal_reaches_outcome_recorded() {
        let book = book();
        let PublishOutcome::Published(signal) =
            book.publish(&scored("EURUSD", Direction::Long), now())
        else {
            panic!("expected publish");
        };
        book.expire_due(signal.expires_at + Duration::seconds(1));

        book.outcome_recorded(&signal.id).unwrap();
        assert_eq!(
            book.get(&signal.id).unwrap().state,
            SignalState::OutcomeRecorded
        );
    }

    #[test]
    fn test_fire_unknown_signal() {
        let book = book();
        let id = SignalId::derive("EURUSD", PatternType::Imbalance, Direction::Long, now());
        assert!(matches!(
            book.fire(&id, now()),
            Err(EngineError::UnknownSignal(_))
        ));
    }
}
