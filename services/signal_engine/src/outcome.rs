//! Outcome tracker
//!
//! Follows fired signals, expired signals, and dropped (shadow) candidates
//! to a terminal result: the first of a take-profit touch, a stop-loss
//! touch, or the hard wall-clock horizon. The tracker observes the same
//! price stream the aggregator ingests; the horizon deadline is enforced by
//! the engine's timer, never by tick arrival, so a stalled feed still
//! resolves to TIMEOUT from the last known price. Every tracked signal gets
//! exactly one append-only record.

use crate::error::TrackingError;
use chrono::{DateTime, Duration, Utc};
use config::OutcomeConfig;
use dashmap::DashMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use types::{
    Direction, OutcomeRecord, PatternCandidate, Resolution, Signal, SignalId,
};

struct Tracked {
    symbol: String,
    direction: Direction,
    entry: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
    deadline: DateTime<Utc>,
    last_price: Option<Decimal>,
    last_price_at: Option<DateTime<Utc>>,
    /// Set once the feed gaps past the configured bound; sticky
    gap_seen: bool,
    shadow: bool,
}

impl Tracked {
    fn stop_distance(&self) -> Decimal {
        (self.entry - self.stop_loss).abs()
    }

    /// Signed achieved move at `price`, in R
    fn r_multiple_at(&self, price: Decimal) -> f64 {
        let risk = self.stop_distance();
        if risk.is_zero() {
            return 0.0;
        }
        let signed_move = (price - self.entry) * Decimal::from(self.direction.sign());
        (signed_move / risk).to_f64().unwrap_or(0.0)
    }

    fn touched_tp(&self, price: Decimal) -> bool {
        match self.direction {
            Direction::Long => price >= self.take_profit,
            Direction::Short => price <= self.take_profit,
        }
    }

    fn touched_sl(&self, price: Decimal) -> bool {
        match self.direction {
            Direction::Long => price <= self.stop_loss,
            Direction::Short => price >= self.stop_loss,
        }
    }
}

pub struct OutcomeTracker {
    config: OutcomeConfig,
    tracked: DashMap<SignalId, Tracked>,
    records: DashMap<SignalId, OutcomeRecord>,
}

impl OutcomeTracker {
    pub fn new(config: OutcomeConfig) -> Self {
        Self {
            config,
            tracked: DashMap::new(),
            records: DashMap::new(),
        }
    }

    /// Begin tracking a FIRED or EXPIRED signal. Expired signals are
    /// tracked as shadows: their hypothetical outcome still feeds
    /// calibration.
    pub fn track_signal(&self, signal: &Signal, shadow: bool, now: DateTime<Utc>) {
        self.insert(
            signal.id.clone(),
            Tracked {
                symbol: signal.symbol.clone(),
                direction: signal.direction,
                entry: signal.entry,
                stop_loss: signal.stop_loss,
                take_profit: signal.take_profit,
                deadline: now + Duration::seconds(self.config.horizon_secs as i64),
                last_price: None,
                last_price_at: None,
                gap_seen: false,
                shadow,
            },
        );
    }

    /// Begin tracking a dropped candidate as a shadow; it never becomes a
    /// signal but its hypothetical outcome is still recorded. Returns the
    /// id the calibration entry must carry so the pair stays joinable.
    pub fn track_shadow_candidate(
        &self,
        candidate: &PatternCandidate,
        now: DateTime<Utc>,
    ) -> SignalId {
        let id = SignalId::derive_scoped(
            &candidate.symbol,
            candidate.pattern_type,
            candidate.direction,
            candidate.timeframe,
            now,
        );
        self.insert(
            id.clone(),
            Tracked {
                symbol: candidate.symbol.clone(),
                direction: candidate.direction,
                entry: candidate.entry,
                stop_loss: candidate.stop_loss,
                take_profit: candidate.take_profit,
                deadline: now + Duration::seconds(self.config.horizon_secs as i64),
                last_price: None,
                last_price_at: None,
                gap_seen: false,
                shadow: true,
            },
        );
        id
    }

    fn insert(&self, id: SignalId, tracked: Tracked) {
        if self.records.contains_key(&id) || self.tracked.contains_key(&id) {
            debug!(signal_id = %id, "already tracked; ignoring duplicate");
            return;
        }
        debug!(signal_id = %id, shadow = tracked.shadow, deadline = %tracked.deadline, "tracking started");
        self.tracked.insert(id, tracked);
    }

    /// Record a fire that never reached the market: terminal SINK_FAILED,
    /// no price tracking
    pub fn record_sink_failure(&self, signal: &Signal, now: DateTime<Utc>) -> OutcomeRecord {
        let record = OutcomeRecord {
            signal_id: signal.id.clone(),
            resolution: Resolution::SinkFailed,
            achieved_r_multiple: 0.0,
            resolved_at: now,
            timeout_policy: self.config.timeout_policy,
            low_confidence: false,
            shadow: false,
        };
        self.tracked.remove(&signal.id);
        self.records.insert(signal.id.clone(), record.clone());
        record
    }

    /// Feed one observed price into every signal tracked on `symbol`.
    /// Returns the records resolved by this observation.
    pub fn on_price(
        &self,
        symbol: &str,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Vec<OutcomeRecord> {
        let mut resolved = Vec::new();

        for mut entry in self.tracked.iter_mut() {
            if entry.symbol != symbol {
                continue;
            }
            if let Some(seen_at) = entry.last_price_at {
                if (now - seen_at).num_seconds() > self.config.feed_gap_secs {
                    entry.gap_seen = true;
                }
            }
            entry.last_price = Some(price);
            entry.last_price_at = Some(now);

            // When one observation satisfies both levels, the stop wins:
            // intrabar ordering is unknowable from a single price, so the
            // record takes the loss
            let resolution = if entry.touched_sl(price) {
                Some((Resolution::StopLoss, -1.0))
            } else if entry.touched_tp(price) {
                Some((Resolution::TakeProfit, entry.r_multiple_at(entry.take_profit)))
            } else {
                None
            };

            if let Some((resolution, r)) = resolution {
                resolved.push((entry.key().clone(), resolution, r, entry.gap_seen, entry.shadow));
            }
        }

        resolved
            .into_iter()
            .map(|(id, resolution, r, low_confidence, shadow)| {
                self.finalize(id, resolution, r, low_confidence, shadow, now)
            })
            .collect()
    }

    /// Resolve every tracked signal past its wall-clock deadline from its
    /// last known price. Runs on the engine timer, independent of ticks.
    pub fn poll_deadlines(&self, now: DateTime<Utc>) -> Vec<OutcomeRecord> {
        let mut due = Vec::new();

        for entry in self.tracked.iter() {
            if now < entry.deadline {
                continue;
            }
            // Extrapolate from the last known price; a feed silent past the
            // gap bound (or never heard from) marks the record low-confidence
            let (r, low_confidence) = match entry.last_price {
                Some(price) => {
                    let stalled = entry
                        .last_price_at
                        .is_some_and(|at| (now - at).num_seconds() > self.config.feed_gap_secs);
                    (entry.r_multiple_at(price), entry.gap_seen || stalled)
                }
                None => {
                    let e = TrackingError::NoPriceObserved {
                        signal_id: entry.key().clone(),
                        symbol: entry.symbol.clone(),
                    };
                    warn!(error = %e, "resolving timeout at entry price");
                    (0.0, true)
                }
            };
            due.push((entry.key().clone(), r, low_confidence, entry.shadow));
        }

        due.into_iter()
            .map(|(id, r, low_confidence, shadow)| {
                self.finalize(id, Resolution::Timeout, r, low_confidence, shadow, now)
            })
            .collect()
    }

    fn finalize(
        &self,
        id: SignalId,
        resolution: Resolution,
        achieved_r_multiple: f64,
        low_confidence: bool,
        shadow: bool,
        now: DateTime<Utc>,
    ) -> OutcomeRecord {
        self.tracked.remove(&id);
        let record = OutcomeRecord {
            signal_id: id.clone(),
            resolution,
            achieved_r_multiple,
            resolved_at: now,
            timeout_policy: self.config.timeout_policy,
            low_confidence,
            shadow,
        };
        info!(
            signal_id = %id,
            resolution = ?resolution,
            r = achieved_r_multiple,
            low_confidence,
            shadow,
            "outcome resolved"
        );
        self.records.insert(id, record.clone());
        record
    }

    /// Resolved record lookup for the outcome query API
    pub fn record(&self, id: &SignalId) -> Option<OutcomeRecord> {
        self.records.get(id).map(|r| r.clone())
    }

    pub fn tracking_count(&self) -> usize {
        self.tracked.len()
    }
}
