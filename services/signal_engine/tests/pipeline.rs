//! Full-chain pipeline tests over deterministic fixtures: aggregation
//! through scoring, publication, gating, outcome tracking, and the
//! calibration log.

use chrono::{DateTime, Duration, TimeZone, Utc};
use config::{EngineConfig, LifecycleConfig};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use signal_engine::aggregator::TickAggregator;
use signal_engine::calibration::{CalibrationEntry, CalibrationLog};
use signal_engine::gate::{ExecutionGate, GateDecision};
use signal_engine::lifecycle::{PublishOutcome, SignalBook};
use signal_engine::outcome::OutcomeTracker;
use signal_engine::scorer::{ScoreContext, ScoreVerdict, ShieldScorer};
use signal_engine::store::CandleStore;
use std::sync::Arc;
use types::{
    Account, AccountId, AccountTier, Direction, ExecutionMode, PatternCandidate, PatternMetrics,
    PatternType, Resolution, Tick, TierLevel, Timeframe,
};

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn quiet_candles(store: &CandleStore, symbol: &str, n: usize, base: Decimal) {
    for i in 0..n as i64 {
        let wiggle = if i % 2 == 0 { dec!(0.0001) } else { dec!(-0.0001) };
        let close = base + wiggle;
        store.push_closed(types::Candle {
            symbol: symbol.to_string(),
            timeframe: Timeframe::M5,
            open_time: ts(i * 300),
            open: base,
            high: close.max(base) + dec!(0.0002),
            low: close.min(base) - dec!(0.0002),
            close,
            volume: dec!(100),
        });
    }
}

fn candidate(symbol: &str, raw_confidence: u8) -> PatternCandidate {
    PatternCandidate {
        symbol: symbol.to_string(),
        timeframe: Timeframe::M5,
        pattern_type: PatternType::OrderBlock,
        direction: Direction::Long,
        raw_confidence,
        metrics: PatternMetrics::default(),
        entry: dec!(1.1000),
        stop_loss: dec!(1.0995),
        take_profit: dec!(1.1010),
        detected_at: ts(0),
    }
}

fn context(store: &CandleStore, symbol: &str, now: DateTime<Utc>) -> ScoreContext {
    ScoreContext {
        now,
        price_observations: vec![
            store.last_price(symbol).unwrap_or(dec!(1.1000)),
            dec!(1.1001),
        ],
        sr_levels: Vec::new(),
        window: store.window(symbol, Timeframe::M5, 100),
    }
}

fn account(id: &str) -> Account {
    Account {
        account_id: AccountId(id.to_string()),
        balance: dec!(10000),
        tier: AccountTier {
            tier: TierLevel::Trader,
            max_concurrent_positions: 3,
            max_risk_pct_per_trade: dec!(1.0),
            max_daily_loss_pct: dec!(3.0),
            min_confidence_threshold: 65,
            allowed_modes: vec![ExecutionMode::Rapid, ExecutionMode::Sniper],
        },
        emergency_stop: false,
    }
}

/// Candidate → score → publish → authorize → fire → outcome → calibration,
/// with the dedupe invariant held throughout
#[tokio::test]
async fn test_signal_travels_the_whole_pipeline() {
    let config = EngineConfig::default();
    let store = Arc::new(CandleStore::new(200));
    quiet_candles(&store, "EURUSD", 60, dec!(1.1000));
    store.record_tick("EURUSD", ts(60 * 300), dec!(1.1000));

    let scorer = ShieldScorer::new(config.scorer.clone(), dec!(0.0001));
    let book = Arc::new(SignalBook::new(config.lifecycle.clone()));
    let gate = ExecutionGate::new(config.gate.clone(), dec!(0.0001), book.clone());
    let tracker = OutcomeTracker::new(config.outcome.clone());
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("calibration.jsonl");
    let calibration = CalibrationLog::open(&log_path).unwrap();

    // London-morning scoring time so the session weight is neutral
    let now = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
    let verdict = scorer.score(candidate("EURUSD", 80), &context(&store, "EURUSD", now));
    let ScoreVerdict::Scored(scored) = verdict else {
        panic!("expected candidate to clear the minimum score");
    };

    let PublishOutcome::Published(signal) = book.publish(&scored, now) else {
        panic!("expected publication");
    };
    calibration
        .log_candidate(
            signal.id.clone(),
            scored.candidate.clone(),
            scored.final_score,
            true,
            now,
        )
        .unwrap();

    // The same slot cannot publish twice while the first signal is active
    assert!(matches!(
        book.publish(&scored, now + Duration::minutes(1)),
        PublishOutcome::DuplicateSuppressed(_)
    ));

    gate.register_account(account("acct-1"), now.date_naive());
    let decision = gate
        .authorize(&signal.id, &AccountId("acct-1".to_string()), now)
        .await
        .unwrap();
    let GateDecision::Accept {
        signal: fired,
        position_size,
    } = decision
    else {
        panic!("expected authorization");
    };
    // 1% of 10000 over a 5-pip stop at 10 per pip
    assert_eq!(position_size, dec!(2.0));

    tracker.track_signal(&fired, false, now);
    let resolved = tracker.on_price("EURUSD", dec!(1.1010), now + Duration::minutes(20));
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].resolution, Resolution::TakeProfit);
    calibration
        .log_outcome(resolved[0].clone(), resolved[0].resolved_at)
        .unwrap();
    book.outcome_recorded(&fired.id).unwrap();

    // Slot released: the pattern may publish again
    assert!(matches!(
        book.publish(&scored, now + Duration::minutes(30)),
        PublishOutcome::Published(_)
    ));

    // The calibration log pairs the candidate with its outcome by id
    let entries: Vec<CalibrationEntry> = std::fs::read_to_string(&log_path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(entries.len(), 2);
    match (&entries[0], &entries[1]) {
        (
            CalibrationEntry::Candidate {
                signal_id,
                published,
                ..
            },
            CalibrationEntry::Outcome { record, .. },
        ) => {
            assert_eq!(signal_id, &record.signal_id);
            assert!(published);
        }
        other => panic!("unexpected log shape: {other:?}"),
    }
}

/// A dropped candidate still reaches the calibration log exactly once with
/// its hypothetical outcome
#[tokio::test]
async fn test_shadow_candidate_round_trip() {
    let config = EngineConfig::default();
    let store = Arc::new(CandleStore::new(200));
    quiet_candles(&store, "EURUSD", 60, dec!(1.1000));
    store.record_tick("EURUSD", ts(60 * 300), dec!(1.1000));

    let scorer = ShieldScorer::new(config.scorer.clone(), dec!(0.0001));
    let tracker = OutcomeTracker::new(config.outcome.clone());
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("calibration.jsonl");
    let calibration = CalibrationLog::open(&log_path).unwrap();

    let now = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
    let weak = candidate("EURUSD", 50);
    let ScoreVerdict::Dropped {
        candidate: dropped,
        final_score,
    } = scorer.score(weak, &context(&store, "EURUSD", now))
    else {
        panic!("expected drop below the minimum score");
    };

    let id = tracker.track_shadow_candidate(&dropped, now);
    calibration
        .log_candidate(id.clone(), dropped, final_score, false, now)
        .unwrap();

    let resolved = tracker.on_price("EURUSD", dec!(1.0994), now + Duration::minutes(5));
    assert_eq!(resolved.len(), 1);
    assert!(resolved[0].shadow);
    assert_eq!(resolved[0].resolution, Resolution::StopLoss);
    calibration
        .log_outcome(resolved[0].clone(), resolved[0].resolved_at)
        .unwrap();

    // Exactly one candidate line and one outcome line for the shadow
    let lines = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(lines.lines().count(), 2);
    assert!(tracker.record(&id).is_some());
}

/// An expired signal that receives a late fire request rejects with
/// Expired even though the request predates the expiry
#[tokio::test]
async fn test_expiry_race_across_components() {
    let book = Arc::new(SignalBook::new(LifecycleConfig {
        signal_ttl_secs: 60,
    }));
    let gate = ExecutionGate::new(config_gate(), dec!(0.0001), book.clone());
    gate.register_account(account("acct-1"), ts(0).date_naive());

    let config = EngineConfig::default();
    let store = Arc::new(CandleStore::new(200));
    quiet_candles(&store, "EURUSD", 60, dec!(1.1000));
    store.record_tick("EURUSD", ts(60 * 300), dec!(1.1000));
    let scorer = ShieldScorer::new(config.scorer.clone(), dec!(0.0001));

    let now = Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).unwrap();
    let ScoreVerdict::Scored(scored) =
        scorer.score(candidate("EURUSD", 80), &context(&store, "EURUSD", now))
    else {
        panic!("expected scored candidate");
    };
    let PublishOutcome::Published(signal) = book.publish(&scored, now) else {
        panic!("expected publication");
    };

    // Request "sent" before expiry but processed after
    let processed_at = signal.expires_at + Duration::seconds(1);
    let decision = gate
        .authorize(&signal.id, &AccountId("acct-1".to_string()), processed_at)
        .await
        .unwrap();
    assert!(matches!(
        decision,
        GateDecision::Reject(types::RejectReason::Expired)
    ));
}

fn config_gate() -> config::GateConfig {
    config::GateConfig::default()
}

mod ohlc_property {
    use super::*;
    use config::AggregatorConfig;
    use proptest::prelude::*;

    // Minute-aligned epoch so in-bucket offsets stay in one bucket
    fn aligned_tick(bid: Decimal, secs: i64) -> Tick {
        Tick {
            symbol: "EURUSD".to_string(),
            bid,
            ask: bid + dec!(0.0001),
            volume: dec!(1),
            timestamp: Utc.timestamp_opt(1_700_000_040 + secs, 0).unwrap(),
        }
    }

    proptest! {
        /// For any monotonic tick sequence within one bucket, the closed
        /// candle's OHLC equals the first/max/min/last of the ticks
        #[test]
        fn closed_candle_matches_tick_extremes(
            pip_offsets in prop::collection::vec(0i64..200, 1..40),
        ) {
            let config = AggregatorConfig {
                timeframes: vec![Timeframe::M1],
                ..AggregatorConfig::default()
            };
            let store = Arc::new(CandleStore::new(100));
            let mut aggregator = TickAggregator::new(config, store);

            let bids: Vec<Decimal> = pip_offsets
                .iter()
                .map(|p| dec!(1.1000) + Decimal::from(*p) * dec!(0.0001))
                .collect();

            // All ticks inside bucket 0, timestamps monotonic
            for (i, bid) in bids.iter().enumerate() {
                let secs = (i as i64 * 59) / bids.len() as i64;
                let closed = aggregator.ingest(&aligned_tick(*bid, secs)).unwrap();
                prop_assert!(closed.is_empty(), "candle closed early");
            }

            // First tick of the next bucket closes the candle
            let closed = aggregator.ingest(&aligned_tick(dec!(1.1000), 60)).unwrap();
            prop_assert_eq!(closed.len(), 1);
            let candle = &closed[0];
            prop_assert_eq!(candle.open, bids[0]);
            prop_assert_eq!(candle.close, *bids.last().unwrap());
            prop_assert_eq!(candle.high, *bids.iter().max().unwrap());
            prop_assert_eq!(candle.low, *bids.iter().min().unwrap());
        }
    }
}
