//! Engine assembly and task wiring
//!
//! Owns every component and connects them with typed channels: a tick
//! channel into the aggregator, a scan timer into the detector registry,
//! a broadcast feed of published signals out, and synchronous fire
//! requests through the gate. Tick ingestion never waits on scanning,
//! scoring, or persistence; those run on their own tasks.

use crate::aggregator::{IngestCounters, TickAggregator};
use crate::calibration::CalibrationLog;
use crate::detectors::indicators::{swing_high, swing_low};
use crate::detectors::DetectorRegistry;
use crate::error::Result;
use crate::execution::{FillStatus, OrderInstruction, OrderSink, OrderSubmitter};
use crate::gate::{ExecutionGate, GateDecision};
use crate::health::HealthReporter;
use crate::lifecycle::{PublishOutcome, SignalBook};
use crate::outcome::OutcomeTracker;
use crate::scorer::{ScoreContext, ScoreVerdict, ShieldScorer};
use crate::store::CandleStore;
use chrono::{DateTime, Utc};
use config::EngineConfig;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};
use types::{
    AccountId, OutcomeRecord, PatternCandidate, Signal, SignalId, Tick, Timeframe,
};

/// How often expiry and outcome deadlines are checked
const TIMER_TICK: Duration = Duration::from_secs(1);
const SIGNAL_FEED_CAPACITY: usize = 256;
const OUTCOME_QUEUE_CAPACITY: usize = 1024;

pub struct Engine {
    config: EngineConfig,
    store: Arc<CandleStore>,
    aggregator: parking_lot::Mutex<Option<TickAggregator>>,
    registry: Arc<DetectorRegistry>,
    scorer: Arc<ShieldScorer>,
    book: Arc<SignalBook>,
    gate: Arc<ExecutionGate>,
    tracker: Arc<OutcomeTracker>,
    calibration: Arc<CalibrationLog>,
    submitter: Arc<OrderSubmitter>,
    health: Arc<HealthReporter>,
    /// Which account fired each signal, for folding outcomes back into
    /// daily risk state
    fired_by: Arc<DashMap<SignalId, AccountId>>,
    signal_tx: broadcast::Sender<Signal>,
    /// Resolved outcomes queue onto a dedicated task; the producers (tick
    /// ingestion, the timer, fire) never wait on calibration writes or
    /// account mutexes
    outcome_tx: mpsc::Sender<OutcomeRecord>,
    outcome_rx: parking_lot::Mutex<Option<mpsc::Receiver<OutcomeRecord>>>,
}

impl Engine {
    pub fn new(config: EngineConfig, sink: Arc<dyn OrderSink>) -> Result<Arc<Self>> {
        let store = Arc::new(CandleStore::new(config.aggregator.history_len));
        let aggregator = TickAggregator::new(config.aggregator.clone(), store.clone());
        let counters: Arc<IngestCounters> = aggregator.counters();

        let registry = Arc::new(DetectorRegistry::new(
            config.detectors.clone(),
            config.aggregator.pip_size,
            store.clone(),
            config.aggregator.timeframes.clone(),
            config.aggregator.staleness_bound_secs(),
        ));
        let scorer = Arc::new(ShieldScorer::new(
            config.scorer.clone(),
            config.aggregator.pip_size,
        ));
        let book = Arc::new(SignalBook::new(config.lifecycle.clone()));
        let gate = Arc::new(ExecutionGate::new(
            config.gate.clone(),
            config.aggregator.pip_size,
            book.clone(),
        ));
        let tracker = Arc::new(OutcomeTracker::new(config.outcome.clone()));
        let calibration = Arc::new(CalibrationLog::open(&config.calibration.log_path)?);
        let submitter = Arc::new(OrderSubmitter::new(sink, &config.gate));
        let health = Arc::new(HealthReporter::new(
            store.clone(),
            counters,
            book.clone(),
            tracker.clone(),
            config.aggregator.staleness_bound_secs(),
        ));
        let (signal_tx, _) = broadcast::channel(SIGNAL_FEED_CAPACITY);
        let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_QUEUE_CAPACITY);

        Ok(Arc::new(Self {
            config,
            store,
            aggregator: parking_lot::Mutex::new(Some(aggregator)),
            registry,
            scorer,
            book,
            gate,
            tracker,
            calibration,
            submitter,
            health,
            fired_by: Arc::new(DashMap::new()),
            signal_tx,
            outcome_tx,
            outcome_rx: parking_lot::Mutex::new(Some(outcome_rx)),
        }))
    }

    /// Outbound feed of published signals
    pub fn subscribe_signals(&self) -> broadcast::Receiver<Signal> {
        self.signal_tx.subscribe()
    }

    pub fn gate(&self) -> &ExecutionGate {
        &self.gate
    }

    pub fn health(&self) -> &HealthReporter {
        &self.health
    }

    /// Outcome query API: lifecycle state plus the resolved record, if any
    pub fn signal_status(&self, id: &SignalId) -> Option<(Signal, Option<OutcomeRecord>)> {
        let signal = self.book.get(id)?;
        Some((signal, self.tracker.record(id)))
    }

    /// Spawn the engine's tasks: tick ingestion, the scan cycle, the
    /// expiry/deadline timer, and the outcome drain. Returns once all tasks
    /// have observed shutdown.
    pub async fn run(
        self: &Arc<Self>,
        tick_rx: mpsc::Receiver<Tick>,
        shutdown: watch::Receiver<bool>,
    ) {
        info!(
            detectors = ?self.registry.detector_names(),
            timeframes = ?self.config.aggregator.timeframes,
            "engine starting"
        );

        let ingest = tokio::spawn(self.clone().ingest_loop(tick_rx, shutdown.clone()));
        let scan = tokio::spawn(self.clone().scan_loop(shutdown.clone()));
        let timer = tokio::spawn(self.clone().timer_loop(shutdown.clone()));
        let outcomes = tokio::spawn(self.clone().outcome_loop(shutdown.clone()));

        for (name, task) in [
            ("ingest", ingest),
            ("scan", scan),
            ("timer", timer),
            ("outcomes", outcomes),
        ] {
            if let Err(e) = task.await {
                error!(task = name, error = %e, "engine task aborted");
            }
        }
        info!("engine stopped");
    }

    /// Tick ingestion; owns the aggregator exclusively so nothing on this
    /// path ever blocks on scanning or gating
    async fn ingest_loop(
        self: Arc<Self>,
        mut tick_rx: mpsc::Receiver<Tick>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let Some(mut aggregator) = self.aggregator.lock().take() else {
            error!("ingest loop started twice");
            return;
        };

        loop {
            tokio::select! {
                maybe_tick = tick_rx.recv() => {
                    let Some(tick) = maybe_tick else {
                        info!("tick feed closed");
                        break;
                    };
                    // A tick arriving after a long gap must seed fresh
                    // candles, not close pre-gap ones
                    aggregator.discard_stale_open(tick.timestamp);
                    // Rejected ticks are counted and logged inside ingest
                    if aggregator.ingest(&tick).is_ok() {
                        for record in self.tracker.on_price(&tick.symbol, tick.bid, tick.timestamp) {
                            self.queue_outcome(record).await;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("ingest loop shutting down");
                    break;
                }
            }
        }
    }

    /// Fixed-cycle pattern scanning, decoupled from ingestion
    async fn scan_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.detectors.scan_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Utc::now();
                    let candidates = self.registry.scan_cycle(now).await;
                    for candidate in candidates {
                        self.score_candidate(candidate, now);
                    }
                }
                _ = shutdown.changed() => {
                    info!("scan loop shutting down");
                    break;
                }
            }
        }
    }

    /// Expiry and outcome deadlines run on wall-clock time, independent of
    /// tick arrival
    async fn timer_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(TIMER_TICK);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Utc::now();
                    for signal in self.book.expire_due(now) {
                        // Expired unfired: tracked to a hypothetical outcome
                        self.tracker.track_signal(&signal, true, now);
                    }
                    for record in self.tracker.poll_deadlines(now) {
                        self.queue_outcome(record).await;
                    }
                }
                _ = shutdown.changed() => {
                    info!("timer loop shutting down");
                    break;
                }
            }
        }
    }

    /// Score one candidate and either publish it or shadow-log it
    fn score_candidate(&self, candidate: PatternCandidate, now: DateTime<Utc>) {
        let ctx = self.score_context(&candidate, now);
        match self.scorer.score(candidate, &ctx) {
            ScoreVerdict::Scored(scored) => match self.book.publish(&scored, now) {
                PublishOutcome::Published(signal) => {
                    if let Err(e) = self.calibration.log_candidate(
                        signal.id.clone(),
                        scored.candidate,
                        scored.final_score,
                        true,
                        now,
                    ) {
                        warn!(error = %e, "calibration write failed");
                    }
                    // Receiver lag only matters to the subscriber
                    let _ = self.signal_tx.send(signal);
                }
                PublishOutcome::DuplicateSuppressed(key) => {
                    debug!(symbol = %key.symbol, pattern = %key.pattern_type, "candidate suppressed");
                }
                PublishOutcome::AlreadyPublished(id) => {
                    debug!(signal_id = %id, "candidate already published");
                }
            },
            ScoreVerdict::Dropped {
                candidate,
                final_score,
            } => {
                // The tracker's scoped id keys the calibration line too, so
                // the candidate entry and its shadow outcome stay joinable
                let id = self.tracker.track_shadow_candidate(&candidate, now);
                if let Err(e) = self
                    .calibration
                    .log_candidate(id, candidate, final_score, false, now)
                {
                    warn!(error = %e, "calibration write failed");
                }
            }
        }
    }

    /// Assemble scoring context from the candle store: two price sources
    /// (last tick vs last closed candle), support/resistance from the
    /// largest timeframe's swings, and the candidate's own window
    fn score_context(&self, candidate: &PatternCandidate, now: DateTime<Utc>) -> ScoreContext {
        let window = self.store.window(
            &candidate.symbol,
            candidate.timeframe,
            self.config.detectors.window_len,
        );

        let mut price_observations = Vec::new();
        if let Some(tick_price) = self.store.last_price(&candidate.symbol) {
            price_observations.push(tick_price);
        }
        if let Some(candle) = window.last() {
            price_observations.push(candle.close);
        }

        let sr_timeframe = self
            .config
            .aggregator
            .timeframes
            .iter()
            .copied()
            .max_by_key(Timeframe::secs)
            .unwrap_or(Timeframe::H1);
        let sr_window = self.store.window(&candidate.symbol, sr_timeframe, 64);
        let mut sr_levels = Vec::new();
        let lookback = sr_window.len().saturating_sub(1);
        if lookback > 0 {
            if let Some(high) = swing_high(&sr_window, lookback) {
                sr_levels.push(high);
            }
            if let Some(low) = swing_low(&sr_window, lookback) {
                sr_levels.push(low);
            }
        }

        ScoreContext {
            now,
            price_observations,
            sr_levels,
            window,
        }
    }

    /// Synchronous fire command: authorize, submit to the sink, start
    /// outcome tracking
    pub async fn fire(&self, signal_id: &SignalId, account_id: &AccountId) -> Result<GateDecision> {
        let now = Utc::now();
        let decision = self.gate.authorize(signal_id, account_id, now).await?;

        let GateDecision::Accept {
            signal,
            position_size,
        } = &decision
        else {
            return Ok(decision);
        };

        let instruction =
            OrderInstruction::from_signal(signal, account_id.clone(), *position_size);
        // Registered before submission so a sink failure still releases the
        // account's concurrency slot through the outcome path
        self.fired_by.insert(signal.id.clone(), account_id.clone());
        match self.submitter.submit(&instruction).await {
            Ok(report) if report.status == FillStatus::Filled => {
                self.tracker.track_signal(signal, false, now);
            }
            Ok(_) | Err(_) => {
                // Sink rejected or stayed unreachable: terminal failure,
                // never a silent loss
                let record = self.tracker.record_sink_failure(signal, Utc::now());
                self.queue_outcome(record).await;
            }
        }
        Ok(decision)
    }

    /// Hand one resolved record to the outcome task. A full queue applies
    /// backpressure to the producer rather than dropping the record.
    async fn queue_outcome(&self, record: OutcomeRecord) {
        if self.outcome_tx.send(record).await.is_err() {
            warn!("outcome task gone; record dropped");
        }
    }

    /// Drains resolved outcomes onto their slow consumers, keeping the
    /// flushed calibration writes and account mutex waits off the tick path
    async fn outcome_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let Some(mut outcome_rx) = self.outcome_rx.lock().take() else {
            error!("outcome loop started twice");
            return;
        };

        loop {
            tokio::select! {
                maybe_record = outcome_rx.recv() => {
                    let Some(record) = maybe_record else {
                        break;
                    };
                    self.handle_outcome(record).await;
                }
                _ = shutdown.changed() => {
                    info!("outcome loop shutting down");
                    break;
                }
            }
        }
        // Already-resolved records still get their calibration lines
        while let Ok(record) = outcome_rx.try_recv() {
            self.handle_outcome(record).await;
        }
    }

    /// Close the loop on one resolved outcome: calibration log, lifecycle
    /// transition, and the firing account's daily risk state
    async fn handle_outcome(&self, record: OutcomeRecord) {
        if let Err(e) = self.calibration.log_outcome(record.clone(), record.resolved_at) {
            warn!(error = %e, "calibration write failed");
        }

        // Shadow candidates never entered the book
        if self.book.get(&record.signal_id).is_some() {
            if let Err(e) = self.book.outcome_recorded(&record.signal_id) {
                warn!(signal_id = %record.signal_id, error = %e, "lifecycle close-out failed");
            }
        }

        if let Some((_, account_id)) = self.fired_by.remove(&record.signal_id) {
            if let Err(e) = self
                .gate
                .record_result(&account_id, record.achieved_r_multiple, record.resolved_at)
                .await
            {
                warn!(%account_id, error = %e, "daily risk update failed");
            }
        }
    }
}
