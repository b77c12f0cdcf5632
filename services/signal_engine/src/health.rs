//! Engine health contract
//!
//! Each supervised component answers a liveness/staleness probe through
//! this report instead of relying on external scripts restarting processes
//! blindly. The supervisor polls it on an interval; the report is plain
//! data for whatever surface exposes it.

use crate::aggregator::IngestCounters;
use crate::lifecycle::SignalBook;
use crate::outcome::OutcomeTracker;
use crate::store::CandleStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// No symbols seen yet; normal right after startup
    Starting,
    Healthy,
    /// Some symbols stale, or ticks being rejected at an elevated rate
    Degraded,
    /// Every known symbol is stale; the feed is effectively down
    Unhealthy,
}

/// Point-in-time health report for the whole engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub status: HealthStatus,
    pub symbols_total: usize,
    pub symbols_stale: usize,
    pub ticks_accepted: u64,
    pub ticks_rejected: u64,
    pub ticks_late_discarded: u64,
    pub active_signals: usize,
    pub tracked_outcomes: usize,
    pub warnings: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

pub struct HealthReporter {
    store: Arc<CandleStore>,
    counters: Arc<IngestCounters>,
    book: Arc<SignalBook>,
    tracker: Arc<OutcomeTracker>,
    staleness_bound_secs: i64,
}

impl HealthReporter {
    pub fn new(
        store: Arc<CandleStore>,
        counters: Arc<IngestCounters>,
        book: Arc<SignalBook>,
        tracker: Arc<OutcomeTracker>,
        staleness_bound_secs: i64,
    ) -> Self {
        Self {
            store,
            counters,
            book,
            tracker,
            staleness_bound_secs,
        }
    }

    pub fn check(&self, now: DateTime<Utc>) -> EngineHealth {
        let symbols = self.store.symbols();
        let symbols_total = symbols.len();
        let stale: Vec<&String> = symbols
            .iter()
            .filter(|s| self.store.is_stale(s, now, self.staleness_bound_secs))
            .collect();

        let accepted = self.counters.accepted.load(Ordering::Relaxed);
        let rejected = self.counters.rejected.load(Ordering::Relaxed);
        let late = self.counters.late_discarded.load(Ordering::Relaxed);

        let mut warnings = Vec::new();
        for symbol in &stale {
            warnings.push(format!("symbol {symbol} is stale"));
        }
        // A feed rejecting more than it accepts points at the source, not
        // at one bad tick
        if rejected > accepted {
            warnings.push(format!(
                "rejected ticks ({rejected}) exceed accepted ({accepted})"
            ));
        }

        let status = if symbols_total == 0 {
            HealthStatus::Starting
        } else if stale.len() == symbols_total {
            HealthStatus::Unhealthy
        } else if !warnings.is_empty() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        if status != HealthStatus::Healthy && status != HealthStatus::Starting {
            warn!(?status, warnings = warnings.len(), "engine health degraded");
        }

        EngineHealth {
            status,
            symbols_total,
            symbols_stale: stale.len(),
            ticks_accepted: accepted,
            ticks_rejected: rejected,
            ticks_late_discarded: late,
            active_signals: self.book.active_count(),
            tracked_outcomes: self.tracker.tracking_count(),
            warnings,
            checked_at: now,
        }
    }
}
