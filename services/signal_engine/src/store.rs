//! Shared candle archive and per-symbol freshness registry
//!
//! Single owned registry keyed by symbol, replacing the module-level maps
//! the engine's ancestors grew. Ingestion writes, the scan cycle and the
//! outcome tracker read; `DashMap` keeps the two sides from blocking each
//! other.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use types::{Candle, Timeframe};

pub struct CandleStore {
    history_len: usize,
    candles: DashMap<(String, Timeframe), VecDeque<Candle>>,
    last_tick: DashMap<String, DateTime<Utc>>,
    last_price: DashMap<String, Decimal>,
}

impl CandleStore {
    pub fn new(history_len: usize) -> Self {
        Self {
            history_len,
            candles: DashMap::new(),
            last_tick: DashMap::new(),
            last_price: DashMap::new(),
        }
    }

    /// Archive a closed candle, evicting the oldest beyond the history bound
    pub fn push_closed(&self, candle: Candle) {
        let key = (candle.symbol.clone(), candle.timeframe);
        let mut entry = self.candles.entry(key).or_default();
        entry.push_back(candle);
        while entry.len() > self.history_len {
            entry.pop_front();
        }
    }

    /// Most recent `n` closed candles, oldest first; empty if fewer exist
    pub fn window(&self, symbol: &str, timeframe: Timeframe, n: usize) -> Vec<Candle> {
        match self.candles.get(&(symbol.to_string(), timeframe)) {
            Some(entry) => {
                let len = entry.len();
                let skip = len.saturating_sub(n);
                entry.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// All symbols that ever produced a tick
    pub fn symbols(&self) -> Vec<String> {
        self.last_tick.iter().map(|e| e.key().clone()).collect()
    }

    /// Record tick arrival; freshness and last price feed staleness checks,
    /// scoring context, and outcome extrapolation
    pub fn record_tick(&self, symbol: &str, ts: DateTime<Utc>, bid: Decimal) {
        self.last_tick.insert(symbol.to_string(), ts);
        self.last_price.insert(symbol.to_string(), bid);
    }

    pub fn last_tick_at(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.last_tick.get(symbol).map(|e| *e.value())
    }

    pub fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.last_price.get(symbol).map(|e| *e.value())
    }

    /// A symbol is stale when no tick arrived within the bound; detectors
    /// skip stale symbols until a fresh tick lands
    pub fn is_stale(&self, symbol: &str, now: DateTime<Utc>, bound_secs: i64) -> bool {
        match self.last_tick_at(symbol) {
            Some(ts) => (now - ts).num_seconds() > bound_secs,
            None => true,
        }
    }
}
