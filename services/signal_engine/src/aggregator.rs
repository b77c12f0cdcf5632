//! Tick aggregation into multi-timeframe candles
//!
//! One open candle per (symbol, timeframe); a tick whose bucket index moves
//! past the open bucket closes the candle and seeds the next from that tick.
//! Bounded-lateness, at-most-once: ticks for an already-closed bucket are
//! discarded and counted, never retro-applied. Candles are built from bid.

use crate::error::IngestionError;
use crate::store::CandleStore;
use chrono::{DateTime, Utc};
use config::AggregatorConfig;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use types::{Candle, Tick, Timeframe};

/// Running counters for feed quality monitoring
#[derive(Debug, Default)]
pub struct IngestCounters {
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
    pub late_discarded: AtomicU64,
}

struct OpenCandle {
    bucket: i64,
    open_time: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
}

impl OpenCandle {
    fn seed(bucket: i64, open_time: DateTime<Utc>, tick: &Tick) -> Self {
        Self {
            bucket,
            open_time,
            open: tick.bid,
            high: tick.bid,
            low: tick.bid,
            close: tick.bid,
            volume: tick.volume,
        }
    }

    fn extend(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.bid);
        self.low = self.low.min(tick.bid);
        self.close = tick.bid;
        self.volume += tick.volume;
    }

    fn close(self, symbol: &str, timeframe: Timeframe) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timeframe,
            open_time: self.open_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

struct SymbolBook {
    last_tick_ts: DateTime<Utc>,
    open: HashMap<Timeframe, OpenCandle>,
}

pub struct TickAggregator {
    config: AggregatorConfig,
    store: Arc<CandleStore>,
    counters: Arc<IngestCounters>,
    books: HashMap<String, SymbolBook>,
}

impl TickAggregator {
    pub fn new(config: AggregatorConfig, store: Arc<CandleStore>) -> Self {
        Self {
            config,
            store,
            counters: Arc::new(IngestCounters::default()),
            books: HashMap::new(),
        }
    }

    pub fn counters(&self) -> Arc<IngestCounters> {
        self.counters.clone()
    }

    /// Ingest one tick; returns the candles it closed (possibly several,
    /// one per timeframe crossing a bucket boundary).
    ///
    /// Malformed and late ticks are rejected here and never reach a candle.
    pub fn ingest(&mut self, tick: &Tick) -> Result<Vec<Candle>, IngestionError> {
        self.validate(tick).inspect_err(|e| {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            warn!(symbol = %tick.symbol, error = %e, "rejected tick");
        })?;

        let book = self
            .books
            .entry(tick.symbol.clone())
            .or_insert_with(|| SymbolBook {
                last_tick_ts: tick.timestamp,
                open: HashMap::new(),
            });
        book.last_tick_ts = book.last_tick_ts.max(tick.timestamp);

        let mut closed = Vec::new();
        for &timeframe in &self.config.timeframes {
            let bucket = timeframe.bucket_index(tick.timestamp);
            match book.open.remove(&timeframe) {
                None => {
                    book.open.insert(
                        timeframe,
                        OpenCandle::seed(bucket, timeframe.bucket_start(tick.timestamp), tick),
                    );
                }
                Some(mut open) if bucket == open.bucket => {
                    open.extend(tick);
                    book.open.insert(timeframe, open);
                }
                Some(open) if bucket > open.bucket => {
                    let finished = open.close(&tick.symbol, timeframe);
                    debug!(
                        symbol = %tick.symbol,
                        %timeframe,
                        open_time = %finished.open_time,
                        close = %finished.close,
                        "candle closed"
                    );
                    self.store.push_closed(finished.clone());
                    closed.push(finished);
                    book.open.insert(
                        timeframe,
                        OpenCandle::seed(bucket, timeframe.bucket_start(tick.timestamp), tick),
                    );
                }
                Some(open) => {
                    // Older bucket: bounded lateness, discard
                    self.counters.late_discarded.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        symbol = %tick.symbol,
                        %timeframe,
                        bucket,
                        open_bucket = open.bucket,
                        "late tick discarded"
                    );
                    book.open.insert(timeframe, open);
                }
            }
        }

        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        self.store
            .record_tick(&tick.symbol, tick.timestamp, tick.bid);
        Ok(closed)
    }

    fn validate(&self, tick: &Tick) -> Result<(), IngestionError> {
        if tick.bid > tick.ask {
            return Err(IngestionError::InvertedQuote {
                symbol: tick.symbol.clone(),
                bid: tick.bid.to_string(),
                ask: tick.ask.to_string(),
            });
        }

        let spread_pips = tick.spread() / self.config.pip_size;
        if spread_pips > self.config.max_spread_pips {
            return Err(IngestionError::SpreadOutOfBounds {
                symbol: tick.symbol.clone(),
                spread_pips: spread_pips.to_string(),
            });
        }

        if let Some(book) = self.books.get(&tick.symbol) {
            let regression = (book.last_tick_ts - tick.timestamp).num_seconds();
            if regression > self.config.timestamp_tolerance_secs {
                return Err(IngestionError::TimestampRegression {
                    symbol: tick.symbol.clone(),
                    regression_secs: regression,
                });
            }
        }

        Ok(())
    }

    /// Reconnect handling: open candles older than the staleness bound are
    /// discarded, never retroactively repaired. Closed history stays.
    pub fn discard_stale_open(&mut self, now: DateTime<Utc>) {
        let bound = self.config.staleness_bound_secs();
        for (symbol, book) in &mut self.books {
            if (now - book.last_tick_ts).num_seconds() > bound {
                let dropped = book.open.len();
                if dropped > 0 {
                    warn!(
                        %symbol,
                        dropped,
                        "discarding open candles past staleness bound after reconnect"
                    );
                    book.open.clear();
                }
            }
        }
    }
}
