//! Error types for the signal engine
//!
//! Gating rejections are deliberately not errors: they are business outcomes
//! carried by `types::RejectReason` and returned synchronously to the caller.

use thiserror::Error;
use types::{SignalId, StateError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("ingestion error: {0}")]
    Ingestion(#[from] IngestionError),

    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),

    #[error("state machine error: {0}")]
    State(#[from] StateError),

    #[error("order sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("outcome tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("unknown signal: {0}")]
    UnknownSignal(SignalId),

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Tick-level failures; counted and logged, never fatal to the aggregator
#[derive(Debug, Error, PartialEq)]
pub enum IngestionError {
    #[error("inverted quote for {symbol}: bid {bid} over ask {ask}")]
    InvertedQuote {
        symbol: String,
        bid: String,
        ask: String,
    },

    #[error("spread for {symbol} beyond sanity bound: {spread_pips} pips")]
    SpreadOutOfBounds { symbol: String, spread_pips: String },

    #[error("timestamp regression for {symbol}: {regression_secs}s behind last tick")]
    TimestampRegression {
        symbol: String,
        regression_secs: i64,
    },

    #[error("late tick for {symbol}: bucket {bucket} older than open bucket {open_bucket}")]
    LateTick {
        symbol: String,
        bucket: i64,
        open_bucket: i64,
    },
}

/// Failure of one detector for one symbol/cycle; isolated, never aborts the
/// cycle for other detectors or symbols
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector {detector} timed out after {timeout_ms}ms on {symbol}")]
    Timeout {
        detector: &'static str,
        symbol: String,
        timeout_ms: u64,
    },

    #[error("detector {detector} panicked on {symbol}")]
    Panicked {
        detector: &'static str,
        symbol: String,
    },
}

/// Order sink failures; retried a bounded number of times, then the signal
/// resolves to a terminal sink-failed outcome
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("order sink unreachable: {0}")]
    Unreachable(String),

    #[error("order sink rejected {signal_id}: {reason}")]
    Rejected { signal_id: SignalId, reason: String },

    #[error("retries exhausted for {signal_id} after {attempts} attempts")]
    RetriesExhausted { signal_id: SignalId, attempts: u32 },
}

/// Outcome tracking faults; resolved by extrapolation, never by dropping
/// the record
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("no price ever observed for {symbol} while tracking {signal_id}")]
    NoPriceObserved { signal_id: SignalId, symbol: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;
