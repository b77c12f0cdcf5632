//! # Vigil Shared Types
//!
//! Unified type system for the signal engine: market data primitives
//! (ticks, candles, timeframes), pattern detection output, the signal
//! lifecycle state machine, account risk tiers, and outcome records.
//!
//! Everything downstream of the tick feed speaks these types. Prices and
//! money are `rust_decimal::Decimal`; derived statistics (z-scores, ratios)
//! are `f64`.

pub mod account;
pub mod market;
pub mod outcome;
pub mod pattern;
pub mod signal;

pub use account::{Account, AccountId, AccountTier, DailyRiskState, TierLevel};
pub use market::{Candle, Tick, Timeframe};
pub use outcome::{OutcomeRecord, Resolution, TimeoutPolicy};
pub use pattern::{Direction, PatternCandidate, PatternMetrics, PatternType};
pub use signal::{
    DedupeKey, ExecutionMode, RejectReason, Signal, SignalId, SignalState, StateError,
};
