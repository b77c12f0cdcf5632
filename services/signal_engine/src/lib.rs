//! # Vigil Signal Engine
//!
//! Real-time trading signal pipeline: tick aggregation into multi-timeframe
//! candles, a registry of independent pattern detectors, a consensus scorer,
//! a signal lifecycle state machine with deduplication, a per-account
//! execution gate, and closed-loop outcome tracking feeding an append-only
//! calibration log.
//!
//! Data flows one way: aggregator → detectors → scorer → lifecycle →
//! (fire request) → gate → order sink, with the outcome tracker observing
//! the same price stream and closing the loop into calibration.

pub mod aggregator;
pub mod calibration;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod execution;
pub mod gate;
pub mod health;
pub mod lifecycle;
pub mod outcome;
pub mod scorer;
pub mod store;

pub use engine::Engine;
pub use error::{EngineError, Result};
