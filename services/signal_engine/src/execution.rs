//! Order sink boundary
//!
//! The broker/terminal execution client is an external collaborator behind
//! the `OrderSink` trait. Authorized fires become `OrderInstruction`s and
//! are submitted with a bounded retry budget; a sink that stays unreachable
//! resolves the signal to a terminal sink-failed outcome rather than
//! silently losing the fire.

use crate::error::SinkError;
use async_trait::async_trait;
use config::GateConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use types::{AccountId, Direction, Signal, SignalId};

/// Order handed to the external execution sink on an accepted fire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInstruction {
    pub signal_id: SignalId,
    pub account_id: AccountId,
    pub symbol: String,
    pub direction: Direction,
    pub position_size: Decimal,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

impl OrderInstruction {
    pub fn from_signal(signal: &Signal, account_id: AccountId, position_size: Decimal) -> Self {
        Self {
            signal_id: signal.id.clone(),
            account_id,
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            position_size,
            entry: signal.entry,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillStatus {
    Filled,
    Rejected,
}

/// Asynchronous report from the sink for one submitted instruction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillReport {
    pub signal_id: SignalId,
    pub status: FillStatus,
    pub fill_price: Option<Decimal>,
}

/// External execution sink capability
#[async_trait]
pub trait OrderSink: Send + Sync {
    async fn submit(&self, instruction: &OrderInstruction) -> Result<FillReport, SinkError>;
}

/// Bounded-retry submitter wrapping the raw sink
pub struct OrderSubmitter {
    sink: Arc<dyn OrderSink>,
    max_retries: u32,
    backoff: Duration,
}

impl OrderSubmitter {
    pub fn new(sink: Arc<dyn OrderSink>, config: &GateConfig) -> Self {
        Self {
            sink,
            max_retries: config.sink_max_retries,
            backoff: Duration::from_millis(config.sink_retry_backoff_ms),
        }
    }

    /// Submit an instruction, retrying transient failures with backoff.
    ///
    /// After the retry budget is spent the error is `RetriesExhausted`; the
    /// caller records the terminal sink-failed outcome.
    pub async fn submit(&self, instruction: &OrderInstruction) -> Result<FillReport, SinkError> {
        let attempts = self.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.sink.submit(instruction).await {
                Ok(report) => {
                    info!(
                        signal_id = %instruction.signal_id,
                        account_id = %instruction.account_id,
                        status = ?report.status,
                        attempt,
                        "order sink answered"
                    );
                    return Ok(report);
                }
                Err(e) => {
                    warn!(
                        signal_id = %instruction.signal_id,
                        attempt,
                        error = %e,
                        "order sink submission failed"
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.backoff * attempt).await;
                    }
                }
            }
        }

        warn!(
            signal_id = %instruction.signal_id,
            attempts,
            error = %last_error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            "order sink retries exhausted"
        );
        Err(SinkError::RetriesExhausted {
            signal_id: instruction.signal_id.clone(),
            attempts,
        })
    }
}

/// Paper-trading sink: accepts every instruction and reports a fill at the
/// proposed entry. The default sink when no broker client is wired in.
pub struct PaperSink;

#[async_trait]
impl OrderSink for PaperSink {
    async fn submit(&self, instruction: &OrderInstruction) -> Result<FillReport, SinkError> {
        info!(
            signal_id = %instruction.signal_id,
            symbol = %instruction.symbol,
            direction = %instruction.direction,
            size = %instruction.position_size,
            "paper fill"
        );
        Ok(FillReport {
            signal_id: instruction.signal_id.clone(),
            status: FillStatus::Filled,
            fill_price: Some(instruction.entry),
        })
    }
}
