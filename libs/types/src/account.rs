//! Account tiers and per-day risk state

use crate::signal::ExecutionMode;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Account identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account class names; limits live in `AccountTier`, not here
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TierLevel {
    Starter,
    Trader,
    Professional,
}

impl std::fmt::Display for TierLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TierLevel::Starter => "starter",
            TierLevel::Trader => "trader",
            TierLevel::Professional => "professional",
        };
        write!(f, "{}", s)
    }
}

/// Risk and concurrency limits for one account class.
///
/// Read-mostly: mutation happens out of band by the account service, the
/// engine only consults it during gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountTier {
    pub tier: TierLevel,
    pub max_concurrent_positions: u32,
    /// Maximum risk per trade as a percentage of balance (e.g. 1.0 = 1%)
    pub max_risk_pct_per_trade: Decimal,
    /// Daily realized-loss ceiling as a percentage of balance
    pub max_daily_loss_pct: Decimal,
    /// Minimum final score this tier may fire
    pub min_confidence_threshold: u8,
    pub allowed_modes: Vec<ExecutionMode>,
}

impl AccountTier {
    pub fn allows_mode(&self, mode: ExecutionMode) -> bool {
        self.allowed_modes.contains(&mode)
    }
}

/// An account known to the execution gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub balance: Decimal,
    pub tier: AccountTier,
    /// Per-account emergency stop; a global flag exists on the gate as well
    pub emergency_stop: bool,
}

/// Mutable per-day risk state, owned exclusively by the execution gate.
///
/// Reset at the 00:00 UTC boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyRiskState {
    pub account_id: AccountId,
    pub date: NaiveDate,
    pub realized_loss_pct: Decimal,
    pub open_position_count: u32,
    pub consecutive_losses: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl DailyRiskState {
    pub fn new(account_id: AccountId, date: NaiveDate) -> Self {
        Self {
            account_id,
            date,
            realized_loss_pct: Decimal::ZERO,
            open_position_count: 0,
            consecutive_losses: 0,
            cooldown_until: None,
        }
    }

    /// Roll to a fresh day if the boundary has passed; cooldowns do not
    /// survive the reset
    pub fn roll_if_new_day(&mut self, today: NaiveDate) {
        if today > self.date {
            *self = DailyRiskState::new(self.account_id.clone(), today);
        }
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}
