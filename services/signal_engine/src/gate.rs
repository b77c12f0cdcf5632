//! Execution gate
//!
//! Validates a fire request against account tier, daily risk, concurrency
//! slots, cooldowns, and the emergency stop before authorizing an order.
//! Checks run in a fixed order and short-circuit on the first failure; every
//! decision, accept or reject, is logged with its reason code. Each account's
//! state sits behind its own async mutex so concurrent fire requests cannot
//! double-count slots or daily-loss state; accounts never contend with each
//! other.

use crate::error::{EngineError, Result};
use crate::lifecycle::SignalBook;
use chrono::{DateTime, Utc};
use config::GateConfig;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use types::{Account, AccountId, DailyRiskState, RejectReason, Signal, SignalState};

/// Outcome of an authorization attempt. Rejections are business outcomes,
/// not errors.
#[derive(Debug, Clone)]
pub enum GateDecision {
    Accept {
        signal: Signal,
        position_size: Decimal,
    },
    Reject(RejectReason),
}

struct AccountState {
    account: Account,
    daily: DailyRiskState,
}

pub struct ExecutionGate {
    config: GateConfig,
    pip_size: Decimal,
    book: Arc<SignalBook>,
    global_stop: AtomicBool,
    accounts: DashMap<AccountId, Arc<Mutex<AccountState>>>,
}

impl ExecutionGate {
    pub fn new(config: GateConfig, pip_size: Decimal, book: Arc<SignalBook>) -> Self {
        Self {
            config,
            pip_size,
            book,
            global_stop: AtomicBool::new(false),
            accounts: DashMap::new(),
        }
    }

    pub fn register_account(&self, account: Account, today: chrono::NaiveDate) {
        let id = account.account_id.clone();
        let daily = DailyRiskState::new(id.clone(), today);
        self.accounts
            .insert(id, Arc::new(Mutex::new(AccountState { account, daily })));
    }

    /// Engine-wide kill switch; trips every subsequent authorization
    pub fn set_emergency_stop(&self, engaged: bool) {
        warn!(engaged, "global emergency stop toggled");
        self.global_stop.store(engaged, Ordering::SeqCst);
    }

    pub fn emergency_stop_engaged(&self) -> bool {
        self.global_stop.load(Ordering::SeqCst)
    }

    /// Authorize a fire request.
    ///
    /// Holds the account's lock for the full check-and-commit so slot
    /// counting stays correct under concurrent requests.
    pub async fn authorize(
        &self,
        signal_id: &types::SignalId,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<GateDecision> {
        let state = self
            .accounts
            .get(account_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::UnknownAccount(account_id.0.clone()))?;
        let mut state = state.lock().await;
        state.daily.roll_if_new_day(now.date_naive());

        let signal = self
            .book
            .get(signal_id)
            .ok_or_else(|| EngineError::UnknownSignal(signal_id.clone()))?;

        if let Some(reason) = self.check(&state, &signal, now) {
            info!(
                %signal_id,
                %account_id,
                reason = reason.as_code(),
                "fire request rejected"
            );
            return Ok(GateDecision::Reject(reason));
        }

        // The lifecycle manager re-validates expiry; a race between expiry
        // and authorization resolves to rejection here
        let fired = match self.book.fire(signal_id, now) {
            Ok(signal) => signal,
            Err(EngineError::State(_)) => {
                info!(
                    %signal_id,
                    %account_id,
                    reason = RejectReason::Expired.as_code(),
                    "fire request lost the expiry race"
                );
                return Ok(GateDecision::Reject(RejectReason::Expired));
            }
            Err(e) => return Err(e),
        };

        let position_size = self.position_size(&state.account, &fired);
        state.daily.open_position_count += 1;

        info!(
            %signal_id,
            %account_id,
            %position_size,
            open_positions = state.daily.open_position_count,
            "fire request accepted"
        );
        Ok(GateDecision::Accept {
            signal: fired,
            position_size,
        })
    }

    /// Ordered short-circuit checks; `None` means all passed
    fn check(&self, state: &AccountState, signal: &Signal, now: DateTime<Utc>) -> Option<RejectReason> {
        let account = &state.account;
        let tier = &account.tier;

        if self.emergency_stop_engaged() || account.emergency_stop {
            return Some(RejectReason::EmergencyStop);
        }
        if signal.state != SignalState::Published || signal.is_expired(now) {
            return Some(RejectReason::Expired);
        }
        if !tier.allows_mode(signal.mode) {
            return Some(RejectReason::TierLimit);
        }
        if signal.final_score < tier.min_confidence_threshold {
            return Some(RejectReason::BelowThreshold);
        }
        if state.daily.realized_loss_pct >= tier.max_daily_loss_pct {
            return Some(RejectReason::DailyLossLimit);
        }
        if state.daily.in_cooldown(now) {
            return Some(RejectReason::Cooldown);
        }
        if state.daily.open_position_count >= tier.max_concurrent_positions {
            return Some(RejectReason::TierLimit);
        }
        None
    }

    /// Risk-budgeted size: the monetary risk at the stop equals the tier's
    /// per-trade percentage of balance
    fn position_size(&self, account: &Account, signal: &Signal) -> Decimal {
        let risk_amount = account.balance * account.tier.max_risk_pct_per_trade / Decimal::from(100);
        let stop_pips = signal.stop_distance() / self.pip_size;
        if stop_pips.is_zero() {
            return Decimal::ZERO;
        }
        risk_amount / (stop_pips * self.config.pip_value)
    }

    /// Fold a resolved outcome back into the account's daily risk state.
    ///
    /// Losses accumulate toward the daily limit and the loss streak; a
    /// streak at the configured length starts a cooldown.
    pub async fn record_result(
        &self,
        account_id: &AccountId,
        achieved_r_multiple: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let state = self
            .accounts
            .get(account_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::UnknownAccount(account_id.0.clone()))?;
        let mut state = state.lock().await;
        state.daily.roll_if_new_day(now.date_naive());
        state.daily.open_position_count = state.daily.open_position_count.saturating_sub(1);

        if achieved_r_multiple < 0.0 {
            let lost_r = Decimal::try_from(-achieved_r_multiple).unwrap_or(Decimal::ONE);
            let loss_pct = state.account.tier.max_risk_pct_per_trade * lost_r;
            state.daily.realized_loss_pct += loss_pct;
            state.daily.consecutive_losses += 1;

            if state.daily.consecutive_losses >= self.config.loss_streak_for_cooldown {
                let until = now + chrono::Duration::seconds(self.config.cooldown_secs);
                state.daily.cooldown_until = Some(until);
                warn!(
                    %account_id,
                    streak = state.daily.consecutive_losses,
                    %until,
                    "loss streak cooldown engaged"
                );
            }
        } else if achieved_r_multiple > 0.0 {
            // Only a real win clears the streak; breakeven results and
            // sink failures carry r = 0 and must leave it untouched
            state.daily.consecutive_losses = 0;
        }

        info!(
            %account_id,
            r = achieved_r_multiple,
            realized_loss_pct = %state.daily.realized_loss_pct,
            "outcome folded into daily risk state"
        );
        Ok(())
    }

    /// Snapshot of an account's daily state, for the health surface
    pub async fn daily_state(&self, account_id: &AccountId) -> Option<DailyRiskState> {
        let state = self.accounts.get(account_id).map(|entry| Arc::clone(entry.value()))?;
        let state = state.lock().await;
        Some(state.daily.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::PublishOutcome;
    use crate::scorer::ScoredCandidate;
    use chrono::TimeZone;
    use config::LifecycleConfig;
    use rust_decimal_macros::dec;
    use types::{
        AccountTier, Direction, ExecutionMode, PatternCandidate, PatternMetrics, PatternType,
        TierLevel, Timeframe,
    };

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn tier() -> AccountTier {
        AccountTier {
            tier: TierLevel::Trader,
            max_concurrent_positions: 2,
            max_risk_pct_per_trade: dec!(1.0),
            max_daily_loss_pct: dec!(3.0),
            min_confidence_threshold: 70,
            allowed_modes: vec![ExecutionMode::Rapid, ExecutionMode::Sniper],
        }
    }

    fn account(id: &str) -> Account {
        Account {
            account_id: AccountId(id.to_string()),
            balance: dec!(10000),
            tier: tier(),
            emergency_stop: false,
        }
    }

    fn scored(symbol: &str, direction: Direction, score: u8) -> ScoredCandidate {
        let candidate = PatternCandidate {
            symbol: symbol.to_string(),
            timeframe: Timeframe::M5,
            pattern_type: PatternType::OrderBlock,
            direction,
            raw_confidence: score,
            metrics: PatternMetrics::default(),
            entry: dec!(1.1000),
            stop_loss: dec!(1.0995),
            take_profit: dec!(1.1010),
            detected_at: now(),
        };
        ScoredCandidate {
            entry: candidate.entry,
            stop_loss: candidate.stop_loss,
            take_profit: candidate.take_profit,
            candidate,
            final_score: score,
            mode: ExecutionMode::Sniper,
            risk_reward: dec!(2.0),
            tp_widened: false,
        }
    }

    fn setup() -> (Arc<SignalBook>, ExecutionGate) {
        let book = Arc::new(SignalBook::new(LifecycleConfig {
            signal_ttl_secs: 1800,
        }));
        let gate = ExecutionGate::new(GateConfig::default(), dec!(0.0001), book.clone());
        gate.register_account(account("acct-1"), now().date_naive());
        (book, gate)
    }

    fn publish(book: &SignalBook, symbol: &str, direction: Direction, score: u8) -> Signal {
        match book.publish(&scored(symbol, direction, score), now()) {
            PublishOutcome::Published(signal) => signal,
            other => panic!("expected publish, got {other:?}"),
        }
    }

    fn acct() -> AccountId {
        AccountId("acct-1".to_string())
    }

    #[tokio::test]
    async fn test_accept_sizes_position_to_risk_budget() {
        let (book, gate) = setup();
        let signal = publish(&book, "EURUSD", Direction::Long, 80);

        let decision = gate.authorize(&signal.id, &acct(), now()).await.unwrap();
        let GateDecision::Accept {
            signal: fired,
            position_size,
        } = decision
        else {
            panic!("expected accept");
        };
        assert_eq!(fired.state, SignalState::Fired);
        // 1% of 10000 = 100 at risk; 5-pip stop at 10/pip = 2.0 lots
        assert_eq!(position_size, dec!(2.0));
        // Monetary risk never exceeds balance × max_risk_pct
        let stop_pips = fired.stop_distance() / dec!(0.0001);
        assert!(position_size * stop_pips * dec!(10) <= dec!(10000) * dec!(1.0));
    }

    #[tokio::test]
    async fn test_daily_loss_limit_rejects_regardless_of_score() {
        let (book, gate) = setup();
        // Burn the entire daily budget: three full-risk losses
        for _ in 0..3 {
            gate.record_result(&acct(), -1.0, now()).await.unwrap();
        }
        let signal = publish(&book, "EURUSD", Direction::Long, 99);

        // Cooldown also engaged by the streak, but the loss limit is
        // checked first
        let decision = gate.authorize(&signal.id, &acct(), now()).await.unwrap();
        assert!(matches!(
            decision,
            GateDecision::Reject(RejectReason::DailyLossLimit)
        ));
    }

    #[tokio::test]
    async fn test_late_fire_request_rejected_expired() {
        let (book, gate) = setup();
        let signal = publish(&book, "EURUSD", Direction::Long, 80);

        let after_expiry = signal.expires_at + chrono::Duration::seconds(1);
        let decision = gate.authorize(&signal.id, &acct(), after_expiry).await.unwrap();
        assert!(matches!(
            decision,
            GateDecision::Reject(RejectReason::Expired)
        ));
    }

    #[tokio::test]
    async fn test_emergency_stop_beats_everything() {
        let (book, gate) = setup();
        let signal = publish(&book, "EURUSD", Direction::Long, 99);
        gate.set_emergency_stop(true);

        let decision = gate.authorize(&signal.id, &acct(), now()).await.unwrap();
        assert!(matches!(
            decision,
            GateDecision::Reject(RejectReason::EmergencyStop)
        ));

        gate.set_emergency_stop(false);
        let decision = gate.authorize(&signal.id, &acct(), now()).await.unwrap();
        assert!(matches!(decision, GateDecision::Accept { .. }));
    }

    #[tokio::test]
    async fn test_below_tier_threshold_rejected() {
        let (book, gate) = setup();
        // 65 clears the engine minimum but not this tier's 70
        let signal = publish(&book, "EURUSD", Direction::Long, 65);

        let decision = gate.authorize(&signal.id, &acct(), now()).await.unwrap();
        assert!(matches!(
            decision,
            GateDecision::Reject(RejectReason::BelowThreshold)
        ));
    }

    #[tokio::test]
    async fn test_concurrency_slots_enforced() {
        let (book, gate) = setup();
        let first = publish(&book, "EURUSD", Direction::Long, 80);
        let second = publish(&book, "GBPUSD", Direction::Long, 80);
        let third = publish(&book, "USDJPY", Direction::Long, 80);

        for signal in [&first, &second] {
            let decision = gate.authorize(&signal.id, &acct(), now()).await.unwrap();
            assert!(matches!(decision, GateDecision::Accept { .. }));
        }

        let decision = gate.authorize(&third.id, &acct(), now()).await.unwrap();
        assert!(matches!(
            decision,
            GateDecision::Reject(RejectReason::TierLimit)
        ));

        // A win frees the slot
        gate.record_result(&acct(), 2.0, now()).await.unwrap();
        let decision = gate.authorize(&third.id, &acct(), now()).await.unwrap();
        assert!(matches!(decision, GateDecision::Accept { .. }));
    }

    #[tokio::test]
    async fn test_loss_streak_starts_cooldown() {
        let (book, gate) = setup();
        // Three small losses: streak trips the cooldown before the daily
        // loss budget is gone
        for _ in 0..3 {
            gate.record_result(&acct(), -0.5, now()).await.unwrap();
        }
        let signal = publish(&book, "EURUSD", Direction::Long, 80);

        let decision = gate.authorize(&signal.id, &acct(), now()).await.unwrap();
        assert!(matches!(
            decision,
            GateDecision::Reject(RejectReason::Cooldown)
        ));

        // Past the cooldown window a fresh signal can fire again
        let later = now() + chrono::Duration::seconds(1801);
        let fresh = match book.publish(&scored("GBPUSD", Direction::Long, 80), later) {
            PublishOutcome::Published(signal) => signal,
            other => panic!("expected publish, got {other:?}"),
        };
        let decision = gate.authorize(&fresh.id, &acct(), later).await.unwrap();
        assert!(matches!(decision, GateDecision::Accept { .. }));
    }

    #[tokio::test]
    async fn test_zero_r_result_leaves_loss_streak_intact() {
        let (book, gate) = setup();
        // Two losses, then a breakeven (as a sink failure records), then a
        // third loss: the streak must reach the cooldown bar
        gate.record_result(&acct(), -0.5, now()).await.unwrap();
        gate.record_result(&acct(), -0.5, now()).await.unwrap();
        gate.record_result(&acct(), 0.0, now()).await.unwrap();
        gate.record_result(&acct(), -0.5, now()).await.unwrap();

        let signal = publish(&book, "EURUSD", Direction::Long, 80);
        let decision = gate.authorize(&signal.id, &acct(), now()).await.unwrap();
        assert!(matches!(
            decision,
            GateDecision::Reject(RejectReason::Cooldown)
        ));
    }

    #[tokio::test]
    async fn test_daily_state_resets_at_midnight() {
        let (book, gate) = setup();
        for _ in 0..3 {
            gate.record_result(&acct(), -1.0, now()).await.unwrap();
        }
        let signal = publish(&book, "EURUSD", Direction::Long, 80);

        // Next UTC day: budget and streak reset
        let next_day = now() + chrono::Duration::days(1);
        let decision = gate.authorize(&signal.id, &acct(), next_day).await.unwrap();
        // Signal itself expired overnight, so expiry rejects; check state
        assert!(matches!(
            decision,
            GateDecision::Reject(RejectReason::Expired)
        ));
        let daily = gate.daily_state(&acct()).await.unwrap();
        assert_eq!(daily.realized_loss_pct, Decimal::ZERO);
        assert_eq!(daily.consecutive_losses, 0);
    }

    #[tokio::test]
    async fn test_unknown_account_is_an_error() {
        let (book, gate) = setup();
        let signal = publish(&book, "EURUSD", Direction::Long, 80);
        let ghost = AccountId("nope".to_string());
        assert!(matches!(
            gate.authorize(&signal.id, &ghost, now()).await,
            Err(EngineError::UnknownAccount(_))
        ));
    }

    #[tokio::test]
    async fn test_mode_disallowed_by_tier() {
        let (book, gate) = setup();
        let mut starter = account("acct-2");
        starter.tier.allowed_modes = vec![ExecutionMode::Rapid];
        gate.register_account(starter, now().date_naive());

        // Sniper-mode signal against a rapid-only account
        let signal = publish(&book, "EURUSD", Direction::Long, 80);
        let decision = gate
            .authorize(&signal.id, &AccountId("acct-2".to_string()), now())
            .await
            .unwrap();
        assert!(matches!(
            decision,
            GateDecision::Reject(RejectReason::TierLimit)
        ));
    }
}
