//! Terminal outcome records for calibration

use crate::signal::SignalId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal resolution of a tracked signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "TP")]
    TakeProfit,
    #[serde(rename = "SL")]
    StopLoss,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    /// Order sink unreachable after bounded retries; the fire never reached
    /// the market
    #[serde(rename = "SINK_FAILED")]
    SinkFailed,
}

/// How timeouts enter aggregate statistics.
///
/// The choice is configuration and is recorded on every record rather than
/// assumed by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutPolicy {
    /// A timeout counts as a loss
    CountAsLoss,
    /// Timeouts are excluded from the win-rate denominator
    ExcludeFromDenominator,
}

/// Append-only outcome entry, created exactly once per signal that reaches
/// FIRED or EXPIRED. Never mutates the signal's historical fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub signal_id: SignalId,
    pub resolution: Resolution,
    /// Realized move divided by the originally risked distance
    pub achieved_r_multiple: f64,
    pub resolved_at: DateTime<Utc>,
    /// Policy in force when the record was written
    pub timeout_policy: TimeoutPolicy,
    /// True when the feed gapped and the result is extrapolated from the
    /// last known price
    pub low_confidence: bool,
    /// True for shadow signals (dropped or never fired) tracked to a
    /// hypothetical outcome
    pub shadow: bool,
}

impl OutcomeRecord {
    /// Whether this record participates in the win-rate denominator under
    /// its own recorded policy
    pub fn counts_toward_win_rate(&self) -> bool {
        match self.resolution {
            Resolution::Timeout => self.timeout_policy == TimeoutPolicy::CountAsLoss,
            Resolution::SinkFailed => false,
            _ => true,
        }
    }

    pub fn is_win(&self) -> bool {
        self.resolution == Resolution::TakeProfit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{Direction, PatternType};
    use chrono::TimeZone;

    fn record(resolution: Resolution, policy: TimeoutPolicy) -> OutcomeRecord {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        OutcomeRecord {
            signal_id: SignalId::derive("GBPUSD", PatternType::Divergence, Direction::Short, ts),
            resolution,
            achieved_r_multiple: -1.0,
            resolved_at: ts,
            timeout_policy: policy,
            low_confidence: false,
            shadow: false,
        }
    }

    #[test]
    fn test_timeout_policy_drives_denominator() {
        let counted = record(Resolution::Timeout, TimeoutPolicy::CountAsLoss);
        assert!(counted.counts_toward_win_rate());

        let excluded = record(Resolution::Timeout, TimeoutPolicy::ExcludeFromDenominator);
        assert!(!excluded.counts_toward_win_rate());
    }

    #[test]
    fn test_resolution_wire_names() {
        let r = record(Resolution::TakeProfit, TimeoutPolicy::CountAsLoss);
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"TP\""));
        let back: OutcomeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.resolution, Resolution::TakeProfit);
    }
}
