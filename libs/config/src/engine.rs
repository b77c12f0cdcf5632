//! Engine configuration: one section per component

use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use types::{Timeframe, TimeoutPolicy};

/// Complete configuration for the signal engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub aggregator: AggregatorConfig,
    pub detectors: DetectorsConfig,
    pub scorer: ScorerConfig,
    pub lifecycle: LifecycleConfig,
    pub gate: GateConfig,
    pub outcome: OutcomeConfig,
    pub calibration: CalibrationConfig,
}

/// Tick aggregation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Timeframes to build candles for
    pub timeframes: Vec<Timeframe>,
    /// Pip size used for pip-denominated thresholds (0.01 for JPY pairs)
    pub pip_size: Decimal,
    /// Reject ticks whose spread exceeds this many pips
    pub max_spread_pips: Decimal,
    /// Tolerated per-symbol timestamp regression before a tick is rejected
    pub timestamp_tolerance_secs: i64,
    /// Symbol goes stale after `staleness_multiplier × largest_timeframe`
    /// without a tick
    pub staleness_multiplier: u32,
    /// Closed candles retained per (symbol, timeframe)
    pub history_len: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            timeframes: Timeframe::ALL.to_vec(),
            pip_size: dec!(0.0001),
            max_spread_pips: dec!(20),
            timestamp_tolerance_secs: 2,
            staleness_multiplier: 2,
            history_len: 500,
        }
    }
}

impl AggregatorConfig {
    /// Seconds of silence after which a symbol is marked stale
    pub fn staleness_bound_secs(&self) -> i64 {
        let largest = self
            .timeframes
            .iter()
            .map(|tf| tf.secs())
            .max()
            .unwrap_or(Timeframe::H1.secs());
        largest * self.staleness_multiplier as i64
    }
}

/// Pattern detector registry parameters.
///
/// Per-family thresholds are flat fields rather than nested tables; the
/// detectors read only their own prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorsConfig {
    /// Scan cycle period
    pub scan_interval_secs: u64,
    /// Hard ceiling per detector per cycle; a slow detector is skipped,
    /// never allowed to stall the others
    pub detector_timeout_ms: u64,
    /// Candle window handed to each detector
    pub window_len: usize,

    // Liquidity sweep reversal
    pub sweep_lookback: usize,
    pub sweep_min_pierce_pips: f64,
    pub sweep_min_wick_ratio: f64,
    pub sweep_shift_candles: usize,

    // Displacement / order block retest
    pub ob_min_displacement_pips: f64,
    pub ob_min_volume_ratio: f64,
    pub ob_retest_tolerance_pips: f64,

    // Volatility compression breakout
    pub squeeze_band_period: usize,
    pub squeeze_width_percentile: f64,

    // Three-candle imbalance
    pub imbalance_min_gap_pips: f64,

    // Momentum breakout
    pub momentum_range_multiple: f64,
    pub momentum_volume_surge: f64,
    pub momentum_lookback: usize,

    // Mean-reversion band scalp
    pub band_period: usize,
    pub band_std_devs: f64,
    pub band_trend_guard_candles: usize,
    pub band_trend_strength_limit: f64,

    // Statistical divergence
    pub divergence_baseline_period: usize,
    pub divergence_z_threshold: f64,

    // Multi-indicator confluence
    pub confluence_min_agreeing: u8,
}

impl Default for DetectorsConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 45,
            detector_timeout_ms: 500,
            window_len: 100,
            sweep_lookback: 20,
            sweep_min_pierce_pips: 2.0,
            sweep_min_wick_ratio: 0.6,
            sweep_shift_candles: 3,
            ob_min_displacement_pips: 10.0,
            ob_min_volume_ratio: 1.5,
            ob_retest_tolerance_pips: 2.0,
            squeeze_band_period: 20,
            squeeze_width_percentile: 25.0,
            imbalance_min_gap_pips: 3.0,
            momentum_range_multiple: 2.0,
            momentum_volume_surge: 1.5,
            momentum_lookback: 20,
            band_period: 20,
            band_std_devs: 2.0,
            band_trend_guard_candles: 5,
            band_trend_strength_limit: 15.0,
            divergence_baseline_period: 30,
            divergence_z_threshold: 2.0,
            confluence_min_agreeing: 3,
        }
    }
}

/// Session weighting applied by the consensus scorer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionWeights {
    pub asian: f64,
    pub london: f64,
    pub new_york: f64,
    pub rollover: f64,
}

impl Default for SessionWeights {
    fn default() -> Self {
        Self {
            asian: 0.9,
            london: 1.0,
            new_york: 1.0,
            rollover: 0.7,
        }
    }
}

/// Consensus scorer ("Shield") parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    /// Candidates scoring below this are dropped (still shadow-logged)
    pub min_score: u8,
    /// Cross-source observations must agree within this many pips
    pub agreement_tolerance_pips: f64,
    /// Ceiling applied to the final score when price sources disagree
    pub disagreement_score_cap: u8,
    /// Penalty for candidates fighting a strong directional move
    pub counter_trend_penalty: f64,
    /// Trend strength (pips over the trend window) treated as "strong"
    pub trend_strength_limit: f64,
    pub trend_window: usize,
    /// Bonus for candidates near a known support/resistance zone
    pub sr_proximity_pips: f64,
    pub sr_proximity_bonus: f64,
    /// ATR percentile above which the volatility regime penalty applies
    pub high_volatility_percentile: f64,
    pub high_volatility_penalty: f64,
    pub session: SessionWeights,
    /// Targets below this many pips classify RAPID, at or above SNIPER
    pub rapid_target_threshold_pips: f64,
    pub rapid_rr_floor: Decimal,
    pub sniper_rr_floor: Decimal,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            min_score: 65,
            agreement_tolerance_pips: 2.0,
            disagreement_score_cap: 49,
            counter_trend_penalty: 20.0,
            trend_strength_limit: 15.0,
            trend_window: 10,
            sr_proximity_pips: 5.0,
            sr_proximity_bonus: 5.0,
            high_volatility_percentile: 90.0,
            high_volatility_penalty: 10.0,
            session: SessionWeights::default(),
            rapid_target_threshold_pips: 8.0,
            rapid_rr_floor: dec!(1.2),
            sniper_rr_floor: dec!(2.0),
        }
    }
}

/// Signal lifecycle parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Published signals expire this long after publication if never fired
    pub signal_ttl_secs: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            signal_ttl_secs: 1800,
        }
    }
}

/// Execution gate parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Consecutive losses that trigger a cooldown
    pub loss_streak_for_cooldown: u32,
    /// Cooldown window after a loss streak
    pub cooldown_secs: i64,
    /// Monetary value of one pip for one unit of position size
    pub pip_value: Decimal,
    /// Order sink retry budget before a fire resolves as failed
    pub sink_max_retries: u32,
    pub sink_retry_backoff_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            loss_streak_for_cooldown: 3,
            cooldown_secs: 1800,
            pip_value: dec!(10),
            sink_max_retries: 3,
            sink_retry_backoff_ms: 500,
        }
    }
}

/// Outcome tracking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeConfig {
    /// Hard wall-clock ceiling for tracking a signal
    pub horizon_secs: u64,
    /// How timeouts enter aggregate statistics; recorded on every record
    pub timeout_policy: TimeoutPolicy,
    /// A feed silent for this long marks the eventual outcome low-confidence
    pub feed_gap_secs: i64,
}

impl Default for OutcomeConfig {
    fn default() -> Self {
        Self {
            horizon_secs: 7200,
            timeout_policy: TimeoutPolicy::CountAsLoss,
            feed_gap_secs: 120,
        }
    }
}

/// Calibration log parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// JSONL file the calibration writer appends to
    pub log_path: String,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            log_path: "calibration.jsonl".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        crate::load_config(path)
    }

    /// Built-in defaults with environment variable overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("VIGIL_MIN_SCORE") {
            if let Ok(parsed) = value.parse::<u8>() {
                config.scorer.min_score = parsed;
            }
        }
        if let Ok(value) = std::env::var("VIGIL_SCAN_INTERVAL_SECS") {
            if let Ok(parsed) = value.parse::<u64>() {
                config.detectors.scan_interval_secs = parsed;
            }
        }
        if let Ok(value) = std::env::var("VIGIL_SIGNAL_TTL_SECS") {
            if let Ok(parsed) = value.parse::<i64>() {
                config.lifecycle.signal_ttl_secs = parsed;
            }
        }
        if let Ok(value) = std::env::var("VIGIL_OUTCOME_HORIZON_SECS") {
            if let Ok(parsed) = value.parse::<u64>() {
                config.outcome.horizon_secs = parsed;
            }
        }
        if let Ok(path) = std::env::var("VIGIL_CALIBRATION_LOG") {
            config.calibration.log_path = path;
        }

        config
    }

    /// Validate cross-field constraints before the engine starts
    pub fn validate(&self) -> Result<()> {
        if self.aggregator.timeframes.is_empty() {
            anyhow::bail!("aggregator.timeframes must not be empty");
        }
        if self.aggregator.pip_size <= Decimal::ZERO {
            anyhow::bail!("aggregator.pip_size must be positive");
        }
        if self.aggregator.history_len < self.detectors.window_len {
            anyhow::bail!(
                "aggregator.history_len ({}) must cover detectors.window_len ({})",
                self.aggregator.history_len,
                self.detectors.window_len
            );
        }
        if self.detectors.scan_interval_secs == 0 {
            anyhow::bail!("detectors.scan_interval_secs must be positive");
        }
        if self.detectors.detector_timeout_ms == 0 {
            anyhow::bail!("detectors.detector_timeout_ms must be positive");
        }
        if !(0.0..=1.0).contains(&self.detectors.sweep_min_wick_ratio) {
            anyhow::bail!("detectors.sweep_min_wick_ratio must be within [0, 1]");
        }
        if self.scorer.min_score > 100 {
            anyhow::bail!("scorer.min_score must be <= 100");
        }
        if self.scorer.rapid_rr_floor <= Decimal::ZERO
            || self.scorer.sniper_rr_floor <= Decimal::ZERO
        {
            anyhow::bail!("risk:reward floors must be positive");
        }
        if self.scorer.sniper_rr_floor < self.scorer.rapid_rr_floor {
            anyhow::bail!("sniper_rr_floor must be >= rapid_rr_floor");
        }
        if self.lifecycle.signal_ttl_secs <= 0 {
            anyhow::bail!("lifecycle.signal_ttl_secs must be positive");
        }
        if self.gate.pip_value <= Decimal::ZERO {
            anyhow::bail!("gate.pip_value must be positive");
        }
        if self.outcome.horizon_secs == 0 {
            anyhow::bail!("outcome.horizon_secs must be positive");
        }
        if self.calibration.log_path.is_empty() {
            anyhow::bail!("calibration.log_path must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_validates() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_catches_window_overflow() {
        let mut config = EngineConfig::default();
        config.aggregator.history_len = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_catches_inverted_floors() {
        let mut config = EngineConfig::default();
        config.scorer.sniper_rr_floor = dec!(1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = EngineConfig::default();
        let toml = toml::to_string(&config).unwrap();
        let back: EngineConfig = toml::from_str(&toml).unwrap();
        assert_eq!(back.scorer.min_score, config.scorer.min_score);
        assert_eq!(back.gate.pip_value, config.gate.pip_value);
        assert_eq!(back.outcome.timeout_policy, config.outcome.timeout_policy);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let toml = toml::to_string(&EngineConfig::default()).unwrap();
        file.write_all(toml.as_bytes()).unwrap();

        let config = EngineConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_staleness_bound_uses_largest_timeframe() {
        let config = AggregatorConfig::default();
        // H1 is the largest default timeframe
        assert_eq!(config.staleness_bound_secs(), 2 * 3600);
    }
}
