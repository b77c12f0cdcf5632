//! # Vigil Centralized Configuration
//!
//! Every tunable threshold in the engine lives here rather than in the
//! modules that consume it: minimum consensus scores, risk:reward floors,
//! cooldown windows, staleness bounds, and per-detector thresholds have all
//! been moved between deployments often enough that hardcoding any single
//! value is a mistake. Components receive their sub-config by value and
//! treat it as read-only.
//!
//! Loading order: built-in defaults → TOML file → environment overrides.

pub mod engine;

pub use engine::{
    AggregatorConfig, CalibrationConfig, DetectorsConfig, EngineConfig, GateConfig,
    LifecycleConfig, OutcomeConfig, ScorerConfig, SessionWeights,
};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Load any TOML-serializable config from a file
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}
