//! Pattern Detector Registry
//!
//! Every setup family implements the single `Detector` capability and is
//! registered here; new patterns are added to the registry, not forked into
//! a competing engine. The registry runs each detector against every fresh
//! symbol on a fixed cycle, isolating failures: a detector that panics or
//! overruns its timeout is logged and skipped for that symbol and cycle
//! without touching the others.

pub mod band_scalp;
pub mod confluence;
pub mod divergence;
pub mod imbalance;
pub mod indicators;
pub mod liquidity_sweep;
pub mod momentum;
pub mod order_block;
pub mod squeeze;

use crate::error::DetectorError;
use crate::store::CandleStore;
use chrono::{DateTime, Utc};
use config::DetectorsConfig;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use types::{Candle, PatternCandidate, Timeframe};

/// One setup family. Implementations are pure: same window, same answer.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Minimum closed candles required before a scan is meaningful
    fn min_window(&self) -> usize;

    /// Scan one candle window (oldest first) for a setup
    fn scan(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        window: &[Candle],
    ) -> Option<PatternCandidate>;
}

pub struct DetectorRegistry {
    config: DetectorsConfig,
    detectors: Vec<Arc<dyn Detector>>,
    store: Arc<CandleStore>,
    timeframes: Vec<Timeframe>,
    staleness_bound_secs: i64,
}

impl DetectorRegistry {
    pub fn new(
        config: DetectorsConfig,
        pip_size: Decimal,
        store: Arc<CandleStore>,
        timeframes: Vec<Timeframe>,
        staleness_bound_secs: i64,
    ) -> Self {
        let detectors: Vec<Arc<dyn Detector>> = vec![
            Arc::new(liquidity_sweep::LiquiditySweepDetector::new(
                config.clone(),
                pip_size,
            )),
            Arc::new(order_block::OrderBlockDetector::new(config.clone(), pip_size)),
            Arc::new(squeeze::SqueezeBreakoutDetector::new(config.clone(), pip_size)),
            Arc::new(imbalance::ImbalanceDetector::new(config.clone(), pip_size)),
            Arc::new(momentum::MomentumBreakoutDetector::new(
                config.clone(),
                pip_size,
            )),
            Arc::new(band_scalp::BandScalpDetector::new(config.clone(), pip_size)),
            Arc::new(divergence::DivergenceDetector::new(config.clone(), pip_size)),
            Arc::new(confluence::ConfluenceDetector::new(config.clone(), pip_size)),
        ];

        Self {
            config,
            detectors,
            store,
            timeframes,
            staleness_bound_secs,
        }
    }

    /// Registry with a caller-supplied detector set; used by tests and by
    /// deployments that disable families via config
    pub fn with_detectors(
        config: DetectorsConfig,
        detectors: Vec<Arc<dyn Detector>>,
        store: Arc<CandleStore>,
        timeframes: Vec<Timeframe>,
        staleness_bound_secs: i64,
    ) -> Self {
        Self {
            config,
            detectors,
            store,
            timeframes,
            staleness_bound_secs,
        }
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Run one scan cycle over every fresh symbol.
    ///
    /// Each (detector, symbol) pair executes as its own task under a bounded
    /// timeout; failures surface as logs, never as an aborted cycle.
    pub async fn scan_cycle(&self, now: DateTime<Utc>) -> Vec<PatternCandidate> {
        let mut tasks = Vec::new();

        for symbol in self.store.symbols() {
            if self
                .store
                .is_stale(&symbol, now, self.staleness_bound_secs)
            {
                debug!(%symbol, "skipping stale symbol");
                continue;
            }

            let windows: Arc<Vec<(Timeframe, Vec<Candle>)>> = Arc::new(
                self.timeframes
                    .iter()
                    .map(|&tf| (tf, self.store.window(&symbol, tf, self.config.window_len)))
                    .collect(),
            );

            for detector in &self.detectors {
                let detector = detector.clone();
                let name = detector.name();
                let symbol = symbol.clone();
                let windows = windows.clone();
                let timeout_ms = self.config.detector_timeout_ms;

                tasks.push((name, symbol.clone(), tokio::spawn(async move {
                    // Scans are synchronous CPU work; they run on the
                    // blocking pool so the timeout has a poll boundary to
                    // fire at. An overrunning scan is abandoned, not joined.
                    let scan_symbol = symbol.clone();
                    let scan = tokio::task::spawn_blocking(move || {
                        let mut found = Vec::new();
                        for (timeframe, window) in windows.iter() {
                            if window.len() < detector.min_window() {
                                continue;
                            }
                            if let Some(candidate) =
                                detector.scan(&scan_symbol, *timeframe, window)
                            {
                                found.push(candidate);
                            }
                        }
                        found
                    });
                    match tokio::time::timeout(Duration::from_millis(timeout_ms), scan).await {
                        Ok(Ok(found)) => Ok(found),
                        Ok(Err(_)) => Err(DetectorError::Panicked {
                            detector: name,
                            symbol,
                        }),
                        Err(_) => Err(DetectorError::Timeout {
                            detector: name,
                            symbol,
                            timeout_ms,
                        }),
                    }
                })));
            }
        }

        let joined = futures::future::join_all(
            tasks
                .into_iter()
                .map(|(name, symbol, task)| async move { (name, symbol, task.await) }),
        )
        .await;

        let mut candidates = Vec::new();
        for (name, symbol, result) in joined {
            match result {
                Ok(Ok(found)) => candidates.extend(found),
                Ok(Err(e)) => warn!(detector = name, %symbol, error = %e, "detector failed"),
                Err(_) => {
                    let e = DetectorError::Panicked {
                        detector: name,
                        symbol: symbol.clone(),
                    };
                    warn!(detector = name, %symbol, error = %e, "detector panicked");
                }
            }
        }

        debug!(count = candidates.len(), "scan cycle complete");
        candidates
    }
}

/// Clamp a derived confidence into the detector contract range.
///
/// Detectors compute confidence from measured metrics; this keeps the final
/// number inside [0, 100] without each family repeating the bounds.
pub(crate) fn clamp_confidence(raw: f64) -> u8 {
    raw.clamp(0.0, 100.0).round() as u8
}


#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use types::{Direction, PatternMetrics, PatternType};

    struct PanickingDetector;
    impl Detector for PanickingDetector {
        fn name(&self) -> &'static str {
            "panicking"
        }
        fn min_window(&self) -> usize {
            1
        }
        fn scan(&self, _: &str, _: Timeframe, _: &[Candle]) -> Option<PatternCandidate> {
            panic!("boom")
        }
    }

    struct AlwaysFiresDetector;
    impl Detector for AlwaysFiresDetector {
        fn name(&self) -> &'static str {
            "always_fires"
        }
        fn min_window(&self) -> usize {
            1
        }
        fn scan(&self, symbol: &str, timeframe: Timeframe, window: &[Candle]) -> Option<PatternCandidate> {
            let last = window.last()?;
            Some(PatternCandidate {
                symbol: symbol.to_string(),
                timeframe,
                pattern_type: PatternType::MomentumBreakout,
                direction: Direction::Long,
                raw_confidence: 70,
                metrics: PatternMetrics::default(),
                entry: last.close,
                stop_loss: last.close - dec!(0.0005),
                take_profit: last.close + dec!(0.0010),
                detected_at: last.open_time,
            })
        }
    }

    fn registry_with(detectors: Vec<Arc<dyn Detector>>) -> (DetectorRegistry, Arc<CandleStore>) {
        let store = Arc::new(CandleStore::new(100));
        let registry = DetectorRegistry::with_detectors(
            DetectorsConfig::default(),
            detectors,
            store.clone(),
            vec![Timeframe::M5],
            7200,
        );
        (registry, store)
    }

    fn seed_store(store: &CandleStore) {
        for c in testkit::quiet_window(10, dec!(1.1000)) {
            store.push_closed(c);
        }
        store.record_tick(
            "EURUSD",
            chrono::TimeZone::timestamp_opt(&chrono::Utc, 10 * 300, 0).unwrap(),
            dec!(1.1000),
        );
    }

    #[tokio::test]
    async fn test_panicking_detector_does_not_abort_cycle() {
        let (registry, store) =
            registry_with(vec![Arc::new(PanickingDetector), Arc::new(AlwaysFiresDetector)]);
        seed_store(&store);

        let now = chrono::TimeZone::timestamp_opt(&chrono::Utc, 10 * 300, 0).unwrap();
        let candidates = registry.scan_cycle(now).await;
        // The healthy detector still produced its candidate
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].pattern_type, PatternType::MomentumBreakout);
    }

    struct StalledDetector;
    impl Detector for StalledDetector {
        fn name(&self) -> &'static str {
            "stalled"
        }
        fn min_window(&self) -> usize {
            1
        }
        fn scan(&self, symbol: &str, timeframe: Timeframe, window: &[Candle]) -> Option<PatternCandidate> {
            std::thread::sleep(std::time::Duration::from_millis(300));
            AlwaysFiresDetector.scan(symbol, timeframe, window)
        }
    }

    #[tokio::test]
    async fn test_overrunning_detector_times_out_without_stalling_cycle() {
        let store = Arc::new(CandleStore::new(100));
        let registry = DetectorRegistry::with_detectors(
            DetectorsConfig {
                detector_timeout_ms: 50,
                ..DetectorsConfig::default()
            },
            vec![Arc::new(StalledDetector)],
            store.clone(),
            vec![Timeframe::M5],
            7200,
        );
        seed_store(&store);

        let now = chrono::TimeZone::timestamp_opt(&chrono::Utc, 10 * 300, 0).unwrap();
        let started = std::time::Instant::now();
        let candidates = registry.scan_cycle(now).await;
        // The detector would have produced a candidate had it been allowed
        // to finish; the timeout abandoned it instead
        assert!(candidates.is_empty());
        assert!(started.elapsed() < std::time::Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_stale_symbol_skipped() {
        let (registry, store) = registry_with(vec![Arc::new(AlwaysFiresDetector)]);
        seed_store(&store);

        let long_after = chrono::TimeZone::timestamp_opt(&chrono::Utc, 10 * 300 + 8000, 0).unwrap();
        let candidates = registry.scan_cycle(long_after).await;
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_default_registry_has_all_families() {
        let store = Arc::new(CandleStore::new(100));
        let registry = DetectorRegistry::new(
            DetectorsConfig::default(),
            dec!(0.0001),
            store,
            vec![Timeframe::M5],
            7200,
        );
        assert_eq!(registry.detector_names().len(), 8);
    }
}
