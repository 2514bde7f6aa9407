use crate::config::AppConfig;
use crate::errors::EngineResult;
use crate::execution::predictor::FillPredictionReport;
use crate::execution::{FillPredictor, PredictorSettings};
use crate::feeds::HistoryStore;
use crate::validation::{BacktestOutcome, TheoreticalReport, TheoreticalValidator};
use portable_atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

// ── Counters ──

pub struct PerfCounters {
    pub predictions_served: AtomicU64,
    pub predictions_rejected: AtomicU64,
    pub predictions_failed: AtomicU64,
    pub paths_simulated: AtomicU64,
    pub backtests_completed: AtomicU64,
    pub backtests_unavailable: AtomicU64,
    pub assignment_requests: AtomicU64,
    pub pricing_requests: AtomicU64,
    pub self_tests_run: AtomicU64,
}

impl PerfCounters {
    pub fn new() -> Self {
        Self {
            predictions_served: AtomicU64::new(0),
            predictions_rejected: AtomicU64::new(0),
            predictions_failed: AtomicU64::new(0),
            paths_simulated: AtomicU64::new(0),
            backtests_completed: AtomicU64::new(0),
            backtests_unavailable: AtomicU64::new(0),
            assignment_requests: AtomicU64::new(0),
            pricing_requests: AtomicU64::new(0),
            self_tests_run: AtomicU64::new(0),
        }
    }

    pub fn record_prediction(&self, report: &FillPredictionReport) {
        self.predictions_served.fetch_add(1, Ordering::Relaxed);
        self.paths_simulated
            .fetch_add(report.analysis_basis.paths as u64, Ordering::Relaxed);
        match report.validation.backtest {
            BacktestOutcome::Available(_) => self.backtests_completed.fetch_add(1, Ordering::Relaxed),
            BacktestOutcome::Unavailable { .. } => self.backtests_unavailable.fetch_add(1, Ordering::Relaxed),
        };
    }
}

impl Default for PerfCounters {
    fn default() -> Self {
        Self::new()
    }
}

// ── Application shared state (immutable after startup) ──

pub struct AppState {
    pub config: AppConfig,
    pub predictor: FillPredictor,
    pub history: Arc<HistoryStore>,

    // Startup theoretical validation, set at most once
    pub self_test: OnceLock<TheoreticalReport>,

    // Lock-free performance counters
    pub counters: PerfCounters,
}

impl AppState {
    pub fn new(config: AppConfig) -> EngineResult<Arc<Self>> {
        let history = Arc::new(HistoryStore::new(
            config.history_cache_capacity,
            Duration::from_secs(config.history_cache_ttl_secs),
        ));
        let settings = PredictorSettings::from_config(&config)?;
        let predictor = FillPredictor::new(settings, Arc::clone(&history));

        Ok(Arc::new(Self {
            config,
            predictor,
            history,
            self_test: OnceLock::new(),
            counters: PerfCounters::new(),
        }))
    }

    /// Run the theoretical battery. The first completed run is cached.
    pub fn run_self_test(&self) -> TheoreticalReport {
        self.counters.self_tests_run.fetch_add(1, Ordering::Relaxed);
        let report = TheoreticalValidator::new(self.predictor.simulator()).run();
        let _ = self.self_test.set(report.clone());
        report
    }

    #[inline]
    pub fn cached_self_test(&self) -> Option<&TheoreticalReport> {
        self.self_test.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_test_cached_once() {
        let state = AppState::new(AppConfig::default()).unwrap();
        assert!(state.cached_self_test().is_none());
        let first = state.run_self_test();
        let _ = state.run_self_test();
        let cached = state.cached_self_test().unwrap();
        assert_eq!(cached.generated_at, first.generated_at);
        assert_eq!(state.counters.self_tests_run.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_bad_session_config_rejected() {
        let cfg = AppConfig {
            market_utc_offset_minutes: 100_000,
            ..AppConfig::default()
        };
        assert!(AppState::new(cfg).is_err());
    }
}
