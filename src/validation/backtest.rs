use super::stats::BacktestEvidence;
use crate::errors::{EngineError, EngineResult};
use crate::models::black_scholes::BlackScholes;
use crate::models::{OptionKind, OptionSpec, OrderSide, PricingModel, DAYS_PER_YEAR};
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3_000);
pub const DEFAULT_LOOKBACK: usize = 90;
/// Volatility every historical window is repriced with.
pub const DEFAULT_REFERENCE_VOL: f64 = 0.30;
/// Historical closes are trading days; simulated days are calendar days.
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone)]
pub struct BacktestInput {
    pub closes: Vec<f64>,
    pub spot: f64,
    pub strike: f64,
    pub kind: OptionKind,
    pub days_to_expiry: f64,
    pub current_option_price: f64,
    pub limit: f64,
    pub side: OrderSide,
    pub horizon_days: u32,
    pub risk_free_rate: f64,
    /// Simulated cumulative fill probability for days 1, 2, ...
    pub simulated_cumulative: Vec<f64>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BacktestReport {
    pub historical_fill_rate: f64,
    /// Fraction of windows filled by the end of day 1, 2, ...
    pub cumulative_by_day: Vec<f64>,
    pub samples: usize,
    pub mean_absolute_error: f64,
    pub reference_volatility: f64,
    pub lookback_closes: usize,
    /// Closes replayed per window to span the calendar horizon.
    pub closes_per_window: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    InsufficientHistory,
    Timeout,
    Failed,
    /// The limit is marketable now; there is no fill timing to compare.
    NotApplicable,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BacktestOutcome {
    Available(BacktestReport),
    Unavailable { reason: UnavailableReason, message: String },
}

impl BacktestOutcome {
    pub fn unavailable(reason: UnavailableReason, message: impl Into<String>) -> Self {
        Self::Unavailable {
            reason,
            message: message.into(),
        }
    }

    /// Figures for confidence scoring. Unavailable outcomes contribute nothing.
    pub fn evidence(&self) -> Option<BacktestEvidence> {
        match self {
            Self::Available(r) => Some(BacktestEvidence {
                mean_absolute_error: r.mean_absolute_error,
                samples: r.samples,
            }),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

/// Replays the limit order over historical windows of the underlying.
///
/// Known simplification: every window is repriced with one fixed reference
/// volatility instead of the volatility prevailing at the time.
///
/// Each close is one trading day. Windows span the trading days that cover
/// the calendar horizon, and the historical curve is read back per calendar
/// day so it lines up with the simulated one.
#[derive(Debug, Clone, Copy)]
pub struct BacktestValidator {
    timeout: Duration,
    lookback: usize,
    reference_vol: f64,
}

impl Default for BacktestValidator {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_LOOKBACK, DEFAULT_REFERENCE_VOL)
    }
}

impl BacktestValidator {
    pub fn new(timeout: Duration, lookback: usize, reference_vol: f64) -> Self {
        Self {
            timeout,
            lookback,
            reference_vol,
        }
    }

    /// Run on a blocking worker under the time budget. Never fails the caller.
    pub async fn validate(&self, input: BacktestInput) -> BacktestOutcome {
        let lookback = self.lookback;
        let reference_vol = self.reference_vol;
        self.run_blocking(move || replay(&input, lookback, reference_vol)).await
    }

    async fn run_blocking<F>(&self, job: F) -> BacktestOutcome
    where
        F: FnOnce() -> EngineResult<BacktestReport> + Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(job);
        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(Ok(report))) => {
                tracing::debug!(
                    samples = report.samples,
                    mae = report.mean_absolute_error,
                    rate = report.historical_fill_rate,
                    "backtest complete"
                );
                BacktestOutcome::Available(report)
            }
            Ok(Ok(Err(EngineError::DataUnavailable(msg)))) => {
                tracing::warn!(reason = msg.as_str(), "backtest skipped");
                BacktestOutcome::unavailable(UnavailableReason::InsufficientHistory, msg)
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(error = %e, "backtest failed");
                BacktestOutcome::unavailable(UnavailableReason::Failed, e.to_string())
            }
            Ok(Err(join)) => {
                let e = EngineError::from(join);
                tracing::warn!(error = %e, "backtest worker failed");
                BacktestOutcome::unavailable(UnavailableReason::Failed, e.to_string())
            }
            Err(_) => {
                let e = EngineError::Timeout(format!("backtest exceeded {} ms budget", self.timeout.as_millis()));
                tracing::warn!(error = %e, "backtest abandoned");
                BacktestOutcome::unavailable(UnavailableReason::Timeout, e.to_string())
            }
        }
    }
}

fn replay(input: &BacktestInput, lookback: usize, reference_vol: f64) -> EngineResult<BacktestReport> {
    replay_with(&BlackScholes::new(), input, lookback, reference_vol)
}

fn replay_with(
    pricer: &dyn PricingModel,
    input: &BacktestInput,
    lookback: usize,
    reference_vol: f64,
) -> EngineResult<BacktestReport> {
    if !(input.spot > 0.0 && input.current_option_price > 0.0 && input.limit > 0.0) {
        return Err(EngineError::InvalidInput("backtest requires positive prices".into()));
    }

    let closes: Vec<f64> = input.closes.iter().copied().filter(|c| c.is_finite() && *c > 0.0).collect();
    let closes = &closes[closes.len().saturating_sub(lookback)..];
    let horizon = input.horizon_days as usize;
    let steps = trading_steps(horizon);

    if horizon == 0 || closes.len() <= steps {
        return Err(EngineError::DataUnavailable(format!(
            "{} usable closes cannot cover a {horizon}-day window",
            closes.len()
        )));
    }

    let ratio = input.limit / input.current_option_price;
    let windows = closes.len() - steps;
    let mut fills_by_step = vec![0usize; steps + 1];

    for start in 0..windows {
        let start_spot = closes[start];
        // Keep moneyness: K/S is the same as today
        let strike = input.strike * start_spot / input.spot;
        let price_at = |spot: f64, step: usize| {
            let dte = (input.days_to_expiry - calendar_days(step)).max(0.0);
            let spec = OptionSpec::new(spot, strike, dte, input.kind, input.risk_free_rate, reference_vol);
            pricer.price(&spec)
        };
        let target = price_at(start_spot, 0) * ratio;

        let first_fill = (1..=steps).find(|&k| input.side.is_filled(price_at(closes[start + k], k), target));
        if let Some(step) = first_fill {
            fills_by_step[step] += 1;
        }
    }

    let n = windows as f64;
    let mut running = 0usize;
    let cumulative_by_step: Vec<f64> = fills_by_step[1..]
        .iter()
        .map(|&c| {
            running += c;
            running as f64 / n
        })
        .collect();
    let cumulative_by_day: Vec<f64> = (1..=horizon)
        .map(|day| cumulative_by_step[trading_steps(day) - 1])
        .collect();

    let compared = cumulative_by_day.len().min(input.simulated_cumulative.len());
    if compared == 0 {
        return Err(EngineError::DataUnavailable("no simulated curve to compare against".into()));
    }
    let mean_absolute_error = cumulative_by_day
        .iter()
        .zip(&input.simulated_cumulative)
        .map(|(h, s)| (h - s).abs())
        .sum::<f64>()
        / compared as f64;

    Ok(BacktestReport {
        historical_fill_rate: running as f64 / n,
        cumulative_by_day,
        samples: windows,
        mean_absolute_error,
        reference_volatility: reference_vol,
        lookback_closes: closes.len(),
        closes_per_window: steps,
    })
}

/// Trading days (closes) elapsed by the end of calendar day `days`; at least one.
#[inline]
fn trading_steps(days: usize) -> usize {
    ((days as f64 * TRADING_DAYS_PER_YEAR / DAYS_PER_YEAR).round() as usize).max(1)
}

/// Calendar days elapsed after `steps` closes.
#[inline]
fn calendar_days(steps: usize) -> f64 {
    steps as f64 * DAYS_PER_YEAR / TRADING_DAYS_PER_YEAR
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(closes: Vec<f64>, limit: f64, side: OrderSide) -> BacktestInput {
        BacktestInput {
            closes,
            spot: 100.0,
            strike: 100.0,
            kind: OptionKind::Call,
            days_to_expiry: 30.0,
            current_option_price: 3.0,
            limit,
            side,
            horizon_days: 5,
            risk_free_rate: 0.05,
            simulated_cumulative: vec![0.1, 0.2, 0.3, 0.4, 0.5],
        }
    }

    fn rising(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 * 1.01f64.powi(i as i32)).collect()
    }

    #[tokio::test]
    async fn test_insufficient_history() {
        let outcome = BacktestValidator::default()
            .validate(input(vec![100.0, 101.0, 102.0], 3.3, OrderSide::Sell))
            .await;
        match outcome {
            BacktestOutcome::Unavailable { reason, .. } => assert_eq!(reason, UnavailableReason::InsufficientHistory),
            other => panic!("expected unavailable, got {other:?}"),
        }
        assert!(BacktestValidator::default()
            .validate(input(Vec::new(), 3.3, OrderSide::Sell))
            .await
            .evidence()
            .is_none());
    }

    #[tokio::test]
    async fn test_rising_market_fills_call_seller() {
        let outcome = BacktestValidator::default()
            .validate(input(rising(40), 3.3, OrderSide::Sell))
            .await;
        let BacktestOutcome::Available(report) = outcome else {
            panic!("expected available backtest");
        };
        // Five calendar days span three closes
        assert_eq!(report.closes_per_window, 3);
        assert_eq!(report.samples, 37);
        assert_eq!(report.cumulative_by_day.len(), 5);
        // +1% a day lifts an ATM call well over 10% within five days
        assert!(report.historical_fill_rate > 0.99, "rate={}", report.historical_fill_rate);
        assert!(report.cumulative_by_day.windows(2).all(|w| w[0] <= w[1]));
        assert!((0.0..=1.0).contains(&report.mean_absolute_error));
        assert_eq!(report.reference_volatility, DEFAULT_REFERENCE_VOL);
    }

    #[tokio::test]
    async fn test_rising_market_starves_call_buyer() {
        let outcome = BacktestValidator::default()
            .validate(input(rising(40), 2.7, OrderSide::Buy))
            .await;
        let evidence = outcome.evidence().unwrap();
        assert_eq!(evidence.samples, 37);
        let BacktestOutcome::Available(report) = outcome else { unreachable!() };
        assert_eq!(report.historical_fill_rate, 0.0);
    }

    #[tokio::test]
    async fn test_lookback_truncates_history() {
        let validator = BacktestValidator::new(DEFAULT_TIMEOUT, 20, DEFAULT_REFERENCE_VOL);
        let outcome = validator.validate(input(rising(200), 3.3, OrderSide::Sell)).await;
        let BacktestOutcome::Available(report) = outcome else {
            panic!("expected available backtest");
        };
        assert_eq!(report.lookback_closes, 20);
        assert_eq!(report.samples, 17);
    }

    #[test]
    fn test_calendar_days_map_to_closes() {
        assert_eq!(trading_steps(1), 1);
        assert_eq!(trading_steps(2), 1);
        assert_eq!(trading_steps(7), 5);
        assert_eq!(trading_steps(10), 7);
        assert_eq!(trading_steps(365), 252);
        assert!((calendar_days(5) - 7.24).abs() < 0.01);
    }

    #[test]
    fn test_curve_is_per_calendar_day() {
        let mut inp = input(rising(40), 3.3, OrderSide::Sell);
        inp.horizon_days = 10;
        inp.simulated_cumulative = vec![0.5; 10];
        let report = replay(&inp, DEFAULT_LOOKBACK, DEFAULT_REFERENCE_VOL).unwrap();
        assert_eq!(report.closes_per_window, 7);
        assert_eq!(report.samples, 33);
        assert_eq!(report.cumulative_by_day.len(), 10);
        // Calendar days 1 and 2 both end after the first close
        assert_eq!(report.cumulative_by_day[0], report.cumulative_by_day[1]);
    }

    #[tokio::test]
    async fn test_timeout_is_advisory() {
        let validator = BacktestValidator::new(Duration::from_millis(10), DEFAULT_LOOKBACK, DEFAULT_REFERENCE_VOL);
        let outcome = validator
            .run_blocking(|| {
                std::thread::sleep(Duration::from_millis(300));
                Err(EngineError::Computation("too late".into()))
            })
            .await;
        match outcome {
            BacktestOutcome::Unavailable { reason, .. } => assert_eq!(reason, UnavailableReason::Timeout),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_worker_panic_is_contained() {
        let outcome = BacktestValidator::default()
            .run_blocking(|| panic!("worker blew up"))
            .await;
        match outcome {
            BacktestOutcome::Unavailable { reason, .. } => assert_eq!(reason, UnavailableReason::Failed),
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
