//! End-to-end fill prediction for one limit order.
//!
//! Validation is the only fatal stage. Missing history, an unsolvable
//! assignment probability or an unavailable backtest degrade the report and
//! are recorded as diagnostics.

use super::recommend::{Alternatives, LimitOrder, Observations};
use super::RecommendationEngine;
use crate::config::AppConfig;
use crate::errors::{require_positive, EngineError, EngineResult};
use crate::feeds::HistoryStore;
use crate::models::assignment::{AssignmentCalculator, AssignmentProbabilityResult, DeltaComparison};
use crate::models::black_scholes::{BlackScholes, SolverMethod};
use crate::models::volatility::{VolatilityBlend, VolatilityBlender};
use crate::models::{Greeks, OptionKind, OptionSpec, OrderSide};
use crate::session::{MarketSession, SessionState};
use crate::simulation::fill::{DayProbability, PercentileDays};
use crate::simulation::{FillDetector, MonteCarloSimulator, SimulationParameters};
use crate::validation::backtest::UnavailableReason;
use crate::validation::{
    BacktestInput, BacktestOutcome, BacktestValidator, ConfidenceMetrics, StatisticalAnalyzer, TheoreticalReport,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

// ── Request ──

/// Market quote fields from the option-chain collaborator. All optional.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct OptionQuote {
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub volume: Option<u64>,
    pub open_interest: Option<u64>,
    pub implied_volatility: Option<f64>,
    pub delta: Option<f64>,
    pub gamma: Option<f64>,
    pub theta: Option<f64>,
    pub vega: Option<f64>,
}

impl OptionQuote {
    /// Bid and ask when both are quoted and not crossed.
    pub fn spread(&self) -> Option<(f64, f64)> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) if bid.is_finite() && ask.is_finite() && bid >= 0.0 && bid <= ask => {
                Some((bid, ask))
            }
            _ => None,
        }
    }

    fn liquidity(&self) -> String {
        let count = |c: Option<u64>| c.map_or_else(|| "n/a".to_string(), |c| c.to_string());
        format!("volume {} open interest {}", count(self.volume), count(self.open_interest))
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct FillPredictionRequest {
    pub symbol: String,
    pub underlying_price: f64,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub option_kind: OptionKind,
    pub current_option_price: f64,
    pub limit_price: f64,
    pub order_side: OrderSide,
    #[serde(default)]
    pub analysis_window_days: Option<u32>,
    #[serde(default)]
    pub quote: OptionQuote,
    #[serde(default)]
    pub historical_closes: Option<Vec<f64>>,
    /// Tradable fraction of day one, overriding the session clock.
    #[serde(default)]
    pub session_fraction: Option<f64>,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

// ── Report ──

#[derive(Debug, Clone, serde::Serialize)]
pub struct Diagnostic {
    pub stage: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilitySource {
    Quote,
    Solved(SolverMethod),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GreeksSource {
    Quote,
    Model,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AnalysisBasis {
    pub volatility: VolatilityBlend,
    pub implied_volatility_source: VolatilitySource,
    pub greeks: Greeks,
    pub greeks_source: GreeksSource,
    pub session_state: SessionState,
    pub first_day: NaiveDate,
    pub first_day_fraction: f64,
    pub fraction_overridden: bool,
    pub days_to_expiry: f64,
    pub horizon_days: u32,
    pub paths: usize,
    pub seed: Option<u64>,
    pub risk_free_rate: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TheoreticalSummary {
    pub ran: bool,
    pub passed: Option<bool>,
    pub failed_checks: Vec<&'static str>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ValidationSummary {
    pub theoretical: TheoreticalSummary,
    pub backtest: BacktestOutcome,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AssignmentView {
    pub result: AssignmentProbabilityResult,
    pub delta_comparison: DeltaComparison,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FillPredictionReport {
    pub request_id: Uuid,
    pub symbol: String,
    pub generated_at: DateTime<Utc>,
    pub fill_probability: f64,
    pub first_day_fill_probability: f64,
    pub expected_days_to_fill: Option<f64>,
    pub median_days_to_fill: Option<f64>,
    pub probability_by_day: Vec<DayProbability>,
    pub percentile_days: PercentileDays,
    pub touch_probability: f64,
    pub immediate_fill: bool,
    pub confidence_metrics: ConfidenceMetrics,
    pub validation: ValidationSummary,
    pub recommendations: Observations,
    pub alternative_limits: Alternatives,
    pub analysis_basis: AnalysisBasis,
    pub assignment: Option<AssignmentView>,
    pub diagnostics: Vec<Diagnostic>,
}

// ── Predictor ──

#[derive(Debug, Clone, Copy)]
pub struct PredictorSettings {
    pub paths: usize,
    pub chunks: usize,
    pub seed: Option<u64>,
    pub risk_free_rate: f64,
    pub dividend_yield: f64,
    pub dynamic_vol_weighting: bool,
    pub max_horizon_days: u32,
    pub backtest_timeout: Duration,
    pub backtest_lookback: usize,
    pub backtest_reference_vol: f64,
    pub session: MarketSession,
}

impl PredictorSettings {
    pub fn from_config(cfg: &AppConfig) -> EngineResult<Self> {
        Ok(Self {
            paths: cfg.mc_paths,
            chunks: cfg.mc_chunks,
            seed: cfg.mc_seed,
            risk_free_rate: cfg.risk_free_rate,
            dividend_yield: cfg.dividend_yield,
            dynamic_vol_weighting: cfg.dynamic_vol_weighting,
            max_horizon_days: cfg.max_horizon_days,
            backtest_timeout: Duration::from_millis(cfg.backtest_timeout_ms),
            backtest_lookback: cfg.backtest_lookback_days,
            backtest_reference_vol: cfg.backtest_reference_vol,
            session: MarketSession::new(cfg.market_utc_offset_minutes, cfg.market_open, cfg.market_close)?,
        })
    }
}

pub struct FillPredictor {
    settings: PredictorSettings,
    pricer: BlackScholes,
    assignment: AssignmentCalculator,
    blender: VolatilityBlender,
    simulator: MonteCarloSimulator,
    analyzer: StatisticalAnalyzer,
    backtest: BacktestValidator,
    recommender: RecommendationEngine,
    history: Arc<HistoryStore>,
}

impl FillPredictor {
    pub fn new(settings: PredictorSettings, history: Arc<HistoryStore>) -> Self {
        Self {
            pricer: BlackScholes::new(),
            assignment: AssignmentCalculator::new(),
            blender: VolatilityBlender::new(settings.dynamic_vol_weighting),
            simulator: MonteCarloSimulator::new(settings.chunks),
            analyzer: StatisticalAnalyzer,
            backtest: BacktestValidator::new(
                settings.backtest_timeout,
                settings.backtest_lookback,
                settings.backtest_reference_vol,
            ),
            recommender: RecommendationEngine,
            settings,
            history,
        }
    }

    pub fn simulator(&self) -> MonteCarloSimulator {
        self.simulator
    }

    pub async fn predict_fill(
        &self,
        request: FillPredictionRequest,
        self_test: Option<&TheoreticalReport>,
    ) -> EngineResult<FillPredictionReport> {
        let request_id = Uuid::new_v4();
        let mut diagnostics = Vec::with_capacity(12);
        let mut note = |stage: &'static str, detail: String| diagnostics.push(Diagnostic { stage, detail });

        tracing::info!(
            %request_id,
            symbol = %request.symbol,
            side = %request.order_side,
            kind = %request.option_kind,
            limit = request.limit_price,
            current = request.current_option_price,
            "fill prediction started"
        );

        // 1. Inputs
        validate_request(&request)?;
        let order = LimitOrder {
            limit: request.limit_price,
            side: request.order_side,
            current_price: request.current_option_price,
        };
        note("validation", format!("{} {} limit {:.2} vs current {:.2}", request.order_side, request.option_kind, order.limit, order.current_price));

        // The reference price should sit inside the quoted spread
        let q = &request.quote;
        match q.spread() {
            Some((bid, ask)) => {
                let inside = (bid..=ask).contains(&order.current_price);
                if !inside {
                    tracing::warn!(bid, ask, current = order.current_price, "current price outside the quoted spread");
                }
                note(
                    "quote",
                    format!(
                        "bid {bid:.2} ask {ask:.2}, current {} the spread; {}",
                        if inside { "inside" } else { "outside" },
                        q.liquidity()
                    ),
                );
            }
            None => note("quote", format!("no usable bid/ask; {}", q.liquidity())),
        }

        // 2. Session and calendar
        let now = request.as_of.unwrap_or_else(Utc::now);
        let session = self
            .settings
            .session
            .context_at(now)
            .with_fraction_override(request.session_fraction);
        if request.expiration < session.first_day {
            return Err(EngineError::InvalidInput(format!(
                "expiration {} precedes the next trading session {}",
                request.expiration, session.first_day
            )));
        }
        let calendar = session.calendar(Some(request.expiration));
        let expiry_days = calendar.days_until_expiration().unwrap_or(1).max(1) as u32;
        let horizon = request
            .analysis_window_days
            .unwrap_or(expiry_days)
            .min(expiry_days)
            .min(self.settings.max_horizon_days)
            .max(1);
        let today_remaining = if session.first_day_is_today { session.first_day_fraction } else { 0.0 };
        let days_to_expiry = (request.expiration - session.today).num_days().max(0) as f64 + today_remaining;
        note(
            "session",
            format!(
                "{} fraction {:.3}{} day one {} horizon {horizon}d dte {days_to_expiry:.2}",
                session.state,
                session.first_day_fraction,
                if session.fraction_overridden { " (override)" } else { "" },
                session.first_day
            ),
        );

        let rate = self.settings.risk_free_rate;
        let base_spec = OptionSpec::new(
            request.underlying_price,
            request.strike,
            days_to_expiry,
            request.option_kind,
            rate,
            0.0,
        )
        .with_dividend_yield(self.settings.dividend_yield);

        // 3. Implied volatility
        let (implied, iv_source) = match request.quote.implied_volatility.filter(|v| v.is_finite() && *v > 0.0) {
            Some(iv) => (iv, VolatilitySource::Quote),
            None => {
                let solved = self
                    .pricer
                    .implied_volatility(&base_spec, request.current_option_price)
                    .ok_or_else(|| {
                        EngineError::InvalidInput(format!(
                            "no volatility source: quote has no implied volatility and price {:.4} admits none",
                            request.current_option_price
                        ))
                    })?;
                tracing::debug!(iv = solved.volatility, method = ?solved.method, "implied volatility solved");
                (solved.volatility, VolatilitySource::Solved(solved.method))
            }
        };
        note("implied_volatility", format!("{implied:.4} from {iv_source:?}"));
        let spec = base_spec.with_volatility(implied);

        // 4. Greeks
        let (greeks, greeks_source) = match (q.delta, q.gamma, q.theta) {
            (Some(delta), Some(gamma), Some(theta)) if delta.is_finite() && gamma.is_finite() && theta.is_finite() => {
                let g = Greeks {
                    vega: q.vega.unwrap_or(0.0),
                    ..Greeks::first_order(delta, gamma, theta, 0.0, 0.0)
                };
                (g, GreeksSource::Quote)
            }
            _ => (self.pricer.full_greeks(&spec), GreeksSource::Model),
        };
        note(
            "greeks",
            format!("{greeks_source:?} delta {:.4} gamma {:.4} theta {:.4}", greeks.delta, greeks.gamma, greeks.theta),
        );

        // 5. Volatility blend
        let closes = match request.historical_closes.clone() {
            Some(closes) => {
                if let Err(e) = self.history.put(&request.symbol, closes.clone()) {
                    tracing::warn!(error = %e, "could not cache supplied history");
                }
                note("history", format!("{} closes supplied with request", closes.len()));
                Some(closes)
            }
            None => {
                let cached = self.history.get(&request.symbol);
                match &cached {
                    Some(c) => note("history", format!("{} closes from cache", c.len())),
                    None => note("history", "no history available".to_string()),
                }
                cached
            }
        };
        let blend = self.blender.blend_from_history(implied, closes.as_deref())?;
        note(
            "volatility_blend",
            format!("{:?} effective {:.4} (iv weight {:.2})", blend.source, blend.effective_volatility, blend.iv_weight),
        );

        // 6. Assignment probability
        let assignment = match self.assignment.calculate(
            request.underlying_price,
            request.strike,
            days_to_expiry,
            implied,
            request.option_kind,
            rate,
        ) {
            Ok(result) => {
                let delta_comparison = self.assignment.compare_with_delta(&result, greeks.delta);
                note("assignment", format!("exact {:.4} vs |delta| {:.4}", result.assignment_probability, greeks.delta.abs()));
                Some(AssignmentView { result, delta_comparison })
            }
            Err(e) => {
                tracing::warn!(error = %e, "assignment probability skipped");
                note("assignment", format!("skipped: {e}"));
                None
            }
        };

        // 7. Simulation
        let params = SimulationParameters {
            current_option_price: request.current_option_price,
            underlying_price: request.underlying_price,
            strike: request.strike,
            days_to_expiry,
            horizon_days: horizon,
            greeks,
            implied_volatility: implied,
            historical_volatility: blend.historical_volatility,
            effective_volatility: blend.effective_volatility,
            risk_free_rate: rate,
            paths: self.settings.paths,
            first_day_fraction: session.first_day_fraction,
            seed: self.settings.seed,
        };
        let simulator = self.simulator;
        let ensemble = tokio::task::spawn_blocking(move || simulator.simulate(&params)).await??;
        note(
            "simulation",
            format!(
                "{} paths x {horizon} days, terminal mean {:.4} std {:.4}",
                ensemble.paths(),
                ensemble.terminal_mean(),
                ensemble.terminal_std()
            ),
        );

        // 8. Detection, backtest, statistics, recommendations
        let detector = FillDetector::new(order.limit, order.side, order.current_price);
        let outcome = detector.detect(&ensemble, Some(&calendar));
        note(
            "fill_detection",
            format!("{} of {} paths filled", outcome.filled_paths, outcome.total_paths),
        );

        let backtest = if outcome.immediate_fill {
            BacktestOutcome::unavailable(UnavailableReason::NotApplicable, "limit is marketable now")
        } else if let Some(closes) = closes {
            self.backtest
                .validate(BacktestInput {
                    closes,
                    spot: request.underlying_price,
                    strike: request.strike,
                    kind: request.option_kind,
                    days_to_expiry,
                    current_option_price: request.current_option_price,
                    limit: order.limit,
                    side: order.side,
                    horizon_days: horizon,
                    risk_free_rate: rate,
                    simulated_cumulative: outcome.probability_by_day.iter().map(|d| d.cumulative).collect(),
                })
                .await
        } else {
            BacktestOutcome::unavailable(UnavailableReason::InsufficientHistory, "no historical closes")
        };
        match &backtest {
            BacktestOutcome::Available(r) => note("backtest", format!("{} windows, mae {:.4}", r.samples, r.mean_absolute_error)),
            BacktestOutcome::Unavailable { reason, message } => note("backtest", format!("unavailable ({reason:?}): {message}")),
        }

        let confidence = self
            .analyzer
            .analyze(outcome.fill_probability, ensemble.paths(), backtest.evidence());
        note(
            "statistics",
            format!("se {:.4} level {}", confidence.standard_error, confidence.confidence_level),
        );

        let recommendations = self.recommender.recommend(
            &ensemble,
            Some(&calendar),
            order,
            &outcome,
            &confidence,
            backtest.is_available(),
        );

        let theoretical = match self_test {
            Some(report) => TheoreticalSummary {
                ran: true,
                passed: Some(report.passed),
                failed_checks: report.failed_checks(),
            },
            None => TheoreticalSummary {
                ran: false,
                passed: None,
                failed_checks: Vec::new(),
            },
        };

        tracing::info!(
            %request_id,
            p = outcome.fill_probability,
            first_day = outcome.first_day_fill_probability,
            level = %confidence.confidence_level,
            backtest = backtest.is_available(),
            "fill prediction complete"
        );

        Ok(FillPredictionReport {
            request_id,
            symbol: request.symbol,
            generated_at: Utc::now(),
            fill_probability: outcome.fill_probability,
            first_day_fill_probability: outcome.first_day_fill_probability,
            expected_days_to_fill: outcome.expected_days_to_fill,
            median_days_to_fill: outcome.median_days_to_fill,
            probability_by_day: outcome.probability_by_day,
            percentile_days: outcome.percentile_days,
            touch_probability: outcome.touch_probability,
            immediate_fill: outcome.immediate_fill,
            confidence_metrics: confidence,
            validation: ValidationSummary { theoretical, backtest },
            recommendations: recommendations.observations,
            alternative_limits: recommendations.alternatives,
            analysis_basis: AnalysisBasis {
                volatility: blend,
                implied_volatility_source: iv_source,
                greeks,
                greeks_source,
                session_state: session.state,
                first_day: session.first_day,
                first_day_fraction: session.first_day_fraction,
                fraction_overridden: session.fraction_overridden,
                days_to_expiry,
                horizon_days: horizon,
                paths: ensemble.paths(),
                seed: self.settings.seed,
                risk_free_rate: rate,
            },
            assignment,
            diagnostics,
        })
    }
}

fn validate_request(request: &FillPredictionRequest) -> EngineResult<()> {
    if request.symbol.trim().is_empty() {
        return Err(EngineError::InvalidInput("symbol must not be empty".into()));
    }
    require_positive("underlying price", request.underlying_price)?;
    require_positive("strike", request.strike)?;
    require_positive("current option price", request.current_option_price)?;
    require_positive("limit price", request.limit_price)?;
    if request.analysis_window_days == Some(0) {
        return Err(EngineError::InvalidInput("analysis window must be at least 1 day".into()));
    }

    // Equality is a marketable limit and takes the immediate-fill path
    let crosses = match request.order_side {
        OrderSide::Sell => request.limit_price < request.current_option_price,
        OrderSide::Buy => request.limit_price > request.current_option_price,
    };
    if crosses {
        return Err(EngineError::InvalidInput(format!(
            "{} limit {:.2} crosses the current price {:.2}",
            request.order_side, request.limit_price, request.current_option_price
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn predictor(seed: u64) -> FillPredictor {
        let cfg = AppConfig {
            mc_paths: 4_000,
            mc_seed: Some(seed),
            ..AppConfig::default()
        };
        let settings = PredictorSettings::from_config(&cfg).unwrap();
        FillPredictor::new(settings, Arc::new(HistoryStore::new(16, Duration::from_secs(300))))
    }

    fn request(limit: f64, side: OrderSide) -> FillPredictionRequest {
        FillPredictionRequest {
            symbol: "SPY".into(),
            underlying_price: 100.0,
            strike: 100.0,
            expiration: NaiveDate::from_ymd_opt(2026, 11, 20).unwrap(),
            option_kind: OptionKind::Call,
            current_option_price: 2.50,
            limit_price: limit,
            order_side: side,
            analysis_window_days: Some(10),
            quote: OptionQuote {
                implied_volatility: Some(0.30),
                ..OptionQuote::default()
            },
            historical_closes: None,
            session_fraction: None,
            // Tue 2026-10-20 08:00 New York, before the open
            as_of: Some(Utc.with_ymd_and_hms(2026, 10, 20, 13, 0, 0).unwrap()),
        }
    }

    fn wavy_closes(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 * (1.0 + 0.03 * (i as f64 * 0.7).sin())).collect()
    }

    #[tokio::test]
    async fn test_sell_above_current_end_to_end() {
        let report = predictor(7).predict_fill(request(2.80, OrderSide::Sell), None).await.unwrap();

        assert!((0.0..=1.0).contains(&report.fill_probability));
        assert!(report.first_day_fill_probability <= report.fill_probability);
        assert_eq!(report.analysis_basis.horizon_days, 10);
        assert_eq!(report.probability_by_day.len(), 10);
        assert_eq!(report.alternative_limits.len(), 4);
        assert_eq!(report.analysis_basis.implied_volatility_source, VolatilitySource::Quote);
        assert_eq!(report.analysis_basis.greeks_source, GreeksSource::Model);
        assert!(report.assignment.is_some());
        assert!(!report.validation.backtest.is_available());
        assert!(!report.validation.theoretical.ran);
        assert!(report.diagnostics.iter().any(|d| d.stage == "simulation"));
        assert_eq!(
            report.probability_by_day[0].date,
            NaiveDate::from_ymd_opt(2026, 10, 20)
        );
    }

    #[tokio::test]
    async fn test_unlikely_limits_offer_a_better_alternative() {
        for limit in [9.0, 40.0] {
            let report = predictor(7).predict_fill(request(limit, OrderSide::Sell), None).await.unwrap();
            assert!(report.fill_probability < 0.5, "limit {limit}: p={}", report.fill_probability);
            let best = report
                .alternative_limits
                .iter()
                .map(|a| a.fill_probability)
                .fold(0.0, f64::max);
            assert!(
                best > report.fill_probability,
                "limit {limit}: p={} alternatives={:?}",
                report.fill_probability,
                report.alternative_limits
            );
        }
        let report = predictor(7).predict_fill(request(40.0, OrderSide::Sell), None).await.unwrap();
        assert_eq!(report.fill_probability, 0.0);
        assert!(report.alternative_limits[0].fill_probability >= 0.5);
    }

    #[tokio::test]
    async fn test_same_seed_same_answer() {
        let a = predictor(3).predict_fill(request(2.90, OrderSide::Sell), None).await.unwrap();
        let b = predictor(3).predict_fill(request(2.90, OrderSide::Sell), None).await.unwrap();
        assert_eq!(a.fill_probability, b.fill_probability);
        assert_ne!(a.request_id, b.request_id);
    }

    #[tokio::test]
    async fn test_crossing_limit_rejected() {
        let err = predictor(1).predict_fill(request(2.00, OrderSide::Sell), None).await.unwrap_err();
        assert_eq!(err.kind(), "input_validation");
        let err = predictor(1).predict_fill(request(3.00, OrderSide::Buy), None).await.unwrap_err();
        assert_eq!(err.kind(), "input_validation");
    }

    #[tokio::test]
    async fn test_marketable_limit_fills_immediately() {
        let report = predictor(1).predict_fill(request(2.50, OrderSide::Sell), None).await.unwrap();
        assert!(report.immediate_fill);
        assert!(report.fill_probability > 0.99);
        assert!(matches!(
            report.validation.backtest,
            BacktestOutcome::Unavailable { reason: UnavailableReason::NotApplicable, .. }
        ));
    }

    #[tokio::test]
    async fn test_solves_iv_and_uses_cached_history() {
        let p = predictor(5);
        p.history.put("spy", wavy_closes(120)).unwrap();

        let mut req = request(2.80, OrderSide::Sell);
        req.quote = OptionQuote::default();
        let report = p.predict_fill(req, None).await.unwrap();

        assert!(matches!(report.analysis_basis.implied_volatility_source, VolatilitySource::Solved(_)));
        assert!(report.analysis_basis.volatility.historical_volatility.is_some());
        assert!(report.validation.backtest.is_available(), "backtest: {:?}", report.validation.backtest);
        assert!(report.confidence_metrics.backtest_samples.is_some());
    }

    #[tokio::test]
    async fn test_quote_spread_checked() {
        let mut req = request(2.80, OrderSide::Sell);
        req.quote.bid = Some(2.40);
        req.quote.ask = Some(2.60);
        req.quote.volume = Some(1_200);
        let report = predictor(2).predict_fill(req, None).await.unwrap();
        let quote = report.diagnostics.iter().find(|d| d.stage == "quote").unwrap();
        assert!(quote.detail.contains("inside"), "detail={}", quote.detail);
        assert!(quote.detail.contains("volume 1200"));

        let mut req = request(2.80, OrderSide::Sell);
        req.quote.bid = Some(2.60);
        req.quote.ask = Some(2.70);
        let report = predictor(2).predict_fill(req, None).await.unwrap();
        let quote = report.diagnostics.iter().find(|d| d.stage == "quote").unwrap();
        assert!(quote.detail.contains("outside"), "detail={}", quote.detail);

        let crossed = OptionQuote { bid: Some(2.7), ask: Some(2.6), ..OptionQuote::default() };
        assert!(crossed.spread().is_none());
    }

    #[tokio::test]
    async fn test_quote_greeks_preferred() {
        let mut req = request(2.80, OrderSide::Sell);
        req.quote.delta = Some(0.45);
        req.quote.gamma = Some(0.04);
        req.quote.theta = Some(-0.02);
        let report = predictor(2).predict_fill(req, None).await.unwrap();
        assert_eq!(report.analysis_basis.greeks_source, GreeksSource::Quote);
        assert_eq!(report.analysis_basis.greeks.delta, 0.45);
    }

    #[tokio::test]
    async fn test_missing_volatility_source_rejected() {
        let mut req = request(12.0, OrderSide::Sell);
        // Deep ITM call priced below intrinsic: no IV exists
        req.strike = 90.0;
        req.current_option_price = 5.0;
        req.quote = OptionQuote::default();
        let err = predictor(1).predict_fill(req, None).await.unwrap_err();
        assert_eq!(err.kind(), "input_validation");
    }

    #[tokio::test]
    async fn test_expiration_before_session_rejected() {
        let mut req = request(2.80, OrderSide::Sell);
        req.expiration = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let err = predictor(1).predict_fill(req, None).await.unwrap_err();
        assert_eq!(err.kind(), "input_validation");
    }

    #[tokio::test]
    async fn test_self_test_echoed() {
        let self_test = crate::validation::TheoreticalValidator::default().run();
        let report = predictor(1)
            .predict_fill(request(2.80, OrderSide::Sell), Some(&self_test))
            .await
            .unwrap();
        assert!(report.validation.theoretical.ran);
        assert_eq!(report.validation.theoretical.passed, Some(self_test.passed));
    }
}
