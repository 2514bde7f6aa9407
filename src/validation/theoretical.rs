use crate::errors::EngineResult;
use crate::models::black_scholes::BlackScholes;
use crate::models::{OptionKind, OptionSpec, OrderSide, PricingModel};
use crate::simulation::{FillDetector, MonteCarloSimulator, SimulationParameters};
use chrono::{DateTime, Utc};

/// Fixed seed for the self-test battery.
const SELF_TEST_SEED: u64 = 20_240_601;
const SELF_TEST_PATHS: usize = 2_000;

#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TheoreticalReport {
    pub passed: bool,
    pub checks: Vec<CheckResult>,
    pub generated_at: DateTime<Utc>,
}

impl TheoreticalReport {
    pub fn failed_checks(&self) -> Vec<&'static str> {
        self.checks.iter().filter(|c| !c.passed).map(|c| c.name).collect()
    }
}

/// Sanity battery on the simulator and pricer with known expected behaviour.
pub struct TheoreticalValidator {
    pricer: BlackScholes,
    simulator: MonteCarloSimulator,
}

impl Default for TheoreticalValidator {
    fn default() -> Self {
        Self::new(MonteCarloSimulator::default())
    }
}

impl TheoreticalValidator {
    pub fn new(simulator: MonteCarloSimulator) -> Self {
        Self {
            pricer: BlackScholes::new(),
            simulator,
        }
    }

    pub fn run(&self) -> TheoreticalReport {
        let checks: Vec<CheckResult> = vec![
            self.check("limit_at_current_fills", Self::limit_at_current_fills),
            self.check("zero_vol_deterministic", Self::zero_vol_deterministic),
            self.check("vol_increases_fill", Self::vol_increases_fill),
            self.check("horizon_monotone", Self::horizon_monotone),
            self.check("otm_theta_negative", Self::otm_theta_negative),
            self.check("buy_and_sell_fill", Self::buy_and_sell_fill),
        ];
        let passed = checks.iter().all(|c| c.passed);

        if passed {
            tracing::info!(checks = checks.len(), "theoretical validation passed");
        } else {
            let failed: Vec<&str> = checks.iter().filter(|c| !c.passed).map(|c| c.name).collect();
            tracing::warn!(?failed, "theoretical validation failed");
        }

        TheoreticalReport {
            passed,
            checks,
            generated_at: Utc::now(),
        }
    }

    fn check(&self, name: &'static str, f: fn(&Self) -> EngineResult<(bool, String)>) -> CheckResult {
        match f(self) {
            Ok((passed, detail)) => CheckResult { name, passed, detail },
            Err(e) => CheckResult {
                name,
                passed: false,
                detail: format!("{}: {e}", e.kind()),
            },
        }
    }

    // ── Fixtures ──

    fn base_spec() -> OptionSpec {
        OptionSpec::new(100.0, 105.0, 30.0, OptionKind::Call, 0.05, 0.30)
    }

    fn params(&self, sigma: f64, horizon: u32) -> SimulationParameters {
        let spec = Self::base_spec();
        let (price, greeks) = self.pricer.price_and_greeks(&spec);
        SimulationParameters {
            current_option_price: price,
            underlying_price: spec.spot,
            strike: spec.strike,
            days_to_expiry: spec.days_to_expiry,
            horizon_days: horizon,
            greeks,
            implied_volatility: spec.volatility,
            historical_volatility: None,
            effective_volatility: sigma,
            risk_free_rate: spec.risk_free_rate,
            paths: SELF_TEST_PATHS,
            first_day_fraction: 1.0,
            seed: Some(SELF_TEST_SEED),
        }
    }

    fn fill_probability(&self, params: &SimulationParameters, limit: f64, side: OrderSide) -> EngineResult<f64> {
        let ensemble = self.simulator.simulate(params)?;
        let detector = FillDetector::new(limit, side, params.current_option_price);
        Ok(detector.detect(&ensemble, None).fill_probability)
    }

    // ── Checks ──

    fn limit_at_current_fills(&self) -> EngineResult<(bool, String)> {
        let params = self.params(0.30, 10);
        let p = self.fill_probability(&params, params.current_option_price, OrderSide::Sell)?;
        Ok((p > 0.99, format!("p={p:.4}")))
    }

    fn zero_vol_deterministic(&self) -> EngineResult<(bool, String)> {
        let ensemble = self.simulator.simulate(&self.params(1e-6, 10))?;
        let std = ensemble.terminal_std();
        Ok((std < 0.1, format!("terminal std={std:.6}")))
    }

    fn vol_increases_fill(&self) -> EngineResult<(bool, String)> {
        let low = self.params(0.20, 10);
        let target = low.current_option_price * 1.2;
        let p_low = self.fill_probability(&low, target, OrderSide::Sell)?;
        let p_high = self.fill_probability(&self.params(0.50, 10), target, OrderSide::Sell)?;
        Ok((p_high > p_low, format!("p(0.20)={p_low:.4} p(0.50)={p_high:.4}")))
    }

    fn horizon_monotone(&self) -> EngineResult<(bool, String)> {
        let mut probs = Vec::with_capacity(3);
        for horizon in [5, 10, 20] {
            let params = self.params(0.30, horizon);
            probs.push(self.fill_probability(&params, params.current_option_price * 1.2, OrderSide::Sell)?);
        }
        let monotone = probs.windows(2).all(|w| w[1] >= w[0]);
        Ok((monotone, format!("p(5,10,20)={probs:.4?}")))
    }

    fn otm_theta_negative(&self) -> EngineResult<(bool, String)> {
        let spec = OptionSpec::new(100.0, 110.0, 30.0, OptionKind::Call, 0.05, 0.25);
        let theta = PricingModel::greeks(&self.pricer, &spec).theta;
        Ok((theta < 0.0, format!("theta={theta:.6}")))
    }

    fn buy_and_sell_fill(&self) -> EngineResult<(bool, String)> {
        let params = self.params(0.30, 10);
        let current = params.current_option_price;
        let sell = self.fill_probability(&params, current * 1.1, OrderSide::Sell)?;
        let buy = self.fill_probability(&params, current * 0.9, OrderSide::Buy)?;
        Ok((sell > 0.0 && buy > 0.0, format!("sell={sell:.4} buy={buy:.4}")))
    }
}
