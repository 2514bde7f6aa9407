use crate::errors::{EngineError, EngineResult};
use crate::models::volatility::sample_std;
use crate::models::{Greeks, DAYS_PER_YEAR};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;

/// Default ensemble size. Standard error scales as 1/sqrt(N).
pub const DEFAULT_PATHS: usize = 10_000;
/// Fixed number of independent path-generation chunks.
pub const DEFAULT_CHUNKS: usize = 4;

/// Every input needed to generate an ensemble. Immutable for the run.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SimulationParameters {
    pub current_option_price: f64,
    pub underlying_price: f64,
    pub strike: f64,
    pub days_to_expiry: f64,
    /// Number of simulated days (ensemble columns minus the t=0 column).
    pub horizon_days: u32,
    pub greeks: Greeks,
    pub implied_volatility: f64,
    pub historical_volatility: Option<f64>,
    /// Blended volatility driving the underlying.
    pub effective_volatility: f64,
    pub risk_free_rate: f64,
    pub paths: usize,
    /// Tradable fraction of day one, in [0, 1].
    pub first_day_fraction: f64,
    pub seed: Option<u64>,
}

impl SimulationParameters {
    pub fn validate(&self) -> EngineResult<()> {
        let finite_non_negative = |name: &str, v: f64| -> EngineResult<()> {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(EngineError::InvalidInput(format!("{name} must be finite and non-negative, got {v}")))
            }
        };
        finite_non_negative("current option price", self.current_option_price)?;
        finite_non_negative("underlying price", self.underlying_price)?;
        finite_non_negative("effective volatility", self.effective_volatility)?;
        if self.paths == 0 {
            return Err(EngineError::InvalidInput("path count must be at least 1".into()));
        }
        if self.horizon_days == 0 {
            return Err(EngineError::InvalidInput("horizon must be at least 1 day".into()));
        }
        if !(0.0..=1.0).contains(&self.first_day_fraction) {
            return Err(EngineError::InvalidInput(format!(
                "first-day fraction must lie in [0, 1], got {}",
                self.first_day_fraction
            )));
        }
        let g = &self.greeks;
        if !(g.delta.is_finite() && g.gamma.is_finite() && g.theta.is_finite()) {
            return Err(EngineError::InvalidInput("greeks must be finite".into()));
        }
        Ok(())
    }

    /// Step length in days for simulated day `day` (1-based).
    #[inline]
    fn step_days(&self, day: u32) -> f64 {
        if day == 1 {
            self.first_day_fraction
        } else {
            1.0
        }
    }
}

/// Simulated option prices, row-major by path.
///
/// Column 0 holds the current price; column k is the price at the end of
/// simulated day k.
#[derive(Debug, Clone)]
pub struct PricePathEnsemble {
    paths: usize,
    columns: usize,
    prices: Vec<f64>,
}

impl PricePathEnsemble {
    fn from_rows(paths: usize, columns: usize, prices: Vec<f64>) -> Self {
        debug_assert_eq!(prices.len(), paths * columns);
        Self { paths, columns, prices }
    }

    #[inline]
    pub fn paths(&self) -> usize {
        self.paths
    }

    /// Simulated days, excluding the t=0 column.
    #[inline]
    pub fn horizon_days(&self) -> u32 {
        (self.columns - 1) as u32
    }

    pub fn iter_paths(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.prices.chunks_exact(self.columns)
    }

    pub fn terminal_prices(&self) -> Vec<f64> {
        self.iter_paths().map(|p| p[p.len() - 1]).collect()
    }

    pub fn terminal_mean(&self) -> f64 {
        let terminal = self.terminal_prices();
        terminal.iter().sum::<f64>() / terminal.len().max(1) as f64
    }

    pub fn terminal_std(&self) -> f64 {
        sample_std(&self.terminal_prices())
    }
}

/// Generates per-day option price paths.
///
/// Underlying: S' = S * exp(-sigma^2/2 * dt + sigma * sqrt(dt) * Z)
/// Option:     O' = max(O + Delta*dS + Gamma*dS^2/2 + Theta*dt_days, 0)
///
/// Greeks are held at their current values (local approximation).
#[derive(Debug, Clone, Copy)]
pub struct MonteCarloSimulator {
    chunks: usize,
}

impl Default for MonteCarloSimulator {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNKS)
    }
}

impl MonteCarloSimulator {
    pub fn new(chunks: usize) -> Self {
        Self { chunks: chunks.max(1) }
    }

    pub fn simulate(&self, params: &SimulationParameters) -> EngineResult<PricePathEnsemble> {
        params.validate()?;

        let columns = params.horizon_days as usize + 1;
        let chunk_count = self.chunks.min(params.paths);
        let base = params.paths / chunk_count;
        let remainder = params.paths % chunk_count;
        let sizes: Vec<usize> = (0..chunk_count)
            .map(|i| base + usize::from(i < remainder))
            .collect();

        tracing::debug!(
            paths = params.paths,
            chunks = chunk_count,
            horizon = params.horizon_days,
            sigma = params.effective_volatility,
            "simulating ensemble"
        );

        // Fork: each chunk owns its RNG and buffers. Join: concatenate in order.
        let chunks: Vec<Vec<f64>> = sizes
            .par_iter()
            .enumerate()
            .map(|(chunk, &n)| simulate_chunk(params, chunk as u64, n, columns))
            .collect();

        let mut prices = Vec::with_capacity(params.paths * columns);
        for chunk in chunks {
            prices.extend(chunk);
        }
        if let Some(bad) = prices.iter().find(|p| !p.is_finite()) {
            return Err(EngineError::Numerical(format!(
                "simulated price {bad} is not finite (sigma={})",
                params.effective_volatility
            )));
        }
        Ok(PricePathEnsemble::from_rows(params.paths, columns, prices))
    }
}

fn chunk_rng(seed: Option<u64>, chunk: u64) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s.wrapping_add(chunk)),
        None => StdRng::from_entropy(),
    }
}

/// Simulate `n` paths, vectorised across paths within each day.
fn simulate_chunk(params: &SimulationParameters, chunk: u64, n: usize, columns: usize) -> Vec<f64> {
    let mut rng = chunk_rng(params.seed, chunk);
    let sigma = params.effective_volatility;
    let Greeks { delta, gamma, theta, .. } = params.greeks;

    let mut spot = vec![params.underlying_price; n];
    let mut option = vec![params.current_option_price; n];
    let mut shocks = vec![0.0_f64; n];
    let mut rows = vec![0.0_f64; n * columns];
    for p in 0..n {
        rows[p * columns] = params.current_option_price;
    }

    for day in 1..columns {
        let step_days = params.step_days(day as u32);
        let dt = step_days / DAYS_PER_YEAR;
        let drift = -0.5 * sigma * sigma * dt;
        let diffusion = sigma * dt.sqrt();

        // One draw per path for this day
        for z in shocks.iter_mut() {
            *z = rng.sample(StandardNormal);
        }

        for p in 0..n {
            let prev = spot[p];
            let next = prev * (drift + diffusion * shocks[p]).exp();
            let ds = next - prev;
            let step = delta * ds + 0.5 * gamma * ds * ds + theta * step_days;
            option[p] = (option[p] + step).max(0.0);
            spot[p] = next;
            rows[p * columns + day] = option[p];
        }
    }

    rows
}
