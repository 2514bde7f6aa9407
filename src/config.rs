use crate::errors::{EngineError, EngineResult};
use crate::simulation::monte_carlo;
use crate::validation::backtest;
use chrono::NaiveTime;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_port: u16,
    pub mc_paths: usize,
    pub mc_chunks: usize,
    pub mc_seed: Option<u64>,
    pub risk_free_rate: f64,
    pub dividend_yield: f64,
    pub dynamic_vol_weighting: bool,
    pub max_horizon_days: u32,
    pub backtest_timeout_ms: u64,
    pub backtest_lookback_days: usize,
    pub backtest_reference_vol: f64,
    pub market_utc_offset_minutes: i32,
    pub market_open: NaiveTime,
    pub market_close: NaiveTime,
    pub history_cache_ttl_secs: u64,
    pub history_cache_capacity: usize,
    pub run_self_test: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_port: 3001,
            mc_paths: monte_carlo::DEFAULT_PATHS,
            mc_chunks: monte_carlo::DEFAULT_CHUNKS,
            mc_seed: None,
            risk_free_rate: 0.05,
            dividend_yield: 0.0,
            dynamic_vol_weighting: true,
            max_horizon_days: 60,
            backtest_timeout_ms: backtest::DEFAULT_TIMEOUT.as_millis() as u64,
            backtest_lookback_days: backtest::DEFAULT_LOOKBACK,
            backtest_reference_vol: backtest::DEFAULT_REFERENCE_VOL,
            market_utc_offset_minutes: -300,
            market_open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default(),
            market_close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
            history_cache_ttl_secs: 300,
            history_cache_capacity: 256,
            run_self_test: true,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> EngineResult<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let mc_seed = match std::env::var("MC_SEED") {
            Ok(raw) if !raw.trim().is_empty() => Some(parse_var::<u64>("MC_SEED", &raw)?),
            _ => None,
        };

        let cfg = Self {
            server_port: env_parse_or("SERVER_PORT", defaults.server_port)?,
            mc_paths: env_parse_or("MC_PATHS", defaults.mc_paths)?,
            mc_chunks: env_parse_or("MC_CHUNKS", defaults.mc_chunks)?,
            mc_seed,
            risk_free_rate: env_parse_or("RISK_FREE_RATE", defaults.risk_free_rate)?,
            dividend_yield: env_parse_or("DIVIDEND_YIELD", defaults.dividend_yield)?,
            dynamic_vol_weighting: env_parse_or(
                "DYNAMIC_VOL_WEIGHTING",
                defaults.dynamic_vol_weighting,
            )?,
            max_horizon_days: env_parse_or("MAX_HORIZON_DAYS", defaults.max_horizon_days)?,
            backtest_timeout_ms: env_parse_or("BACKTEST_TIMEOUT_MS", defaults.backtest_timeout_ms)?,
            backtest_lookback_days: env_parse_or(
                "BACKTEST_LOOKBACK_DAYS",
                defaults.backtest_lookback_days,
            )?,
            backtest_reference_vol: env_parse_or(
                "BACKTEST_REFERENCE_VOL",
                defaults.backtest_reference_vol,
            )?,
            market_utc_offset_minutes: env_parse_or(
                "MARKET_UTC_OFFSET_MINUTES",
                defaults.market_utc_offset_minutes,
            )?,
            market_open: env_time_or("MARKET_OPEN", defaults.market_open)?,
            market_close: env_time_or("MARKET_CLOSE", defaults.market_close)?,
            history_cache_ttl_secs: env_parse_or(
                "HISTORY_CACHE_TTL_SECS",
                defaults.history_cache_ttl_secs,
            )?,
            history_cache_capacity: env_parse_or(
                "HISTORY_CACHE_CAPACITY",
                defaults.history_cache_capacity,
            )?,
            run_self_test: env_parse_or("RUN_SELF_TEST", defaults.run_self_test)?,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> EngineResult<()> {
        if self.mc_paths == 0 {
            return Err(EngineError::Config("MC_PATHS must be at least 1".into()));
        }
        if self.mc_chunks == 0 {
            return Err(EngineError::Config("MC_CHUNKS must be at least 1".into()));
        }
        if self.max_horizon_days == 0 {
            return Err(EngineError::Config("MAX_HORIZON_DAYS must be at least 1".into()));
        }
        if !self.backtest_reference_vol.is_finite() || self.backtest_reference_vol <= 0.0 {
            return Err(EngineError::Config("BACKTEST_REFERENCE_VOL must be positive".into()));
        }
        if self.market_open >= self.market_close {
            return Err(EngineError::Config("MARKET_OPEN must be before MARKET_CLOSE".into()));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> EngineResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| EngineError::Config(format!("{key}: {e}")))
}

fn env_parse_or<T: FromStr>(key: &str, default: T) -> EngineResult<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_var(key, &raw),
        Err(_) => Ok(default),
    }
}

fn env_time_or(key: &str, default: NaiveTime) -> EngineResult<NaiveTime> {
    match std::env::var(key) {
        Ok(raw) => NaiveTime::parse_from_str(raw.trim(), "%H:%M")
            .map_err(|e| EngineError::Config(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}
