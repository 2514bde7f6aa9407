pub mod assignment;
pub mod black_scholes;
pub mod volatility;

use crate::errors::{EngineError, EngineResult};
use std::str::FromStr;

/// Days per year used to convert calendar days to model time.
pub const DAYS_PER_YEAR: f64 = 365.0;

/// All closed-form pricers implement this trait.
/// price() and greeks() must be pure functions of the spec.
/// Send + Sync required for use across worker threads.
pub trait PricingModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Option value. Never panics; degenerate specs price at intrinsic.
    fn price(&self, spec: &OptionSpec) -> f64;

    fn greeks(&self, spec: &OptionSpec) -> Greeks;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum OptionKind {
    Put,
    Call,
}

impl OptionKind {
    #[inline]
    pub fn intrinsic(self, spot: f64, strike: f64) -> f64 {
        match self {
            Self::Call => (spot - strike).max(0.0),
            Self::Put => (strike - spot).max(0.0),
        }
    }
}

impl std::fmt::Display for OptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Put => write!(f, "put"),
            Self::Call => write!(f, "call"),
        }
    }
}

impl TryFrom<String> for OptionKind {
    type Error = EngineError;

    fn try_from(s: String) -> EngineResult<Self> {
        s.parse()
    }
}

impl FromStr for OptionKind {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "put" => Ok(Self::Put),
            "call" => Ok(Self::Call),
            other => Err(EngineError::InvalidInput(format!(
                "option kind must be 'put' or 'call', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Whether `price` satisfies a resting limit at `limit` for this side.
    #[inline]
    pub fn is_filled(self, price: f64, limit: f64) -> bool {
        match self {
            Self::Sell => price >= limit,
            Self::Buy => price <= limit,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

impl TryFrom<String> for OrderSide {
    type Error = EngineError;

    fn try_from(s: String) -> EngineResult<Self> {
        s.parse()
    }
}

impl FromStr for OrderSide {
    type Err = EngineError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(EngineError::InvalidInput(format!(
                "order side must be 'buy' or 'sell', got '{other}'"
            ))),
        }
    }
}

/// Immutable contract description for one pricing request.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct OptionSpec {
    pub spot: f64,
    pub strike: f64,
    pub days_to_expiry: f64,
    pub kind: OptionKind,
    pub risk_free_rate: f64,
    pub volatility: f64,
    #[serde(default)]
    pub dividend_yield: f64,
}

impl OptionSpec {
    pub fn new(
        spot: f64,
        strike: f64,
        days_to_expiry: f64,
        kind: OptionKind,
        risk_free_rate: f64,
        volatility: f64,
    ) -> Self {
        Self {
            spot,
            strike,
            days_to_expiry,
            kind,
            risk_free_rate,
            volatility,
            dividend_yield: 0.0,
        }
    }

    pub fn with_dividend_yield(mut self, q: f64) -> Self {
        self.dividend_yield = q;
        self
    }

    pub fn with_volatility(mut self, sigma: f64) -> Self {
        self.volatility = sigma;
        self
    }

    #[inline]
    pub fn years(&self) -> f64 {
        self.days_to_expiry / DAYS_PER_YEAR
    }

    #[inline]
    pub fn intrinsic(&self) -> f64 {
        self.kind.intrinsic(self.spot, self.strike)
    }

    /// Expiry-day or zero-vol contract: priced at intrinsic with zero Greeks.
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.years() <= 0.0 || self.volatility <= 0.0
    }
}

/// Option Greeks.
///
/// Theta, charm, veta and color are per calendar day. Vega and rho are per
/// one percentage point of volatility / rate.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub vanna: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub charm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub volga: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub veta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub zomma: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub color: Option<f64>,
}

impl Greeks {
    pub fn first_order(delta: f64, gamma: f64, theta: f64, vega: f64, rho: f64) -> Self {
        Self {
            delta,
            gamma,
            theta,
            vega,
            rho,
            ..Self::default()
        }
    }
}
