use crate::models::{Greeks, OptionKind, OptionSpec, PricingModel, DAYS_PER_YEAR};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

/// Newton-Raphson seed volatility.
const IV_SEED: f64 = 0.25;
/// Per-iteration volatility bounds for both solvers.
const IV_MIN: f64 = 0.001;
const IV_MAX: f64 = 5.0;
const IV_TOLERANCE: f64 = 1e-6;
const IV_MAX_ITERATIONS: usize = 100;
/// Below this raw vega the Newton step is undefined.
const MIN_VEGA: f64 = 1e-10;

/// Black-Scholes-Merton European option pricing.
///
/// d1 = (ln(S/K) + (r - q + sigma^2/2)*T) / (sigma * sqrt(T))
/// d2 = d1 - sigma * sqrt(T)
///
/// Call = S e^{-qT} Phi(d1) - K e^{-rT} Phi(d2)
/// Put  = K e^{-rT} Phi(-d2) - S e^{-qT} Phi(-d1)
pub struct BlackScholes {
    /// Standard normal distribution (created once, reused)
    normal: Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverMethod {
    NewtonRaphson,
    Brent,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ImpliedVolatility {
    pub volatility: f64,
    pub method: SolverMethod,
    pub iterations: usize,
}

impl Default for BlackScholes {
    fn default() -> Self {
        Self::new()
    }
}

impl BlackScholes {
    pub fn new() -> Self {
        Self {
            normal: Normal::standard(),
        }
    }

    #[inline]
    pub fn cdf(&self, x: f64) -> f64 {
        self.normal.cdf(x)
    }

    #[inline]
    pub fn pdf(&self, x: f64) -> f64 {
        self.normal.pdf(x)
    }

    /// The two standard-normal intermediate terms. `None` for degenerate specs.
    #[inline]
    pub fn d1_d2(&self, spec: &OptionSpec) -> Option<(f64, f64)> {
        if spec.is_degenerate() || spec.spot <= 0.0 || spec.strike <= 0.0 {
            return None;
        }
        let t = spec.years();
        let sigma_sqrt_t = spec.volatility * t.sqrt();
        let d1 = ((spec.spot / spec.strike).ln()
            + (spec.risk_free_rate - spec.dividend_yield + 0.5 * spec.volatility * spec.volatility) * t)
            / sigma_sqrt_t;
        Some((d1, d1 - sigma_sqrt_t))
    }

    pub fn price(&self, spec: &OptionSpec) -> f64 {
        let Some((d1, d2)) = self.d1_d2(spec) else {
            return spec.intrinsic();
        };
        let t = spec.years();
        let df_r = (-spec.risk_free_rate * t).exp();
        let df_q = (-spec.dividend_yield * t).exp();

        let value = match spec.kind {
            OptionKind::Call => spec.spot * df_q * self.cdf(d1) - spec.strike * df_r * self.cdf(d2),
            OptionKind::Put => spec.strike * df_r * self.cdf(-d2) - spec.spot * df_q * self.cdf(-d1),
        };
        value.max(0.0)
    }

    /// First-order Greeks. Degenerate specs return zeroed Greeks.
    pub fn greeks(&self, spec: &OptionSpec) -> Greeks {
        let Some((d1, d2)) = self.d1_d2(spec) else {
            return Greeks::default();
        };
        let s = spec.spot;
        let k = spec.strike;
        let r = spec.risk_free_rate;
        let q = spec.dividend_yield;
        let sigma = spec.volatility;
        let t = spec.years();
        let sqrt_t = t.sqrt();
        let df_r = (-r * t).exp();
        let df_q = (-q * t).exp();
        let phi_d1 = self.pdf(d1);

        let gamma = df_q * phi_d1 / (s * sigma * sqrt_t);
        let vega_raw = s * df_q * phi_d1 * sqrt_t;
        let decay = -s * df_q * phi_d1 * sigma / (2.0 * sqrt_t);

        let (delta, theta_annual, rho_raw) = match spec.kind {
            OptionKind::Call => (
                df_q * self.cdf(d1),
                decay - r * k * df_r * self.cdf(d2) + q * s * df_q * self.cdf(d1),
                k * t * df_r * self.cdf(d2),
            ),
            OptionKind::Put => (
                -df_q * self.cdf(-d1),
                decay + r * k * df_r * self.cdf(-d2) - q * s * df_q * self.cdf(-d1),
                -k * t * df_r * self.cdf(-d2),
            ),
        };

        Greeks::first_order(
            delta,
            gamma,
            theta_annual / DAYS_PER_YEAR,
            vega_raw / 100.0,
            rho_raw / 100.0,
        )
    }

    /// First- and second-order Greeks.
    pub fn full_greeks(&self, spec: &OptionSpec) -> Greeks {
        let mut greeks = self.greeks(spec);
        let Some((d1, d2)) = self.d1_d2(spec) else {
            return greeks;
        };
        let s = spec.spot;
        let r = spec.risk_free_rate;
        let q = spec.dividend_yield;
        let sigma = spec.volatility;
        let t = spec.years();
        let sqrt_t = t.sqrt();
        let sigma_sqrt_t = sigma * sqrt_t;
        let df_q = (-q * t).exp();
        let phi_d1 = self.pdf(d1);
        let gamma = greeks.gamma;

        // Shared by charm and color
        let drift_term = (2.0 * (r - q) * t - d2 * sigma_sqrt_t) / (2.0 * t * sigma_sqrt_t);

        let charm_annual = match spec.kind {
            OptionKind::Call => q * df_q * self.cdf(d1) - df_q * phi_d1 * drift_term,
            OptionKind::Put => -q * df_q * self.cdf(-d1) - df_q * phi_d1 * drift_term,
        };

        let vanna = -df_q * phi_d1 * d2 / sigma;
        let volga = s * df_q * phi_d1 * sqrt_t * d1 * d2 / sigma;
        let veta_annual = -s * df_q * phi_d1 * sqrt_t
            * (q + (r - q) * d1 / sigma_sqrt_t - (1.0 + d1 * d2) / (2.0 * t));
        let speed = -gamma / s * (d1 / sigma_sqrt_t + 1.0);
        let zomma = gamma * (d1 * d2 - 1.0) / sigma;
        let color_annual = -df_q * phi_d1 / (2.0 * s * t * sigma_sqrt_t)
            * (2.0 * q * t + 1.0 + (2.0 * (r - q) * t - d2 * sigma_sqrt_t) / sigma_sqrt_t * d1);

        greeks.vanna = Some(vanna);
        greeks.charm = Some(charm_annual / DAYS_PER_YEAR);
        greeks.volga = Some(volga);
        greeks.veta = Some(veta_annual / DAYS_PER_YEAR);
        greeks.speed = Some(speed);
        greeks.zomma = Some(zomma);
        greeks.color = Some(color_annual / DAYS_PER_YEAR);
        greeks
    }

    pub fn price_and_greeks(&self, spec: &OptionSpec) -> (f64, Greeks) {
        (self.price(spec), self.full_greeks(spec))
    }

    /// Raw dV/dsigma (per 1.00 of volatility).
    #[inline]
    fn raw_vega(&self, spec: &OptionSpec) -> f64 {
        match self.d1_d2(spec) {
            Some((d1, _)) => {
                let t = spec.years();
                spec.spot * (-spec.dividend_yield * t).exp() * self.pdf(d1) * t.sqrt()
            }
            None => 0.0,
        }
    }

    /// Whether `market_price` admits an implied volatility at all.
    fn has_iv_solution(&self, spec: &OptionSpec, market_price: f64) -> bool {
        market_price.is_finite()
            && market_price > 0.0
            && market_price >= spec.intrinsic()
            && spec.years() > 0.0
            && spec.spot > 0.0
            && spec.strike > 0.0
    }

    /// Implied volatility: Newton-Raphson from a 25% seed, Brent fallback when
    /// vega vanishes or Newton fails to converge.
    ///
    /// Returns `None` when the market price is non-positive, below intrinsic,
    /// or unreachable within [0.001, 5.0].
    pub fn implied_volatility(&self, spec: &OptionSpec, market_price: f64) -> Option<ImpliedVolatility> {
        if !self.has_iv_solution(spec, market_price) {
            return None;
        }

        let mut sigma = IV_SEED;
        for iteration in 1..=IV_MAX_ITERATIONS {
            let trial = spec.with_volatility(sigma);
            let diff = self.price(&trial) - market_price;
            if diff.abs() < IV_TOLERANCE {
                return Some(ImpliedVolatility {
                    volatility: sigma,
                    method: SolverMethod::NewtonRaphson,
                    iterations: iteration,
                });
            }

            let vega = self.raw_vega(&trial);
            if vega < MIN_VEGA {
                tracing::debug!(sigma, vega, "vega vanished, switching to brent");
                break;
            }

            let next = (sigma - diff / vega).clamp(IV_MIN, IV_MAX);
            let step = (next - sigma).abs();
            sigma = next;
            if step < IV_TOLERANCE {
                // Pinned at a bound: the root lies outside Newton's reach
                if sigma <= IV_MIN || sigma >= IV_MAX {
                    break;
                }
                return Some(ImpliedVolatility {
                    volatility: sigma,
                    method: SolverMethod::NewtonRaphson,
                    iterations: iteration,
                });
            }
        }

        self.implied_volatility_brent(spec, market_price)
    }

    /// Bracketing solver over [0.001, 5.0]. Converges whenever a root is bracketed.
    pub fn implied_volatility_brent(&self, spec: &OptionSpec, market_price: f64) -> Option<ImpliedVolatility> {
        if !self.has_iv_solution(spec, market_price) {
            return None;
        }
        let objective = |sigma: f64| self.price(&spec.with_volatility(sigma)) - market_price;
        brent(objective, IV_MIN, IV_MAX, IV_TOLERANCE * 1e-2, IV_MAX_ITERATIONS).map(
            |(volatility, iterations)| ImpliedVolatility {
                volatility,
                method: SolverMethod::Brent,
                iterations,
            },
        )
    }
}

impl PricingModel for BlackScholes {
    #[inline]
    fn name(&self) -> &'static str {
        "Black-Scholes"
    }

    #[inline]
    fn price(&self, spec: &OptionSpec) -> f64 {
        BlackScholes::price(self, spec)
    }

    #[inline]
    fn greeks(&self, spec: &OptionSpec) -> Greeks {
        BlackScholes::greeks(self, spec)
    }
}

/// Brent's method on [lo, hi]. Returns (root, iterations) or `None` if the
/// interval does not bracket a sign change.
fn brent<F: Fn(f64) -> f64>(f: F, lo: f64, hi: f64, tol: f64, max_iter: usize) -> Option<(f64, usize)> {
    let (mut a, mut b) = (lo, hi);
    let (mut fa, mut fb) = (f(a), f(b));
    if !fa.is_finite() || !fb.is_finite() || fa * fb > 0.0 {
        return None;
    }
    if fa == 0.0 {
        return Some((a, 0));
    }

    let (mut c, mut fc) = (b, fb);
    let mut d = b - a;
    let mut e = d;

    for iteration in 1..=max_iter {
        if (fb > 0.0 && fc > 0.0) || (fb < 0.0 && fc < 0.0) {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }

        let tol1 = 2.0 * f64::EPSILON * b.abs() + 0.5 * tol;
        let xm = 0.5 * (c - b);
        if xm.abs() <= tol1 || fb == 0.0 {
            return Some((b, iteration));
        }

        if e.abs() >= tol1 && fa.abs() > fb.abs() {
            // Inverse quadratic interpolation (secant when a == c)
            let s = fb / fa;
            let (mut p, mut q) = if a == c {
                (2.0 * xm * s, 1.0 - s)
            } else {
                let qa = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * xm * qa * (qa - r) - (b - a) * (r - 1.0)),
                    (qa - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();
            let min1 = 3.0 * xm * q - (tol1 * q).abs();
            let min2 = (e * q).abs();
            if 2.0 * p < min1.min(min2) {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }

        a = b;
        fa = fb;
        b += if d.abs() > tol1 { d } else { tol1.copysign(xm) };
        fb = f(b);
    }

    None
}
