use crate::errors::{require_positive, EngineError, EngineResult};
use crate::models::black_scholes::BlackScholes;
use crate::models::{OptionKind, OptionSpec};

/// Exact probability that an option finishes in the money at expiration.
///
/// PUT:  P(S_T < K) = Phi(-d2)
/// CALL: P(S_T > K) = Phi(d2)
///
/// This is what |Delta| is usually used to approximate.
pub struct AssignmentCalculator {
    pricer: BlackScholes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    VeryLow,
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl RiskLevel {
    pub fn from_probability(p: f64) -> Self {
        if p > 0.70 {
            Self::VeryHigh
        } else if p > 0.50 {
            Self::High
        } else if p > 0.30 {
            Self::Moderate
        } else if p > 0.15 {
            Self::Low
        } else {
            Self::VeryLow
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Moneyness {
    DeepItm,
    Itm,
    Atm,
    Otm,
    DeepOtm,
}

impl Moneyness {
    /// Five bands on the spot/strike ratio, mirrored between puts and calls.
    pub fn classify(kind: OptionKind, spot: f64, strike: f64) -> Self {
        let ratio = spot / strike;
        match kind {
            OptionKind::Put => {
                if ratio < 0.95 {
                    Self::DeepItm
                } else if ratio < 0.98 {
                    Self::Itm
                } else if ratio <= 1.02 {
                    Self::Atm
                } else if ratio <= 1.05 {
                    Self::Otm
                } else {
                    Self::DeepOtm
                }
            }
            OptionKind::Call => {
                if ratio > 1.05 {
                    Self::DeepItm
                } else if ratio > 1.02 {
                    Self::Itm
                } else if ratio >= 0.98 {
                    Self::Atm
                } else if ratio >= 0.95 {
                    Self::Otm
                } else {
                    Self::DeepOtm
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct AssignmentProbabilityResult {
    pub assignment_probability: f64,
    pub expire_otm_probability: f64,
    pub d1: f64,
    pub d2: f64,
    pub time_to_expiry_years: f64,
    pub risk_level: RiskLevel,
    pub moneyness: Moneyness,
    pub option_kind: OptionKind,
    pub spot: f64,
    pub strike: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproximationAccuracy {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DeltaComparison {
    pub exact_probability: f64,
    pub delta_approximation: f64,
    pub absolute_difference: f64,
    pub relative_difference: f64,
    pub accuracy: ApproximationAccuracy,
    pub recommendation: String,
}

/// One position in a batch request.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct AssignmentPosition {
    pub id: String,
    pub spot: f64,
    pub strike: f64,
    pub days_to_expiry: f64,
    pub volatility: f64,
    /// Parsed per position so one bad kind cannot sink the batch.
    pub option_kind: String,
    #[serde(default)]
    pub risk_free_rate: Option<f64>,
    #[serde(default)]
    pub delta: Option<f64>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchEntry {
    Ok {
        id: String,
        result: AssignmentProbabilityResult,
        #[serde(skip_serializing_if = "Option::is_none")]
        delta_comparison: Option<DeltaComparison>,
    },
    Error {
        id: String,
        error_kind: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PortfolioSummary {
    pub total_positions: usize,
    pub evaluated: usize,
    pub failed: usize,
    pub high_assignment_positions: usize,
    pub high_assignment_fraction: f64,
    pub average_assignment_probability: Option<f64>,
    pub portfolio_risk: RiskLevel,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchAssignmentReport {
    pub entries: Vec<BatchEntry>,
    pub summary: PortfolioSummary,
}

/// Assignment probability above which a position counts toward portfolio risk.
const HIGH_ASSIGNMENT_THRESHOLD: f64 = 0.50;

impl Default for AssignmentCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl AssignmentCalculator {
    pub fn new() -> Self {
        Self {
            pricer: BlackScholes::new(),
        }
    }

    pub fn calculate(
        &self,
        spot: f64,
        strike: f64,
        days_to_expiry: f64,
        volatility: f64,
        kind: OptionKind,
        risk_free_rate: f64,
    ) -> EngineResult<AssignmentProbabilityResult> {
        require_positive("spot price", spot)?;
        require_positive("strike price", strike)?;
        require_positive("days to expiry", days_to_expiry)?;
        require_positive("volatility", volatility)?;
        if !risk_free_rate.is_finite() {
            return Err(EngineError::InvalidInput(format!(
                "risk-free rate must be finite, got {risk_free_rate}"
            )));
        }

        let spec = OptionSpec::new(spot, strike, days_to_expiry, kind, risk_free_rate, volatility);
        let t = spec.years();
        let (d1, d2) = self
            .pricer
            .d1_d2(&spec)
            .ok_or_else(|| EngineError::Numerical(format!("d1/d2 undefined for T={t}, sigma={volatility}")))?;

        let itm = match kind {
            OptionKind::Put => self.pricer.cdf(-d2),
            OptionKind::Call => self.pricer.cdf(d2),
        };

        tracing::debug!(%kind, spot, strike, d1, d2, itm, "assignment probability");

        Ok(AssignmentProbabilityResult {
            assignment_probability: itm,
            expire_otm_probability: 1.0 - itm,
            d1,
            d2,
            time_to_expiry_years: t,
            risk_level: RiskLevel::from_probability(itm),
            moneyness: Moneyness::classify(kind, spot, strike),
            option_kind: kind,
            spot,
            strike,
        })
    }

    /// How well |Delta| approximates the exact assignment probability.
    pub fn compare_with_delta(&self, result: &AssignmentProbabilityResult, delta: f64) -> DeltaComparison {
        let exact = result.assignment_probability;
        let approx = delta.abs();
        let absolute_difference = (approx - exact).abs();
        let relative_difference = if exact > 1e-12 {
            absolute_difference / exact
        } else if absolute_difference < 1e-12 {
            0.0
        } else {
            f64::INFINITY
        };

        let (accuracy, recommendation) = if relative_difference < 0.05 {
            (
                ApproximationAccuracy::High,
                "Delta is a close proxy for assignment risk here".to_string(),
            )
        } else if relative_difference <= 0.15 {
            (
                ApproximationAccuracy::Medium,
                format!(
                    "Delta is a rough proxy; use the exact probability ({:.1}%) for sizing decisions",
                    exact * 100.0
                ),
            )
        } else {
            (
                ApproximationAccuracy::Low,
                format!(
                    "Delta misstates assignment risk by {:.1} points; rely on the exact probability ({:.1}%)",
                    absolute_difference * 100.0,
                    exact * 100.0
                ),
            )
        };

        DeltaComparison {
            exact_probability: exact,
            delta_approximation: approx,
            absolute_difference,
            relative_difference,
            accuracy,
            recommendation,
        }
    }

    /// Evaluate every position independently. A bad position yields an error
    /// entry; the batch itself never fails.
    pub fn calculate_batch(&self, positions: &[AssignmentPosition], default_rate: f64) -> BatchAssignmentReport {
        let mut entries = Vec::with_capacity(positions.len());
        let mut probabilities = Vec::with_capacity(positions.len());

        for pos in positions {
            let rate = pos.risk_free_rate.unwrap_or(default_rate);
            let outcome = pos.option_kind.parse::<OptionKind>().and_then(|kind| {
                self.calculate(pos.spot, pos.strike, pos.days_to_expiry, pos.volatility, kind, rate)
            });
            match outcome {
                Ok(result) => {
                    probabilities.push(result.assignment_probability);
                    let delta_comparison = pos.delta.map(|d| self.compare_with_delta(&result, d));
                    entries.push(BatchEntry::Ok {
                        id: pos.id.clone(),
                        result,
                        delta_comparison,
                    });
                }
                Err(e) => {
                    tracing::warn!(id = %pos.id, error = %e, "batch position rejected");
                    entries.push(BatchEntry::Error {
                        id: pos.id.clone(),
                        error_kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let evaluated = probabilities.len();
        let high = probabilities.iter().filter(|&&p| p > HIGH_ASSIGNMENT_THRESHOLD).count();
        let high_fraction = if evaluated == 0 { 0.0 } else { high as f64 / evaluated as f64 };
        let average = if evaluated == 0 {
            None
        } else {
            Some(probabilities.iter().sum::<f64>() / evaluated as f64)
        };

        let portfolio_risk = if high_fraction > 0.50 {
            RiskLevel::High
        } else if high_fraction > 0.25 {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        };

        BatchAssignmentReport {
            summary: PortfolioSummary {
                total_positions: positions.len(),
                evaluated,
                failed: positions.len() - evaluated,
                high_assignment_positions: high,
                high_assignment_fraction: high_fraction,
                average_assignment_probability: average,
                portfolio_risk,
            },
            entries,
        }
    }
}
