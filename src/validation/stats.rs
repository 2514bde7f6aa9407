/// Two-sided 95% normal quantile.
const Z_95: f64 = 1.96;

/// SE at which the precision component bottoms out.
const SE_SCALE: f64 = 0.05;
/// Backtest MAE at which the accuracy component bottoms out.
const MAE_SCALE: f64 = 0.30;
/// Ceiling for an estimate with no historical validation.
const UNVALIDATED_WEIGHT: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Historical agreement figures from a completed backtest.
#[derive(Debug, Clone, Copy)]
pub struct BacktestEvidence {
    pub mean_absolute_error: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ConfidenceMetrics {
    pub standard_error: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub confidence_level: ConfidenceLevel,
    pub confidence_score: f64,
    pub sample_size: usize,
    pub backtest_mae: Option<f64>,
    pub backtest_samples: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticalAnalyzer;

impl StatisticalAnalyzer {
    /// Binomial standard error of a path-count estimate.
    #[inline]
    pub fn standard_error(p: f64, n: usize) -> f64 {
        if n == 0 {
            return 0.0;
        }
        let p = p.clamp(0.0, 1.0);
        (p * (1.0 - p) / n as f64).sqrt()
    }

    /// `backtest` is `None` when validation was unavailable or timed out.
    pub fn analyze(&self, p: f64, n: usize, backtest: Option<BacktestEvidence>) -> ConfidenceMetrics {
        let se = Self::standard_error(p, n);
        let ci_lower = (p - Z_95 * se).clamp(0.0, 1.0);
        let ci_upper = (p + Z_95 * se).clamp(0.0, 1.0);

        let backtest = backtest.filter(|b| b.mean_absolute_error.is_finite());
        let level = match backtest {
            Some(b) if b.mean_absolute_error < 0.10 && b.samples > 50 => ConfidenceLevel::High,
            Some(b) if b.mean_absolute_error < 0.15 && b.samples > 30 => ConfidenceLevel::Medium,
            Some(_) => ConfidenceLevel::Low,
            None if se < 0.05 => ConfidenceLevel::Medium,
            None => ConfidenceLevel::Low,
        };

        let precision = 1.0 - (se / SE_SCALE).min(1.0);
        let score = match backtest {
            Some(b) => {
                let accuracy = 1.0 - (b.mean_absolute_error / MAE_SCALE).min(1.0);
                0.5 * precision + 0.5 * accuracy
            }
            None => UNVALIDATED_WEIGHT * precision,
        };

        tracing::debug!(p, n, se, %level, score, "confidence computed");

        ConfidenceMetrics {
            standard_error: se,
            ci_lower,
            ci_upper,
            confidence_level: level,
            confidence_score: score.clamp(0.0, 1.0),
            sample_size: n,
            backtest_mae: backtest.map(|b| b.mean_absolute_error),
            backtest_samples: backtest.map(|b| b.samples),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_se_scales_with_inverse_sqrt_n() {
        let se_small = StatisticalAnalyzer::standard_error(0.4, 1_000);
        let se_large = StatisticalAnalyzer::standard_error(0.4, 4_000);
        let ratio = se_small / se_large;
        assert!((ratio - 2.0).abs() < 1e-9, "quadrupling N should halve SE, ratio={ratio}");
    }

    #[test]
    fn test_ci_bounds() {
        let analyzer = StatisticalAnalyzer;
        for p in [0.0, 0.01, 0.3, 0.5, 0.97, 1.0] {
            let m = analyzer.analyze(p, 200, None);
            assert!(m.ci_lower <= p && p <= m.ci_upper, "CI must contain p={p}");
            assert!(m.ci_lower >= 0.0 && m.ci_upper <= 1.0);
        }
    }

    #[test]
    fn test_levels() {
        let analyzer = StatisticalAnalyzer;
        let good = BacktestEvidence { mean_absolute_error: 0.05, samples: 60 };
        let ok = BacktestEvidence { mean_absolute_error: 0.12, samples: 40 };
        let poor = BacktestEvidence { mean_absolute_error: 0.25, samples: 60 };

        assert_eq!(analyzer.analyze(0.4, 10_000, Some(good)).confidence_level, ConfidenceLevel::High);
        assert_eq!(analyzer.analyze(0.4, 10_000, Some(ok)).confidence_level, ConfidenceLevel::Medium);
        assert_eq!(analyzer.analyze(0.4, 10_000, Some(poor)).confidence_level, ConfidenceLevel::Low);
        assert_eq!(analyzer.analyze(0.4, 10_000, None).confidence_level, ConfidenceLevel::Medium);
        // SE = sqrt(0.25 / 50) ~ 0.07
        assert_eq!(analyzer.analyze(0.5, 50, None).confidence_level, ConfidenceLevel::Low);
    }

    #[test]
    fn test_score_capped_without_backtest() {
        let analyzer = StatisticalAnalyzer;
        let unvalidated = analyzer.analyze(0.0, 10_000, None);
        assert!((unvalidated.confidence_score - 0.7).abs() < 1e-12);
        assert!(unvalidated.backtest_mae.is_none());

        let perfect = BacktestEvidence { mean_absolute_error: 0.0, samples: 80 };
        let validated = analyzer.analyze(0.0, 10_000, Some(perfect));
        assert!((validated.confidence_score - 1.0).abs() < 1e-12);
        assert_eq!(validated.backtest_samples, Some(80));
    }
}
