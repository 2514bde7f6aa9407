use crate::errors::{require_positive, EngineResult};

/// Trading days per year for annualising daily log-return volatility.
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Minimum number of valid daily returns before realized vol is trusted.
const MIN_RETURNS: usize = 5;

/// IV/HV ratio above which implied vol is considered rich.
const RICH_RATIO: f64 = 1.5;
/// IV/HV ratio below which implied vol is considered cheap.
const CHEAP_RATIO: f64 = 0.7;

/// (IV weight, HV weight) per regime.
const DEFAULT_WEIGHTS: (f64, f64) = (0.6, 0.4);
const RICH_WEIGHTS: (f64, f64) = (0.4, 0.6);
const CHEAP_WEIGHTS: (f64, f64) = (0.7, 0.3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendSource {
    Blended,
    /// Historical data missing or insufficient; implied vol used alone.
    ImpliedOnlyFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IvRegime {
    Rich,
    Fair,
    Cheap,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct VolatilityBlend {
    pub implied_volatility: f64,
    pub historical_volatility: Option<f64>,
    pub iv_hv_ratio: Option<f64>,
    pub iv_weight: f64,
    pub hv_weight: f64,
    pub effective_volatility: f64,
    pub source: BlendSource,
    pub regime: Option<IvRegime>,
}

/// Annualised sample standard deviation of daily log returns.
///
/// Non-positive or non-finite closes break the return pair and are skipped.
/// Returns `None` with fewer than `MIN_RETURNS` usable returns.
pub fn historical_volatility(closes: &[f64]) -> Option<f64> {
    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0 && w[0].is_finite() && w[1].is_finite())
        .map(|w| (w[1] / w[0]).ln())
        .collect();

    if returns.len() < MIN_RETURNS {
        return None;
    }

    let sigma = sample_std(&returns) * TRADING_DAYS_PER_YEAR.sqrt();
    sigma.is_finite().then_some(sigma)
}

/// Sample standard deviation (n - 1). Zero for fewer than two values.
#[inline]
pub fn sample_std(data: &[f64]) -> f64 {
    let n = data.len();
    if n < 2 {
        return 0.0;
    }
    let nf = n as f64;
    let mean = data.iter().sum::<f64>() / nf;
    let var_sum: f64 = data.iter().map(|x| (x - mean) * (x - mean)).sum();
    (var_sum / (nf - 1.0)).sqrt()
}

/// Combines forward-looking implied vol with backward-looking realized vol.
#[derive(Debug, Clone, Copy)]
pub struct VolatilityBlender {
    dynamic_weighting: bool,
}

impl VolatilityBlender {
    pub fn new(dynamic_weighting: bool) -> Self {
        Self { dynamic_weighting }
    }

    /// Blend from raw closes. Missing history degrades to implied-only.
    pub fn blend_from_history(&self, implied: f64, closes: Option<&[f64]>) -> EngineResult<VolatilityBlend> {
        let historical = closes.and_then(historical_volatility);
        self.blend(implied, historical)
    }

    pub fn blend(&self, implied: f64, historical: Option<f64>) -> EngineResult<VolatilityBlend> {
        require_positive("implied volatility", implied)?;

        let Some(hv) = historical.filter(|h| h.is_finite() && *h > 0.0) else {
            tracing::warn!(implied, "historical volatility unavailable, using implied only");
            return Ok(VolatilityBlend {
                implied_volatility: implied,
                historical_volatility: None,
                iv_hv_ratio: None,
                iv_weight: 1.0,
                hv_weight: 0.0,
                effective_volatility: implied,
                source: BlendSource::ImpliedOnlyFallback,
                regime: None,
            });
        };

        let ratio = implied / hv;
        let regime = if ratio > RICH_RATIO {
            IvRegime::Rich
        } else if ratio < CHEAP_RATIO {
            IvRegime::Cheap
        } else {
            IvRegime::Fair
        };

        // Mean reversion: lean on the measure the other is expected to revert toward
        let (iv_weight, hv_weight) = if self.dynamic_weighting {
            match regime {
                IvRegime::Rich => RICH_WEIGHTS,
                IvRegime::Cheap => CHEAP_WEIGHTS,
                IvRegime::Fair => DEFAULT_WEIGHTS,
            }
        } else {
            DEFAULT_WEIGHTS
        };

        let effective = iv_weight * implied + hv_weight * hv;
        tracing::debug!(implied, hv, ratio, iv_weight, effective, "volatility blended");

        Ok(VolatilityBlend {
            implied_volatility: implied,
            historical_volatility: Some(hv),
            iv_hv_ratio: Some(ratio),
            iv_weight,
            hv_weight,
            effective_volatility: effective,
            source: BlendSource::Blended,
            regime: Some(regime),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closes_with_daily_moves(n: usize, up: f64, down: f64) -> Vec<f64> {
        let mut px = 100.0;
        let mut out = vec![px];
        for i in 0..n {
            px *= if i % 2 == 0 { 1.0 + up } else { 1.0 - down };
            out.push(px);
        }
        out
    }

    #[test]
    fn test_historical_vol_scale() {
        // +/-1% alternating moves => daily sd ~1% => ~15.9% annualised
        let closes = closes_with_daily_moves(60, 0.01, 0.01);
        let hv = historical_volatility(&closes).unwrap();
        assert!((hv - 0.01 * 252f64.sqrt()).abs() < 0.01, "hv={hv}");
    }

    #[test]
    fn test_historical_vol_insufficient() {
        assert!(historical_volatility(&[]).is_none());
        assert!(historical_volatility(&[100.0, 101.0, 102.0]).is_none());
        // Bad closes are skipped, leaving too few returns
        assert!(historical_volatility(&[100.0, 0.0, 101.0, -5.0, 102.0, 103.0, 104.0]).is_none());
    }

    #[test]
    fn test_fallback_when_no_history() {
        let blend = VolatilityBlender::new(true).blend(0.3, None).unwrap();
        assert_eq!(blend.source, BlendSource::ImpliedOnlyFallback);
        assert_eq!(blend.effective_volatility, 0.3);
        assert_eq!(blend.iv_weight + blend.hv_weight, 1.0);
        assert!(blend.historical_volatility.is_none());
    }

    #[test]
    fn test_dynamic_regimes() {
        let b = VolatilityBlender::new(true);

        let rich = b.blend(0.60, Some(0.30)).unwrap();
        assert_eq!(rich.regime, Some(IvRegime::Rich));
        assert_eq!((rich.iv_weight, rich.hv_weight), (0.4, 0.6));
        assert!((rich.effective_volatility - (0.4 * 0.60 + 0.6 * 0.30)).abs() < 1e-12);

        let cheap = b.blend(0.20, Some(0.40)).unwrap();
        assert_eq!(cheap.regime, Some(IvRegime::Cheap));
        assert_eq!((cheap.iv_weight, cheap.hv_weight), (0.7, 0.3));

        let fair = b.blend(0.30, Some(0.28)).unwrap();
        assert_eq!(fair.regime, Some(IvRegime::Fair));
        assert_eq!((fair.iv_weight, fair.hv_weight), (0.6, 0.4));

        for blend in [rich, cheap, fair] {
            assert!((blend.iv_weight + blend.hv_weight - 1.0).abs() < 1e-12);
            assert_eq!(blend.source, BlendSource::Blended);
        }
    }

    #[test]
    fn test_static_weighting_ignores_regime() {
        let blend = VolatilityBlender::new(false).blend(0.60, Some(0.30)).unwrap();
        assert_eq!(blend.regime, Some(IvRegime::Rich));
        assert_eq!((blend.iv_weight, blend.hv_weight), (0.6, 0.4));
    }

    #[test]
    fn test_invalid_implied_rejected() {
        assert!(VolatilityBlender::new(true).blend(0.0, Some(0.2)).is_err());
        let closes = closes_with_daily_moves(30, 0.02, 0.015);
        let from_history = VolatilityBlender::new(true)
            .blend_from_history(0.25, Some(closes.as_slice()))
            .unwrap();
        assert_eq!(from_history.source, BlendSource::Blended);
    }
}
