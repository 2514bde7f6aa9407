use crate::models::OrderSide;
use crate::session::DayCalendar;
use crate::simulation::fill::path_extremes;
use crate::simulation::{FillDetector, FillOutcome, PricePathEnsemble};
use crate::validation::ConfidenceMetrics;
use smallvec::SmallVec;

/// Minimum limit adjustment as a fraction of the current price.
const MIN_GAP_FRACTION: f64 = 0.02;
/// Lowest quotable buy price.
const MIN_BUY_PRICE: f64 = 0.01;
/// Below this fill probability the aggressive alternative targets the median path.
const LIKELY_FILL: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlternativeKind {
    Aggressive,
    Balanced,
    Current,
    Conservative,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AlternativeLimit {
    pub kind: AlternativeKind,
    pub limit_price: f64,
    pub fill_probability: f64,
    pub first_day_fill_probability: f64,
    pub expected_days_to_fill: Option<f64>,
    /// Signed gain versus trading at the current price (per contract).
    pub price_improvement: f64,
    /// price_improvement weighted by fill probability.
    pub expected_improvement: f64,
}

pub type Observations = SmallVec<[String; 6]>;
pub type Alternatives = SmallVec<[AlternativeLimit; 4]>;

#[derive(Debug, Clone, serde::Serialize)]
pub struct Recommendations {
    pub observations: Observations,
    pub alternatives: Alternatives,
}

/// Turns a fill outcome into observations and alternative limit scenarios.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecommendationEngine;

impl RecommendationEngine {
    pub fn recommend(
        &self,
        ensemble: &PricePathEnsemble,
        calendar: Option<&DayCalendar>,
        order: LimitOrder,
        outcome: &FillOutcome,
        confidence: &ConfidenceMetrics,
        backtest_available: bool,
    ) -> Recommendations {
        Recommendations {
            observations: self.observations(outcome, confidence, backtest_available),
            alternatives: self.alternatives(ensemble, calendar, order, outcome),
        }
    }

    pub fn observations(
        &self,
        outcome: &FillOutcome,
        confidence: &ConfidenceMetrics,
        backtest_available: bool,
    ) -> Observations {
        let mut notes = Observations::new();
        let p = outcome.fill_probability;

        if outcome.immediate_fill {
            notes.push("Limit is already marketable at the current price; expect an immediate fill.".to_string());
            return notes;
        }

        let tier = match p {
            p if p >= 0.80 => "very likely",
            p if p >= 0.60 => "likely",
            p if p >= 0.40 => "roughly a coin flip",
            p if p >= 0.20 => "unlikely",
            _ => "very unlikely",
        };
        notes.push(format!("A fill is {tier} ({:.0}% of simulated paths).", p * 100.0));

        let first = outcome.first_day_fill_probability;
        if first >= 0.5 {
            notes.push(format!("Most fills arrive on day one ({:.0}%).", first * 100.0));
        } else if first > 0.0 {
            notes.push(format!("Day-one fill chance is {:.0}%.", first * 100.0));
        } else {
            notes.push("No simulated path fills on day one.".to_string());
        }

        match outcome.expected_days_to_fill {
            Some(days) => notes.push(format!("When it fills, expect about {days:.1} days.")),
            None => notes.push("No simulated path reaches the limit within the window.".to_string()),
        }

        notes.push(format!(
            "Confidence is {} (score {:.2}, 95% CI {:.0}%-{:.0}%).",
            confidence.confidence_level,
            confidence.confidence_score,
            confidence.ci_lower * 100.0,
            confidence.ci_upper * 100.0
        ));

        if !backtest_available {
            notes.push("Historical backtest unavailable; estimate rests on simulation alone.".to_string());
        }

        notes
    }

    /// Four limits evaluated on the same ensemble, most likely to fill first.
    ///
    /// When the requested limit is unlikely to fill, the aggressive limit is
    /// pulled in to one that at least half the paths reach.
    pub fn alternatives(
        &self,
        ensemble: &PricePathEnsemble,
        calendar: Option<&DayCalendar>,
        order: LimitOrder,
        requested: &FillOutcome,
    ) -> Alternatives {
        let reachable = if requested.fill_probability < LIKELY_FILL {
            order.median_reachable(ensemble)
        } else {
            None
        };
        let mut out: Alternatives = order
            .scenarios(reachable)
            .into_iter()
            .map(|(kind, price)| {
                let outcome = FillDetector::new(price, order.side, order.current_price).detect(ensemble, calendar);
                let improvement = order.improvement(price);
                AlternativeLimit {
                    kind,
                    limit_price: price,
                    fill_probability: outcome.fill_probability,
                    first_day_fill_probability: outcome.first_day_fill_probability,
                    expected_days_to_fill: outcome.expected_days_to_fill,
                    price_improvement: improvement,
                    expected_improvement: outcome.fill_probability * improvement,
                }
            })
            .collect();

        out.sort_by(|a, b| b.fill_probability.total_cmp(&a.fill_probability));
        out
    }
}

/// The order being evaluated.
#[derive(Debug, Clone, Copy)]
pub struct LimitOrder {
    pub limit: f64,
    pub side: OrderSide,
    pub current_price: f64,
}

impl LimitOrder {
    /// Distance from the current price, floored so alternatives stay distinct.
    fn gap(&self) -> f64 {
        (self.limit - self.current_price)
            .abs()
            .max(MIN_GAP_FRACTION * self.current_price)
    }

    /// Move `fraction` of the gap toward the current price (negative: away).
    fn toward_current(&self, fraction: f64) -> f64 {
        let shift = fraction * self.gap();
        match self.side {
            // Selling: lower is more aggressive, never below current
            OrderSide::Sell => {
                let price = round_cents(self.limit - shift);
                if fraction > 0.0 {
                    price.max(self.current_price)
                } else {
                    price
                }
            }
            // Buying: higher is more aggressive, never above current
            OrderSide::Buy => {
                let price = round_cents(self.limit + shift);
                let price = if fraction > 0.0 { price.min(self.current_price) } else { price };
                price.max(MIN_BUY_PRICE)
            }
        }
    }

    /// Limit that at least half the paths reach, rounded toward filling.
    fn median_reachable(&self, ensemble: &PricePathEnsemble) -> Option<f64> {
        let mut extremes = path_extremes(ensemble, self.side);
        if extremes.is_empty() {
            return None;
        }
        // ceil(n/2) paths sit at or beyond this rank from the favourable end
        let rank = (extremes.len() + 1) / 2 - 1;
        let price = match self.side {
            OrderSide::Sell => {
                extremes.sort_unstable_by(|a, b| b.total_cmp(a));
                floor_cents(extremes[rank]).max(self.current_price)
            }
            OrderSide::Buy => {
                extremes.sort_unstable_by(f64::total_cmp);
                ceil_cents(extremes[rank]).min(self.current_price).max(MIN_BUY_PRICE)
            }
        };
        Some(price)
    }

    fn scenarios(&self, reachable: Option<f64>) -> [(AlternativeKind, f64); 4] {
        let halfway = self.toward_current(0.50);
        let aggressive = match (reachable, self.side) {
            (Some(r), OrderSide::Sell) => halfway.min(r),
            (Some(r), OrderSide::Buy) => halfway.max(r),
            (None, _) => halfway,
        };
        [
            (AlternativeKind::Aggressive, aggressive),
            (AlternativeKind::Balanced, self.toward_current(0.25)),
            (AlternativeKind::Current, self.limit),
            (AlternativeKind::Conservative, self.toward_current(-0.25)),
        ]
    }

    fn improvement(&self, price: f64) -> f64 {
        match self.side {
            OrderSide::Sell => price - self.current_price,
            OrderSide::Buy => self.current_price - price,
        }
    }
}

#[inline]
fn round_cents(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[inline]
fn floor_cents(x: f64) -> f64 {
    (x * 100.0).floor() / 100.0
}

#[inline]
fn ceil_cents(x: f64) -> f64 {
    (x * 100.0).ceil() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Greeks;
    use crate::simulation::{MonteCarloSimulator, SimulationParameters};
    use crate::validation::StatisticalAnalyzer;

    fn ensemble() -> PricePathEnsemble {
        let params = SimulationParameters {
            current_option_price: 2.50,
            underlying_price: 100.0,
            strike: 100.0,
            days_to_expiry: 30.0,
            horizon_days: 10,
            greeks: Greeks::first_order(0.5, 0.05, -0.03, 0.11, 0.04),
            implied_volatility: 0.3,
            historical_volatility: None,
            effective_volatility: 0.3,
            risk_free_rate: 0.05,
            paths: 3_000,
            first_day_fraction: 1.0,
            seed: Some(11),
        };
        MonteCarloSimulator::default().simulate(&params).unwrap()
    }

    fn price_of(alts: &Alternatives, kind: AlternativeKind) -> f64 {
        alts.iter().find(|a| a.kind == kind).map(|a| a.limit_price).unwrap()
    }

    #[test]
    fn test_sell_scenarios() {
        let e = ensemble();
        let order = LimitOrder { limit: 3.50, side: OrderSide::Sell, current_price: 2.50 };
        // A marketable outcome keeps the scenarios on the fixed grid
        let requested = FillDetector::new(2.50, OrderSide::Sell, 2.50).detect(&e, None);
        let alts = RecommendationEngine.alternatives(&e, None, order, &requested);
        assert_eq!(alts.len(), 4);
        assert_eq!(price_of(&alts, AlternativeKind::Aggressive), 3.00);
        assert_eq!(price_of(&alts, AlternativeKind::Balanced), 3.25);
        assert_eq!(price_of(&alts, AlternativeKind::Current), 3.50);
        assert_eq!(price_of(&alts, AlternativeKind::Conservative), 3.75);
        assert!(alts.windows(2).all(|w| w[0].fill_probability >= w[1].fill_probability));
        assert!(alts.iter().all(|a| a.price_improvement > 0.0));
    }

    #[test]
    fn test_buy_scenarios_respect_floor() {
        let order = LimitOrder { limit: 0.02, side: OrderSide::Buy, current_price: 0.05 };
        let prices: Vec<f64> = order.scenarios(None).iter().map(|(_, p)| *p).collect();
        assert!(prices.iter().all(|&p| p >= MIN_BUY_PRICE), "prices={prices:?}");
        assert!(prices.iter().all(|&p| p <= 0.05));
    }

    #[test]
    fn test_gap_floor_keeps_alternatives_distinct() {
        // Limit equals current: the 2% floor still spreads the scenarios
        let order = LimitOrder { limit: 2.50, side: OrderSide::Sell, current_price: 2.50 };
        let scenarios = order.scenarios(None);
        assert_eq!(scenarios[0].1, 2.50, "aggressive never crosses current");
        assert!(scenarios[3].1 > 2.50);
    }

    fn best_alternative(order: LimitOrder) -> (f64, Alternatives) {
        let e = ensemble();
        let requested = FillDetector::new(order.limit, order.side, order.current_price).detect(&e, None);
        let alts = RecommendationEngine.alternatives(&e, None, order, &requested);
        (requested.fill_probability, alts)
    }

    #[test]
    fn test_far_sell_limit_gets_reachable_alternative() {
        let order = LimitOrder { limit: 40.0, side: OrderSide::Sell, current_price: 2.50 };
        let (p, alts) = best_alternative(order);
        assert_eq!(p, 0.0);
        let aggressive = alts.iter().find(|a| a.kind == AlternativeKind::Aggressive).unwrap();
        assert!(aggressive.fill_probability >= LIKELY_FILL, "aggressive={aggressive:?}");
        assert!(aggressive.limit_price >= 2.50 && aggressive.limit_price < 21.25);
        assert_eq!(alts[0].kind, AlternativeKind::Aggressive);
    }

    #[test]
    fn test_unlikely_limits_always_offer_a_better_fill() {
        for order in [
            LimitOrder { limit: 9.0, side: OrderSide::Sell, current_price: 2.50 },
            LimitOrder { limit: 40.0, side: OrderSide::Sell, current_price: 2.50 },
            LimitOrder { limit: 0.01, side: OrderSide::Buy, current_price: 2.50 },
        ] {
            let (p, alts) = best_alternative(order);
            assert!(p < LIKELY_FILL, "{:?} limit {}: p={p}", order.side, order.limit);
            assert!(
                alts.iter().any(|a| a.fill_probability > p),
                "{:?} limit {}: p={p} alts={alts:?}",
                order.side,
                order.limit
            );
            let aggressive = alts.iter().find(|a| a.kind == AlternativeKind::Aggressive).unwrap();
            match order.side {
                OrderSide::Sell => assert!(aggressive.limit_price >= order.current_price),
                OrderSide::Buy => assert!(aggressive.limit_price <= order.current_price),
            }
        }
    }

    #[test]
    fn test_likely_limit_keeps_halfway_aggressive() {
        let order = LimitOrder { limit: 2.60, side: OrderSide::Sell, current_price: 2.50 };
        let (p, alts) = best_alternative(order);
        assert!(p >= LIKELY_FILL, "p={p}");
        let aggressive = alts.iter().find(|a| a.kind == AlternativeKind::Aggressive).unwrap();
        assert_eq!(aggressive.limit_price, order.toward_current(0.50));
    }

    #[test]
    fn test_observations() {
        let e = ensemble();
        let outcome = FillDetector::new(3.00, OrderSide::Sell, 2.50).detect(&e, None);
        let confidence = StatisticalAnalyzer.analyze(outcome.fill_probability, e.paths(), None);
        let notes = RecommendationEngine.observations(&outcome, &confidence, false);
        assert!(notes.len() >= 4);
        assert!(notes.iter().any(|n| n.contains("backtest unavailable")));
        let level = confidence.confidence_level.to_string();
        assert!(notes.iter().any(|n| n.contains(&format!("Confidence is {level}"))));

        let immediate = FillDetector::new(2.50, OrderSide::Sell, 2.50).detect(&e, None);
        let notes = RecommendationEngine.observations(&immediate, &confidence, true);
        assert_eq!(notes.len(), 1);
    }
}
