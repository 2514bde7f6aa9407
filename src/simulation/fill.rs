use super::monte_carlo::PricePathEnsemble;
use crate::models::OrderSide;
use crate::session::{describe_day, DayCalendar};
use chrono::NaiveDate;

/// Days reported in the per-day probability table.
pub const DAY_TABLE_LIMIT: u32 = 10;

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct DayProbability {
    pub day: u32,
    pub date: Option<NaiveDate>,
    /// Fraction of all paths whose first fill lands on this day.
    pub marginal: f64,
    /// Fraction of all paths filled by the end of this day.
    pub cumulative: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PercentileDay {
    pub day: u32,
    pub date: Option<NaiveDate>,
    pub description: String,
}

/// Days-to-fill percentiles over filled paths. `None` when nothing filled.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PercentileDays {
    pub p25: Option<PercentileDay>,
    pub p50: Option<PercentileDay>,
    pub p75: Option<PercentileDay>,
    pub p90: Option<PercentileDay>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FillOutcome {
    pub fill_probability: f64,
    pub first_day_fill_probability: f64,
    /// Mean first-fill day over filled paths only.
    pub expected_days_to_fill: Option<f64>,
    pub median_days_to_fill: Option<f64>,
    pub probability_by_day: Vec<DayProbability>,
    /// Fraction of paths whose running extreme reaches the limit.
    pub touch_probability: f64,
    pub percentile_days: PercentileDays,
    pub filled_paths: usize,
    pub total_paths: usize,
    pub immediate_fill: bool,
}

/// First-crossing fill detection over a simulated ensemble.
#[derive(Debug, Clone, Copy)]
pub struct FillDetector {
    limit: f64,
    side: OrderSide,
    current_price: f64,
}

impl FillDetector {
    pub fn new(limit: f64, side: OrderSide, current_price: f64) -> Self {
        Self { limit, side, current_price }
    }

    /// True when the limit is already marketable at the current price.
    #[inline]
    pub fn is_immediate(&self) -> bool {
        self.side.is_filled(self.current_price, self.limit)
    }

    /// First day (1-based) on which the path satisfies the fill condition.
    #[inline]
    fn first_fill_day(&self, path: &[f64]) -> Option<u32> {
        path.iter()
            .skip(1)
            .position(|&p| self.side.is_filled(p, self.limit))
            .map(|i| i as u32 + 1)
    }

    /// Whether the path's running extreme ever reaches the limit.
    #[inline]
    fn touches(&self, path: &[f64]) -> bool {
        self.side.is_filled(best_price(path, self.side), self.limit)
    }

    pub fn detect(&self, ensemble: &PricePathEnsemble, calendar: Option<&DayCalendar>) -> FillOutcome {
        let total = ensemble.paths();
        let horizon = ensemble.horizon_days();
        let table_days = horizon.min(DAY_TABLE_LIMIT);

        if self.is_immediate() {
            tracing::debug!(limit = self.limit, current = self.current_price, "limit already marketable");
            return self.immediate_outcome(total, table_days, calendar);
        }

        let mut fill_days: Vec<u32> = Vec::with_capacity(total);
        let mut marginal_counts = vec![0usize; horizon as usize + 1];
        let mut touched = 0usize;

        for path in ensemble.iter_paths() {
            if let Some(day) = self.first_fill_day(path) {
                fill_days.push(day);
                marginal_counts[day as usize] += 1;
            }
            if self.touches(path) {
                touched += 1;
            }
        }

        let n = total.max(1) as f64;
        let filled = fill_days.len();

        let mut cumulative = 0usize;
        let probability_by_day = (1..=table_days)
            .map(|day| {
                let count = marginal_counts[day as usize];
                cumulative += count;
                DayProbability {
                    day,
                    date: calendar.map(|c| c.date_for_day(day)),
                    marginal: count as f64 / n,
                    cumulative: cumulative as f64 / n,
                }
            })
            .collect();

        fill_days.sort_unstable();
        let expected = (filled > 0).then(|| fill_days.iter().map(|&d| f64::from(d)).sum::<f64>() / filled as f64);

        FillOutcome {
            fill_probability: filled as f64 / n,
            first_day_fill_probability: marginal_counts.get(1).copied().unwrap_or(0) as f64 / n,
            expected_days_to_fill: expected,
            median_days_to_fill: median(&fill_days),
            probability_by_day,
            touch_probability: touched as f64 / n,
            percentile_days: percentile_days(&fill_days, calendar),
            filled_paths: filled,
            total_paths: total,
            immediate_fill: false,
        }
    }

    fn immediate_outcome(&self, total: usize, table_days: u32, calendar: Option<&DayCalendar>) -> FillOutcome {
        let at_zero = || {
            Some(PercentileDay {
                day: 0,
                date: calendar.map(|c| c.date_for_day(0)),
                description: describe_day(0, calendar),
            })
        };
        FillOutcome {
            fill_probability: 1.0,
            first_day_fill_probability: 1.0,
            expected_days_to_fill: Some(0.0),
            median_days_to_fill: Some(0.0),
            probability_by_day: (1..=table_days)
                .map(|day| DayProbability {
                    day,
                    date: calendar.map(|c| c.date_for_day(day)),
                    marginal: 0.0,
                    cumulative: 1.0,
                })
                .collect(),
            touch_probability: 1.0,
            percentile_days: PercentileDays {
                p25: at_zero(),
                p50: at_zero(),
                p75: at_zero(),
                p90: at_zero(),
            },
            filled_paths: total,
            total_paths: total,
            immediate_fill: true,
        }
    }
}

/// Each path's most favourable price over the simulated days: the running
/// maximum for a sell, the running minimum for a buy.
pub fn path_extremes(ensemble: &PricePathEnsemble, side: OrderSide) -> Vec<f64> {
    ensemble.iter_paths().map(|path| best_price(path, side)).collect()
}

#[inline]
fn best_price(path: &[f64], side: OrderSide) -> f64 {
    let rest = path.iter().skip(1).copied();
    match side {
        OrderSide::Sell => rest.fold(f64::NEG_INFINITY, f64::max),
        OrderSide::Buy => rest.fold(f64::INFINITY, f64::min),
    }
}

/// Median of sorted days; average of the middle pair for even counts.
fn median(sorted: &[u32]) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(f64::from(sorted[n / 2])),
        _ => Some((f64::from(sorted[n / 2 - 1]) + f64::from(sorted[n / 2])) / 2.0),
    }
}

/// Nearest-rank percentile of sorted values.
fn nearest_rank(sorted: &[u32], pct: f64) -> Option<u32> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil().max(1.0) as usize;
    sorted.get(rank.min(sorted.len()) - 1).copied()
}

fn percentile_days(sorted: &[u32], calendar: Option<&DayCalendar>) -> PercentileDays {
    let at = |pct: f64| {
        nearest_rank(sorted, pct).map(|day| PercentileDay {
            day,
            date: calendar.map(|c| c.date_for_day(day)),
            description: describe_day(day, calendar),
        })
    };
    PercentileDays {
        p25: at(25.0),
        p50: at(50.0),
        p75: at(75.0),
        p90: at(90.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Greeks;
    use crate::simulation::{MonteCarloSimulator, SimulationParameters};

    fn ensemble(sigma: f64, horizon: u32) -> PricePathEnsemble {
        let params = SimulationParameters {
            current_option_price: 2.50,
            underlying_price: 100.0,
            strike: 100.0,
            days_to_expiry: 45.0,
            horizon_days: horizon,
            greeks: Greeks::first_order(0.5, 0.05, -0.03, 0.11, 0.04),
            implied_volatility: sigma,
            historical_volatility: None,
            effective_volatility: sigma,
            risk_free_rate: 0.05,
            paths: 4_000,
            first_day_fraction: 1.0,
            seed: Some(2024),
        };
        MonteCarloSimulator::default().simulate(&params).unwrap()
    }

    #[test]
    fn test_limit_at_current_fills_immediately() {
        let e = ensemble(0.3, 10);
        let outcome = FillDetector::new(2.50, OrderSide::Sell, 2.50).detect(&e, None);
        assert!(outcome.fill_probability > 0.99);
        assert!(outcome.immediate_fill);
        assert_eq!(outcome.percentile_days.p50.as_ref().map(|p| p.description.as_str()), Some("immediately"));
        assert_eq!(outcome.expected_days_to_fill, Some(0.0));
    }

    #[test]
    fn test_higher_vol_fills_more_often() {
        let detector = FillDetector::new(3.00, OrderSide::Sell, 2.50);
        let low = detector.detect(&ensemble(0.20, 10), None).fill_probability;
        let high = detector.detect(&ensemble(0.50, 10), None).fill_probability;
        assert!(high > low, "high vol p={high} should exceed low vol p={low}");
    }

    #[test]
    fn test_longer_horizon_never_decreases() {
        let detector = FillDetector::new(3.00, OrderSide::Sell, 2.50);
        let mut previous = 0.0;
        for horizon in [1, 5, 10, 20] {
            let p = detector.detect(&ensemble(0.3, horizon), None).fill_probability;
            assert!(p >= previous, "horizon {horizon}: p={p} < {previous}");
            previous = p;
        }
    }

    #[test]
    fn test_buy_and_sell_both_fill() {
        let e = ensemble(0.3, 10);
        let sell = FillDetector::new(3.00, OrderSide::Sell, 2.50).detect(&e, None);
        let buy = FillDetector::new(2.00, OrderSide::Buy, 2.50).detect(&e, None);
        assert!(sell.fill_probability > 0.0);
        assert!(buy.fill_probability > 0.0);
    }

    #[test]
    fn test_outcome_consistency() {
        let e = ensemble(0.3, 8);
        let outcome = FillDetector::new(3.00, OrderSide::Sell, 2.50).detect(&e, None);

        assert!(outcome.first_day_fill_probability <= outcome.fill_probability);
        assert!((outcome.touch_probability - outcome.fill_probability).abs() < 1e-12);
        assert_eq!(outcome.probability_by_day.len(), 8);

        let mut last = 0.0;
        for row in &outcome.probability_by_day {
            assert!(row.cumulative >= last, "cumulative must be non-decreasing");
            last = row.cumulative;
        }
        // Horizon inside the table: the last cumulative is the fill probability
        assert!((last - outcome.fill_probability).abs() < 1e-12);

        let pd = &outcome.percentile_days;
        let days: Vec<u32> = [&pd.p25, &pd.p50, &pd.p75, &pd.p90]
            .iter()
            .map(|p| p.as_ref().map(|x| x.day).unwrap())
            .collect();
        assert!(days.windows(2).all(|w| w[0] <= w[1]), "percentiles out of order: {days:?}");

        let expected = outcome.expected_days_to_fill.unwrap();
        assert!((1.0..=8.0).contains(&expected));
    }

    #[test]
    fn test_unreachable_limit() {
        let outcome = FillDetector::new(100.0, OrderSide::Sell, 2.50).detect(&ensemble(0.3, 5), None);
        assert_eq!(outcome.fill_probability, 0.0);
        assert!(outcome.expected_days_to_fill.is_none());
        assert!(outcome.median_days_to_fill.is_none());
        assert!(outcome.percentile_days.p90.is_none());
    }

    #[test]
    fn test_table_capped_and_dated() {
        let cal = DayCalendar {
            today: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            first_day: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            expiration: None,
        };
        let outcome = FillDetector::new(3.00, OrderSide::Sell, 2.50).detect(&ensemble(0.3, 30), Some(&cal));
        assert_eq!(outcome.probability_by_day.len(), DAY_TABLE_LIMIT as usize);
        assert_eq!(outcome.probability_by_day[0].date, Some(cal.first_day));
        if let Some(p) = &outcome.percentile_days.p50 {
            assert_eq!(p.date, Some(cal.date_for_day(p.day)));
        }
    }

    #[test]
    fn test_path_extremes_match_touch() {
        let e = ensemble(0.3, 10);
        let highs = path_extremes(&e, OrderSide::Sell);
        let lows = path_extremes(&e, OrderSide::Buy);
        assert_eq!(highs.len(), e.paths());
        assert!(highs.iter().zip(&lows).all(|(h, l)| h >= l));

        let touched = highs.iter().filter(|&&h| h >= 3.00).count() as f64 / e.paths() as f64;
        let outcome = FillDetector::new(3.00, OrderSide::Sell, 2.50).detect(&e, None);
        assert!((touched - outcome.touch_probability).abs() < 1e-12);
    }

    #[test]
    fn test_median_and_nearest_rank() {
        assert_eq!(median(&[1, 2, 3, 4]), Some(2.5));
        assert_eq!(median(&[3]), Some(3.0));
        let sorted = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert_eq!(nearest_rank(&sorted, 25.0), Some(3));
        assert_eq!(nearest_rank(&sorted, 50.0), Some(5));
        assert_eq!(nearest_rank(&sorted, 90.0), Some(9));
        assert_eq!(nearest_rank(&[], 50.0), None);
    }
}
