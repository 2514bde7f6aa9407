pub mod backtest;
pub mod stats;
pub mod theoretical;

pub use backtest::{BacktestInput, BacktestOutcome, BacktestValidator};
pub use stats::{ConfidenceMetrics, StatisticalAnalyzer};
pub use theoretical::{TheoreticalReport, TheoreticalValidator};
