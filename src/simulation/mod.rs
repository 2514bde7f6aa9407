pub mod fill;
pub mod monte_carlo;

pub use fill::{FillDetector, FillOutcome};
pub use monte_carlo::{MonteCarloSimulator, PricePathEnsemble, SimulationParameters};
