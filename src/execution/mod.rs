pub mod predictor;
pub mod recommend;

pub use predictor::{FillPredictionReport, FillPredictionRequest, FillPredictor, PredictorSettings};
pub use recommend::RecommendationEngine;
