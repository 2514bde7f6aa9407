/// Domain-specific error types for the fill-probability engine.
/// Only input validation is fatal to a prediction. The engine must:
/// - Degrade to documented fallbacks on missing data, degenerate numerics and timeouts
/// - Surface every failure as a tagged result, never a crash
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("numerical degeneracy: {0}")]
    Numerical(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("computation failure: {0}")]
    Computation(String),

    #[error("config error: {0}")]
    Config(String),
}

impl EngineError {
    /// Machine-readable error tag carried by every error result.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "input_validation",
            Self::DataUnavailable(_) => "data_unavailable",
            Self::Numerical(_) => "numerical_degeneracy",
            Self::Timeout(_) => "timeout",
            Self::Computation(_) => "computation_failure",
            Self::Config(_) => "config",
        }
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::Computation(format!("worker task failed: {e}"))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Computation(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Fail with `InvalidInput` unless `value` is finite and strictly positive.
pub fn require_positive(field: &str, value: f64) -> EngineResult<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(EngineError::InvalidInput(format!(
            "{field} must be a positive number, got {value}"
        )))
    }
}
