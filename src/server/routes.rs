use crate::errors::{require_positive, EngineError};
use crate::execution::FillPredictionRequest;
use crate::models::assignment::{AssignmentCalculator, AssignmentPosition};
use crate::models::black_scholes::BlackScholes;
use crate::models::{OptionKind, OptionSpec, PricingModel};
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use portable_atomic::Ordering::Relaxed;
use std::sync::Arc;

// ── Envelope ──

/// `{"status":"ok", ...body}`
#[derive(serde::Serialize)]
pub struct Tagged<T> {
    status: &'static str,
    #[serde(flatten)]
    body: T,
}

fn ok<T: serde::Serialize>(body: T) -> Json<Tagged<T>> {
    Json(Tagged { status: "ok", body })
}

/// `{"status":"error","error_kind":..,"message":..}`. 422 for bad input.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(EngineError::InvalidInput(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            EngineError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "status": "error",
            "error_kind": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<Tagged<T>>, ApiError>;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/predict-fill", post(predict_fill))
        .route("/api/assignment-probability", post(assignment_probability))
        .route("/api/assignment-probability/batch", post(assignment_batch))
        .route("/api/greeks", post(greeks))
        .route("/api/implied-volatility", post(implied_volatility))
        .route("/api/self-test", get(self_test))
        .route("/api/counters", get(get_counters))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state)
}

// ── Fill prediction ──

/// POST /api/predict-fill
pub async fn predict_fill(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<FillPredictionRequest>, JsonRejection>,
) -> ApiResult<crate::execution::FillPredictionReport> {
    let Json(request) = payload.inspect_err(|_| {
        state.counters.predictions_rejected.fetch_add(1, Relaxed);
    })?;

    // Own task so a panic comes back as a tagged error, not a dropped connection
    let worker = Arc::clone(&state);
    let outcome = tokio::spawn(async move { worker.predictor.predict_fill(request, worker.cached_self_test()).await })
        .await
        .map_err(EngineError::from)
        .and_then(|r| r);

    match outcome {
        Ok(report) => {
            state.counters.record_prediction(&report);
            Ok(ok(report))
        }
        Err(e) => {
            let counter = if matches!(e, EngineError::InvalidInput(_)) {
                &state.counters.predictions_rejected
            } else {
                &state.counters.predictions_failed
            };
            counter.fetch_add(1, Relaxed);
            tracing::warn!(kind = e.kind(), error = %e, "fill prediction failed");
            Err(e.into())
        }
    }
}

// ── Assignment probability ──

#[derive(serde::Deserialize)]
pub struct AssignmentRequest {
    pub spot: f64,
    pub strike: f64,
    pub days_to_expiry: f64,
    pub volatility: f64,
    pub option_kind: OptionKind,
    pub risk_free_rate: Option<f64>,
    pub delta: Option<f64>,
}

#[derive(serde::Serialize)]
pub struct AssignmentResponse {
    pub result: crate::models::assignment::AssignmentProbabilityResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_comparison: Option<crate::models::assignment::DeltaComparison>,
}

/// POST /api/assignment-probability
pub async fn assignment_probability(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AssignmentRequest>, JsonRejection>,
) -> ApiResult<AssignmentResponse> {
    state.counters.assignment_requests.fetch_add(1, Relaxed);
    let Json(req) = payload?;
    let calc = AssignmentCalculator::new();
    let rate = req.risk_free_rate.unwrap_or(state.config.risk_free_rate);
    let result = calc.calculate(req.spot, req.strike, req.days_to_expiry, req.volatility, req.option_kind, rate)?;
    let delta_comparison = req.delta.map(|d| calc.compare_with_delta(&result, d));
    Ok(ok(AssignmentResponse { result, delta_comparison }))
}

#[derive(serde::Deserialize)]
pub struct BatchRequest {
    pub positions: Vec<AssignmentPosition>,
    pub risk_free_rate: Option<f64>,
}

/// POST /api/assignment-probability/batch
pub async fn assignment_batch(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResult<crate::models::assignment::BatchAssignmentReport> {
    state.counters.assignment_requests.fetch_add(1, Relaxed);
    let Json(req) = payload?;
    let rate = req.risk_free_rate.unwrap_or(state.config.risk_free_rate);
    Ok(ok(AssignmentCalculator::new().calculate_batch(&req.positions, rate)))
}

// ── Pricing ──

#[derive(serde::Deserialize)]
pub struct PricingRequest {
    pub spot: f64,
    pub strike: f64,
    pub days_to_expiry: f64,
    pub option_kind: OptionKind,
    pub volatility: Option<f64>,
    pub market_price: Option<f64>,
    pub risk_free_rate: Option<f64>,
    pub dividend_yield: Option<f64>,
    #[serde(default)]
    pub method: IvMethod,
}

#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IvMethod {
    #[default]
    Newton,
    Brent,
}

impl PricingRequest {
    fn spec(&self, state: &AppState, volatility: f64) -> Result<OptionSpec, EngineError> {
        require_positive("spot", self.spot)?;
        require_positive("strike", self.strike)?;
        if !self.days_to_expiry.is_finite() || self.days_to_expiry < 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "days to expiry must be non-negative, got {}",
                self.days_to_expiry
            )));
        }
        Ok(OptionSpec::new(
            self.spot,
            self.strike,
            self.days_to_expiry,
            self.option_kind,
            self.risk_free_rate.unwrap_or(state.config.risk_free_rate),
            volatility,
        )
        .with_dividend_yield(self.dividend_yield.unwrap_or(state.config.dividend_yield)))
    }
}

#[derive(serde::Serialize)]
pub struct GreeksResponse {
    pub model: &'static str,
    pub price: f64,
    pub intrinsic: f64,
    pub degenerate: bool,
    pub greeks: crate::models::Greeks,
}

/// POST /api/greeks -- price and full Greeks
pub async fn greeks(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PricingRequest>, JsonRejection>,
) -> ApiResult<GreeksResponse> {
    state.counters.pricing_requests.fetch_add(1, Relaxed);
    let Json(req) = payload?;
    let volatility = req
        .volatility
        .ok_or_else(|| EngineError::InvalidInput("volatility is required".into()))?;
    if !volatility.is_finite() || volatility < 0.0 {
        return Err(EngineError::InvalidInput(format!("volatility must be non-negative, got {volatility}")).into());
    }
    let spec = req.spec(&state, volatility)?;
    let pricer = BlackScholes::new();
    let (price, greeks) = pricer.price_and_greeks(&spec);
    Ok(ok(GreeksResponse {
        model: pricer.name(),
        price,
        intrinsic: spec.intrinsic(),
        degenerate: spec.is_degenerate(),
        greeks,
    }))
}

/// POST /api/implied-volatility
pub async fn implied_volatility(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PricingRequest>, JsonRejection>,
) -> ApiResult<crate::models::black_scholes::ImpliedVolatility> {
    state.counters.pricing_requests.fetch_add(1, Relaxed);
    let Json(req) = payload?;
    let market_price = req
        .market_price
        .ok_or_else(|| EngineError::InvalidInput("market_price is required".into()))?;
    let spec = req.spec(&state, 0.0)?;
    let pricer = BlackScholes::new();
    let solved = match req.method {
        IvMethod::Newton => pricer.implied_volatility(&spec, market_price),
        IvMethod::Brent => pricer.implied_volatility_brent(&spec, market_price),
    };
    solved.map(ok).ok_or_else(|| {
        EngineError::InvalidInput(format!(
            "no implied volatility for price {market_price} (intrinsic {:.4})",
            spec.intrinsic()
        ))
        .into()
    })
}

// ── Validation and counters ──

/// GET /api/self-test -- rerun the theoretical battery
pub async fn self_test(State(state): State<Arc<AppState>>) -> ApiResult<crate::validation::TheoreticalReport> {
    let report = tokio::task::spawn_blocking(move || state.run_self_test())
        .await
        .map_err(EngineError::from)?;
    Ok(ok(report))
}

/// GET /api/counters -- performance counters (lock-free reads)
pub async fn get_counters(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let c = &state.counters;
    Json(serde_json::json!({
        "predictions_served": c.predictions_served.load(Relaxed),
        "predictions_rejected": c.predictions_rejected.load(Relaxed),
        "predictions_failed": c.predictions_failed.load(Relaxed),
        "paths_simulated": c.paths_simulated.load(Relaxed),
        "backtests_completed": c.backtests_completed.load(Relaxed),
        "backtests_unavailable": c.backtests_unavailable.load(Relaxed),
        "assignment_requests": c.assignment_requests.load(Relaxed),
        "pricing_requests": c.pricing_requests.load(Relaxed),
        "self_tests_run": c.self_tests_run.load(Relaxed),
        "history_symbols": state.history.len(),
    }))
}
