mod config;
mod errors;
mod execution;
mod feeds;
mod models;
mod server;
mod session;
mod simulation;
mod state;
mod validation;

use crate::state::AppState;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    // Structured logging (stderr, line-buffered)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("fillcast engine starting");

    // Load config
    let cfg = match config::AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        paths = cfg.mc_paths,
        chunks = cfg.mc_chunks,
        seed = ?cfg.mc_seed,
        horizon_cap = cfg.max_horizon_days,
        backtest_timeout_ms = cfg.backtest_timeout_ms,
        "configuration loaded"
    );

    let app_state = match AppState::new(cfg.clone()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("state init error: {e}");
            std::process::exit(1);
        }
    };

    // Startup self-test (off the async workers; failures are reported, not fatal)
    if cfg.run_self_test {
        let test_state = Arc::clone(&app_state);
        match tokio::task::spawn_blocking(move || test_state.run_self_test()).await {
            Ok(report) if report.passed => tracing::info!("startup self-test passed"),
            Ok(report) => tracing::warn!(failed = ?report.failed_checks(), "startup self-test failed"),
            Err(e) => tracing::error!("self-test worker error: {e}"),
        }
    }

    let app = server::router(app_state);

    let addr = format!("0.0.0.0:{}", cfg.server_port);
    tracing::info!("server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("bind error: {e}");
            std::process::exit(1);
        });

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("server error: {e}");
    }
}
