//! Axum HTTP gateway over the generator.
//!
//! Routes:
//! - `GET  /health`
//! - `POST /generate`
//! - `GET  /api/sessions/{id}/history`
//! - `DELETE /api/sessions/{id}`
//! - `GET  /api/status`

pub mod api;
pub mod error;

use anyhow::{Context, Result};
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::config::Config;
use crate::generation::Generator;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<Generator>,
    pub cookie_name: Arc<str>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(generator: Arc<Generator>, cookie_name: &str) -> Self {
        Self {
            generator,
            cookie_name: Arc::from(cookie_name),
            started_at: Instant::now(),
        }
    }
}

/// Request limits applied to every route.
#[derive(Debug, Clone, Copy)]
pub struct GatewayLimits {
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
}

impl GatewayLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_body_bytes: config.gateway.max_body_bytes,
            request_timeout: Duration::from_secs(config.gateway.request_timeout_secs),
        }
    }
}

pub fn build_router(state: AppState, limits: GatewayLimits) -> Router {
    Router::new()
        .route("/health", get(api::handle_health))
        .route("/generate", post(api::handle_generate))
        .route(
            "/api/sessions/{id}/history",
            get(api::handle_session_history),
        )
        .route("/api/sessions/{id}", delete(api::handle_session_clear))
        .route("/api/status", get(api::handle_api_status))
        .layer(RequestBodyLimitLayer::new(limits.max_body_bytes))
        .layer(TimeoutLayer::new(limits.request_timeout))
        .with_state(state)
}

/// Bind `host:port` and serve until Ctrl+C or SIGTERM.
pub async fn run_gateway(host: &str, port: u16, config: Config) -> Result<()> {
    let generator = Arc::new(Generator::from_config(&config)?);
    let state = AppState::new(generator, &config.sessions.cookie_name);
    let router = build_router(state, GatewayLimits::from_config(&config));

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind gateway to {addr}"))?;
    let local = listener
        .local_addr()
        .context("Failed to read gateway listen address")?;

    tracing::info!(
        address = %local,
        provider = config.default_provider.as_deref().unwrap_or("openai"),
        model = config.default_model.as_deref().unwrap_or("gpt-4"),
        "Gateway listening"
    );
    println!("prdgen gateway listening on http://{local}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Gateway server error")?;

    tracing::info!("Gateway stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
