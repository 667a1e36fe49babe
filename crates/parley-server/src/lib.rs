//! Parley session broker relay.
//!
//! A small HTTP service that sits between the voice widget and the
//! session-issuing upstream. It keeps the upstream API key off the client,
//! normalizes the credentials the upstream returns, and collapses duplicate
//! connect requests into one upstream call.

pub mod api;
pub mod background;
pub mod config;
pub mod dedup;
pub mod middleware;
pub mod upstream;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Extension, Router,
};
use dedup::InFlightRegistry;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use upstream::{RelayError, UpstreamClient};

/// Maximum accepted request body size.
pub const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Client for the session-issuing upstream.
    pub upstream: UpstreamClient,
    /// Connect requests currently shared between identical callers.
    pub in_flight: Arc<InFlightRegistry>,
    /// Origins allowed by the CORS layer.
    pub cors_origins: Vec<String>,
}

impl AppState {
    pub fn from_config(config: &config::Config) -> Result<Self, RelayError> {
        Ok(Self {
            upstream: UpstreamClient::new(&config.upstream)?,
            in_flight: Arc::new(InFlightRegistry::new(config.relay.dedup_window())),
            cors_origins: config.cors.allowed_origins.clone(),
        })
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

/// Builds the relay router.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.cors_origins);

    Router::new()
        .route("/health", get(api::health_handler))
        .route("/api/test", get(api::test_handler))
        .route("/api/connect", post(api::connect_handler))
        .fallback(api::not_found_handler)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(axum::middleware::from_fn(
            middleware::request_logging_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(Extension(Arc::new(state)))
}
