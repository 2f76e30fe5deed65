//! Serving façade
//!
//! A thin read-only HTTP layer over the published cache snapshots. Handlers
//! never take the write guard; each request loads whatever snapshot is
//! current and serializes it. The route shape and shared-secret check match
//! the upstream provider's own contract so existing consumers can point at
//! the mirror unchanged.

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::cache::EpgCache;
use crate::config::WebConfig;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<EpgCache>,
    pub secret: String,
}

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(config: &WebConfig, state: AppState) -> Result<Self> {
        let app = create_router(state);
        let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
        Ok(Self { app, addr })
    }

    /// Start the web server
    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, self.app).await?;
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Build the router. Public so tests can drive it without binding a socket.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/EPG/channel", get(serve_catalog))
        .route("/EPG/schedule", get(serve_schedule))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Deserialize)]
struct EpgQuery {
    secret: Option<String>,
    id: Option<String>,
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let catalog_channels = state.cache.catalog().map(|c| c.len());
    Json(json!({
        "status": "healthy",
        "catalog_channels": catalog_channels,
        "cached_schedules": state.cache.schedule_count(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn serve_catalog(State(state): State<AppState>, Query(query): Query<EpgQuery>) -> Response {
    if let Err(rejection) = check_secret(&state, query.secret.as_deref(), "/EPG/channel") {
        return rejection;
    }

    match state.cache.catalog() {
        Some(catalog) => Json(&*catalog).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "channel catalog not yet available",
        )
            .into_response(),
    }
}

async fn serve_schedule(State(state): State<AppState>, Query(query): Query<EpgQuery>) -> Response {
    if let Err(rejection) = check_secret(&state, query.secret.as_deref(), "/EPG/schedule") {
        return rejection;
    }

    let Some(channel_id) = query.id else {
        return (StatusCode::BAD_REQUEST, "missing the id key").into_response();
    };

    match state.cache.schedule(&channel_id) {
        Some(document) => Json(&*document).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            format!("no schedule for channel {}", channel_id),
        )
            .into_response(),
    }
}

fn check_secret(state: &AppState, provided: Option<&str>, route: &str) -> Result<(), Response> {
    match provided {
        None => {
            warn!(route, "Request missing the secret key");
            Err((StatusCode::UNAUTHORIZED, "missing the secret key").into_response())
        }
        Some(secret) if secret != state.secret => {
            warn!(route, "Request with wrong secret key");
            Err((StatusCode::UNAUTHORIZED, "wrong secret key").into_response())
        }
        Some(_) => Ok(()),
    }
}
