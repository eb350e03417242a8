//! HTTP route handlers.

pub mod messages;
pub mod ws;

use crate::state::AppState;
use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the full router: health, the admin API when enabled, and one
/// WebSocket route per configured endpoint.
pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new().route("/health", get(health));

    if state.config.admin_enabled {
        let api_routes = Router::new()
            .route("/endpoints", get(messages::list_endpoints))
            .route(
                "/endpoints/connections",
                axum::routing::delete(messages::disconnect),
            )
            .route("/messages", post(messages::send_message))
            .route("/multicast", post(messages::multicast))
            .route("/batch", post(messages::batch))
            .route("/broadcast", post(messages::broadcast));
        app = app.nest("/api", api_routes);
    }

    for endpoint in &state.config.endpoints {
        app = app.route(&endpoint.path, get(ws::upgrade));
    }

    app.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
