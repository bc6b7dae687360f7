//! HTTP surface: the gateway WebSocket upgrade, liveness, and the
//! optional façade (chat completions, tools/invoke).

pub mod chat_completions;
pub mod tools_invoke;

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::state::AppState;

/// Build the full router. The façade routes are mounted only when
/// enabled by config.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/health/live", get(health_live))
        .route("/gateway", get(crate::ws::socket::gateway_ws));

    let mut protected = Router::new();
    if state.config.get().server.http.enabled {
        protected = protected
            .route(
                "/v1/chat/completions",
                post(chat_completions::chat_completions),
            )
            .route("/tools/invoke", post(tools_invoke::invoke));
    }
    let protected = protected.route_layer(middleware::from_fn_with_state(
        state,
        require_bearer_token,
    ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// GET /health/live — liveness probe.
async fn health_live(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.connections.count(),
    }))
}

/// Bearer-token middleware for the façade. Accepts the static secret or
/// a device token; dev mode (no secret configured) passes through.
async fn require_bearer_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(String::from);

    match crate::auth::authenticate(&state, provided.as_deref()) {
        Ok(_) => next.run(req).await,
        Err(e) => (
            axum::http::StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": { "code": e.code(), "message": e.to_string() } })),
        )
            .into_response(),
    }
}
