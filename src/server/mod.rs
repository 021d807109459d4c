//! HTTP and MCP surface wiring.

pub mod mcp;
pub mod sse;

use std::sync::Arc;

use axum::{
    http::{HeaderMap, StatusCode},
    routing::get,
    Router,
};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};

use crate::AppState;

/// Assemble the axum router: health, per-workflow SSE, and the MCP
/// streamable-HTTP transport.
pub fn build_router(state: Arc<AppState>) -> Router {
    let mcp_state = Arc::clone(&state);
    let mcp_service = StreamableHttpService::new(
        move || Ok(mcp::DreamwalkerMcp::new(Arc::clone(&mcp_state))),
        LocalSessionManager::default().into(),
        Default::default(),
    );

    Router::new()
        .route("/health", get(health))
        .route("/v1/workflows/{id}/events", get(sse::workflow_events))
        .with_state(state)
        .nest_service("/mcp", mcp_service)
}

async fn health() -> &'static str {
    "ok"
}

/// Optional static bearer-token hook. Returns 401 when a token is configured
/// and the request does not carry it.
pub(crate) fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected) = &state.config.server.auth_token else {
        return Ok(());
    };
    let provided = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}
