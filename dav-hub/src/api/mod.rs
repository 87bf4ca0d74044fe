//! HTTP transport: hands every request to the protocol engine.
//!
//! The engine works on fully buffered bodies, so the adapter collects the
//! body up to the configured limit before dispatching.

use axum::{
    body::{self, Body},
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Router,
};
use dav_hub_core::DavHandler;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub dav: DavHandler,
    pub max_body: usize,
}

/// Router serving the whole tree. WebDAV verbs are not routable by axum's
/// method router, so everything goes through the fallback.
pub fn router(dav: DavHandler, max_body: usize) -> Router {
    let state = AppState { dav, max_body };
    Router::new()
        .fallback(serve_dav)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn serve_dav(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match body::to_bytes(body, state.max_body).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(method = %parts.method, uri = %parts.uri, error = %err, "request body rejected");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };
    let response = state
        .dav
        .handle(axum::http::Request::from_parts(parts, bytes))
        .await;
    response.map(Body::from)
}
