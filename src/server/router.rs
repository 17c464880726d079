//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{error, warn};

use super::flow::{AuthorizationFlow, ReadOutcome};
use crate::Error;
use crate::keys::KeyMaterialManager;

/// Shared application state
pub struct AppState {
    /// Read/write contract around the resource store
    pub flow: Arc<AuthorizationFlow>,
    /// Signing key, published as JWKS
    pub keys: Arc<KeyMaterialManager>,
    /// Public base URL; resource URIs are `base_url + path`
    pub base_url: String,
}

impl AppState {
    fn resource_uri(&self, uri: &Uri) -> String {
        format!("{}{}", self.base_url, uri.path())
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/.well-known/jwks.json", get(jwks_handler))
        .route("/", get(read_handler).post(write_handler))
        .route("/{*path}", get(read_handler).post(write_handler))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// JWKS endpoint
async fn jwks_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.keys.jwks().await {
        Ok(jwks) => Json(jwks).into_response(),
        Err(e) => error_response(&e),
    }
}

/// Read a resource
async fn read_handler(State(state): State<Arc<AppState>>, uri: Uri, headers: HeaderMap) -> Response {
    let resource = state.resource_uri(&uri);
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match state.flow.handle_read(&resource, authorization).await {
        Ok(ReadOutcome::Found(content)) => (StatusCode::OK, content).into_response(),
        Ok(ReadOutcome::NotFound) => {
            (StatusCode::NOT_FOUND, format!("Resource not found: {resource}")).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// Write a resource once
async fn write_handler(State(state): State<Arc<AppState>>, uri: Uri, body: String) -> Response {
    let resource = state.resource_uri(&uri);

    match state.flow.handle_write(&resource, body).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&e),
    }
}

/// Map an error to its client-facing response
fn error_response(err: &Error) -> Response {
    let status = err.status_code();
    match err {
        Error::Unauthenticated { challenge } => (
            status,
            [(header::WWW_AUTHENTICATE, challenge.clone())],
            "401 Unauthenticated",
        )
            .into_response(),
        Error::TokenInvalid => (status, "403 Forbidden: access token is not active").into_response(),
        Error::AlreadyExists(uri) => (status, format!("Resource already exists at {uri}")).into_response(),
        Error::AuthorizationServerUnavailable { endpoint, reason } => {
            warn!(endpoint = %endpoint, reason = %reason, "Authorization server unavailable");
            (status, "502 Bad Gateway: authorization server unavailable").into_response()
        }
        other => {
            error!(error = %other, "Request failed");
            (status, "500 Internal Server Error").into_response()
        }
    }
}
