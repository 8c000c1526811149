//! # Stratagem Web
//!
//! HTTP gateway in front of the agent registry, chat streaming and the
//! payment webhook.
//!
//! | Route | Handler |
//! |-------|---------|
//! | `GET /healthz` | [`routes::health::healthz`] |
//! | `POST /agents/execute` | [`routes::agents::execute`] |
//! | `POST /agents/stream` | [`routes::agents::stream`] |
//! | `POST /webhooks/settlement` | [`routes::webhook::settlement`] |
//!
//! Every response carries an `x-request-id` header, and the request's log
//! lines run inside a span tagged with the same id.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub use auth::{Authenticator, StaticTokenAuthenticator};
pub use config::{GatewayArgs, GatewayConfig, LedgerLocation};
pub use error::{ApiError, GatewayError};
pub use state::{build_model, open_ledger, AppState};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/agents/execute", post(routes::agents::execute))
        .route("/agents/stream", post(routes::agents::stream))
        .route("/webhooks/settlement", post(routes::webhook::settlement))
        .with_state(state)
        .layer(middleware::from_fn(request_id))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Reuse the caller's request id when it is sane, otherwise mint one.
async fn request_id(request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = info_span!(
        "request",
        request_id = %id,
        method = %request.method(),
        path = %request.uri().path()
    );
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}
