//! Payment provider webhook.
//!
//! | Result | Status |
//! |--------|--------|
//! | bad or missing signature | 401 |
//! | body is not an event | 400 |
//! | settled, duplicate, ignored, rejected | 200 `{"status": ...}` |
//! | ledger failure | 500, so the provider redelivers |

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn settlement(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let signature = headers
        .get(state.signature_header.as_str())
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let verifier = Arc::clone(&state.settlement);

    let outcome = tokio::task::spawn_blocking(move || {
        verifier.verify_and_settle(&body, signature.as_deref())
    })
    .await
    .map_err(|error| ApiError::internal(format!("settlement task failed: {error}")))??;

    info!(status = outcome.status(), reason = ?outcome.reason(), "webhook acknowledged");

    let mut response = json!({ "status": outcome.status() });
    if let Some(reason) = outcome.reason() {
        response["reason"] = Value::String(reason.to_string());
    }
    Ok(Json(response))
}
