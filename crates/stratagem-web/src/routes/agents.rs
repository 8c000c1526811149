//! Agent execution and chat streaming.
//!
//! ```text
//! POST /agents/execute  {"agentId", "payload"}   -> 200 {"data": <agent output>}
//! POST /agents/stream   {"history", "context"}   -> 200 text/event-stream
//! ```
//!
//! Both require `Authorization: Bearer <token>`. Stream failures after the
//! response has started arrive as a `data: {"error": ...}` frame, never as a
//! status code.

use std::convert::Infallible;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use stratagem_agent::{ChatContext, ChatTurnState, Payload, StreamEvent};
use stratagem_core::Content;
use tracing::info;

use crate::auth::authenticate;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub agent_id: String,
    #[serde(default)]
    pub payload: Payload,
}

#[derive(Debug, Deserialize)]
pub struct StreamRequest {
    pub history: Vec<Content>,
    #[serde(default)]
    pub context: ChatContext,
}

pub async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let caller = authenticate(state.authenticator.as_ref(), &headers)?;
    let Json(request) = body?;

    let data = state
        .registry
        .execute(&request.agent_id, &request.payload, &caller)
        .await?;

    Ok(Json(json!({ "data": data })))
}

pub async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<StreamRequest>, JsonRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let caller = authenticate(state.authenticator.as_ref(), &headers)?;
    let Json(request) = body?;
    let turn = ChatTurnState::new(request.history)?;

    info!(
        user_id = %caller.user_id,
        mode = ?request.context.mode,
        turns = turn.history().len(),
        "opening chat stream"
    );

    let events = state
        .chat
        .open_stream(turn, &request.context)
        .map(|event| Ok::<_, Infallible>(sse_event(&event)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn sse_event(event: &StreamEvent) -> Event {
    Event::default().data(event.data())
}
