//! # Streaming Chat Sessions
//!
//! One chat turn is served as a single-pass event stream. Each provider
//! increment becomes one frame:
//!
//! | Wire line | Meaning |
//! |-----------|---------|
//! | `data: {"textDelta":"…","citations":[…]}` | incremental text plus newly surfaced citations |
//! | `data: {"error":"…"}` | abnormal end; nothing follows |
//! | `data: [DONE]` | normal end, also sent for zero-output turns |
//!
//! Every line is followed by a blank line. A turn ends with exactly one of
//! the two terminal lines. Citations are only ever appended: a frame carries
//! the citations first seen in its chunk, and the client adds them to what
//! it already holds.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use stratagem_core::{
    with_backoff, Citation, Content, GenerateRequest, LanguageModel, ModelClass, RetryConfig, Role,
};
use tracing::{debug, warn};

use crate::error::AgentError;

/// Terminal sentinel payload.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Persona the chat assistant adopts for a turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    #[default]
    Strategist,
    Copywriter,
    Analyst,
}

impl ChatMode {
    pub const fn system_instruction(self) -> &'static str {
        match self {
            Self::Strategist => {
                "You are a marketing strategist. Give prioritised, actionable advice grounded \
                 in current market data and cite your sources."
            }
            Self::Copywriter => {
                "You are a direct-response copywriter. Write punchy, specific copy and offer \
                 variations when asked."
            }
            Self::Analyst => {
                "You are a market analyst. Answer with figures, trends and competitor facts, \
                 citing every source you rely on."
            }
        }
    }
}

/// Caller-supplied context for a chat turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatContext {
    #[serde(default)]
    pub mode: ChatMode,
    /// Free-text project brief appended to the system instruction.
    #[serde(default)]
    pub brief: Option<String>,
}

impl ChatContext {
    pub fn system_instruction(&self) -> String {
        match self.brief.as_deref().map(str::trim) {
            Some(brief) if !brief.is_empty() => {
                format!("{}\n\nProject brief:\n{brief}", self.mode.system_instruction())
            }
            _ => self.mode.system_instruction().to_string(),
        }
    }
}

/// Validated turn history: non-empty and ending with a user utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurnState {
    history: Vec<Content>,
}

impl ChatTurnState {
    pub fn new(history: Vec<Content>) -> Result<Self, AgentError> {
        let last = history
            .last()
            .ok_or_else(|| AgentError::InvalidRequest(String::from("history must not be empty")))?;
        if last.role != Role::User {
            return Err(AgentError::InvalidRequest(String::from(
                "the last history entry must come from the user",
            )));
        }
        if last.text.trim().is_empty() {
            return Err(AgentError::InvalidRequest(String::from(
                "the user message must not be blank",
            )));
        }
        Ok(Self { history })
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }
}

/// One incremental piece of a streamed turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFrame {
    pub text_delta: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

/// Server-side stream item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Frame(StreamFrame),
    /// Abnormal end carrying a user-facing message.
    Error(String),
    Done,
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Frame(_))
    }

    /// Payload carried in the event's `data` field.
    pub fn data(&self) -> String {
        match self {
            Self::Frame(frame) => serde_json::to_string(frame)
                .unwrap_or_else(|_| json!({"textDelta": frame.text_delta}).to_string()),
            Self::Error(message) => json!({ "error": message }).to_string(),
            Self::Done => DONE_SENTINEL.to_string(),
        }
    }
}

/// Tracks which citations a turn has already surfaced.
#[derive(Debug, Default)]
pub struct CitationLedger {
    seen: HashSet<String>,
}

impl CitationLedger {
    /// Keep only citations whose URI has not been surfaced yet.
    pub fn admit(&mut self, citations: Vec<Citation>) -> Vec<Citation> {
        citations
            .into_iter()
            .filter(|citation| self.seen.insert(citation.uri.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Ordered, single-pass frame sequence for one turn.
pub type FrameStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Opens provider streams for chat turns.
#[derive(Clone)]
pub struct ChatSession {
    model: Arc<dyn LanguageModel>,
    retry: RetryConfig,
}

impl ChatSession {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Stream one turn.
    ///
    /// Opening the upstream call is retried; once it is open, any failure
    /// ends the turn with an error frame. Dropping the returned stream
    /// drops the upstream handle.
    pub fn open_stream(&self, turn: ChatTurnState, context: &ChatContext) -> FrameStream {
        let request = GenerateRequest {
            model_class: ModelClass::Grounded,
            system_instruction: Some(context.system_instruction()),
            contents: turn.history,
            response_schema: None,
            grounding: true,
        };
        let model = Arc::clone(&self.model);
        let retry = self.retry.clone();

        Box::pin(async_stream::stream! {
            let opened = with_backoff(&retry, || model.stream(request.clone())).await;
            let mut upstream = match opened {
                Ok(upstream) => upstream,
                Err(error) => {
                    let error = AgentError::from_provider(error);
                    warn!(code = error.code(), %error, "chat stream failed to open");
                    yield StreamEvent::Error(error.public_message());
                    return;
                }
            };

            let mut ledger = CitationLedger::default();
            let mut frames = 0usize;
            while let Some(item) = upstream.next().await {
                match item {
                    Ok(chunk) => {
                        let citations = ledger.admit(chunk.citations);
                        if chunk.text.is_empty() && citations.is_empty() {
                            continue;
                        }
                        frames += 1;
                        yield StreamEvent::Frame(StreamFrame {
                            text_delta: chunk.text,
                            citations,
                        });
                    }
                    Err(error) => {
                        let error = AgentError::from_provider(error);
                        warn!(frames, code = error.code(), %error, "chat stream interrupted");
                        yield StreamEvent::Error(error.public_message());
                        return;
                    }
                }
            }

            debug!(frames, citations = ledger.len(), "chat stream completed");
            yield StreamEvent::Done;
        })
    }
}

#[cfg(test)]
mod tests {
    use stratagem_core::{ProviderError, ScriptedLanguageModel, ScriptedReply, StreamChunk};

    use super::*;

    fn citation(uri: &str) -> Citation {
        Citation {
            uri: uri.to_string(),
            title: uri.to_string(),
        }
    }

    fn chunk(text: &str, citations: &[&str]) -> Result<StreamChunk, ProviderError> {
        Ok(StreamChunk {
            text: text.to_string(),
            citations: citations.iter().map(|uri| citation(uri)).collect(),
        })
    }

    fn session(replies: Vec<ScriptedReply>) -> (ChatSession, Arc<ScriptedLanguageModel>) {
        let model = Arc::new(ScriptedLanguageModel::with_replies(replies));
        let session = ChatSession::new(model.clone())
            .with_retry(RetryConfig::fixed(std::time::Duration::from_millis(1), 3));
        (session, model)
    }

    fn turn(text: &str) -> ChatTurnState {
        ChatTurnState::new(vec![Content::user(text)]).expect("valid turn")
    }

    async fn collect(stream: FrameStream) -> Vec<StreamEvent> {
        stream.collect().await
    }

    #[test]
    fn turn_validation_rejects_bad_histories() {
        assert!(ChatTurnState::new(Vec::new()).is_err());
        assert!(ChatTurnState::new(vec![Content::user("hi"), Content::model("hello")]).is_err());
        assert!(ChatTurnState::new(vec![Content::user("   ")]).is_err());
        assert!(ChatTurnState::new(vec![Content::model("hi"), Content::user("next")]).is_ok());
    }

    #[test]
    fn context_deserializes_with_defaults() {
        let context: ChatContext = serde_json::from_str("{}").expect("empty context");
        assert_eq!(context.mode, ChatMode::Strategist);

        let context: ChatContext =
            serde_json::from_str(r#"{"mode":"analyst","brief":"Bakery in Lagos"}"#).expect("json");
        assert!(context.system_instruction().ends_with("Bakery in Lagos"));
    }

    #[test]
    fn event_payloads_are_json_or_the_done_sentinel() {
        let frame = StreamEvent::Frame(StreamFrame {
            text_delta: String::from("Hi"),
            citations: Vec::new(),
        });

        assert_eq!(frame.data(), r#"{"textDelta":"Hi","citations":[]}"#);
        assert_eq!(StreamEvent::Done.data(), "[DONE]");
        assert_eq!(
            StreamEvent::Error(String::from("boom")).data(),
            r#"{"error":"boom"}"#
        );
    }

    #[tokio::test]
    async fn frames_follow_provider_order_and_end_with_done() {
        let (session, model) = session(vec![ScriptedReply::Stream(vec![
            chunk("Hello ", &[]),
            chunk("world", &["https://a.test"]),
        ])]);

        let events = collect(session.open_stream(turn("hi"), &ChatContext::default())).await;

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], StreamEvent::Frame(frame) if frame.text_delta == "Hello "));
        assert!(matches!(&events[1], StreamEvent::Frame(frame) if frame.citations.len() == 1));
        assert_eq!(events[2], StreamEvent::Done);

        let request = &model.requests()[0];
        assert_eq!(request.model_class, ModelClass::Grounded);
        assert!(request.grounding);
        assert_eq!(request.contents.last().map(|c| c.text.as_str()), Some("hi"));
    }

    #[tokio::test]
    async fn repeated_citations_are_not_resent() {
        let (session, _) = session(vec![ScriptedReply::Stream(vec![
            chunk("a", &["https://a.test"]),
            chunk("b", &["https://a.test", "https://b.test"]),
            chunk("", &["https://b.test"]),
        ])]);

        let events = collect(session.open_stream(turn("hi"), &ChatContext::default())).await;
        let uris: Vec<Vec<String>> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Frame(frame) => {
                    Some(frame.citations.iter().map(|c| c.uri.clone()).collect())
                }
                _ => None,
            })
            .collect();

        assert_eq!(
            uris,
            vec![vec![String::from("https://a.test")], vec![String::from("https://b.test")]]
        );
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn zero_output_turn_still_sends_done() {
        let (session, _) = session(vec![ScriptedReply::Stream(Vec::new())]);
        let events = collect(session.open_stream(turn("hi"), &ChatContext::default())).await;
        assert_eq!(events, vec![StreamEvent::Done]);
    }

    #[tokio::test]
    async fn midstream_failure_ends_with_error_and_no_done() {
        let (session, model) = session(vec![ScriptedReply::Stream(vec![
            chunk("partial", &[]),
            Err(ProviderError::unavailable("connection reset")),
            chunk("never sent", &[]),
        ])]);

        let events = collect(session.open_stream(turn("hi"), &ChatContext::default())).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], StreamEvent::Error(_)));
        assert_eq!(model.requests().len(), 1);
    }

    #[tokio::test]
    async fn opening_is_retried_before_the_first_frame() {
        let (session, model) = session(vec![
            ScriptedReply::Fail(ProviderError::rate_limited("429")),
            ScriptedReply::chunks(["ok"]),
        ]);

        let events = collect(session.open_stream(turn("hi"), &ChatContext::default())).await;

        assert_eq!(model.requests().len(), 2);
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn open_failure_yields_only_an_error_frame() {
        let (session, _) = session(vec![ScriptedReply::Fail(ProviderError::unauthorized("key"))]);
        let events = collect(session.open_stream(turn("hi"), &ChatContext::default())).await;

        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
        assert_ne!(events[0], StreamEvent::Done);
    }
}
