//! Language-model provider boundary.
//!
//! Agents and chat sessions talk to the provider only through
//! [`LanguageModel`]. Two implementations ship with the crate:
//!
//! | Type | Use |
//! |------|-----|
//! | [`HttpLanguageModel`] | generative-language REST API over an [`HttpClient`](crate::HttpClient) |
//! | [`ScriptedLanguageModel`] | deterministic replies for tests and `--mock-provider` |

mod http;
mod scripted;
mod sse;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProviderError;

pub use http::{HttpLanguageModel, ModelNames};
pub use scripted::{ScriptedLanguageModel, ScriptedReply};
pub use sse::SseLineDecoder;

/// Capability class an agent asks for; mapped to a concrete model name by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelClass {
    /// Low-latency model for short structured outputs.
    Fast,
    /// Slower model for long-form reasoning.
    Deep,
    /// Model with the provider's search tool enabled.
    Grounded,
}

impl ModelClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Deep => "deep",
            Self::Grounded => "grounded",
        }
    }
}

impl Display for ModelClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speaker of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One conversation entry sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub role: Role,
    pub text: String,
}

impl Content {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Source reference attached to grounded output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub uri: String,
    pub title: String,
}

/// Provider call description.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub model_class: ModelClass,
    pub system_instruction: Option<String>,
    pub contents: Vec<Content>,
    /// Provider-facing response schema; requests JSON output when present.
    pub response_schema: Option<Value>,
    pub grounding: bool,
}

impl GenerateRequest {
    /// Single user prompt; grounding follows the model class.
    pub fn prompt(model_class: ModelClass, prompt: impl Into<String>) -> Self {
        Self {
            model_class,
            system_instruction: None,
            contents: vec![Content::user(prompt)],
            response_schema: None,
            grounding: model_class == ModelClass::Grounded,
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_response_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }
}

/// Completed provider output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// One incremental piece of a streamed generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamChunk {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// Ordered, single-pass provider stream. Dropping it releases the upstream handle.
pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Language-model provider contract.
///
/// Implementations must be `Send + Sync`; one instance serves every request.
pub trait LanguageModel: Send + Sync {
    /// Run a single-shot generation.
    fn generate<'a>(&'a self, request: GenerateRequest) -> ProviderFuture<'a, Generation>;

    /// Open a streaming generation. Errors before the first chunk are returned here;
    /// later failures arrive as stream items.
    fn stream<'a>(&'a self, request: GenerateRequest) -> ProviderFuture<'a, ProviderStream>;
}
