//! # Stratagem Core
//!
//! Shared contracts for the stratagem agent gateway.
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`decoder`] | Resilient decoding of model output into typed values |
//! | [`error`] | Provider error classification (fatal vs. transient) |
//! | [`http_client`] | HTTP transport abstraction (buffered and streaming) |
//! | [`provider`] | Language-model provider trait and adapters |
//! | [`retry`] | Exponential backoff with jitter and the `with_backoff` runner |
//! | [`schema`] | Output schema descriptors and structural validation |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐
//! │  Agent / Chat   │────▶│  with_backoff    │
//! └────────┬────────┘     └────────┬─────────┘
//!          │                       │
//!          │                       ▼
//!          │              ┌──────────────────┐     ┌──────────────┐
//!          │              │  LanguageModel   │────▶│  HttpClient  │
//!          │              └──────────────────┘     └──────────────┘
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Resilient       │────▶│ SchemaDescriptor │
//! │ Decoder         │     │ validation       │
//! └─────────────────┘     └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use stratagem_core::{ProviderError, Retryable};
//!
//! let error = ProviderError::from_status(429, "quota exceeded");
//! assert!(!error.is_fatal());
//! assert_eq!(error.code(), "provider.rate_limited");
//! ```

pub mod decoder;
pub mod error;
pub mod http_client;
pub mod provider;
pub mod retry;
pub mod schema;

pub use decoder::{decode, decode_value, DecodeError};
pub use error::{ProviderError, ProviderErrorKind};
pub use http_client::{
    ByteStream, HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, HttpStreamResponse,
    ReqwestHttpClient,
};
pub use provider::{
    Citation, Content, GenerateRequest, Generation, HttpLanguageModel, LanguageModel, ModelClass,
    ModelNames, ProviderStream, Role, ScriptedLanguageModel, ScriptedReply, SseLineDecoder,
    StreamChunk,
};
pub use retry::{with_backoff, Backoff, RetryConfig, Retryable};
pub use schema::{SchemaDescriptor, SchemaField, SchemaViolation};
