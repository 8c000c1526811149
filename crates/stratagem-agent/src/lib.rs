//! # Stratagem Agent
//!
//! Agent dispatch and streaming chat on top of [`stratagem_core`].
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`catalog`] | Built-in agents and their stage pipelines |
//! | [`error`] | Agent failure taxonomy |
//! | [`pipeline`] | Stage lists: prompt rendering, retry, decode, validation |
//! | [`reassembly`] | Client-side reducer for streamed turns |
//! | [`registry`] | `AgentRegistry::execute` dispatch point |
//! | [`stream`] | Chat turn validation, frames and SSE encoding |
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stratagem_agent::{AgentRegistry, CallerIdentity, Payload};
//! use stratagem_core::ScriptedLanguageModel;
//!
//! let registry = AgentRegistry::new(Arc::new(ScriptedLanguageModel::new()));
//! let persona = registry
//!     .execute("persona", &Payload::new(), &CallerIdentity::new("u42"))
//!     .await?;
//! ```

pub mod catalog;
pub mod error;
pub mod pipeline;
pub mod reassembly;
pub mod registry;
pub mod stream;

pub use catalog::AgentKind;
pub use error::{AgentError, AgentErrorKind};
pub use pipeline::{Payload, Pipeline, Stage, StagePrompt, NOT_PROVIDED};
pub use reassembly::{reassemble, ReassemblyError, Transcript, TurnEnding, TurnReassembler};
pub use registry::{AgentDescriptor, AgentRegistry, CallerIdentity};
pub use stream::{
    ChatContext, ChatMode, ChatSession, ChatTurnState, CitationLedger, FrameStream, StreamEvent,
    StreamFrame, DONE_SENTINEL,
};
