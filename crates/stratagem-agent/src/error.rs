use stratagem_core::{DecodeError, ProviderError, Retryable, SchemaViolation};
use thiserror::Error;

/// Coarse failure class used by callers to choose a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentErrorKind {
    /// The caller asked for something invalid; do not retry.
    Caller,
    /// Upstream failed after retries; retrying later may help.
    ProviderUnavailable,
    /// Upstream refused the request outright.
    ProviderRejected,
    /// The model answered, but not in the promised shape; regenerate.
    MalformedOutput,
}

/// Failure of an agent execution or chat turn.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("language model unavailable: {0}")]
    ProviderUnavailable(ProviderError),

    #[error("language model rejected the request: {0}")]
    ProviderRejected(ProviderError),

    #[error(transparent)]
    MalformedOutput(#[from] DecodeError),

    #[error("model output does not match the expected shape at {0}")]
    SchemaMismatch(#[from] SchemaViolation),
}

impl AgentError {
    /// Split provider failures by whether retrying was ever an option.
    pub fn from_provider(error: ProviderError) -> Self {
        if error.is_fatal() {
            Self::ProviderRejected(error)
        } else {
            Self::ProviderUnavailable(error)
        }
    }

    pub fn kind(&self) -> AgentErrorKind {
        match self {
            Self::UnknownAgent(_) | Self::InvalidRequest(_) => AgentErrorKind::Caller,
            Self::ProviderUnavailable(_) => AgentErrorKind::ProviderUnavailable,
            Self::ProviderRejected(_) => AgentErrorKind::ProviderRejected,
            Self::MalformedOutput(_) | Self::SchemaMismatch(_) => AgentErrorKind::MalformedOutput,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownAgent(_) => "agent.unknown_agent",
            Self::InvalidRequest(_) => "agent.invalid_request",
            Self::ProviderUnavailable(_) => "agent.provider_unavailable",
            Self::ProviderRejected(_) => "agent.provider_rejected",
            Self::MalformedOutput(_) | Self::SchemaMismatch(_) => "agent.malformed_output",
        }
    }

    /// Message safe to show an end user.
    pub fn public_message(&self) -> String {
        match self {
            Self::UnknownAgent(_) | Self::InvalidRequest(_) => self.to_string(),
            Self::ProviderUnavailable(_) => {
                String::from("The language model is temporarily unavailable. Please try again.")
            }
            Self::ProviderRejected(_) => String::from("The language model rejected this request."),
            Self::MalformedOutput(_) | Self::SchemaMismatch(_) => {
                String::from("Generation failed: the model returned an unreadable answer. Please regenerate.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_split_on_retryability() {
        let transient = AgentError::from_provider(ProviderError::rate_limited("slow down"));
        let fatal = AgentError::from_provider(ProviderError::unauthorized("bad key"));

        assert_eq!(transient.kind(), AgentErrorKind::ProviderUnavailable);
        assert_eq!(fatal.kind(), AgentErrorKind::ProviderRejected);
    }

    #[test]
    fn decode_and_schema_failures_share_a_code() {
        let decode = stratagem_core::decode_value("no structure here").expect_err("garbage");
        let decode: AgentError = decode.into();
        let schema: AgentError = SchemaViolation {
            path: String::from("$.name"),
            message: String::from("missing required field"),
        }
        .into();

        assert_eq!(decode.code(), "agent.malformed_output");
        assert_eq!(schema.code(), decode.code());
        assert_eq!(schema.kind(), AgentErrorKind::MalformedOutput);
    }

    #[test]
    fn public_message_hides_provider_detail() {
        let error =
            AgentError::from_provider(ProviderError::unavailable("upstream 503: secret internals"));
        assert!(!error.public_message().contains("secret"));
    }
}
