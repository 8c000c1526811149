use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use stratagem_agent::{AgentError, AgentErrorKind};
use stratagem_billing::SettlementError;
use stratagem_ledger::LedgerError;
use thiserror::Error;
use tracing::error;

/// Startup failures of the gateway binary.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Ledger(_) => 3,
            Self::Io(_) => 1,
        }
    }
}

/// Request failure rendered as `{"error": ..., "code": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "request.invalid", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "request.unauthorized", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
    }

    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "error": self.message,
                "code": self.code,
            })),
        )
            .into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<AgentError> for ApiError {
    fn from(error: AgentError) -> Self {
        let status = match error.kind() {
            AgentErrorKind::Caller => StatusCode::BAD_REQUEST,
            AgentErrorKind::ProviderUnavailable
            | AgentErrorKind::ProviderRejected
            | AgentErrorKind::MalformedOutput => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, error.code(), error.public_message())
    }
}

impl From<SettlementError> for ApiError {
    fn from(error: SettlementError) -> Self {
        match &error {
            SettlementError::Signature(_) => {
                Self::new(StatusCode::UNAUTHORIZED, "webhook.signature_invalid", error.to_string())
            }
            SettlementError::UnreadableBody(_) => {
                Self::new(StatusCode::BAD_REQUEST, "webhook.unreadable_body", error.to_string())
            }
            SettlementError::Ledger(_) => {
                error!(%error, "settlement could not be persisted");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "webhook.ledger_failure",
                    "settlement could not be recorded",
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use stratagem_core::ProviderError;

    use super::*;

    #[test]
    fn agent_errors_map_to_distinct_statuses() {
        let unknown: ApiError = AgentError::UnknownAgent(String::from("x")).into();
        let unavailable: ApiError =
            AgentError::from_provider(ProviderError::timeout("slow")).into();

        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
        assert_eq!(unavailable.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(unavailable.code, "agent.provider_unavailable");
    }

    #[test]
    fn ledger_failures_hide_internals() {
        let error: ApiError = SettlementError::Ledger(LedgerError::InvalidData(String::from(
            "row 7 is corrupt",
        )))
        .into();

        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!error.message.contains("row 7"));
    }
}
