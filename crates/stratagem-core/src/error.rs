//! Provider-level error classification.

use std::fmt::{Display, Formatter};

use crate::retry::Retryable;

/// Classification of a failed language-model provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The provider rejected the request arguments (`INVALID_ARGUMENT`, HTTP 400).
    InvalidArgument,
    /// Credentials were missing or refused (HTTP 401/403).
    Unauthorized,
    /// Any other client-side request error (remaining 4xx).
    InvalidRequest,
    /// Request or upstream timeout.
    Timeout,
    /// Provider quota exhausted (HTTP 429).
    RateLimited,
    /// Connection failure or 5xx.
    Unavailable,
    /// The provider answered but the envelope could not be read.
    InvalidResponse,
}

/// Structured provider error carrying a fatal/transient classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    kind: ProviderErrorKind,
    message: String,
    retryable: bool,
}

impl ProviderError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::fatal(ProviderErrorKind::InvalidArgument, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::fatal(ProviderErrorKind::Unauthorized, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::fatal(ProviderErrorKind::InvalidRequest, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::transient(ProviderErrorKind::Timeout, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::transient(ProviderErrorKind::RateLimited, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::transient(ProviderErrorKind::Unavailable, message)
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::transient(ProviderErrorKind::InvalidResponse, message)
    }

    /// Classify a non-success HTTP status returned by the provider.
    ///
    /// An `INVALID_ARGUMENT` marker in the body is fatal regardless of status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("provider returned status {status}: {}", truncate(body, 240));
        if body.contains("INVALID_ARGUMENT") {
            return Self::invalid_argument(message);
        }

        match status {
            400 => Self::invalid_argument(message),
            401 | 403 => Self::unauthorized(message),
            408 => Self::timeout(message),
            429 => Self::rate_limited(message),
            400..=499 => Self::invalid_request(message),
            _ => Self::unavailable(message),
        }
    }

    fn fatal(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: false,
        }
    }

    fn transient(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: true,
        }
    }

    pub const fn kind(&self) -> ProviderErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            ProviderErrorKind::InvalidArgument => "provider.invalid_argument",
            ProviderErrorKind::Unauthorized => "provider.unauthorized",
            ProviderErrorKind::InvalidRequest => "provider.invalid_request",
            ProviderErrorKind::Timeout => "provider.timeout",
            ProviderErrorKind::RateLimited => "provider.rate_limited",
            ProviderErrorKind::Unavailable => "provider.unavailable",
            ProviderErrorKind::InvalidResponse => "provider.invalid_response",
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for ProviderError {}

impl Retryable for ProviderError {
    fn is_fatal(&self) -> bool {
        !self.retryable
    }
}

fn truncate(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((index, _)) => &value[..index],
        None => value,
    }
}
