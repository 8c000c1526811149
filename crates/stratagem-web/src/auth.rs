use std::collections::HashMap;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use stratagem_agent::CallerIdentity;

use crate::error::ApiError;

/// Resolves a bearer token to the caller it belongs to.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<CallerIdentity>;
}

/// Fixed token table loaded from configuration.
#[derive(Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, String>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, token: &str) -> Option<CallerIdentity> {
        self.tokens.get(token).map(CallerIdentity::new)
    }
}

/// Extract and check the `Authorization: Bearer <token>` header.
pub fn authenticate(
    authenticator: &dyn Authenticator,
    headers: &HeaderMap,
) -> Result<CallerIdentity, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("authorization must be a bearer token"))?;

    authenticator
        .authenticate(token)
        .ok_or_else(|| ApiError::unauthorized("invalid bearer token"))
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderValue, StatusCode};

    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).expect("header"));
        headers
    }

    #[test]
    fn known_token_resolves_to_its_user() {
        let auth = StaticTokenAuthenticator::default().with_token("tok", "u42");
        let caller = authenticate(&auth, &headers("Bearer tok")).expect("caller");
        assert_eq!(caller.user_id, "u42");
    }

    #[test]
    fn missing_or_unknown_tokens_are_unauthorized() {
        let auth = StaticTokenAuthenticator::default().with_token("tok", "u42");

        for headers in [HeaderMap::new(), headers("Basic dG9r"), headers("Bearer nope")] {
            let error = authenticate(&auth, &headers).expect_err("rejected");
            assert_eq!(error.status(), StatusCode::UNAUTHORIZED);
        }
    }
}
