//! # Resilient Decoder
//!
//! Turns raw model completions into typed values. Providers are asked for
//! JSON but regularly wrap it in markdown fences or surrounding prose, so
//! decoding runs a fixed repair sequence:
//!
//! 1. trim whitespace
//! 2. keep only the interior of the first triple-backtick fence, if any
//! 3. parse directly
//! 4. slice from the first `{`/`[` to the last `}`/`]` and parse once more
//! 5. fail with [`DecodeError`]
//!
//! A failure is an expected outcome; callers surface it as "regenerate".

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

const FENCE: &str = "```";

/// Terminal decode failure: no repair step produced parseable output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("model output is not valid structured data: {reason}")]
pub struct DecodeError {
    reason: String,
    excerpt: String,
}

impl DecodeError {
    fn new(reason: impl Into<String>, text: &str) -> Self {
        Self {
            reason: reason.into(),
            excerpt: text.chars().take(120).collect(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Leading characters of the text that failed to decode.
    pub fn excerpt(&self) -> &str {
        &self.excerpt
    }
}

/// Decode `raw` into `T`, applying the fence and slice repairs.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, DecodeError> {
    let candidate = strip_fence(raw.trim());

    let direct_error = match serde_json::from_str::<T>(candidate) {
        Ok(value) => return Ok(value),
        Err(error) => error,
    };

    let Some(sliced) = outermost_structure(candidate) else {
        return Err(DecodeError::new(direct_error.to_string(), candidate));
    };

    serde_json::from_str::<T>(sliced).map_err(|error| DecodeError::new(error.to_string(), candidate))
}

/// Decode into an untyped JSON value.
pub fn decode_value(raw: &str) -> Result<Value, DecodeError> {
    decode::<Value>(raw)
}

/// Return the interior of the first fenced block, or `text` when unfenced.
///
/// The opening fence may carry a language tag (```` ```json ````). An
/// unterminated fence keeps everything after the opening line.
pub fn strip_fence(text: &str) -> &str {
    let Some(open) = text.find(FENCE) else {
        return text;
    };

    let after_marker = &text[open + FENCE.len()..];
    let body = match after_marker.find('\n') {
        Some(newline) if is_fence_tag(&after_marker[..newline]) => &after_marker[newline + 1..],
        _ => after_marker,
    };

    match body.find(FENCE) {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

fn is_fence_tag(line: &str) -> bool {
    line.trim()
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}

fn outermost_structure(text: &str) -> Option<&str> {
    let start = text.find(&['{', '['][..])?;
    let end = text.rfind(&['}', ']'][..])?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}
