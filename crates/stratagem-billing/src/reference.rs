use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Purchase reference of the form `PREFIX_<userId>_<purchaseType>_<timestamp>`.
///
/// The user id may itself contain underscores: the prefix is the first
/// segment, the timestamp the last and the purchase type the one before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseReference {
    pub prefix: String,
    pub user_id: String,
    pub purchase_type: String,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("reference has {0} segments, expected at least 4")]
    TooFewSegments(usize),

    #[error("reference prefix '{found}' does not match '{expected}'")]
    PrefixMismatch { expected: String, found: String },

    #[error("reference has an empty segment")]
    EmptySegment,

    #[error("reference timestamp '{0}' is not numeric")]
    InvalidTimestamp(String),
}

impl PurchaseReference {
    /// Decompose `raw`, requiring the first segment to equal `expected_prefix`.
    pub fn parse(raw: &str, expected_prefix: &str) -> Result<Self, ReferenceError> {
        let segments: Vec<&str> = raw.trim().split('_').collect();
        if segments.len() < 4 {
            return Err(ReferenceError::TooFewSegments(segments.len()));
        }
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(ReferenceError::EmptySegment);
        }

        let prefix = segments[0];
        if prefix != expected_prefix {
            return Err(ReferenceError::PrefixMismatch {
                expected: expected_prefix.to_string(),
                found: prefix.to_string(),
            });
        }

        let last = segments.len() - 1;
        let timestamp = segments[last];
        let timestamp_ms = timestamp
            .parse::<i64>()
            .ok()
            .filter(|_| timestamp.bytes().all(|byte| byte.is_ascii_digit()))
            .ok_or_else(|| ReferenceError::InvalidTimestamp(timestamp.to_string()))?;

        Ok(Self {
            prefix: prefix.to_string(),
            user_id: segments[1..last - 1].join("_"),
            purchase_type: segments[last - 1].to_string(),
            timestamp_ms,
        })
    }
}

impl Display for PurchaseReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.prefix, self.user_id, self.purchase_type, self.timestamp_ms
        )
    }
}
