use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::LedgerError;

/// Subscription tier of an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    #[default]
    Free,
    Starter,
    Pro,
    Agency,
}

impl SubscriptionTier {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Agency => "agency",
        }
    }
}

impl Display for SubscriptionTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionTier {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "free" => Ok(Self::Free),
            "starter" => Ok(Self::Starter),
            "pro" => Ok(Self::Pro),
            "agency" => Ok(Self::Agency),
            other => Err(LedgerError::InvalidData(format!(
                "unknown subscription tier '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Expired,
}

impl SubscriptionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = LedgerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            other => Err(LedgerError::InvalidData(format!(
                "unknown subscription status '{other}'"
            ))),
        }
    }
}

/// Subscription as observed at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSubscriptionState {
    pub tier: SubscriptionTier,
    pub status: SubscriptionStatus,
    /// Paid period end in Unix milliseconds; `None` for the free tier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period_end_ms: Option<i64>,
}

/// What a settled purchase grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grant {
    Plan {
        tier: SubscriptionTier,
        period_days: u32,
    },
    Credits {
        count: u32,
    },
}

/// A verified purchase ready to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementRecord {
    pub reference: String,
    pub user_id: String,
    pub purchase_type: String,
    pub grant: Grant,
    pub settled_at_ms: i64,
}

/// Result of [`AccountLedger::apply_settlement`](crate::AccountLedger::apply_settlement).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    Applied,
    /// The reference was settled before; nothing changed.
    Duplicate,
}

/// One row of the settlement audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub reference: Option<String>,
    pub user_id: Option<String>,
    pub purchase_type: Option<String>,
    pub outcome: String,
    pub reason: Option<String>,
    pub logged_at_ms: i64,
}
