//! Authoritative server-side price table.
//!
//! Amounts are minor currency units (kobo for NGN). The table can be loaded
//! from YAML:
//!
//! ```yaml
//! - purchase_type: pro
//!   amount: 149175
//!   currency: NGN
//!   kind: { type: plan, tier: pro, period_days: 30 }
//! - purchase_type: credits50
//!   amount: 49875
//!   currency: NGN
//!   kind: { type: credits, count: 50 }
//!   anonymous: true
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use stratagem_ledger::{Grant, SubscriptionTier};
use thiserror::Error;

const PLAN_PERIOD_DAYS: u32 = 30;

/// What a purchase type buys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PurchaseKind {
    /// Recurring plan: sets tier and status for `period_days`.
    Plan {
        tier: SubscriptionTier,
        period_days: u32,
    },
    /// One-time credit pack.
    Credits { count: u32 },
}

impl PurchaseKind {
    pub fn grant(self) -> Grant {
        match self {
            Self::Plan { tier, period_days } => Grant::Plan { tier, period_days },
            Self::Credits { count } => Grant::Credits { count },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub purchase_type: String,
    pub amount: u64,
    pub currency: String,
    pub kind: PurchaseKind,
    /// May be bought without an existing account.
    #[serde(default)]
    pub anonymous: bool,
}

#[derive(Debug, Error)]
pub enum PriceTableError {
    #[error("invalid price table: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("duplicate purchase type '{0}'")]
    Duplicate(String),

    #[error("purchase type '{0}' must have a positive amount")]
    ZeroAmount(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTable {
    entries: HashMap<String, PriceEntry>,
}

impl PriceTable {
    pub fn new(entries: impl IntoIterator<Item = PriceEntry>) -> Result<Self, PriceTableError> {
        let mut table = HashMap::new();
        for entry in entries {
            if entry.amount == 0 {
                return Err(PriceTableError::ZeroAmount(entry.purchase_type));
            }
            if table.contains_key(&entry.purchase_type) {
                return Err(PriceTableError::Duplicate(entry.purchase_type));
            }
            table.insert(entry.purchase_type.clone(), entry);
        }
        Ok(Self { entries: table })
    }

    pub fn from_yaml(source: &str) -> Result<Self, PriceTableError> {
        let entries: Vec<PriceEntry> = serde_yaml::from_str(source)?;
        Self::new(entries)
    }

    pub fn get(&self, purchase_type: &str) -> Option<&PriceEntry> {
        self.entries.get(purchase_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        let plan = |purchase_type: &str, amount: u64, tier: SubscriptionTier| PriceEntry {
            purchase_type: purchase_type.to_string(),
            amount,
            currency: String::from("NGN"),
            kind: PurchaseKind::Plan {
                tier,
                period_days: PLAN_PERIOD_DAYS,
            },
            anonymous: false,
        };

        let entries = [
            plan("starter", 99_750, SubscriptionTier::Starter),
            plan("pro", 149_175, SubscriptionTier::Pro),
            plan("agency", 298_350, SubscriptionTier::Agency),
            PriceEntry {
                purchase_type: String::from("credits50"),
                amount: 49_875,
                currency: String::from("NGN"),
                kind: PurchaseKind::Credits { count: 50 },
                anonymous: true,
            },
        ];

        Self {
            entries: entries
                .into_iter()
                .map(|entry| (entry.purchase_type.clone(), entry))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_prices_every_tier() {
        let table = PriceTable::default();

        assert_eq!(table.len(), 4);
        assert_eq!(table.get("agency").map(|entry| entry.amount), Some(298_350));
        assert!(table.get("credits50").is_some_and(|entry| entry.anonymous));
        assert!(table.get("enterprise").is_none());
    }

    #[test]
    fn loads_from_yaml() {
        let table = PriceTable::from_yaml(
            r#"
- purchase_type: pro
  amount: 2500
  currency: USD
  kind: { type: plan, tier: pro, period_days: 30 }
- purchase_type: credits10
  amount: 500
  currency: USD
  kind: { type: credits, count: 10 }
  anonymous: true
"#,
        )
        .expect("yaml table");

        assert_eq!(
            table.get("pro").map(|entry| entry.kind),
            Some(PurchaseKind::Plan {
                tier: SubscriptionTier::Pro,
                period_days: 30
            })
        );
        assert_eq!(
            table.get("credits10").map(|entry| entry.kind.grant()),
            Some(Grant::Credits { count: 10 })
        );
    }

    #[test]
    fn rejects_duplicates_and_free_items() {
        let entry = PriceTable::default().get("pro").cloned().expect("pro");
        assert!(matches!(
            PriceTable::new([entry.clone(), entry.clone()]),
            Err(PriceTableError::Duplicate(_))
        ));
        assert!(matches!(
            PriceTable::new([PriceEntry { amount: 0, ..entry }]),
            Err(PriceTableError::ZeroAmount(_))
        ));
    }
}
