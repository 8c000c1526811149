//! Webhook settlement.
//!
//! ```text
//! raw body + signature
//!        │
//!        ▼
//! ┌──────────────┐ mismatch  ┌───────────────────┐
//! │ HMAC verify  │──────────▶│ Err(Signature)    │  (no audit row)
//! └──────┬───────┘           └───────────────────┘
//!        ▼
//! ┌──────────────┐ other kind / bad reference
//! │ event filter │──────────▶ Ignored
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐ currency / amount / account
//! │ price check  │──────────▶ Rejected (acknowledged, never applied)
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │ ledger apply │──────────▶ Settled | Duplicate
//! └──────────────┘
//! ```

use std::fmt::{Display, Formatter};

use stratagem_ledger::{
    now_ms, AccountLedger, ApplyResult, AuditEntry, LedgerError, SettlementRecord,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::event::WebhookEvent;
use crate::pricing::PriceTable;
use crate::reference::PurchaseReference;
use crate::signature::{SignatureError, SignatureVerifier};

/// Account persistence used by settlement.
pub trait SettlementStore: Send + Sync {
    fn account_exists(&self, user_id: &str) -> Result<bool, LedgerError>;

    fn apply_settlement(&self, record: &SettlementRecord) -> Result<ApplyResult, LedgerError>;

    fn record_audit(&self, entry: &AuditEntry) -> Result<(), LedgerError>;
}

impl SettlementStore for AccountLedger {
    fn account_exists(&self, user_id: &str) -> Result<bool, LedgerError> {
        AccountLedger::account_exists(self, user_id)
    }

    fn apply_settlement(&self, record: &SettlementRecord) -> Result<ApplyResult, LedgerError> {
        AccountLedger::apply_settlement(self, record)
    }

    fn record_audit(&self, entry: &AuditEntry) -> Result<(), LedgerError> {
        AccountLedger::record_audit(self, entry)
    }
}

/// Business outcome of an authenticated webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Purchase applied to the account.
    Settled,
    /// Reference already applied by an earlier delivery.
    Duplicate,
    /// Not a settlement this endpoint handles.
    Ignored { reason: String },
    /// Suspected fraud or misconfiguration; acknowledged but not applied.
    Rejected { reason: String },
}

impl SettlementOutcome {
    /// Short status returned to the payment provider.
    pub const fn status(&self) -> &'static str {
        match self {
            Self::Settled => "settled",
            Self::Duplicate => "duplicate",
            Self::Ignored { .. } => "ignored",
            Self::Rejected { .. } => "rejected",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Ignored { reason } | Self::Rejected { reason } => Some(reason),
            Self::Settled | Self::Duplicate => None,
        }
    }

    fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored {
            reason: reason.into(),
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

impl Display for SettlementOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{}: {reason}", self.status()),
            None => f.write_str(self.status()),
        }
    }
}

/// Failures the provider should see as non-2xx.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("webhook authentication failed: {0}")]
    Signature(#[from] SignatureError),

    #[error("webhook body is not a readable event: {0}")]
    UnreadableBody(String),

    #[error("ledger failure: {0}")]
    Ledger(#[from] LedgerError),
}

/// Reference shape and event filter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPolicy {
    /// First segment every purchase reference must carry.
    pub reference_prefix: String,
    /// Event kinds starting with one of these are settlement candidates.
    pub accepted_event_prefixes: Vec<String>,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            reference_prefix: String::from("METI"),
            accepted_event_prefixes: vec![String::from("charge.success")],
        }
    }
}

/// Authenticates payment webhooks and applies each purchase at most once.
pub struct SettlementVerifier<S> {
    signature: SignatureVerifier,
    prices: PriceTable,
    policy: SettlementPolicy,
    store: S,
}

/// Reference fields known at the point an outcome is decided.
#[derive(Default)]
struct AuditContext {
    reference: Option<String>,
    user_id: Option<String>,
    purchase_type: Option<String>,
}

impl<S: SettlementStore> SettlementVerifier<S> {
    pub fn new(signature: SignatureVerifier, prices: PriceTable, store: S) -> Self {
        Self {
            signature,
            prices,
            policy: SettlementPolicy::default(),
            store,
        }
    }

    pub fn with_policy(mut self, policy: SettlementPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Verify `raw_body` against `signature` and settle the purchase it describes.
    pub fn verify_and_settle(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<SettlementOutcome, SettlementError> {
        if let Err(error) = self.signature.verify(raw_body, signature) {
            warn!(%error, bytes = raw_body.len(), "webhook signature rejected");
            return Err(error.into());
        }

        let event = WebhookEvent::from_slice(raw_body)
            .map_err(|error| SettlementError::UnreadableBody(error.to_string()))?;

        let mut context = AuditContext::default();
        let outcome = self.settle(&event, &mut context)?;
        self.audit(&event, &context, &outcome)?;
        Ok(outcome)
    }

    fn settle(
        &self,
        event: &WebhookEvent,
        context: &mut AuditContext,
    ) -> Result<SettlementOutcome, SettlementError> {
        let accepted = self
            .policy
            .accepted_event_prefixes
            .iter()
            .any(|prefix| event.event.starts_with(prefix.as_str()));
        if !accepted {
            return Ok(SettlementOutcome::ignored(format!(
                "event kind '{}' is not a settlement",
                event.event
            )));
        }

        let Some(raw_reference) = event.data.reference.as_deref() else {
            return Ok(SettlementOutcome::ignored("event carries no reference"));
        };
        context.reference = Some(raw_reference.to_string());

        let reference = match PurchaseReference::parse(raw_reference, &self.policy.reference_prefix)
        {
            Ok(reference) => reference,
            Err(error) => return Ok(SettlementOutcome::ignored(error.to_string())),
        };
        let canonical = reference.to_string();
        context.reference = Some(canonical.clone());
        context.user_id = Some(reference.user_id.clone());
        context.purchase_type = Some(reference.purchase_type.clone());

        let Some(price) = self.prices.get(&reference.purchase_type) else {
            return Ok(SettlementOutcome::rejected(format!(
                "unknown purchase type '{}'",
                reference.purchase_type
            )));
        };

        match event.currency() {
            Some(currency) if currency.eq_ignore_ascii_case(&price.currency) => {}
            Some(currency) => {
                return Ok(SettlementOutcome::rejected(format!(
                    "currency {currency} does not match {}",
                    price.currency
                )))
            }
            None => return Ok(SettlementOutcome::rejected("currency missing")),
        }

        let Some(paid) = event.paid_amount() else {
            return Ok(SettlementOutcome::rejected("amount missing or not an integer"));
        };
        if paid < price.amount {
            return Ok(SettlementOutcome::rejected(format!(
                "underpayment: paid {paid}, required {}",
                price.amount
            )));
        }

        if !price.anonymous && !self.store.account_exists(&reference.user_id)? {
            return Ok(SettlementOutcome::rejected(format!(
                "account '{}' does not exist",
                reference.user_id
            )));
        }

        let record = SettlementRecord {
            reference: canonical,
            user_id: reference.user_id,
            purchase_type: reference.purchase_type,
            grant: price.kind.grant(),
            settled_at_ms: now_ms(),
        };
        Ok(match self.store.apply_settlement(&record)? {
            ApplyResult::Applied => SettlementOutcome::Settled,
            ApplyResult::Duplicate => SettlementOutcome::Duplicate,
        })
    }

    fn audit(
        &self,
        event: &WebhookEvent,
        context: &AuditContext,
        outcome: &SettlementOutcome,
    ) -> Result<(), SettlementError> {
        let reference = context.reference.as_deref().unwrap_or("-");
        match outcome {
            SettlementOutcome::Rejected { reason } => warn!(
                event = %event.event,
                reference,
                %reason,
                "settlement rejected"
            ),
            SettlementOutcome::Ignored { reason } => info!(
                event = %event.event,
                reference,
                %reason,
                "webhook ignored"
            ),
            SettlementOutcome::Settled | SettlementOutcome::Duplicate => info!(
                event = %event.event,
                reference,
                outcome = outcome.status(),
                "settlement processed"
            ),
        }

        self.store.record_audit(&AuditEntry {
            reference: context.reference.clone(),
            user_id: context.user_id.clone(),
            purchase_type: context.purchase_type.clone(),
            outcome: outcome.status().to_string(),
            reason: outcome.reason().map(str::to_string),
            logged_at_ms: now_ms(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use stratagem_ledger::{SubscriptionStatus, SubscriptionTier};

    use super::*;

    const SECRET: &str = "whsec_test";

    fn verifier() -> SettlementVerifier<AccountLedger> {
        let ledger = AccountLedger::open_in_memory().expect("ledger");
        SettlementVerifier::new(
            SignatureVerifier::new(SECRET),
            PriceTable::default(),
            ledger,
        )
    }

    fn body(event: &str, reference: &str, amount: u64, currency: &str) -> Vec<u8> {
        json!({
            "event": event,
            "data": {"reference": reference, "amount": amount, "currency": currency}
        })
        .to_string()
        .into_bytes()
    }

    fn deliver(
        verifier: &SettlementVerifier<AccountLedger>,
        body: &[u8],
    ) -> Result<SettlementOutcome, SettlementError> {
        let signature = SignatureVerifier::new(SECRET).sign(body).expect("sign");
        verifier.verify_and_settle(body, Some(&signature))
    }

    #[test]
    fn matching_payment_upgrades_the_account() {
        let verifier = verifier();
        verifier.store().ensure_account("u123").expect("account");

        let outcome = deliver(
            &verifier,
            &body("charge.success", "METI_u123_pro_1700000000000", 149_175, "NGN"),
        )
        .expect("settle");

        let state = verifier
            .store()
            .subscription("u123")
            .expect("query")
            .expect("account");
        assert_eq!(outcome, SettlementOutcome::Settled);
        assert_eq!(state.tier, SubscriptionTier::Pro);
        assert_eq!(state.status, SubscriptionStatus::Active);
    }

    #[test]
    fn underpayment_is_rejected_without_mutation() {
        let verifier = verifier();
        verifier.store().ensure_account("u1").expect("account");

        let outcome = deliver(
            &verifier,
            &body("charge.success", "METI_u1_agency_1", 298_349, "NGN"),
        )
        .expect("acknowledged");

        let state = verifier
            .store()
            .subscription("u1")
            .expect("query")
            .expect("account");
        assert!(matches!(outcome, SettlementOutcome::Rejected { .. }));
        assert_eq!(state.tier, SubscriptionTier::Free);
        assert!(!verifier.store().is_settled("METI_u1_agency_1").expect("lookup"));
    }

    #[test]
    fn overpayment_is_accepted() {
        let verifier = verifier();
        verifier.store().ensure_account("u1").expect("account");

        let outcome = deliver(
            &verifier,
            &body("charge.success", "METI_u1_starter_1", 100_000, "NGN"),
        )
        .expect("settle");

        assert_eq!(outcome, SettlementOutcome::Settled);
    }

    #[test]
    fn wrong_currency_is_rejected() {
        let verifier = verifier();
        verifier.store().ensure_account("u1").expect("account");

        let outcome = deliver(
            &verifier,
            &body("charge.success", "METI_u1_pro_1", 149_175, "USD"),
        )
        .expect("acknowledged");

        assert!(matches!(outcome, SettlementOutcome::Rejected { reason } if reason.contains("USD")));
    }

    #[test]
    fn redelivery_is_a_duplicate() {
        let verifier = verifier();
        let payload = body("charge.success", "METI_guest_credits50_1", 49_875, "NGN");

        assert_eq!(deliver(&verifier, &payload).expect("first"), SettlementOutcome::Settled);
        assert_eq!(deliver(&verifier, &payload).expect("replay"), SettlementOutcome::Duplicate);
        assert_eq!(verifier.store().credit_balance("guest").expect("balance"), 50);
    }

    #[test]
    fn padded_redelivery_dedupes_on_the_parsed_reference() {
        let verifier = verifier();
        let plain = body("charge.success", "METI_guest_credits50_7", 49_875, "NGN");
        let padded = body("charge.success", "  METI_guest_credits50_7 \n", 49_875, "NGN");

        assert_eq!(deliver(&verifier, &plain).expect("first"), SettlementOutcome::Settled);
        assert_eq!(deliver(&verifier, &padded).expect("replay"), SettlementOutcome::Duplicate);
        assert_eq!(verifier.store().credit_balance("guest").expect("balance"), 50);
        assert!(verifier.store().is_settled("METI_guest_credits50_7").expect("lookup"));
    }

    #[test]
    fn plan_for_unknown_account_is_rejected() {
        let verifier = verifier();
        let outcome = deliver(
            &verifier,
            &body("charge.success", "METI_ghost_pro_1", 149_175, "NGN"),
        )
        .expect("acknowledged");

        assert!(matches!(outcome, SettlementOutcome::Rejected { .. }));
    }

    #[test]
    fn unrelated_events_and_references_are_ignored() {
        let verifier = verifier();

        for payload in [
            body("transfer.success", "METI_u1_pro_1", 149_175, "NGN"),
            body("charge.success", "INV-2024-0001", 149_175, "NGN"),
            br#"{"event":"charge.success","data":{}}"#.to_vec(),
        ] {
            let outcome = deliver(&verifier, &payload).expect("acknowledged");
            assert!(matches!(outcome, SettlementOutcome::Ignored { .. }), "{outcome}");
        }
    }

    #[test]
    fn bad_signature_stops_before_any_side_effect() {
        let verifier = verifier();
        let payload = body("charge.success", "METI_guest_credits50_1", 49_875, "NGN");

        let error = verifier
            .verify_and_settle(&payload, Some("00ff"))
            .expect_err("forged");

        assert!(matches!(error, SettlementError::Signature(SignatureError::Mismatch)));
        assert!(verifier.store().audit_entries(None).expect("audit").is_empty());
    }

    #[test]
    fn signed_garbage_is_unreadable() {
        let verifier = verifier();
        let error = deliver(&verifier, b"not json").expect_err("unreadable");
        assert!(matches!(error, SettlementError::UnreadableBody(_)));
    }

    #[test]
    fn every_business_outcome_is_audited() {
        let verifier = verifier();
        verifier.store().ensure_account("u5").expect("account");
        deliver(&verifier, &body("charge.success", "METI_u5_pro_1", 1, "NGN")).expect("reject");
        deliver(&verifier, &body("charge.success", "METI_u5_pro_2", 149_175, "NGN")).expect("ok");

        let outcomes: Vec<(String, Option<String>)> = verifier
            .store()
            .audit_entries(None)
            .expect("audit")
            .into_iter()
            .map(|entry| (entry.outcome, entry.user_id))
            .collect();

        assert_eq!(
            outcomes,
            vec![
                (String::from("rejected"), Some(String::from("u5"))),
                (String::from("settled"), Some(String::from("u5"))),
            ]
        );
    }
}
