//! # Stratagem Billing
//!
//! Payment webhook verification and settlement.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`signature`] | HMAC-SHA256 over the raw request body |
//! | [`reference`] | `PREFIX_<userId>_<purchaseType>_<timestamp>` tokens |
//! | [`pricing`] | Server-side price table |
//! | [`event`] | Provider event payload |
//! | [`settlement`] | `SettlementVerifier::verify_and_settle` |
//!
//! The API is synchronous; async callers run it on a blocking thread.

pub mod event;
pub mod pricing;
pub mod reference;
pub mod settlement;
pub mod signature;

pub use event::{EventData, WebhookEvent};
pub use pricing::{PriceEntry, PriceTable, PriceTableError, PurchaseKind};
pub use reference::{PurchaseReference, ReferenceError};
pub use settlement::{
    SettlementError, SettlementOutcome, SettlementPolicy, SettlementStore, SettlementVerifier,
};
pub use signature::{SignatureError, SignatureVerifier};
