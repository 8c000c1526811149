//! # Stratagem Ledger
//!
//! DuckDB-backed account store for the settlement path.
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `accounts` | Subscription tier, status and paid period per user |
//! | `credit_grants` | One-time credit purchases, keyed by reference |
//! | `settled_references` | Dedupe table: one row per applied purchase reference |
//! | `settlement_log` | Audit trail of every settlement outcome |
//!
//! ## Exactly-once settlement
//!
//! [`AccountLedger::apply_settlement`] checks `settled_references`, inserts
//! the reference and mutates the account or credit table inside one
//! transaction. The primary key on `reference` makes a concurrent second
//! delivery fail; after rollback it is reported as
//! [`ApplyResult::Duplicate`].
//!
//! ```rust,no_run
//! use stratagem_ledger::{AccountLedger, Grant, SettlementRecord, SubscriptionTier};
//!
//! let ledger = AccountLedger::open("stratagem.duckdb")?;
//! ledger.apply_settlement(&SettlementRecord {
//!     reference: "METI_u42_agency_1700000000000".to_string(),
//!     user_id: "u42".to_string(),
//!     purchase_type: "agency".to_string(),
//!     grant: Grant::Plan { tier: SubscriptionTier::Agency, period_days: 30 },
//!     settled_at_ms: 1_700_000_000_000,
//! })?;
//! # Ok::<(), stratagem_ledger::LedgerError>(())
//! ```

pub mod duckdb;
pub mod migrations;
mod models;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use ::duckdb::{Connection, OptionalExt, ToSql};
use thiserror::Error;
use tracing::{debug, warn};

pub use duckdb::{DuckDbConnectionManager, PooledConnection};
pub use models::{
    AccountSubscriptionState, ApplyResult, AuditEntry, Grant, SettlementRecord,
    SubscriptionStatus, SubscriptionTier,
};

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;
const DEFAULT_POOL_SIZE: usize = 4;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (creating the database directory).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Stored data could not be interpreted.
    #[error("invalid ledger data: {0}")]
    InvalidData(String),
}

/// Account document store.
#[derive(Clone)]
pub struct AccountLedger {
    manager: DuckDbConnectionManager,
}

impl AccountLedger {
    /// Open (creating if needed) the ledger at `path` and apply migrations.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Self::initialize(DuckDbConnectionManager::open(path, DEFAULT_POOL_SIZE)?)
    }

    /// Ledger over a private in-memory database.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::initialize(DuckDbConnectionManager::open_in_memory(DEFAULT_POOL_SIZE)?)
    }

    fn initialize(manager: DuckDbConnectionManager) -> Result<Self, LedgerError> {
        let connection = manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        drop(connection);
        Ok(Self { manager })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.manager.db_path()
    }

    /// Create a free-tier account if `user_id` has none.
    pub fn ensure_account(&self, user_id: &str) -> Result<(), LedgerError> {
        let connection = self.manager.acquire()?;
        let now = now_ms();
        let params: [&dyn ToSql; 2] = [&user_id, &now];
        connection.execute(
            "INSERT INTO accounts (user_id, tier, status, period_end_ms, updated_at_ms) \
             VALUES (?, 'free', 'active', NULL, ?) ON CONFLICT DO NOTHING",
            params.as_slice(),
        )?;
        Ok(())
    }

    pub fn account_exists(&self, user_id: &str) -> Result<bool, LedgerError> {
        let connection = self.manager.acquire()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM accounts WHERE user_id = ?",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Current subscription state, or `None` for unknown users.
    pub fn subscription(
        &self,
        user_id: &str,
    ) -> Result<Option<AccountSubscriptionState>, LedgerError> {
        self.subscription_at(user_id, now_ms())
    }

    /// Subscription state as of `now_ms`; paid periods that have ended
    /// report `expired`.
    pub fn subscription_at(
        &self,
        user_id: &str,
        now_ms: i64,
    ) -> Result<Option<AccountSubscriptionState>, LedgerError> {
        let connection = self.manager.acquire()?;
        let row = connection
            .query_row(
                "SELECT tier, status, period_end_ms FROM accounts WHERE user_id = ?",
                [user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((tier, status, period_end_ms)) = row else {
            return Ok(None);
        };
        let tier: SubscriptionTier = tier.parse()?;
        let mut status: SubscriptionStatus = status.parse()?;
        if matches!(period_end_ms, Some(end) if end <= now_ms) {
            status = SubscriptionStatus::Expired;
        }

        Ok(Some(AccountSubscriptionState {
            tier,
            status,
            period_end_ms,
        }))
    }

    /// Sum of all credits granted to `user_id`.
    pub fn credit_balance(&self, user_id: &str) -> Result<i64, LedgerError> {
        let connection = self.manager.acquire()?;
        let balance: i64 = connection.query_row(
            "SELECT CAST(COALESCE(SUM(credits), 0) AS BIGINT) FROM credit_grants WHERE user_id = ?",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(balance)
    }

    /// Whether `reference` has already been applied.
    pub fn is_settled(&self, reference: &str) -> Result<bool, LedgerError> {
        let connection = self.manager.acquire()?;
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM settled_references WHERE reference = ?",
            [reference],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Apply a verified purchase at most once per reference.
    pub fn apply_settlement(&self, record: &SettlementRecord) -> Result<ApplyResult, LedgerError> {
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<ApplyResult, LedgerError> {
            let already: i64 = connection.query_row(
                "SELECT COUNT(*) FROM settled_references WHERE reference = ?",
                [&record.reference],
                |row| row.get(0),
            )?;
            if already > 0 {
                return Ok(ApplyResult::Duplicate);
            }

            let params: [&dyn ToSql; 4] = [
                &record.reference,
                &record.user_id,
                &record.purchase_type,
                &record.settled_at_ms,
            ];
            connection.execute(
                "INSERT INTO settled_references (reference, user_id, purchase_type, settled_at_ms) \
                 VALUES (?, ?, ?, ?)",
                params.as_slice(),
            )?;

            match record.grant {
                Grant::Plan { tier, period_days } => {
                    let tier = tier.as_str();
                    let period_end_ms = record.settled_at_ms + i64::from(period_days) * MS_PER_DAY;
                    let params: [&dyn ToSql; 4] =
                        [&record.user_id, &tier, &period_end_ms, &record.settled_at_ms];
                    connection.execute(
                        "INSERT INTO accounts (user_id, tier, status, period_end_ms, updated_at_ms) \
                         VALUES (?, ?, 'active', ?, ?) \
                         ON CONFLICT (user_id) DO UPDATE SET \
                         tier = excluded.tier, status = 'active', \
                         period_end_ms = excluded.period_end_ms, \
                         updated_at_ms = excluded.updated_at_ms",
                        params.as_slice(),
                    )?;
                }
                Grant::Credits { count } => {
                    let credits = i64::from(count);
                    let params: [&dyn ToSql; 4] = [
                        &record.reference,
                        &record.user_id,
                        &credits,
                        &record.settled_at_ms,
                    ];
                    connection.execute(
                        "INSERT INTO credit_grants (reference, user_id, credits, granted_at_ms) \
                         VALUES (?, ?, ?, ?)",
                        params.as_slice(),
                    )?;
                }
            }

            Ok(ApplyResult::Applied)
        })();
        let result = finalize_transaction(&connection, result);
        drop(connection);

        match result {
            Err(error) if self.is_settled(&record.reference).unwrap_or(false) => {
                warn!(
                    reference = %record.reference,
                    %error,
                    "concurrent delivery lost the settlement race"
                );
                Ok(ApplyResult::Duplicate)
            }
            Ok(outcome) => {
                debug!(reference = %record.reference, ?outcome, "settlement applied");
                Ok(outcome)
            }
            Err(error) => Err(error),
        }
    }

    /// Append one row to the settlement audit log.
    pub fn record_audit(&self, entry: &AuditEntry) -> Result<(), LedgerError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 6] = [
            &entry.reference,
            &entry.user_id,
            &entry.purchase_type,
            &entry.outcome,
            &entry.reason,
            &entry.logged_at_ms,
        ];
        connection.execute(
            "INSERT INTO settlement_log \
             (reference, user_id, purchase_type, outcome, reason, logged_at_ms) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Audit rows in insertion order, optionally for one reference.
    pub fn audit_entries(&self, reference: Option<&str>) -> Result<Vec<AuditEntry>, LedgerError> {
        let connection = self.manager.acquire()?;
        match reference {
            Some(reference) => {
                let params: [&dyn ToSql; 1] = [&reference];
                query_audit(
                    &connection,
                    "SELECT reference, user_id, purchase_type, outcome, reason, logged_at_ms \
                     FROM settlement_log WHERE reference = ? ORDER BY entry_id",
                    params.as_slice(),
                )
            }
            None => query_audit(
                &connection,
                "SELECT reference, user_id, purchase_type, outcome, reason, logged_at_ms \
                 FROM settlement_log ORDER BY entry_id",
                &[],
            ),
        }
    }
}

fn query_audit(
    connection: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<AuditEntry>, LedgerError> {
    let mut statement = connection.prepare(sql)?;
    let rows = statement.query_map(params, |row| {
        Ok(AuditEntry {
            reference: row.get(0)?,
            user_id: row.get(1)?,
            purchase_type: row.get(2)?,
            outcome: row.get(3)?,
            reason: row.get(4)?,
            logged_at_ms: row.get(5)?,
        })
    })?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, LedgerError>,
) -> Result<T, LedgerError> {
    match result {
        Ok(value) => match connection.execute_batch("COMMIT") {
            Ok(()) => Ok(value),
            Err(error) => {
                let _ = connection.execute_batch("ROLLBACK");
                Err(error.into())
            }
        },
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

/// Current time in Unix milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use tempfile::tempdir;

    use super::*;

    const SETTLED_AT: i64 = 1_700_000_000_000;

    fn plan(reference: &str, user_id: &str, tier: SubscriptionTier) -> SettlementRecord {
        SettlementRecord {
            reference: reference.to_string(),
            user_id: user_id.to_string(),
            purchase_type: tier.as_str().to_string(),
            grant: Grant::Plan {
                tier,
                period_days: 30,
            },
            settled_at_ms: SETTLED_AT,
        }
    }

    fn credits(reference: &str, user_id: &str) -> SettlementRecord {
        SettlementRecord {
            reference: reference.to_string(),
            user_id: user_id.to_string(),
            purchase_type: String::from("credits50"),
            grant: Grant::Credits { count: 50 },
            settled_at_ms: SETTLED_AT,
        }
    }

    #[test]
    fn ensure_account_creates_a_free_account_once() {
        let ledger = AccountLedger::open_in_memory().expect("ledger");
        assert!(!ledger.account_exists("u1").expect("exists"));

        ledger.ensure_account("u1").expect("create");
        ledger.ensure_account("u1").expect("idempotent");

        let state = ledger.subscription("u1").expect("query").expect("account");
        assert_eq!(state.tier, SubscriptionTier::Free);
        assert_eq!(state.status, SubscriptionStatus::Active);
        assert_eq!(state.period_end_ms, None);
    }

    #[test]
    fn plan_settlement_upgrades_the_account() {
        let ledger = AccountLedger::open_in_memory().expect("ledger");
        ledger.ensure_account("u42").expect("account");

        let outcome = ledger
            .apply_settlement(&plan("METI_u42_agency_1", "u42", SubscriptionTier::Agency))
            .expect("apply");

        let state = ledger
            .subscription_at("u42", SETTLED_AT + 1)
            .expect("query")
            .expect("account");
        assert_eq!(outcome, ApplyResult::Applied);
        assert_eq!(state.tier, SubscriptionTier::Agency);
        assert_eq!(state.status, SubscriptionStatus::Active);
        assert_eq!(state.period_end_ms, Some(SETTLED_AT + 30 * MS_PER_DAY));
    }

    #[test]
    fn ended_period_reports_expired() {
        let ledger = AccountLedger::open_in_memory().expect("ledger");
        ledger
            .apply_settlement(&plan("METI_u1_pro_1", "u1", SubscriptionTier::Pro))
            .expect("apply");

        let state = ledger
            .subscription_at("u1", SETTLED_AT + 31 * MS_PER_DAY)
            .expect("query")
            .expect("account");
        assert_eq!(state.tier, SubscriptionTier::Pro);
        assert_eq!(state.status, SubscriptionStatus::Expired);
    }

    #[test]
    fn replayed_reference_is_applied_once() {
        let ledger = AccountLedger::open_in_memory().expect("ledger");
        let record = credits("METI_u7_credits50_1", "u7");

        assert_eq!(ledger.apply_settlement(&record).expect("first"), ApplyResult::Applied);
        assert_eq!(ledger.apply_settlement(&record).expect("replay"), ApplyResult::Duplicate);
        assert_eq!(ledger.credit_balance("u7").expect("balance"), 50);
        assert!(ledger.is_settled(&record.reference).expect("settled"));
    }

    #[test]
    fn concurrent_deliveries_settle_once() {
        let ledger = Arc::new(AccountLedger::open_in_memory().expect("ledger"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || ledger.apply_settlement(&credits("METI_u9_credits50_1", "u9")))
            })
            .collect();

        let applied = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .filter(|result| matches!(result, Ok(ApplyResult::Applied)))
            .count();

        assert_eq!(applied, 1);
        assert_eq!(ledger.credit_balance("u9").expect("balance"), 50);
    }

    #[test]
    fn audit_entries_filter_by_reference() {
        let ledger = AccountLedger::open_in_memory().expect("ledger");
        for (reference, outcome) in [("r1", "settled"), ("r2", "rejected"), ("r1", "duplicate")] {
            ledger
                .record_audit(&AuditEntry {
                    reference: Some(reference.to_string()),
                    user_id: None,
                    purchase_type: None,
                    outcome: outcome.to_string(),
                    reason: None,
                    logged_at_ms: SETTLED_AT,
                })
                .expect("audit");
        }

        let r1: Vec<String> = ledger
            .audit_entries(Some("r1"))
            .expect("entries")
            .into_iter()
            .map(|entry| entry.outcome)
            .collect();
        assert_eq!(r1, vec!["settled", "duplicate"]);
        assert_eq!(ledger.audit_entries(None).expect("all").len(), 3);
    }

    #[test]
    fn ledger_survives_reopen() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("ledger").join("stratagem.duckdb");

        {
            let ledger = AccountLedger::open(&path).expect("open");
            ledger
                .apply_settlement(&plan("METI_u3_starter_1", "u3", SubscriptionTier::Starter))
                .expect("apply");
        }

        let ledger = AccountLedger::open(&path).expect("reopen");
        assert!(ledger.is_settled("METI_u3_starter_1").expect("settled"));
        assert_eq!(ledger.db_path(), Some(path.as_path()));
    }
}
