use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_accounts",
        sql: r#"
CREATE TABLE IF NOT EXISTS accounts (
    user_id TEXT PRIMARY KEY,
    tier TEXT NOT NULL DEFAULT 'free',
    status TEXT NOT NULL DEFAULT 'active',
    period_end_ms BIGINT,
    updated_at_ms BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS credit_grants (
    reference TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    credits BIGINT NOT NULL,
    granted_at_ms BIGINT NOT NULL
);
"#,
    },
    Migration {
        version: "0002_settlement",
        sql: r#"
CREATE TABLE IF NOT EXISTS settled_references (
    reference TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    purchase_type TEXT NOT NULL,
    settled_at_ms BIGINT NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS settlement_log_seq;

CREATE TABLE IF NOT EXISTS settlement_log (
    entry_id BIGINT PRIMARY KEY DEFAULT nextval('settlement_log_seq'),
    reference TEXT,
    user_id TEXT,
    purchase_type TEXT,
    outcome TEXT NOT NULL,
    reason TEXT,
    logged_at_ms BIGINT NOT NULL
);
"#,
    },
    Migration {
        version: "0003_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_credit_grants_user ON credit_grants(user_id);
CREATE INDEX IF NOT EXISTS idx_settlement_log_reference ON settlement_log(reference);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let connection = Connection::open_in_memory().expect("db");
        apply_migrations(&connection).expect("first run");
        apply_migrations(&connection).expect("second run");

        let applied: i64 = connection
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .expect("count");
        assert_eq!(applied, MIGRATIONS.len() as i64);
    }
}
