//! Schema migrations and reference data.

use sqlx::PgPool;
use sqlx::migrate::Migrator;
use tracing::{info, instrument};

use salespost_accounting::Account;

use super::StoreError;

/// Embedded migrations from `crates/infra/migrations`.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Apply every pending migration. Safe to run concurrently; sqlx serializes
/// runners with an advisory lock.
#[instrument(skip(pool), err)]
pub async fn migrate(pool: &PgPool) -> Result<Vec<i64>, StoreError> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))?;

    let applied: Vec<i64> = sqlx::query_scalar("SELECT version FROM _sqlx_migrations WHERE success ORDER BY version")
        .fetch_all(pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("reading migration history failed: {e}")))?;

    info!(applied = ?applied, "schema up to date");
    Ok(applied)
}

/// Insert accounts whose code is not present yet. Existing rows are left as
/// they are, so a deactivated account stays deactivated.
#[instrument(skip(pool, accounts), fields(account_count = accounts.len()), err)]
pub async fn seed_chart_of_accounts(pool: &PgPool, accounts: &[Account]) -> Result<u64, StoreError> {
    let mut inserted = 0;
    for account in accounts {
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (id, code, name, kind, active)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(account.id.as_uuid())
        .bind(&account.code)
        .bind(&account.name)
        .bind(account.kind.as_str())
        .bind(account.active)
        .execute(pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("seeding account {} failed: {e}", account.code)))?;
        inserted += result.rows_affected();
    }

    info!(inserted, "chart of accounts seeded");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_embedded_in_order() {
        let versions: Vec<i64> = MIGRATOR.iter().map(|m| m.version).collect();
        assert!(!versions.is_empty());
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn schema_enforces_one_posting_per_source() {
        let schema = MIGRATOR
            .iter()
            .find(|m| m.version == 1)
            .map(|m| m.sql.to_string())
            .unwrap_or_default();
        assert!(schema.contains("journal_entries_source_idx ON journal_entries (source_id)"));
        assert!(schema.contains("CREATE TABLE IF NOT EXISTS client_ledger"));
    }
}
