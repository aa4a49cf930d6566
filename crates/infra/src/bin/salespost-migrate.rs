//! Applies pending schema migrations and seeds the chart of accounts.
//!
//! Reads `DATABASE_URL` plus the `SALESPOST_*` account codes from the
//! environment. Running it twice is harmless.

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use salespost_accounting::{Account, AccountKind, AccountRole, default_chart};
use salespost_infra::AppConfig;
use salespost_infra::store::migrations;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    salespost_observability::init();

    let config = AppConfig::from_env()?;
    let url = config
        .require_database_url()
        .context("the migrator needs a database")?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(config.statement_timeout)
        .connect(url)
        .await
        .context("failed to connect to postgres")?;

    let applied = migrations::migrate(&pool).await?;

    let chart = chart_for(&config);
    let inserted = migrations::seed_chart_of_accounts(&pool, &chart).await?;

    tracing::info!(
        migrations = applied.len(),
        accounts_inserted = inserted,
        "database ready"
    );
    pool.close().await;
    Ok(())
}

/// The default chart, with codes overridden from configuration.
fn chart_for(config: &AppConfig) -> Vec<Account> {
    let accounts = &config.posting_accounts;
    let mut chart = default_chart();
    for (role, kind) in [
        (AccountRole::Receivable, AccountKind::Asset),
        (AccountRole::SalesTax, AccountKind::Liability),
        (AccountRole::Revenue, AccountKind::Revenue),
    ] {
        let code = accounts.code_for(role);
        if !chart.iter().any(|a| a.code == code) {
            tracing::warn!(role = role.as_str(), code, "configured code is not in the default chart; seeding it");
            chart.retain(|a| a.kind != kind);
            chart.push(Account::new(code, default_name(role), kind));
        }
    }
    chart
}

fn default_name(role: AccountRole) -> &'static str {
    match role {
        AccountRole::Receivable => "Accounts Receivable",
        AccountRole::Revenue => "Sales Revenue",
        AccountRole::SalesTax => "Sales Tax Payable",
    }
}
