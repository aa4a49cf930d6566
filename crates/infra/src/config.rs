//! Runtime configuration read from the environment.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use salespost_accounting::PostingAccounts;
use salespost_sales::RiderAssignmentPolicy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is not set")]
    Missing { name: &'static str },

    #[error("{name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Knobs of the order services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPolicy {
    pub rider_assignment: RiderAssignmentPolicy,
    /// Extra attempts after a write conflict (0 disables retrying).
    pub conflict_retries: u32,
    /// Backoff before retry `n` is `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl Default for OrderPolicy {
    fn default() -> Self {
        Self {
            rider_assignment: RiderAssignmentPolicy::AnyStatus,
            conflict_retries: 3,
            retry_backoff: Duration::from_millis(25),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub posting_accounts: PostingAccounts,
    pub orders: OrderPolicy,
    pub statement_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            posting_accounts: PostingAccounts::default(),
            orders: OrderPolicy::default(),
            statement_timeout: Duration::from_millis(5_000),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = AppConfig::default();
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_url = get("DATABASE_URL");

        let account = |name: &'static str, default: &str| match get(name) {
            Some(code) => code,
            None => {
                warn!(variable = name, code = default, "account code not set; using default chart code");
                default.to_string()
            }
        };
        let posting_accounts = PostingAccounts {
            receivable: account("SALESPOST_RECEIVABLE_ACCOUNT", &defaults.posting_accounts.receivable),
            revenue: account("SALESPOST_REVENUE_ACCOUNT", &defaults.posting_accounts.revenue),
            sales_tax: account("SALESPOST_TAX_ACCOUNT", &defaults.posting_accounts.sales_tax),
        };

        let rider_assignment = match get("SALESPOST_RIDER_POLICY") {
            Some(raw) => RiderAssignmentPolicy::parse(&raw).ok_or(ConfigError::Invalid {
                name: "SALESPOST_RIDER_POLICY",
                value: raw,
                reason: "expected any-status or require-confirmed",
            })?,
            None => defaults.orders.rider_assignment,
        };

        let conflict_retries = match get("SALESPOST_CONFLICT_RETRIES") {
            Some(raw) => parse_number::<u32>("SALESPOST_CONFLICT_RETRIES", raw)?,
            None => defaults.orders.conflict_retries,
        };

        let retry_backoff = match get("SALESPOST_RETRY_BACKOFF_MS") {
            Some(raw) => Duration::from_millis(parse_number("SALESPOST_RETRY_BACKOFF_MS", raw)?),
            None => defaults.orders.retry_backoff,
        };

        let statement_timeout = match get("SALESPOST_STATEMENT_TIMEOUT_MS") {
            Some(raw) => {
                let ms: u64 = parse_number("SALESPOST_STATEMENT_TIMEOUT_MS", raw.clone())?;
                if ms == 0 {
                    return Err(ConfigError::Invalid {
                        name: "SALESPOST_STATEMENT_TIMEOUT_MS",
                        value: raw,
                        reason: "must be greater than zero",
                    });
                }
                Duration::from_millis(ms)
            }
            None => defaults.statement_timeout,
        };

        Ok(Self {
            database_url,
            posting_accounts,
            orders: OrderPolicy {
                rider_assignment,
                conflict_retries,
                retry_backoff,
            },
            statement_timeout,
        })
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing { name: "DATABASE_URL" })
    }
}

fn parse_number<N: std::str::FromStr>(name: &'static str, raw: String) -> Result<N, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw,
        reason: "expected a non-negative integer",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.posting_accounts.receivable, "1100");
        assert_eq!(cfg.orders.conflict_retries, 3);
        assert!(matches!(
            cfg.require_database_url(),
            Err(ConfigError::Missing { name: "DATABASE_URL" })
        ));
    }

    #[test]
    fn variables_override_defaults() {
        let cfg = config(&[
            ("DATABASE_URL", "postgres://localhost/salespost"),
            ("SALESPOST_TAX_ACCOUNT", "2200"),
            ("SALESPOST_RIDER_POLICY", "require-confirmed"),
            ("SALESPOST_CONFLICT_RETRIES", "0"),
            ("SALESPOST_RETRY_BACKOFF_MS", "5"),
            ("SALESPOST_STATEMENT_TIMEOUT_MS", "750"),
        ])
        .unwrap();

        assert_eq!(cfg.require_database_url().unwrap(), "postgres://localhost/salespost");
        assert_eq!(cfg.posting_accounts.sales_tax, "2200");
        assert_eq!(cfg.orders.rider_assignment, RiderAssignmentPolicy::RequireConfirmed);
        assert_eq!(cfg.orders.conflict_retries, 0);
        assert_eq!(cfg.orders.retry_backoff, Duration::from_millis(5));
        assert_eq!(cfg.statement_timeout, Duration::from_millis(750));
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(matches!(
            config(&[("SALESPOST_RIDER_POLICY", "whenever")]),
            Err(ConfigError::Invalid { name: "SALESPOST_RIDER_POLICY", .. })
        ));
        assert!(matches!(
            config(&[("SALESPOST_CONFLICT_RETRIES", "-1")]),
            Err(ConfigError::Invalid { name: "SALESPOST_CONFLICT_RETRIES", .. })
        ));
        assert!(matches!(
            config(&[("SALESPOST_STATEMENT_TIMEOUT_MS", "0")]),
            Err(ConfigError::Invalid { name: "SALESPOST_STATEMENT_TIMEOUT_MS", .. })
        ));
    }
}
