//! Chart of accounts and the roles the sales posting template needs.

use serde::{Deserialize, Serialize};

use salespost_core::typed_id;

typed_id!(
    /// Account identifier.
    AccountId
);

/// High-level account kind (determines normal balance side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountKind::Asset => "asset",
            AccountKind::Liability => "liability",
            AccountKind::Equity => "equity",
            AccountKind::Revenue => "revenue",
            AccountKind::Expense => "expense",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "asset" => Some(AccountKind::Asset),
            "liability" => Some(AccountKind::Liability),
            "equity" => Some(AccountKind::Equity),
            "revenue" => Some(AccountKind::Revenue),
            "expense" => Some(AccountKind::Expense),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub code: String, // e.g. "1100"
    pub name: String, // e.g. "Accounts Receivable"
    pub kind: AccountKind,
    pub active: bool,
}

impl Account {
    pub fn new(code: impl Into<String>, name: impl Into<String>, kind: AccountKind) -> Self {
        Self {
            id: AccountId::generate(),
            code: code.into(),
            name: name.into(),
            kind,
            active: true,
        }
    }
}

/// What an account is used for when posting a confirmed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Receivable,
    Revenue,
    SalesTax,
}

impl AccountRole {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountRole::Receivable => "receivable",
            AccountRole::Revenue => "revenue",
            AccountRole::SalesTax => "sales_tax",
        }
    }
}

/// Account codes bound to each posting role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingAccounts {
    pub receivable: String,
    pub revenue: String,
    pub sales_tax: String,
}

impl PostingAccounts {
    pub fn code_for(&self, role: AccountRole) -> &str {
        match role {
            AccountRole::Receivable => &self.receivable,
            AccountRole::Revenue => &self.revenue,
            AccountRole::SalesTax => &self.sales_tax,
        }
    }
}

impl Default for PostingAccounts {
    fn default() -> Self {
        Self {
            receivable: "1100".to_string(),
            revenue: "4000".to_string(),
            sales_tax: "2100".to_string(),
        }
    }
}

/// Accounts the posting template needs, with their default codes.
pub fn default_chart() -> Vec<Account> {
    vec![
        Account::new("1100", "Accounts Receivable", AccountKind::Asset),
        Account::new("2100", "Sales Tax Payable", AccountKind::Liability),
        Account::new("4000", "Sales Revenue", AccountKind::Revenue),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_chart_covers_every_posting_role() {
        let chart = default_chart();
        let codes = PostingAccounts::default();
        for role in [AccountRole::Receivable, AccountRole::Revenue, AccountRole::SalesTax] {
            let code = codes.code_for(role);
            let account = chart.iter().find(|a| a.code == code);
            assert!(account.is_some_and(|a| a.active), "no active account for {}", role.as_str());
        }
    }

    #[test]
    fn kind_strings_are_stable() {
        for kind in [
            AccountKind::Asset,
            AccountKind::Liability,
            AccountKind::Equity,
            AccountKind::Revenue,
            AccountKind::Expense,
        ] {
            assert_eq!(AccountKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(AccountKind::parse("contra"), None);
    }
}
