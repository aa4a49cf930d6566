//! The sales posting template: debit Receivable, credit Revenue and Sales Tax.

use chrono::{DateTime, NaiveDate, Utc};

use salespost_core::{AggregateId, DomainError, DomainResult, Money, UserId};

use crate::chart::Account;
use crate::journal::{JournalEntry, JournalEntryDraft, JournalEntryId, JournalLine};

/// Active accounts resolved for each posting role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAccounts {
    pub receivable: Account,
    pub revenue: Account,
    pub sales_tax: Option<Account>,
}

/// What is being posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SalesPostingInput<'a> {
    pub entry_id: JournalEntryId,
    pub source_id: AggregateId,
    pub order_number: &'a str,
    /// "Sales order", "Uplift sale".
    pub label: &'a str,
    pub entry_date: NaiveDate,
    pub subtotal: Money,
    pub tax_amount: Money,
    pub total_amount: Money,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

/// Build the balanced journal entry for one confirmed order.
pub fn sales_posting(accounts: &ResolvedAccounts, input: &SalesPostingInput<'_>) -> DomainResult<JournalEntry> {
    if !input.total_amount.is_positive() {
        return Err(DomainError::validation("posted total must be positive"));
    }
    if input.tax_amount.is_negative() || input.subtotal.checked_add(input.tax_amount) != Some(input.total_amount) {
        return Err(DomainError::invariant(format!(
            "order {} totals do not add up: {} + {} != {}",
            input.order_number, input.subtotal, input.tax_amount, input.total_amount
        )));
    }

    let number = input.order_number;
    let mut lines = vec![
        JournalLine::debit(&accounts.receivable, input.total_amount, format!("{} {number}", input.label)),
        JournalLine::credit(&accounts.revenue, input.subtotal, format!("Sales revenue for {number}")),
    ];

    if input.tax_amount.is_positive() {
        let tax_account = accounts.sales_tax.as_ref().ok_or_else(|| {
            DomainError::invariant(format!("order {number} carries tax but no sales tax account is configured"))
        })?;
        lines.push(JournalLine::credit(tax_account, input.tax_amount, format!("Sales tax for {number}")));
    }

    JournalEntry::post(JournalEntryDraft {
        id: input.entry_id,
        number: format!("JE-{number}"),
        entry_date: input.entry_date,
        reference: number.to_string(),
        description: format!("{} approved - {number}", input.label),
        source_id: input.source_id,
        created_by: input.created_by,
        created_at: input.created_at,
        lines,
    })
}
