//! Posts a confirmed order to the general ledger and the client's ledger.

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use salespost_accounting::{
    Account, AccountRole, JournalEntryId, LedgerPosting, NewLedgerEntry, PostingAccounts,
    ResolvedAccounts, SalesPostingInput, sales_posting,
};
use salespost_core::{Money, UserId};
use salespost_sales::Order;

use super::error::OrderError;
use crate::store::AccountingRepository;

/// What a successful posting wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingReceipt {
    pub journal_entry_id: JournalEntryId,
    pub ledger_entry_id: i64,
    /// The client's balance after the posting.
    pub running_balance: Money,
}

#[derive(Debug, Clone, Default)]
pub struct LedgerPoster {
    accounts: PostingAccounts,
}

impl LedgerPoster {
    pub fn new(accounts: PostingAccounts) -> Self {
        Self { accounts }
    }

    pub fn accounts(&self) -> &PostingAccounts {
        &self.accounts
    }

    /// Write the journal entry and the client ledger row for `order`.
    ///
    /// Must run inside the transaction that confirms the order. Any error
    /// aborts that transaction.
    #[instrument(
        skip(self, tx, order),
        fields(order_id = %order.id_typed(), number = order.number(), client_id = %order.client_id()),
        err
    )]
    pub async fn post<T>(
        &self,
        tx: &mut T,
        order: &Order,
        actor: UserId,
        posted_at: DateTime<Utc>,
    ) -> Result<PostingReceipt, OrderError>
    where
        T: AccountingRepository + ?Sized,
    {
        let source_id = order.id_typed().0;
        if let Some(existing) = tx.journal_entry_for_source(source_id).await? {
            return Err(OrderError::Conflict(format!(
                "order {} is already posted as {}",
                order.number(),
                existing.number()
            )));
        }

        let totals = order.totals();
        let accounts = self.resolve_accounts(tx).await?;
        if totals.tax_amount.is_positive() && accounts.sales_tax.is_none() {
            return Err(OrderError::Configuration(format!(
                "order {} carries tax but no active sales_tax account with code {}",
                order.number(),
                self.accounts.code_for(AccountRole::SalesTax)
            )));
        }
        let label = order.flow().label();

        let entry = sales_posting(
            &accounts,
            &SalesPostingInput {
                entry_id: JournalEntryId::generate(),
                source_id,
                order_number: order.number(),
                label,
                entry_date: order.order_date(),
                subtotal: totals.subtotal,
                tax_amount: totals.tax_amount,
                total_amount: totals.total_amount,
                created_by: actor,
                created_at: posted_at,
            },
        )?;
        tx.insert_journal_entry(&entry).await?;

        tx.lock_client_ledger(order.client_id()).await?;
        let tail = tx.ledger_tail(order.client_id()).await?;
        let row = NewLedgerEntry::append(
            tail.as_ref(),
            LedgerPosting {
                client_id: order.client_id(),
                date: order.order_date(),
                description: format!("{label} {}", order.number()),
                reference_type: order.flow().as_str().to_string(),
                reference_id: source_id,
                debit: totals.total_amount,
                credit: Money::ZERO,
                created_at: posted_at,
            },
        )?;
        let row = tx.append_ledger_entry(row).await?;

        info!(
            journal_entry = entry.number(),
            ledger_entry_id = row.id,
            amount = %totals.total_amount,
            running_balance = %row.running_balance,
            "order posted"
        );

        Ok(PostingReceipt {
            journal_entry_id: entry.id(),
            ledger_entry_id: row.id,
            running_balance: row.running_balance,
        })
    }

    async fn resolve_accounts<T>(&self, tx: &mut T) -> Result<ResolvedAccounts, OrderError>
    where
        T: AccountingRepository + ?Sized,
    {
        let receivable = self.required(tx, AccountRole::Receivable).await?;
        let revenue = self.required(tx, AccountRole::Revenue).await?;
        let sales_tax = tx.active_account(self.accounts.code_for(AccountRole::SalesTax)).await?;
        Ok(ResolvedAccounts {
            receivable,
            revenue,
            sales_tax,
        })
    }

    async fn required<T>(&self, tx: &mut T, role: AccountRole) -> Result<Account, OrderError>
    where
        T: AccountingRepository + ?Sized,
    {
        let code = self.accounts.code_for(role);
        tx.active_account(code).await?.ok_or_else(|| {
            OrderError::Configuration(format!(
                "no active {} account with code {code}",
                role.as_str()
            ))
        })
    }
}
