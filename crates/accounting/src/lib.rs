//! Accounting domain: chart of accounts, balanced journal entries, the sales
//! posting template and the per-client running-balance ledger.
//!
//! Deterministic domain logic only; `salespost-infra` persists what is built
//! here.

pub mod chart;
pub mod client_ledger;
pub mod journal;
pub mod posting;

pub use chart::{Account, AccountId, AccountKind, AccountRole, PostingAccounts, default_chart};
pub use client_ledger::{LedgerEntry, LedgerPosting, NewLedgerEntry, verify_running_balances};
pub use journal::{EntryStatus, JournalEntry, JournalEntryDraft, JournalEntryId, JournalLine};
pub use posting::{ResolvedAccounts, SalesPostingInput, sales_posting};
