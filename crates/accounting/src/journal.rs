use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use salespost_core::{AggregateId, DomainError, DomainResult, Money, UserId, typed_id};

use crate::chart::{Account, AccountId};

typed_id!(
    /// Journal entry identifier.
    JournalEntryId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Posted,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Posted => "posted",
        }
    }
}

/// One side of a journal entry (immutable).
///
/// Exactly one of `debit` / `credit` is non-zero, and neither is negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_id: AccountId,
    pub account_code: String,
    pub debit: Money,
    pub credit: Money,
    pub description: String,
}

impl JournalLine {
    pub fn debit(account: &Account, amount: Money, description: impl Into<String>) -> Self {
        Self {
            account_id: account.id,
            account_code: account.code.clone(),
            debit: amount,
            credit: Money::ZERO,
            description: description.into(),
        }
    }

    pub fn credit(account: &Account, amount: Money, description: impl Into<String>) -> Self {
        Self {
            account_id: account.id,
            account_code: account.code.clone(),
            debit: Money::ZERO,
            credit: amount,
            description: description.into(),
        }
    }

    pub fn is_debit(&self) -> bool {
        self.debit.is_positive()
    }

    fn validate(&self) -> DomainResult<()> {
        if self.debit.is_negative() || self.credit.is_negative() {
            return Err(DomainError::validation("amount must be positive"));
        }
        if self.debit.is_zero() == self.credit.is_zero() {
            return Err(DomainError::validation(format!(
                "line on account {} must carry exactly one of debit or credit",
                self.account_code
            )));
        }
        Ok(())
    }
}

/// Unvalidated journal entry; turn it into a [`JournalEntry`] with
/// [`JournalEntry::post`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryDraft {
    pub id: JournalEntryId,
    pub number: String,
    pub entry_date: NaiveDate,
    pub reference: String,
    pub description: String,
    /// Business record that caused the entry (the confirmed order).
    pub source_id: AggregateId,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub lines: Vec<JournalLine>,
}

/// Balanced, posted journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    id: JournalEntryId,
    number: String,
    entry_date: NaiveDate,
    reference: String,
    description: String,
    source_id: AggregateId,
    total_debit: Money,
    total_credit: Money,
    status: EntryStatus,
    created_by: UserId,
    created_at: DateTime<Utc>,
    lines: Vec<JournalLine>,
}

impl JournalEntry {
    /// Validate a draft: at least one line, well-formed lines, debits == credits.
    pub fn post(draft: JournalEntryDraft) -> DomainResult<Self> {
        if draft.lines.is_empty() {
            return Err(DomainError::validation("journal entry must have lines"));
        }

        let mut debit_total: i128 = 0;
        let mut credit_total: i128 = 0;

        for line in &draft.lines {
            line.validate()?;
            debit_total += i128::from(line.debit.minor());
            credit_total += i128::from(line.credit.minor());
        }

        if debit_total != credit_total {
            return Err(DomainError::invariant("debits must equal credits"));
        }
        let total = i64::try_from(debit_total)
            .map(Money::from_minor)
            .map_err(|_| DomainError::validation("journal entry total is too large"))?;

        Ok(Self {
            id: draft.id,
            number: draft.number,
            entry_date: draft.entry_date,
            reference: draft.reference,
            description: draft.description,
            source_id: draft.source_id,
            total_debit: total,
            total_credit: total,
            status: EntryStatus::Posted,
            created_by: draft.created_by,
            created_at: draft.created_at,
            lines: draft.lines,
        })
    }

    pub fn id(&self) -> JournalEntryId {
        self.id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn entry_date(&self) -> NaiveDate {
        self.entry_date
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn source_id(&self) -> AggregateId {
        self.source_id
    }

    pub fn total_debit(&self) -> Money {
        self.total_debit
    }

    pub fn total_credit(&self) -> Money {
        self.total_credit
    }

    pub fn status(&self) -> EntryStatus {
        self.status
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn lines(&self) -> &[JournalLine] {
        &self.lines
    }

    /// Line booked against `code`, if any.
    pub fn line_for(&self, code: &str) -> Option<&JournalLine> {
        self.lines.iter().find(|l| l.account_code == code)
    }
}
