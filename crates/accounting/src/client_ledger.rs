//! Per-client receivable ledger with running balances.
//!
//! Rows are ordered by `(entry_date, id)`. Each row's running balance is the
//! previous row's balance plus its own debit minus credit. New rows are always
//! appended at the tail: their date is clamped to the tail's date.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use salespost_core::{AggregateId, DomainError, DomainResult, Money};
use salespost_parties::ClientId;

/// Stored ledger row. `id` is assigned by the store and increases monotonically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub client_id: ClientId,
    pub entry_date: NaiveDate,
    pub description: String,
    pub reference_type: String,
    pub reference_id: AggregateId,
    pub debit: Money,
    pub credit: Money,
    pub running_balance: Money,
    pub created_at: DateTime<Utc>,
}

/// Movement to record against a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPosting {
    pub client_id: ClientId,
    pub date: NaiveDate,
    pub description: String,
    pub reference_type: String,
    pub reference_id: AggregateId,
    pub debit: Money,
    pub credit: Money,
    pub created_at: DateTime<Utc>,
}

/// Row ready to append (no id yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub client_id: ClientId,
    pub entry_date: NaiveDate,
    pub description: String,
    pub reference_type: String,
    pub reference_id: AggregateId,
    pub debit: Money,
    pub credit: Money,
    pub running_balance: Money,
    pub created_at: DateTime<Utc>,
}

impl NewLedgerEntry {
    /// Chain `posting` after `tail`, the client's latest row (if any).
    pub fn append(tail: Option<&LedgerEntry>, posting: LedgerPosting) -> DomainResult<Self> {
        if posting.debit.is_negative() || posting.credit.is_negative() {
            return Err(DomainError::validation("ledger amounts cannot be negative"));
        }
        if posting.debit.is_zero() && posting.credit.is_zero() {
            return Err(DomainError::validation("ledger row must move the balance"));
        }

        let (previous, entry_date) = match tail {
            Some(tail) => {
                if tail.client_id != posting.client_id {
                    return Err(DomainError::invariant("ledger tail belongs to another client"));
                }
                (tail.running_balance, posting.date.max(tail.entry_date))
            }
            None => (Money::ZERO, posting.date),
        };

        let running_balance = previous
            .checked_add(posting.debit)
            .and_then(|b| b.checked_sub(posting.credit))
            .ok_or_else(|| DomainError::invariant("running balance overflow"))?;

        Ok(Self {
            client_id: posting.client_id,
            entry_date,
            description: posting.description,
            reference_type: posting.reference_type,
            reference_id: posting.reference_id,
            debit: posting.debit,
            credit: posting.credit,
            running_balance,
            created_at: posting.created_at,
        })
    }

    pub fn into_entry(self, id: i64) -> LedgerEntry {
        LedgerEntry {
            id,
            client_id: self.client_id,
            entry_date: self.entry_date,
            description: self.description,
            reference_type: self.reference_type,
            reference_id: self.reference_id,
            debit: self.debit,
            credit: self.credit,
            running_balance: self.running_balance,
            created_at: self.created_at,
        }
    }
}

/// Check the running-balance chain of one client's rows. Returns the final balance.
pub fn verify_running_balances(entries: &[LedgerEntry]) -> DomainResult<Money> {
    let mut ordered: Vec<&LedgerEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| (e.entry_date, e.id));

    let mut balance = Money::ZERO;
    let mut client = None;
    for entry in ordered {
        if *client.get_or_insert(entry.client_id) != entry.client_id {
            return Err(DomainError::invariant("ledger rows span several clients"));
        }
        balance = balance
            .checked_add(entry.debit)
            .and_then(|b| b.checked_sub(entry.credit))
            .ok_or_else(|| DomainError::invariant(format!("ledger row {} overflows the balance", entry.id)))?;
        if entry.running_balance != balance {
            return Err(DomainError::invariant(format!(
                "ledger row {} has running balance {} but the chain gives {}",
                entry.id, entry.running_balance, balance
            )));
        }
    }
    Ok(balance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn posting(client_id: ClientId, date: NaiveDate, debit: i64) -> LedgerPosting {
        LedgerPosting {
            client_id,
            date,
            description: "Sales order SO-000001".to_string(),
            reference_type: "sales_order".to_string(),
            reference_id: AggregateId::new(),
            debit: Money::from_minor(debit),
            credit: Money::ZERO,
            created_at: Utc::now(),
        }
    }

    fn chain(client_id: ClientId, amounts: &[i64]) -> Vec<LedgerEntry> {
        let mut rows: Vec<LedgerEntry> = Vec::new();
        for (i, amount) in amounts.iter().enumerate() {
            let next = NewLedgerEntry::append(rows.last(), posting(client_id, day(1), *amount)).unwrap();
            rows.push(next.into_entry(i as i64 + 1));
        }
        rows
    }

    #[test]
    fn first_row_starts_from_zero() {
        let row = NewLedgerEntry::append(None, posting(ClientId::generate(), day(14), 46_400)).unwrap();
        assert_eq!(row.running_balance, Money::from_minor(46_400));
        assert_eq!(row.entry_date, day(14));
    }

    #[test]
    fn rows_chain_on_the_tail() {
        let client = ClientId::generate();
        let rows = chain(client, &[46_400, 11_600]);
        assert_eq!(rows[1].running_balance, Money::from_minor(58_000));
        assert_eq!(verify_running_balances(&rows).unwrap(), Money::from_minor(58_000));
    }

    #[test]
    fn backdated_posting_is_clamped_to_the_tail_date() {
        let client = ClientId::generate();
        let tail = NewLedgerEntry::append(None, posting(client, day(20), 100))
            .unwrap()
            .into_entry(1);
        let next = NewLedgerEntry::append(Some(&tail), posting(client, day(3), 100)).unwrap();
        assert_eq!(next.entry_date, day(20));
    }

    #[test]
    fn foreign_tail_is_rejected() {
        let tail = NewLedgerEntry::append(None, posting(ClientId::generate(), day(1), 100))
            .unwrap()
            .into_entry(1);
        let err = NewLedgerEntry::append(Some(&tail), posting(ClientId::generate(), day(1), 100)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn zero_movement_is_rejected() {
        let err = NewLedgerEntry::append(None, posting(ClientId::generate(), day(1), 0)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn verify_detects_a_broken_chain() {
        let client = ClientId::generate();
        let mut rows = chain(client, &[100, 200, 300]);
        rows[1].running_balance = Money::from_minor(999);
        let err = verify_running_balances(&rows).unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) => assert!(msg.contains("ledger row 2")),
            other => panic!("expected InvariantViolation, got {other:?}"),
        }
    }

    #[test]
    fn verify_reports_overflow_instead_of_panicking() {
        let client = ClientId::generate();
        let mut rows = chain(client, &[100, 200]);
        rows[1].debit = Money::from_minor(i64::MAX);
        let err = verify_running_balances(&rows).unwrap_err();
        match err {
            DomainError::InvariantViolation(msg) => assert!(msg.contains("overflows")),
            other => panic!("expected InvariantViolation, got {other:?}"),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn final_balance_is_sum_of_debits(amounts in prop::collection::vec(1i64..10_000_000, 1..30)) {
            let rows = chain(ClientId::generate(), &amounts);
            let expected = Money::from_minor(amounts.iter().sum());
            prop_assert_eq!(rows.last().unwrap().running_balance, expected);
            prop_assert_eq!(verify_running_balances(&rows).unwrap(), expected);
        }
    }
}
