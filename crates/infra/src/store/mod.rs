//! Transactional persistence boundary.
//!
//! Every service operation runs inside one [`Transaction`] obtained from a
//! [`Store`]. Repositories are implemented on the transaction itself, so all
//! reads and writes of an operation share the same unit of work:
//!
//! - `commit` makes every write visible at once
//! - `rollback`, or dropping the transaction, discards all of them
//!
//! Two backends exist: [`InMemoryStore`] (tests/dev, fully serialized) and
//! [`PostgresStore`] (row locks, per-client advisory locks, versioned saves).

mod error;
pub mod in_memory;
pub mod migrations;
pub mod postgres;

use async_trait::async_trait;

use salespost_accounting::{Account, JournalEntry, LedgerEntry, NewLedgerEntry};
use salespost_core::{AggregateId, ExpectedVersion};
use salespost_inventory::{ProductId, ProductStock};
use salespost_parties::{Client, ClientId, RiderId, SalesRepId};
use salespost_sales::{Order, OrderFlow, OrderId, OrderItem};

pub use error::StoreError;
pub use in_memory::{FailurePoint, InMemoryStore, InMemoryStoreBuilder, InMemoryTx};
pub use postgres::{PgTx, PostgresStore};

#[async_trait]
pub trait OrderRepository: Send {
    /// Next number in the flow's order sequence (1, 2, ...).
    async fn next_order_sequence(&mut self, flow: OrderFlow) -> Result<u64, StoreError>;

    /// Insert a new order with its items.
    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError>;

    async fn load_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Load and lock the order for the rest of the transaction.
    async fn load_order_for_update(&mut self, id: OrderId) -> Result<Option<Order>, StoreError>;

    /// Write the order header. Fails with `Conflict` when the stored version
    /// does not match `expected`.
    async fn save_order(&mut self, order: &Order, expected: ExpectedVersion) -> Result<(), StoreError>;

    /// Replace the stored item set wholesale.
    async fn replace_items(&mut self, id: OrderId, items: &[OrderItem]) -> Result<(), StoreError>;

    async fn delete_order(&mut self, id: OrderId) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ProductRepository: Send {
    /// Which of `ids` do not exist.
    async fn missing_products(&mut self, ids: &[ProductId]) -> Result<Vec<ProductId>, StoreError>;

    async fn product_stock(&mut self, id: ProductId) -> Result<Option<ProductStock>, StoreError>;

    /// Add `quantity` to the product's stock counter; returns the new level.
    async fn increment_stock(&mut self, id: ProductId, quantity: i64) -> Result<i64, StoreError>;
}

#[async_trait]
pub trait PartyRepository: Send {
    async fn client(&mut self, id: ClientId) -> Result<Option<Client>, StoreError>;

    async fn sales_rep_exists(&mut self, id: SalesRepId) -> Result<bool, StoreError>;

    async fn rider_exists(&mut self, id: RiderId) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait AccountingRepository: Send {
    /// Active account with this code, if any.
    async fn active_account(&mut self, code: &str) -> Result<Option<Account>, StoreError>;

    /// Journal entry caused by `source_id` (at most one exists).
    async fn journal_entry_for_source(&mut self, source_id: AggregateId) -> Result<Option<JournalEntry>, StoreError>;

    async fn insert_journal_entry(&mut self, entry: &JournalEntry) -> Result<(), StoreError>;

    /// Serialize ledger appends for `client_id` until the transaction ends.
    async fn lock_client_ledger(&mut self, client_id: ClientId) -> Result<(), StoreError>;

    /// Latest row by `(entry_date, id)`.
    async fn ledger_tail(&mut self, client_id: ClientId) -> Result<Option<LedgerEntry>, StoreError>;

    /// Append a ledger row and mirror its running balance onto the client.
    ///
    /// This is the only write path for `Client.balance`.
    async fn append_ledger_entry(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError>;

    /// All rows for the client ordered by `(entry_date, id)`.
    async fn ledger_entries(&mut self, client_id: ClientId) -> Result<Vec<LedgerEntry>, StoreError>;
}

/// One atomic unit of work. Dropping it without `commit` rolls back.
#[async_trait]
pub trait Transaction:
    OrderRepository + ProductRepository + PartyRepository + AccountingRepository + Send
{
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait Store: Send + Sync {
    type Tx: Transaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}
