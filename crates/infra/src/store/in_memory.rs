use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use salespost_accounting::{Account, JournalEntry, LedgerEntry, NewLedgerEntry, default_chart};
use salespost_core::{AggregateId, ExpectedVersion};
use salespost_inventory::{ProductId, ProductStock};
use salespost_parties::{Client, ClientId, RiderId, SalesRepId};
use salespost_sales::{Order, OrderFlow, OrderId, OrderItem, OrderRecord};

use super::{
    AccountingRepository, OrderRepository, PartyRepository, ProductRepository, Store, StoreError,
    Transaction,
};

/// Named points where a test can make the in-memory store fail once.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    InsertJournalEntry,
    AppendLedgerEntry,
    IncrementStock,
    SaveOrder,
    Commit,
}

#[derive(Debug, Default, Clone)]
struct State {
    /// Order headers; items live in `items`.
    orders: HashMap<OrderId, OrderRecord>,
    items: HashMap<OrderId, Vec<OrderItem>>,
    sequences: HashMap<OrderFlow, u64>,
    products: HashMap<ProductId, ProductStock>,
    clients: HashMap<ClientId, Client>,
    sales_reps: HashSet<SalesRepId>,
    riders: HashSet<RiderId>,
    accounts: Vec<Account>,
    journal: Vec<JournalEntry>,
    ledger: Vec<LedgerEntry>,
    next_ledger_id: i64,
}

/// In-memory store for tests/dev.
///
/// One mutex guards the whole state and a transaction holds it from `begin`
/// until commit or drop, so transactions are fully serialized. Writes go to a
/// private copy that replaces the shared state on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
    failures: Arc<std::sync::Mutex<HashMap<FailurePoint, StoreError>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Make the next operation at `point` fail with `StoreError::Unavailable`.
    pub fn fail_once(&self, point: FailurePoint) {
        self.inject(point, StoreError::Unavailable(format!("injected failure at {point:?}")));
    }

    /// Make the next operation at `point` report a lost write race.
    pub fn conflict_once(&self, point: FailurePoint) {
        self.inject(point, StoreError::Conflict(format!("injected conflict at {point:?}")));
    }

    fn inject(&self, point: FailurePoint, err: StoreError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(point, err);
        }
    }

    /// Every journal entry, in insertion order.
    pub async fn journal_entries(&self) -> Vec<JournalEntry> {
        self.state.lock().await.journal.clone()
    }

    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStoreBuilder {
    state: State,
}

impl InMemoryStoreBuilder {
    pub fn client(mut self, client: Client) -> Self {
        self.state.clients.insert(client.id(), client);
        self
    }

    pub fn sales_rep(mut self, id: SalesRepId) -> Self {
        self.state.sales_reps.insert(id);
        self
    }

    pub fn rider(mut self, id: RiderId) -> Self {
        self.state.riders.insert(id);
        self
    }

    pub fn product(mut self, product: ProductStock) -> Self {
        self.state.products.insert(product.id(), product);
        self
    }

    pub fn account(mut self, account: Account) -> Self {
        self.state.accounts.push(account);
        self
    }

    /// Install the accounts the sales posting template needs.
    pub fn default_chart(mut self) -> Self {
        self.state.accounts.extend(default_chart());
        self
    }

    pub fn build(self) -> InMemoryStore {
        InMemoryStore {
            state: Arc::new(Mutex::new(self.state)),
            failures: Arc::default(),
        }
    }
}

pub struct InMemoryTx {
    guard: OwnedMutexGuard<State>,
    work: State,
    failures: Arc<std::sync::Mutex<HashMap<FailurePoint, StoreError>>>,
}

impl InMemoryTx {
    fn trip(&self, point: FailurePoint) -> Result<(), StoreError> {
        let mut failures = self
            .failures
            .lock()
            .map_err(|_| StoreError::Unavailable("failure plan lock poisoned".to_string()))?;
        match failures.remove(&point) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn assemble(&self, id: OrderId) -> Option<Order> {
        let mut record = self.work.orders.get(&id)?.clone();
        record.items = self.work.items.get(&id).cloned().unwrap_or_default();
        Some(Order::from_record(record))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<InMemoryTx, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let work = guard.clone();
        Ok(InMemoryTx {
            guard,
            work,
            failures: self.failures.clone(),
        })
    }
}

#[async_trait]
impl Transaction for InMemoryTx {
    async fn commit(mut self) -> Result<(), StoreError> {
        self.trip(FailurePoint::Commit)?;
        *self.guard = self.work;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryTx {
    async fn next_order_sequence(&mut self, flow: OrderFlow) -> Result<u64, StoreError> {
        let seq = self.work.sequences.entry(flow).or_insert(0);
        *seq += 1;
        Ok(*seq)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        let id = order.id_typed();
        if self.work.orders.contains_key(&id) {
            return Err(StoreError::Conflict(format!("order {id} already exists")));
        }
        let mut record = order.to_record();
        let items = std::mem::take(&mut record.items);
        self.work.orders.insert(id, record);
        self.work.items.insert(id, items);
        Ok(())
    }

    async fn load_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.assemble(id))
    }

    async fn load_order_for_update(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.assemble(id))
    }

    async fn save_order(&mut self, order: &Order, expected: ExpectedVersion) -> Result<(), StoreError> {
        self.trip(FailurePoint::SaveOrder)?;
        let id = order.id_typed();
        let stored = self
            .work
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::Missing(format!("order {id}")))?;
        if !expected.matches(stored.version) {
            return Err(StoreError::Conflict(format!(
                "order {id}: expected {expected:?}, found version {}",
                stored.version
            )));
        }
        let mut record = order.to_record();
        record.items.clear();
        *stored = record;
        Ok(())
    }

    async fn replace_items(&mut self, id: OrderId, items: &[OrderItem]) -> Result<(), StoreError> {
        if !self.work.orders.contains_key(&id) {
            return Err(StoreError::Missing(format!("order {id}")));
        }
        self.work.items.insert(id, items.to_vec());
        Ok(())
    }

    async fn delete_order(&mut self, id: OrderId) -> Result<(), StoreError> {
        self.work.items.remove(&id);
        self.work
            .orders
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::Missing(format!("order {id}")))
    }
}

#[async_trait]
impl ProductRepository for InMemoryTx {
    async fn missing_products(&mut self, ids: &[ProductId]) -> Result<Vec<ProductId>, StoreError> {
        let mut missing: Vec<ProductId> = ids
            .iter()
            .filter(|id| !self.work.products.contains_key(id))
            .copied()
            .collect();
        missing.sort();
        missing.dedup();
        Ok(missing)
    }

    async fn product_stock(&mut self, id: ProductId) -> Result<Option<ProductStock>, StoreError> {
        Ok(self.work.products.get(&id).cloned())
    }

    async fn increment_stock(&mut self, id: ProductId, quantity: i64) -> Result<i64, StoreError> {
        self.trip(FailurePoint::IncrementStock)?;
        let product = self
            .work
            .products
            .get_mut(&id)
            .ok_or_else(|| StoreError::Missing(format!("product {id}")))?;
        product
            .receive(quantity)
            .map_err(|e| StoreError::Corrupt(format!("product {id}: {e}")))
    }
}

#[async_trait]
impl PartyRepository for InMemoryTx {
    async fn client(&mut self, id: ClientId) -> Result<Option<Client>, StoreError> {
        Ok(self.work.clients.get(&id).cloned())
    }

    async fn sales_rep_exists(&mut self, id: SalesRepId) -> Result<bool, StoreError> {
        Ok(self.work.sales_reps.contains(&id))
    }

    async fn rider_exists(&mut self, id: RiderId) -> Result<bool, StoreError> {
        Ok(self.work.riders.contains(&id))
    }
}

#[async_trait]
impl AccountingRepository for InMemoryTx {
    async fn active_account(&mut self, code: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .work
            .accounts
            .iter()
            .find(|a| a.code == code && a.active)
            .cloned())
    }

    async fn journal_entry_for_source(&mut self, source_id: AggregateId) -> Result<Option<JournalEntry>, StoreError> {
        Ok(self
            .work
            .journal
            .iter()
            .find(|e| e.source_id() == source_id)
            .cloned())
    }

    async fn insert_journal_entry(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        self.trip(FailurePoint::InsertJournalEntry)?;
        if self.work.journal.iter().any(|e| e.source_id() == entry.source_id()) {
            return Err(StoreError::Conflict(format!(
                "journal entry for source {} already exists",
                entry.source_id()
            )));
        }
        self.work.journal.push(entry.clone());
        Ok(())
    }

    async fn lock_client_ledger(&mut self, _client_id: ClientId) -> Result<(), StoreError> {
        // The whole store is already held by this transaction.
        Ok(())
    }

    async fn ledger_tail(&mut self, client_id: ClientId) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self
            .work
            .ledger
            .iter()
            .filter(|e| e.client_id == client_id)
            .max_by_key(|e| (e.entry_date, e.id))
            .cloned())
    }

    async fn append_ledger_entry(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        self.trip(FailurePoint::AppendLedgerEntry)?;
        let client = self
            .work
            .clients
            .get_mut(&entry.client_id)
            .ok_or_else(|| StoreError::Missing(format!("client {}", entry.client_id)))?;

        self.work.next_ledger_id += 1;
        let stored = entry.into_entry(self.work.next_ledger_id);
        *client = Client::restore(client.id(), client.name(), stored.running_balance);
        self.work.ledger.push(stored.clone());
        Ok(stored)
    }

    async fn ledger_entries(&mut self, client_id: ClientId) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut rows: Vec<LedgerEntry> = self
            .work
            .ledger
            .iter()
            .filter(|e| e.client_id == client_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| (e.entry_date, e.id));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use salespost_core::Money;

    fn row(client_id: ClientId, amount: i64, tail: Option<&LedgerEntry>) -> NewLedgerEntry {
        NewLedgerEntry::append(
            tail,
            salespost_accounting::LedgerPosting {
                client_id,
                date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
                description: "Sales order SO-000001".to_string(),
                reference_type: "sales_order".to_string(),
                reference_id: AggregateId::new(),
                debit: Money::from_minor(amount),
                credit: Money::ZERO,
                created_at: Utc::now(),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let client = Client::new(ClientId::generate(), "Acme Stores");
        let client_id = client.id();
        let store = InMemoryStore::builder().client(client).build();

        {
            let mut tx = store.begin().await.unwrap();
            tx.append_ledger_entry(row(client_id, 500, None)).await.unwrap();
            // dropped without commit
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx.ledger_entries(client_id).await.unwrap().is_empty());
        assert_eq!(tx.client(client_id).await.unwrap().unwrap().balance(), Money::ZERO);
    }

    #[tokio::test]
    async fn ledger_append_mirrors_client_balance() {
        let client = Client::new(ClientId::generate(), "Acme Stores");
        let client_id = client.id();
        let store = InMemoryStore::builder().client(client).build();

        let mut tx = store.begin().await.unwrap();
        let first = tx.append_ledger_entry(row(client_id, 500, None)).await.unwrap();
        tx.append_ledger_entry(row(client_id, 250, Some(&first))).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let tail = tx.ledger_tail(client_id).await.unwrap().unwrap();
        assert_eq!(tail.running_balance, Money::from_minor(750));
        assert_eq!(tx.client(client_id).await.unwrap().unwrap().balance(), Money::from_minor(750));
    }

    #[tokio::test]
    async fn injected_commit_failure_discards_writes() {
        let store = InMemoryStore::new();
        store.fail_once(FailurePoint::Commit);

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_order_sequence(OrderFlow::SalesOrder).await.unwrap(), 1);
        assert!(matches!(tx.commit().await, Err(StoreError::Unavailable(_))));

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_order_sequence(OrderFlow::SalesOrder).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sequences_are_per_flow() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.next_order_sequence(OrderFlow::SalesOrder).await.unwrap(), 1);
        assert_eq!(tx.next_order_sequence(OrderFlow::SalesOrder).await.unwrap(), 2);
        assert_eq!(tx.next_order_sequence(OrderFlow::UpliftSale).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_products_are_reported_once() {
        let known = ProductStock::new(ProductId::generate(), "Soap 500g", 4);
        let known_id = known.id();
        let unknown = ProductId::generate();
        let store = InMemoryStore::builder().product(known).build();

        let mut tx = store.begin().await.unwrap();
        let missing = tx.missing_products(&[known_id, unknown, unknown]).await.unwrap();
        assert_eq!(missing, vec![unknown]);
    }
}
