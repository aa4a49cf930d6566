//! Postgres-backed store.
//!
//! Each [`PgTx`] wraps one database transaction. Concurrency is handled by
//! the database:
//!
//! - orders are read with `SELECT .. FOR UPDATE` and saved with a version check
//! - ledger appends for one client are serialized by a transaction-scoped
//!   advisory lock keyed on the client id
//! - `journal_entries.source_id` is unique, so a second posting for the same
//!   order fails even if every other guard was bypassed
//!
//! ## Error Mapping
//!
//! | SQLx error | SQLSTATE | StoreError |
//! |------------|----------|------------|
//! | Database | `40001` serialization failure, `40P01` deadlock, `23505` unique violation | `Conflict` |
//! | Database | `57014` statement timeout, `08xxx` connection, `53xxx` resources, `57P01` shutdown | `Unavailable` |
//! | Database | anything else | `Corrupt` |
//! | PoolTimedOut / PoolClosed / Io / Tls | n/a | `Unavailable` |
//! | RowNotFound | n/a | `Missing` |
//! | Decode / ColumnNotFound / other | n/a | `Corrupt` |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use salespost_accounting::{
    Account, AccountId, AccountKind, JournalEntry, JournalEntryDraft, JournalEntryId, JournalLine,
    LedgerEntry, NewLedgerEntry,
};
use salespost_core::{AggregateId, ExpectedVersion, Money, UserId};
use salespost_inventory::{ProductId, ProductStock};
use salespost_parties::{Client, ClientId, RiderId, SalesRepId};
use salespost_sales::{
    Order, OrderFlow, OrderId, OrderItem, OrderRecord, OrderStatus, OrderTotals, Substatus, TaxClass,
};

use super::{
    AccountingRepository, OrderRepository, PartyRepository, ProductRepository, Store, StoreError,
    Transaction,
};

const ORDER_COLUMNS: &str = r#"
    id, flow, number, invoice_number, client_id, sales_rep_id, rider_id,
    status, substatus, subtotal, tax_amount, total_amount,
    order_date, expected_delivery_date, notes, returned_to_stock,
    created_by, created_at, updated_at, confirmed_at, assigned_at,
    dispatched_by, received_at, received_by, posting_id, version
"#;

const LEDGER_COLUMNS: &str = r#"
    id, client_id, entry_date, description, reference_type, reference_id,
    debit, credit, running_balance, created_at
"#;

/// Postgres store. Cheap to clone; all clones share the pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub struct PgTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PgTx;

    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<PgTx, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        // Bounded lock waits: a stuck writer surfaces as a retryable timeout.
        let timeout = format!("{}ms", self.statement_timeout.as_millis());
        sqlx::query(
            r#"
            SELECT
                set_config('statement_timeout', $1, true),
                set_config('lock_timeout', $1, true),
                set_config('idle_in_transaction_session_timeout', $1, true)
            "#,
        )
        .bind(&timeout)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("begin", e))?;

        Ok(PgTx { tx })
    }
}

#[async_trait]
impl Transaction for PgTx {
    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))
    }
}

impl PgTx {
    async fn fetch_order(&mut self, id: OrderId, for_update: bool) -> Result<Option<Order>, StoreError> {
        let lock = if for_update { "FOR UPDATE" } else { "" };
        let sql = format!("SELECT {ORDER_COLUMNS} FROM sales_orders WHERE id = $1 {lock}");

        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("load_order", e))?;
        let Some(row) = row else {
            return Ok(None);
        };

        let header = OrderRow::from_row(&row).map_err(|e| map_sqlx_error("load_order", e))?;
        let items = self.fetch_items(id).await?;
        let record = header.into_record(items)?;
        Ok(Some(Order::from_record(record)))
    }

    async fn fetch_items(&mut self, id: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT line_no, product_id, quantity, unit_price, tax_class, net, tax, gross
            FROM sales_order_items
            WHERE order_id = $1
            ORDER BY line_no ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_items", e))?;

        rows.iter()
            .map(|row| {
                OrderItemRow::from_row(row)
                    .map_err(|e| map_sqlx_error("load_items", e))
                    .and_then(OrderItemRow::into_item)
            })
            .collect()
    }

    async fn insert_items(&mut self, id: OrderId, items: &[OrderItem]) -> Result<(), StoreError> {
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO sales_order_items
                    (order_id, line_no, product_id, quantity, unit_price, tax_class, net, tax, gross)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(id.as_uuid())
            .bind(item.line_no as i32)
            .bind(item.product_id.as_uuid())
            .bind(item.quantity)
            .bind(item.unit_price.minor())
            .bind(item.tax_class.as_str())
            .bind(item.net.minor())
            .bind(item.tax.minor())
            .bind(item.gross.minor())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_items", e))?;
        }
        Ok(())
    }

    async fn fetch_journal_lines(&mut self, entry_id: Uuid) -> Result<Vec<JournalLine>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT account_id, account_code, debit, credit, description
            FROM journal_entry_lines
            WHERE entry_id = $1
            ORDER BY line_no ASC
            "#,
        )
        .bind(entry_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("load_journal_lines", e))?;

        rows.iter()
            .map(|row| {
                Ok(JournalLine {
                    account_id: AccountId::from(row.try_get::<Uuid, _>("account_id")?),
                    account_code: row.try_get("account_code")?,
                    debit: Money::from_minor(row.try_get("debit")?),
                    credit: Money::from_minor(row.try_get("credit")?),
                    description: row.try_get("description")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| map_sqlx_error("load_journal_lines", e))
    }
}

#[async_trait]
impl OrderRepository for PgTx {
    #[instrument(skip(self), fields(flow = flow.as_str()), err)]
    async fn next_order_sequence(&mut self, flow: OrderFlow) -> Result<u64, StoreError> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO order_sequences (flow, last_value)
            VALUES ($1, 1)
            ON CONFLICT (flow) DO UPDATE SET last_value = order_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(flow.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("next_order_sequence", e))?;

        u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative sequence for {}", flow.as_str())))
    }

    #[instrument(skip(self, order), fields(order_id = %order.id_typed(), number = order.number()), err)]
    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        let record = order.to_record();
        sqlx::query(
            r#"
            INSERT INTO sales_orders (
                id, flow, number, invoice_number, client_id, sales_rep_id, rider_id,
                status, substatus, subtotal, tax_amount, total_amount,
                order_date, expected_delivery_date, notes, returned_to_stock,
                created_by, created_at, updated_at, confirmed_at, assigned_at,
                dispatched_by, received_at, received_by, posting_id, version
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7,
                $8, $9, $10, $11, $12,
                $13, $14, $15, $16,
                $17, $18, $19, $20, $21,
                $22, $23, $24, $25, $26
            )
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.flow.as_str())
        .bind(&record.number)
        .bind(&record.invoice_number)
        .bind(record.client_id.as_uuid())
        .bind(record.sales_rep_id.map(|id| *id.as_uuid()))
        .bind(record.rider_id.map(|id| *id.as_uuid()))
        .bind(record.status.as_str())
        .bind(record.substatus.code())
        .bind(record.totals.subtotal.minor())
        .bind(record.totals.tax_amount.minor())
        .bind(record.totals.total_amount.minor())
        .bind(record.order_date)
        .bind(record.expected_delivery_date)
        .bind(&record.notes)
        .bind(record.returned_to_stock)
        .bind(record.created_by.as_uuid())
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.confirmed_at)
        .bind(record.assigned_at)
        .bind(record.dispatched_by.map(|id| *id.as_uuid()))
        .bind(record.received_at)
        .bind(record.received_by.map(|id| *id.as_uuid()))
        .bind(record.posting_id.map(|id| *id.as_uuid()))
        .bind(version_to_db(record.version)?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;

        self.insert_items(record.id, &record.items).await
    }

    async fn load_order(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        self.fetch_order(id, false).await
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn load_order_for_update(&mut self, id: OrderId) -> Result<Option<Order>, StoreError> {
        self.fetch_order(id, true).await
    }

    #[instrument(skip(self, order), fields(order_id = %order.id_typed(), expected = ?expected), err)]
    async fn save_order(&mut self, order: &Order, expected: ExpectedVersion) -> Result<(), StoreError> {
        let record = order.to_record();
        let expected_version = match expected {
            ExpectedVersion::Any => None,
            ExpectedVersion::Exact(v) => Some(version_to_db(v)?),
        };

        let result = sqlx::query(
            r#"
            UPDATE sales_orders SET
                invoice_number = $2,
                client_id = $3,
                sales_rep_id = $4,
                rider_id = $5,
                status = $6,
                substatus = $7,
                subtotal = $8,
                tax_amount = $9,
                total_amount = $10,
                order_date = $11,
                expected_delivery_date = $12,
                notes = $13,
                returned_to_stock = $14,
                updated_at = $15,
                confirmed_at = $16,
                assigned_at = $17,
                dispatched_by = $18,
                received_at = $19,
                received_by = $20,
                posting_id = $21,
                version = $22
            WHERE id = $1 AND ($23::bigint IS NULL OR version = $23)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(&record.invoice_number)
        .bind(record.client_id.as_uuid())
        .bind(record.sales_rep_id.map(|id| *id.as_uuid()))
        .bind(record.rider_id.map(|id| *id.as_uuid()))
        .bind(record.status.as_str())
        .bind(record.substatus.code())
        .bind(record.totals.subtotal.minor())
        .bind(record.totals.tax_amount.minor())
        .bind(record.totals.total_amount.minor())
        .bind(record.order_date)
        .bind(record.expected_delivery_date)
        .bind(&record.notes)
        .bind(record.returned_to_stock)
        .bind(record.updated_at)
        .bind(record.confirmed_at)
        .bind(record.assigned_at)
        .bind(record.dispatched_by.map(|id| *id.as_uuid()))
        .bind(record.received_at)
        .bind(record.received_by.map(|id| *id.as_uuid()))
        .bind(record.posting_id.map(|id| *id.as_uuid()))
        .bind(version_to_db(record.version)?)
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_order", e))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM sales_orders WHERE id = $1)")
            .bind(record.id.as_uuid())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("save_order", e))?;
        if exists {
            Err(StoreError::Conflict(format!("order {}: expected {expected:?}", record.id)))
        } else {
            Err(StoreError::Missing(format!("order {}", record.id)))
        }
    }

    #[instrument(skip(self, items), fields(order_id = %id, item_count = items.len()), err)]
    async fn replace_items(&mut self, id: OrderId, items: &[OrderItem]) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sales_order_items WHERE order_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("replace_items", e))?;
        self.insert_items(id, items).await
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn delete_order(&mut self, id: OrderId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM sales_orders WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_order", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("order {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ProductRepository for PgTx {
    async fn missing_products(&mut self, ids: &[ProductId]) -> Result<Vec<ProductId>, StoreError> {
        let wanted: Vec<Uuid> = ids.iter().map(|id| *id.as_uuid()).collect();
        let found: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM products WHERE id = ANY($1)")
            .bind(&wanted)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("missing_products", e))?;

        let mut missing: Vec<ProductId> = ids
            .iter()
            .filter(|id| !found.contains(id.as_uuid()))
            .copied()
            .collect();
        missing.sort();
        missing.dedup();
        Ok(missing)
    }

    async fn product_stock(&mut self, id: ProductId) -> Result<Option<ProductStock>, StoreError> {
        let row = sqlx::query("SELECT id, name, current_stock FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("product_stock", e))?;

        row.map(|row| {
            Ok(ProductStock::new(
                ProductId::from(row.try_get::<Uuid, _>("id")?),
                row.try_get::<String, _>("name")?,
                row.try_get("current_stock")?,
            ))
        })
        .transpose()
        .map_err(|e: sqlx::Error| map_sqlx_error("product_stock", e))
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn increment_stock(&mut self, id: ProductId, quantity: i64) -> Result<i64, StoreError> {
        let stock: Option<i64> = sqlx::query_scalar(
            "UPDATE products SET current_stock = current_stock + $2 WHERE id = $1 RETURNING current_stock",
        )
        .bind(id.as_uuid())
        .bind(quantity)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("increment_stock", e))?;

        stock.ok_or_else(|| StoreError::Missing(format!("product {id}")))
    }
}

#[async_trait]
impl PartyRepository for PgTx {
    async fn client(&mut self, id: ClientId) -> Result<Option<Client>, StoreError> {
        let row = sqlx::query("SELECT id, name, balance FROM clients WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("client", e))?;

        row.map(|row| {
            Ok(Client::restore(
                ClientId::from(row.try_get::<Uuid, _>("id")?),
                row.try_get::<String, _>("name")?,
                Money::from_minor(row.try_get("balance")?),
            ))
        })
        .transpose()
        .map_err(|e: sqlx::Error| map_sqlx_error("client", e))
    }

    async fn sales_rep_exists(&mut self, id: SalesRepId) -> Result<bool, StoreError> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM sales_reps WHERE id = $1)")
            .bind(id.as_uuid())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("sales_rep_exists", e))
    }

    async fn rider_exists(&mut self, id: RiderId) -> Result<bool, StoreError> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM riders WHERE id = $1)")
            .bind(id.as_uuid())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("rider_exists", e))
    }
}

#[async_trait]
impl AccountingRepository for PgTx {
    async fn active_account(&mut self, code: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query("SELECT id, code, name, kind, active FROM accounts WHERE code = $1 AND active")
            .bind(code)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("active_account", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw = AccountRow::from_row(&row).map_err(|e| map_sqlx_error("active_account", e))?;
        let kind = AccountKind::parse(&raw.kind)
            .ok_or_else(|| StoreError::Corrupt(format!("account {}: unknown kind {:?}", raw.code, raw.kind)))?;
        Ok(Some(Account {
            id: AccountId::from(raw.id),
            code: raw.code,
            name: raw.name,
            kind,
            active: raw.active,
        }))
    }

    #[instrument(skip(self), fields(source_id = %source_id), err)]
    async fn journal_entry_for_source(&mut self, source_id: AggregateId) -> Result<Option<JournalEntry>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, number, entry_date, reference, description, source_id, created_by, created_at
            FROM journal_entries
            WHERE source_id = $1
            "#,
        )
        .bind(source_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("journal_entry_for_source", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let header = JournalEntryRow::from_row(&row).map_err(|e| map_sqlx_error("journal_entry_for_source", e))?;
        let lines = self.fetch_journal_lines(header.id).await?;
        let number = header.number.clone();

        JournalEntry::post(JournalEntryDraft {
            id: JournalEntryId::from(header.id),
            number: header.number,
            entry_date: header.entry_date,
            reference: header.reference,
            description: header.description,
            source_id: AggregateId::from_uuid(header.source_id),
            created_by: UserId::from_uuid(header.created_by),
            created_at: header.created_at,
            lines,
        })
        .map(Some)
        .map_err(|e| StoreError::Corrupt(format!("journal entry {number}: {e}")))
    }

    #[instrument(skip(self, entry), fields(number = entry.number(), source_id = %entry.source_id()), err)]
    async fn insert_journal_entry(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO journal_entries (
                id, number, entry_date, reference, description, source_id,
                total_debit, total_credit, status, created_by, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id().as_uuid())
        .bind(entry.number())
        .bind(entry.entry_date())
        .bind(entry.reference())
        .bind(entry.description())
        .bind(entry.source_id().as_uuid())
        .bind(entry.total_debit().minor())
        .bind(entry.total_credit().minor())
        .bind(entry.status().as_str())
        .bind(entry.created_by().as_uuid())
        .bind(entry.created_at())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_journal_entry", e))?;

        for (line_no, line) in entry.lines().iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO journal_entry_lines
                    (entry_id, line_no, account_id, account_code, debit, credit, description)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(entry.id().as_uuid())
            .bind(line_no as i32 + 1)
            .bind(line.account_id.as_uuid())
            .bind(&line.account_code)
            .bind(line.debit.minor())
            .bind(line.credit.minor())
            .bind(&line.description)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_journal_entry", e))?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(client_id = %client_id), err)]
    async fn lock_client_ledger(&mut self, client_id: ClientId) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("client_ledger:{client_id}"))
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_client_ledger", e))?;
        debug!("client ledger locked");
        Ok(())
    }

    async fn ledger_tail(&mut self, client_id: ClientId) -> Result<Option<LedgerEntry>, StoreError> {
        let sql = format!(
            "SELECT {LEDGER_COLUMNS} FROM client_ledger WHERE client_id = $1 ORDER BY entry_date DESC, id DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(client_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("ledger_tail", e))?;

        row.map(|row| LedgerRow::from_row(&row).map(LedgerRow::into_entry))
            .transpose()
            .map_err(|e| map_sqlx_error("ledger_tail", e))
    }

    #[instrument(skip(self, entry), fields(client_id = %entry.client_id, debit = %entry.debit), err)]
    async fn append_ledger_entry(&mut self, entry: NewLedgerEntry) -> Result<LedgerEntry, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO client_ledger (
                client_id, entry_date, description, reference_type, reference_id,
                debit, credit, running_balance, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(entry.client_id.as_uuid())
        .bind(entry.entry_date)
        .bind(&entry.description)
        .bind(&entry.reference_type)
        .bind(entry.reference_id.as_uuid())
        .bind(entry.debit.minor())
        .bind(entry.credit.minor())
        .bind(entry.running_balance.minor())
        .bind(entry.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_ledger_entry", e))?;

        let updated = sqlx::query("UPDATE clients SET balance = $2 WHERE id = $1")
            .bind(entry.client_id.as_uuid())
            .bind(entry.running_balance.minor())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("append_ledger_entry", e))?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::Missing(format!("client {}", entry.client_id)));
        }

        Ok(entry.into_entry(id))
    }

    async fn ledger_entries(&mut self, client_id: ClientId) -> Result<Vec<LedgerEntry>, StoreError> {
        let sql = format!(
            "SELECT {LEDGER_COLUMNS} FROM client_ledger WHERE client_id = $1 ORDER BY entry_date ASC, id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(client_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("ledger_entries", e))?;

        rows.iter()
            .map(|row| LedgerRow::from_row(row).map(LedgerRow::into_entry))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| map_sqlx_error("ledger_entries", e))
    }
}

fn version_to_db(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version).map_err(|_| StoreError::Corrupt(format!("version {version} out of range")))
}

/// Map a SQLSTATE code to the store error a caller should see.
fn store_error_for_sqlstate(code: &str, msg: String) -> StoreError {
    match code {
        "40001" | "40P01" | "23505" => StoreError::Conflict(msg),
        "57014" | "55P03" | "57P01" => StoreError::Unavailable(msg),
        c if c.starts_with("08") || c.starts_with("53") => StoreError::Unavailable(msg),
        _ => StoreError::Corrupt(msg),
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code() {
                Some(code) => store_error_for_sqlstate(code.as_ref(), msg),
                None => StoreError::Corrupt(msg),
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool unavailable in {operation}: {err}"))
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::Unavailable(format!("connection failure in {operation}: {err}"))
        }
        sqlx::Error::RowNotFound => StoreError::Missing(format!("row not found in {operation}")),
        _ => StoreError::Corrupt(format!("sqlx error in {operation}: {err}")),
    }
}

// SQLx row types

#[derive(Debug)]
struct OrderRow {
    id: Uuid,
    flow: String,
    number: String,
    invoice_number: Option<String>,
    client_id: Uuid,
    sales_rep_id: Option<Uuid>,
    rider_id: Option<Uuid>,
    status: String,
    substatus: i16,
    subtotal: i64,
    tax_amount: i64,
    total_amount: i64,
    order_date: NaiveDate,
    expected_delivery_date: Option<NaiveDate>,
    notes: Option<String>,
    returned_to_stock: bool,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    assigned_at: Option<DateTime<Utc>>,
    dispatched_by: Option<Uuid>,
    received_at: Option<DateTime<Utc>>,
    received_by: Option<Uuid>,
    posting_id: Option<Uuid>,
    version: i64,
}

impl<'r> FromRow<'r, PgRow> for OrderRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(OrderRow {
            id: row.try_get("id")?,
            flow: row.try_get("flow")?,
            number: row.try_get("number")?,
            invoice_number: row.try_get("invoice_number")?,
            client_id: row.try_get("client_id")?,
            sales_rep_id: row.try_get("sales_rep_id")?,
            rider_id: row.try_get("rider_id")?,
            status: row.try_get("status")?,
            substatus: row.try_get("substatus")?,
            subtotal: row.try_get("subtotal")?,
            tax_amount: row.try_get("tax_amount")?,
            total_amount: row.try_get("total_amount")?,
            order_date: row.try_get("order_date")?,
            expected_delivery_date: row.try_get("expected_delivery_date")?,
            notes: row.try_get("notes")?,
            returned_to_stock: row.try_get("returned_to_stock")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            confirmed_at: row.try_get("confirmed_at")?,
            assigned_at: row.try_get("assigned_at")?,
            dispatched_by: row.try_get("dispatched_by")?,
            received_at: row.try_get("received_at")?,
            received_by: row.try_get("received_by")?,
            posting_id: row.try_get("posting_id")?,
            version: row.try_get("version")?,
        })
    }
}

impl OrderRow {
    fn into_record(self, items: Vec<OrderItem>) -> Result<OrderRecord, StoreError> {
        let corrupt = |what: &str| StoreError::Corrupt(format!("order {}: {what}", self.number));

        let flow = OrderFlow::parse(&self.flow).ok_or_else(|| corrupt("unknown flow"))?;
        let status = OrderStatus::parse(&self.status).map_err(|_| corrupt("unknown status"))?;
        let substatus = Substatus::from_code(self.substatus).ok_or_else(|| corrupt("unknown substatus"))?;
        let version = u64::try_from(self.version).map_err(|_| corrupt("negative version"))?;

        Ok(OrderRecord {
            id: OrderId::from(self.id),
            flow,
            number: self.number,
            invoice_number: self.invoice_number,
            client_id: ClientId::from(self.client_id),
            sales_rep_id: self.sales_rep_id.map(SalesRepId::from),
            rider_id: self.rider_id.map(RiderId::from),
            status,
            substatus,
            items,
            totals: OrderTotals {
                subtotal: Money::from_minor(self.subtotal),
                tax_amount: Money::from_minor(self.tax_amount),
                total_amount: Money::from_minor(self.total_amount),
            },
            order_date: self.order_date,
            expected_delivery_date: self.expected_delivery_date,
            notes: self.notes,
            returned_to_stock: self.returned_to_stock,
            created_by: UserId::from_uuid(self.created_by),
            created_at: self.created_at,
            updated_at: self.updated_at,
            confirmed_at: self.confirmed_at,
            assigned_at: self.assigned_at,
            dispatched_by: self.dispatched_by.map(UserId::from_uuid),
            received_at: self.received_at,
            received_by: self.received_by.map(UserId::from_uuid),
            posting_id: self.posting_id.map(AggregateId::from_uuid),
            version,
        })
    }
}

#[derive(Debug)]
struct OrderItemRow {
    line_no: i32,
    product_id: Uuid,
    quantity: i64,
    unit_price: i64,
    tax_class: String,
    net: i64,
    tax: i64,
    gross: i64,
}

impl<'r> FromRow<'r, PgRow> for OrderItemRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(OrderItemRow {
            line_no: row.try_get("line_no")?,
            product_id: row.try_get("product_id")?,
            quantity: row.try_get("quantity")?,
            unit_price: row.try_get("unit_price")?,
            tax_class: row.try_get("tax_class")?,
            net: row.try_get("net")?,
            tax: row.try_get("tax")?,
            gross: row.try_get("gross")?,
        })
    }
}

impl OrderItemRow {
    fn into_item(self) -> Result<OrderItem, StoreError> {
        let tax_class = TaxClass::parse(&self.tax_class)
            .ok_or_else(|| StoreError::Corrupt(format!("item {}: unknown tax class {:?}", self.line_no, self.tax_class)))?;
        let line_no = u32::try_from(self.line_no)
            .map_err(|_| StoreError::Corrupt(format!("item line number {} out of range", self.line_no)))?;

        Ok(OrderItem {
            line_no,
            product_id: ProductId::from(self.product_id),
            quantity: self.quantity,
            unit_price: Money::from_minor(self.unit_price),
            tax_class,
            net: Money::from_minor(self.net),
            tax: Money::from_minor(self.tax),
            gross: Money::from_minor(self.gross),
        })
    }
}

#[derive(Debug)]
struct AccountRow {
    id: Uuid,
    code: String,
    name: String,
    kind: String,
    active: bool,
}

impl<'r> FromRow<'r, PgRow> for AccountRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AccountRow {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            kind: row.try_get("kind")?,
            active: row.try_get("active")?,
        })
    }
}

#[derive(Debug)]
struct JournalEntryRow {
    id: Uuid,
    number: String,
    entry_date: NaiveDate,
    reference: String,
    description: String,
    source_id: Uuid,
    created_by: Uuid,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for JournalEntryRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JournalEntryRow {
            id: row.try_get("id")?,
            number: row.try_get("number")?,
            entry_date: row.try_get("entry_date")?,
            reference: row.try_get("reference")?,
            description: row.try_get("description")?,
            source_id: row.try_get("source_id")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug)]
struct LedgerRow {
    id: i64,
    client_id: Uuid,
    entry_date: NaiveDate,
    description: String,
    reference_type: String,
    reference_id: Uuid,
    debit: i64,
    credit: i64,
    running_balance: i64,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for LedgerRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LedgerRow {
            id: row.try_get("id")?,
            client_id: row.try_get("client_id")?,
            entry_date: row.try_get("entry_date")?,
            description: row.try_get("description")?,
            reference_type: row.try_get("reference_type")?,
            reference_id: row.try_get("reference_id")?,
            debit: row.try_get("debit")?,
            credit: row.try_get("credit")?,
            running_balance: row.try_get("running_balance")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl LedgerRow {
    fn into_entry(self) -> LedgerEntry {
        LedgerEntry {
            id: self.id,
            client_id: ClientId::from(self.client_id),
            entry_date: self.entry_date,
            description: self.description,
            reference_type: self.reference_type,
            reference_id: AggregateId::from_uuid(self.reference_id),
            debit: Money::from_minor(self.debit),
            credit: Money::from_minor(self.credit),
            running_balance: Money::from_minor(self.running_balance),
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_failures_and_deadlocks_are_conflicts() {
        for code in ["40001", "40P01", "23505"] {
            assert!(matches!(
                store_error_for_sqlstate(code, code.to_string()),
                StoreError::Conflict(_)
            ));
        }
    }

    #[test]
    fn timeouts_and_connection_errors_are_unavailable() {
        for code in ["57014", "55P03", "08006", "53300"] {
            assert!(matches!(
                store_error_for_sqlstate(code, code.to_string()),
                StoreError::Unavailable(_)
            ));
        }
    }

    #[test]
    fn constraint_violations_other_than_unique_are_corrupt() {
        assert!(matches!(
            store_error_for_sqlstate("23514", "check".to_string()),
            StoreError::Corrupt(_)
        ));
    }

    #[test]
    fn pool_and_row_errors_are_mapped() {
        assert!(matches!(map_sqlx_error("begin", sqlx::Error::PoolTimedOut), StoreError::Unavailable(_)));
        assert!(matches!(map_sqlx_error("begin", sqlx::Error::PoolClosed), StoreError::Unavailable(_)));
        assert!(matches!(map_sqlx_error("client", sqlx::Error::RowNotFound), StoreError::Missing(_)));
    }

    #[test]
    fn corrupt_order_rows_are_reported() {
        let row = OrderRow {
            id: Uuid::nil(),
            flow: "consignment".to_string(),
            number: "SO-000001".to_string(),
            invoice_number: None,
            client_id: Uuid::nil(),
            sales_rep_id: None,
            rider_id: None,
            status: "draft".to_string(),
            substatus: 0,
            subtotal: 0,
            tax_amount: 0,
            total_amount: 0,
            order_date: NaiveDate::default(),
            expected_delivery_date: None,
            notes: None,
            returned_to_stock: false,
            created_by: Uuid::nil(),
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
            confirmed_at: None,
            assigned_at: None,
            dispatched_by: None,
            received_at: None,
            received_by: None,
            posting_id: None,
            version: 1,
        };
        match row.into_record(Vec::new()) {
            Err(StoreError::Corrupt(msg)) => assert!(msg.contains("unknown flow")),
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }
}
