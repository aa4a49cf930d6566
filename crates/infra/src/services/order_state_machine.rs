//! Order lifecycle orchestration.
//!
//! Every operation follows the same pipeline inside one store transaction:
//!
//! ```text
//! request
//!   ↓
//! 1. Check references (client, sales rep, products, rider)
//!   ↓
//! 2. Load the order for update
//!   ↓
//! 3. Handle the command (pure decision logic, produces events)
//!   ↓
//! 4. Apply events; post to the ledger / return stock when the events say so
//!   ↓
//! 5. Save with an optimistic version check, then commit
//! ```
//!
//! Any error drops the transaction, so nothing is written. Write conflicts
//! reported by the store restart the whole operation a bounded number of times.

use std::future::Future;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};

use salespost_accounting::PostingAccounts;
use salespost_core::{Aggregate, AggregateRoot, Event, ExpectedVersion, UserId};
use salespost_inventory::ProductId;
use salespost_parties::{ClientId, RiderId, SalesRepId};
use salespost_sales::{
    AssignRider, ConfirmOrder, CreateOrder, ItemInput, Order, OrderCommand, OrderEvent, OrderFlow,
    OrderId, OrderItem, OrderPatch, OrderStatus, RecordPosting, ReturnToStock, UpdateOrder,
};

use super::error::OrderError;
use super::ledger_poster::{LedgerPoster, PostingReceipt};
use super::stock_adjuster::{StockAdjuster, StockReturnReceipt};
use crate::config::OrderPolicy;
use crate::store::{OrderRepository, PartyRepository, ProductRepository, Store, Transaction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOrderRequest {
    pub flow: OrderFlow,
    pub client_id: ClientId,
    pub sales_rep_id: Option<SalesRepId>,
    pub order_date: NaiveDate,
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub items: Vec<ItemInput>,
    pub actor: UserId,
}

/// Partial update. `None` fields are left unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOrderRequest {
    pub client_id: Option<ClientId>,
    pub sales_rep_id: Option<SalesRepId>,
    pub order_date: Option<NaiveDate>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    /// Raw status as sent by the caller (`"confirmed"`, `"4"`, `"void"`, ...).
    pub status: Option<String>,
    /// Full replacement item set.
    pub items: Option<Vec<ItemInput>>,
    pub actor: UserId,
}

impl UpdateOrderRequest {
    /// An update that changes nothing yet.
    pub fn new(actor: UserId) -> Self {
        Self {
            client_id: None,
            sales_rep_id: None,
            order_date: None,
            expected_delivery_date: None,
            notes: None,
            status: None,
            items: None,
            actor,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_items(mut self, items: Vec<ItemInput>) -> Self {
        self.items = Some(items);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmOrderRequest {
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub actor: UserId,
}

impl ConfirmOrderRequest {
    pub fn new(actor: UserId) -> Self {
        Self {
            expected_delivery_date: None,
            notes: None,
            actor,
        }
    }
}

/// Order state after a mutating operation, plus what it wrote elsewhere.
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub order: Order,
    /// Set when this operation posted the order to the ledger.
    pub posting: Option<PostingReceipt>,
    /// Set when this operation returned the order's goods to stock.
    pub stock_return: Option<StockReturnReceipt>,
}

/// Drives orders through their lifecycle against a [`Store`].
pub struct OrderStateMachine<S: Store> {
    store: S,
    poster: LedgerPoster,
    stock: StockAdjuster,
    policy: OrderPolicy,
}

impl<S: Store> OrderStateMachine<S> {
    pub fn new(store: S, policy: OrderPolicy, accounts: PostingAccounts) -> Self {
        Self {
            store,
            poster: LedgerPoster::new(accounts),
            stock: StockAdjuster,
            policy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &OrderPolicy {
        &self.policy
    }

    /// Create a draft order with its items.
    #[instrument(
        skip(self, request),
        fields(flow = request.flow.as_str(), client_id = %request.client_id, actor = %request.actor),
        err
    )]
    pub async fn create(&self, request: CreateOrderRequest) -> Result<Order, OrderError> {
        let request = &request;
        self.retrying("create", move || self.try_create(request)).await
    }

    /// Apply a partial update, possibly moving the order to another status.
    #[instrument(skip(self, request), fields(order_id = %id, actor = %request.actor), err)]
    pub async fn update(&self, id: OrderId, request: UpdateOrderRequest) -> Result<OrderOutcome, OrderError> {
        let request = &request;
        self.retrying("update", move || self.try_update(id, request)).await
    }

    /// Convert a draft into an invoice: recompute totals, confirm, post.
    #[instrument(skip(self, request), fields(order_id = %id, actor = %request.actor), err)]
    pub async fn confirm(&self, id: OrderId, request: ConfirmOrderRequest) -> Result<OrderOutcome, OrderError> {
        let request = &request;
        self.retrying("confirm", move || self.try_confirm(id, request)).await
    }

    #[instrument(skip(self), fields(order_id = %id, actor = %actor), err)]
    pub async fn cancel(&self, id: OrderId, actor: UserId) -> Result<OrderOutcome, OrderError> {
        self.retrying("cancel", move || self.try_set_status(id, OrderStatus::Cancelled, actor))
            .await
    }

    #[instrument(skip(self), fields(order_id = %id, actor = %actor), err)]
    pub async fn decline(&self, id: OrderId, actor: UserId) -> Result<OrderOutcome, OrderError> {
        self.retrying("decline", move || self.try_set_status(id, OrderStatus::Declined, actor))
            .await
    }

    #[instrument(skip(self), fields(order_id = %id, rider_id = %rider_id, actor = %actor), err)]
    pub async fn assign_rider(&self, id: OrderId, rider_id: RiderId, actor: UserId) -> Result<OrderOutcome, OrderError> {
        self.retrying("assign_rider", move || self.try_assign_rider(id, rider_id, actor))
            .await
    }

    /// Put a cancelled order's goods back into stock (once).
    #[instrument(skip(self), fields(order_id = %id, actor = %actor), err)]
    pub async fn receive_back_to_stock(&self, id: OrderId, actor: UserId) -> Result<OrderOutcome, OrderError> {
        self.retrying("receive_back_to_stock", move || self.try_receive(id, actor))
            .await
    }

    #[instrument(skip(self), fields(order_id = %id, actor = %actor), err)]
    pub async fn delete(&self, id: OrderId, actor: UserId) -> Result<(), OrderError> {
        self.retrying("delete", move || self.try_delete(id, actor)).await
    }

    pub async fn get(&self, id: OrderId) -> Result<Order, OrderError> {
        let mut tx = self.store.begin().await?;
        let order = tx
            .load_order(id)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("order {id}")))?;
        tx.rollback().await?;
        Ok(order)
    }

    pub async fn list_items(&self, id: OrderId) -> Result<Vec<OrderItem>, OrderError> {
        Ok(self.get(id).await?.items().to_vec())
    }

    async fn retrying<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T, OrderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OrderError>>,
    {
        let mut retries: u32 = 0;
        loop {
            match attempt().await {
                Err(err) if err.is_write_conflict() => {
                    if retries >= self.policy.conflict_retries {
                        return Err(OrderError::RetriesExhausted(format!(
                            "{operation} gave up after {} attempts: {err}",
                            retries + 1
                        )));
                    }
                    retries += 1;
                    warn!(operation, attempt = retries, error = %err, "write conflict; retrying");
                    tokio::time::sleep(self.policy.retry_backoff.saturating_mul(retries)).await;
                }
                other => return other,
            }
        }
    }

    async fn try_create(&self, request: &CreateOrderRequest) -> Result<Order, OrderError> {
        let mut tx = self.store.begin().await?;

        self.check_client(&mut tx, request.client_id).await?;
        if let Some(sales_rep_id) = request.sales_rep_id {
            self.check_sales_rep(&mut tx, sales_rep_id).await?;
        }
        self.check_products(&mut tx, &request.items).await?;

        let sequence = tx.next_order_sequence(request.flow).await?;
        let order_id = OrderId::generate();
        let mut order = Order::empty(order_id);
        let events = order.handle(&OrderCommand::Create(CreateOrder {
            order_id,
            flow: request.flow,
            number: request.flow.order_number(sequence),
            client_id: request.client_id,
            sales_rep_id: request.sales_rep_id,
            order_date: request.order_date,
            expected_delivery_date: request.expected_delivery_date,
            notes: request.notes.clone(),
            items: request.items.clone(),
            actor: request.actor,
            occurred_at: Utc::now(),
        }))?;
        for event in &events {
            warn_on_tax_fallbacks(&order_id, event);
            order.apply(event);
        }

        tx.insert_order(&order).await?;
        tx.commit().await?;

        let totals = order.totals();
        info!(
            order_id = %order_id,
            number = order.number(),
            subtotal = %totals.subtotal,
            tax = %totals.tax_amount,
            total = %totals.total_amount,
            "order created"
        );
        Ok(order)
    }

    async fn try_update(&self, id: OrderId, request: &UpdateOrderRequest) -> Result<OrderOutcome, OrderError> {
        let status = request
            .status
            .as_deref()
            .map(OrderStatus::parse)
            .transpose()?;

        let mut tx = self.store.begin().await?;
        let order = load_for_update(&mut tx, id).await?;

        if let Some(client_id) = request.client_id {
            self.check_client(&mut tx, client_id).await?;
        }
        if let Some(sales_rep_id) = request.sales_rep_id {
            self.check_sales_rep(&mut tx, sales_rep_id).await?;
        }
        if let Some(items) = request.items.as_deref() {
            // Frozen item sets ignore submitted items, so they are not checked either.
            if !order.items_frozen() && !items.is_empty() {
                self.check_products(&mut tx, items).await?;
            }
        }

        let command = OrderCommand::Update(UpdateOrder {
            order_id: id,
            patch: OrderPatch {
                client_id: request.client_id,
                sales_rep_id: request.sales_rep_id,
                order_date: request.order_date,
                expected_delivery_date: request.expected_delivery_date,
                notes: request.notes.clone(),
                status,
                items: request.items.clone(),
            },
            actor: request.actor,
            occurred_at: Utc::now(),
        });
        let outcome = self.execute(&mut tx, order, command).await?;
        tx.commit().await?;

        info!(status = %outcome.order.status(), posted = outcome.posting.is_some(), "order updated");
        Ok(outcome)
    }

    async fn try_confirm(&self, id: OrderId, request: &ConfirmOrderRequest) -> Result<OrderOutcome, OrderError> {
        let mut tx = self.store.begin().await?;
        let order = load_for_update(&mut tx, id).await?;

        let command = OrderCommand::Confirm(ConfirmOrder {
            order_id: id,
            invoice_number: format!("INV-{}", order.number()),
            expected_delivery_date: request.expected_delivery_date,
            notes: request.notes.clone(),
            actor: request.actor,
            occurred_at: Utc::now(),
        });
        let outcome = self.execute(&mut tx, order, command).await?;
        tx.commit().await?;

        info!(
            number = outcome.order.number(),
            invoice_number = outcome.order.invoice_number().unwrap_or_default(),
            total = %outcome.order.totals().total_amount,
            "order confirmed"
        );
        Ok(outcome)
    }

    async fn try_set_status(&self, id: OrderId, status: OrderStatus, actor: UserId) -> Result<OrderOutcome, OrderError> {
        let mut tx = self.store.begin().await?;
        let order = load_for_update(&mut tx, id).await?;

        let command = OrderCommand::Update(UpdateOrder {
            order_id: id,
            patch: OrderPatch::status_only(status),
            actor,
            occurred_at: Utc::now(),
        });
        let outcome = self.execute(&mut tx, order, command).await?;
        tx.commit().await?;

        info!(status = %status, "order status changed");
        Ok(outcome)
    }

    async fn try_assign_rider(&self, id: OrderId, rider_id: RiderId, actor: UserId) -> Result<OrderOutcome, OrderError> {
        let mut tx = self.store.begin().await?;
        if !tx.rider_exists(rider_id).await? {
            return Err(OrderError::Validation(format!("unknown rider {rider_id}")));
        }
        let order = load_for_update(&mut tx, id).await?;

        let command = OrderCommand::AssignRider(AssignRider {
            order_id: id,
            rider_id,
            policy: self.policy.rider_assignment,
            actor,
            occurred_at: Utc::now(),
        });
        let outcome = self.execute(&mut tx, order, command).await?;
        tx.commit().await?;

        info!(substatus = ?outcome.order.substatus(), "rider assigned");
        Ok(outcome)
    }

    async fn try_receive(&self, id: OrderId, actor: UserId) -> Result<OrderOutcome, OrderError> {
        let mut tx = self.store.begin().await?;
        let order = load_for_update(&mut tx, id).await?;

        let command = OrderCommand::ReturnToStock(ReturnToStock {
            order_id: id,
            actor,
            occurred_at: Utc::now(),
        });
        let outcome = self.execute(&mut tx, order, command).await?;
        tx.commit().await?;

        if let Some(receipt) = &outcome.stock_return {
            info!(products = receipt.lines.len(), units = receipt.total_units(), "order returned to stock");
        }
        Ok(outcome)
    }

    async fn try_delete(&self, id: OrderId, actor: UserId) -> Result<(), OrderError> {
        let mut tx = self.store.begin().await?;
        let order = load_for_update(&mut tx, id).await?;
        order.ensure_deletable()?;

        tx.delete_order(id).await?;
        tx.commit().await?;

        info!(number = order.number(), deleted_by = %actor, "order deleted");
        Ok(())
    }

    /// Handle `command`, apply its events, run the side effects they call
    /// for, and save the order.
    async fn execute(&self, tx: &mut S::Tx, mut order: Order, command: OrderCommand) -> Result<OrderOutcome, OrderError> {
        let id = order.id_typed();
        let expected = ExpectedVersion::Exact(order.version());
        let events = order.handle(&command)?;

        let mut items_replaced = false;
        let mut confirmation = None;
        let mut returned = false;
        for event in &events {
            debug!(event = event.event_type(), "applying");
            warn_on_tax_fallbacks(&id, event);
            match event {
                OrderEvent::ItemsReplaced(_) => items_replaced = true,
                OrderEvent::OrderConfirmed(e) => confirmation = Some((e.confirmed_by, e.occurred_at)),
                OrderEvent::ReturnedToStock(_) => returned = true,
                _ => {}
            }
            order.apply(event);
        }

        let posting = match confirmation {
            Some((actor, confirmed_at)) => {
                let receipt = self.poster.post(&mut *tx, &order, actor, confirmed_at).await?;
                let record = OrderCommand::RecordPosting(RecordPosting {
                    order_id: id,
                    posting_id: receipt.journal_entry_id.0,
                    occurred_at: confirmed_at,
                });
                for event in order.handle(&record)? {
                    order.apply(&event);
                }
                Some(receipt)
            }
            None => None,
        };

        let stock_return = if returned {
            Some(self.stock.return_order(&mut *tx, &order).await?)
        } else {
            None
        };

        if items_replaced {
            tx.replace_items(id, order.items()).await?;
        }
        tx.save_order(&order, expected).await?;

        Ok(OrderOutcome {
            order,
            posting,
            stock_return,
        })
    }

    async fn check_client(&self, tx: &mut S::Tx, client_id: ClientId) -> Result<(), OrderError> {
        match tx.client(client_id).await? {
            Some(_) => Ok(()),
            None => Err(OrderError::Validation(format!("unknown client {client_id}"))),
        }
    }

    async fn check_sales_rep(&self, tx: &mut S::Tx, sales_rep_id: SalesRepId) -> Result<(), OrderError> {
        if tx.sales_rep_exists(sales_rep_id).await? {
            Ok(())
        } else {
            Err(OrderError::Validation(format!("unknown sales rep {sales_rep_id}")))
        }
    }

    async fn check_products(&self, tx: &mut S::Tx, items: &[ItemInput]) -> Result<(), OrderError> {
        let ids: Vec<ProductId> = items.iter().map(|i| i.product_id).collect();
        let missing = tx.missing_products(&ids).await?;
        if missing.is_empty() {
            return Ok(());
        }
        let missing: Vec<String> = missing.iter().map(ToString::to_string).collect();
        Err(OrderError::Validation(format!("unknown product(s): {}", missing.join(", "))))
    }
}

async fn load_for_update<T>(tx: &mut T, id: OrderId) -> Result<Order, OrderError>
where
    T: OrderRepository + ?Sized,
{
    tx.load_order_for_update(id)
        .await?
        .ok_or_else(|| OrderError::NotFound(format!("order {id}")))
}

fn warn_on_tax_fallbacks(order_id: &OrderId, event: &OrderEvent) {
    let fallbacks = match event {
        OrderEvent::OrderCreated(e) => &e.tax_class_fallbacks,
        OrderEvent::ItemsReplaced(e) => &e.tax_class_fallbacks,
        _ => return,
    };
    for line_no in fallbacks {
        warn!(order_id = %order_id, line_no, "unrecognized tax class; using standard rate");
    }
}
