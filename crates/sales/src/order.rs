use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use salespost_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, Event, UserId, typed_id,
};
use salespost_parties::{ClientId, RiderId, SalesRepId};

use crate::item::{ItemInput, OrderItem, price_items, totals_of};
use crate::status::{OrderStatus, Substatus};
use crate::tax::OrderTotals;

typed_id!(
    /// Order identifier (sales orders and uplift sales share one id space).
    OrderId
);

/// Which business flow produced the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderFlow {
    SalesOrder,
    UpliftSale,
}

impl OrderFlow {
    pub fn prefix(self) -> &'static str {
        match self {
            OrderFlow::SalesOrder => "SO",
            OrderFlow::UpliftSale => "UP",
        }
    }

    /// Human label used in journal and ledger descriptions.
    pub fn label(self) -> &'static str {
        match self {
            OrderFlow::SalesOrder => "Sales order",
            OrderFlow::UpliftSale => "Uplift sale",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderFlow::SalesOrder => "sales_order",
            OrderFlow::UpliftSale => "uplift_sale",
        }
    }

    pub fn parse(raw: &str) -> Option<OrderFlow> {
        match raw {
            "sales_order" => Some(OrderFlow::SalesOrder),
            "uplift_sale" => Some(OrderFlow::UpliftSale),
            _ => None,
        }
    }

    /// `SO-000042` style number for the `sequence`-th order of this flow.
    pub fn order_number(self, sequence: u64) -> String {
        format!("{}-{:06}", self.prefix(), sequence)
    }
}

/// Who may receive a rider assignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiderAssignmentPolicy {
    /// Any unlocked order, drafts included.
    #[default]
    AnyStatus,
    /// Only orders that have been confirmed.
    RequireConfirmed,
}

impl RiderAssignmentPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "any-status" | "any" => Some(RiderAssignmentPolicy::AnyStatus),
            "require-confirmed" | "confirmed" => Some(RiderAssignmentPolicy::RequireConfirmed),
            _ => None,
        }
    }
}

/// Storage shape of an order (state, not events).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub flow: OrderFlow,
    pub number: String,
    pub invoice_number: Option<String>,
    pub client_id: ClientId,
    pub sales_rep_id: Option<SalesRepId>,
    pub rider_id: Option<RiderId>,
    pub status: OrderStatus,
    pub substatus: Substatus,
    pub items: Vec<OrderItem>,
    pub totals: OrderTotals,
    pub order_date: NaiveDate,
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub returned_to_stock: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub dispatched_by: Option<UserId>,
    pub received_at: Option<DateTime<Utc>>,
    pub received_by: Option<UserId>,
    pub posting_id: Option<AggregateId>,
    pub version: u64,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    flow: OrderFlow,
    number: String,
    invoice_number: Option<String>,
    client_id: ClientId,
    sales_rep_id: Option<SalesRepId>,
    rider_id: Option<RiderId>,
    status: OrderStatus,
    substatus: Substatus,
    items: Vec<OrderItem>,
    totals: OrderTotals,
    order_date: NaiveDate,
    expected_delivery_date: Option<NaiveDate>,
    notes: Option<String>,
    returned_to_stock: bool,
    created_by: UserId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
    assigned_at: Option<DateTime<Utc>>,
    dispatched_by: Option<UserId>,
    received_at: Option<DateTime<Utc>>,
    received_by: Option<UserId>,
    posting_id: Option<AggregateId>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            flow: OrderFlow::SalesOrder,
            number: String::new(),
            invoice_number: None,
            client_id: ClientId::from(Uuid::nil()),
            sales_rep_id: None,
            rider_id: None,
            status: OrderStatus::Draft,
            substatus: Substatus::Draft,
            items: Vec::new(),
            totals: OrderTotals::default(),
            order_date: NaiveDate::default(),
            expected_delivery_date: None,
            notes: None,
            returned_to_stock: false,
            created_by: UserId::from_uuid(Uuid::nil()),
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
            confirmed_at: None,
            assigned_at: None,
            dispatched_by: None,
            received_at: None,
            received_by: None,
            posting_id: None,
            version: 0,
            created: false,
        }
    }

    /// Rebuild an order read back from storage.
    pub fn from_record(record: OrderRecord) -> Self {
        Self {
            id: record.id,
            flow: record.flow,
            number: record.number,
            invoice_number: record.invoice_number,
            client_id: record.client_id,
            sales_rep_id: record.sales_rep_id,
            rider_id: record.rider_id,
            status: record.status,
            substatus: record.substatus,
            items: record.items,
            totals: record.totals,
            order_date: record.order_date,
            expected_delivery_date: record.expected_delivery_date,
            notes: record.notes,
            returned_to_stock: record.returned_to_stock,
            created_by: record.created_by,
            created_at: record.created_at,
            updated_at: record.updated_at,
            confirmed_at: record.confirmed_at,
            assigned_at: record.assigned_at,
            dispatched_by: record.dispatched_by,
            received_at: record.received_at,
            received_by: record.received_by,
            posting_id: record.posting_id,
            version: record.version,
            created: true,
        }
    }

    pub fn to_record(&self) -> OrderRecord {
        OrderRecord {
            id: self.id,
            flow: self.flow,
            number: self.number.clone(),
            invoice_number: self.invoice_number.clone(),
            client_id: self.client_id,
            sales_rep_id: self.sales_rep_id,
            rider_id: self.rider_id,
            status: self.status,
            substatus: self.substatus,
            items: self.items.clone(),
            totals: self.totals,
            order_date: self.order_date,
            expected_delivery_date: self.expected_delivery_date,
            notes: self.notes.clone(),
            returned_to_stock: self.returned_to_stock,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            confirmed_at: self.confirmed_at,
            assigned_at: self.assigned_at,
            dispatched_by: self.dispatched_by,
            received_at: self.received_at,
            received_by: self.received_by,
            posting_id: self.posting_id,
            version: self.version,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn flow(&self) -> OrderFlow {
        self.flow
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn invoice_number(&self) -> Option<&str> {
        self.invoice_number.as_deref()
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn sales_rep_id(&self) -> Option<SalesRepId> {
        self.sales_rep_id
    }

    pub fn rider_id(&self) -> Option<RiderId> {
        self.rider_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn substatus(&self) -> Substatus {
        self.substatus
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn totals(&self) -> OrderTotals {
        self.totals
    }

    pub fn order_date(&self) -> NaiveDate {
        self.order_date
    }

    pub fn expected_delivery_date(&self) -> Option<NaiveDate> {
        self.expected_delivery_date
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn returned_to_stock(&self) -> bool {
        self.returned_to_stock
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    pub fn assigned_at(&self) -> Option<DateTime<Utc>> {
        self.assigned_at
    }

    pub fn dispatched_by(&self) -> Option<UserId> {
        self.dispatched_by
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_at
    }

    pub fn received_by(&self) -> Option<UserId> {
        self.received_by
    }

    /// Journal entry recorded for this order's confirmation, if any.
    pub fn posting_id(&self) -> Option<AggregateId> {
        self.posting_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_locked(&self) -> bool {
        self.substatus.is_locked()
    }

    pub fn is_posted(&self) -> bool {
        self.posting_id.is_some()
    }

    /// Locked or posted orders keep their item set; the journal entry was
    /// built from it.
    pub fn items_frozen(&self) -> bool {
        self.is_locked() || self.is_posted()
    }

    /// Deleting is only allowed before the order is locked or posted.
    pub fn ensure_deletable(&self) -> DomainResult<()> {
        self.ensure_created()?;
        if self.is_posted() {
            return Err(DomainError::conflict(format!(
                "order {} has been posted to the ledger and cannot be deleted",
                self.number
            )));
        }
        if self.is_locked() {
            return Err(DomainError::conflict(format!(
                "order {} is {} and cannot be deleted",
                self.number, self.status
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub order_id: OrderId,
    pub flow: OrderFlow,
    pub number: String,
    pub client_id: ClientId,
    pub sales_rep_id: Option<SalesRepId>,
    pub order_date: NaiveDate,
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub items: Vec<ItemInput>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Fields an update may change. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPatch {
    pub client_id: Option<ClientId>,
    pub sales_rep_id: Option<SalesRepId>,
    pub order_date: Option<NaiveDate>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub status: Option<OrderStatus>,
    pub items: Option<Vec<ItemInput>>,
}

impl OrderPatch {
    /// Patch that only moves the status.
    pub fn status_only(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    fn touches_details(&self) -> bool {
        self.client_id.is_some()
            || self.sales_rep_id.is_some()
            || self.order_date.is_some()
            || self.expected_delivery_date.is_some()
            || self.notes.is_some()
    }
}

/// Command: UpdateOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOrder {
    pub order_id: OrderId,
    pub patch: OrderPatch,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmOrder (convert to invoice).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOrder {
    pub order_id: OrderId,
    pub invoice_number: String,
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AssignRider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignRider {
    pub order_id: OrderId,
    pub rider_id: RiderId,
    pub policy: RiderAssignmentPolicy,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnToStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnToStock {
    pub order_id: OrderId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPosting (link the confirmation's journal entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPosting {
    pub order_id: OrderId,
    pub posting_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    Create(CreateOrder),
    Update(UpdateOrder),
    Confirm(ConfirmOrder),
    AssignRider(AssignRider),
    ReturnToStock(ReturnToStock),
    RecordPosting(RecordPosting),
}

/// Event: OrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub flow: OrderFlow,
    pub number: String,
    pub client_id: ClientId,
    pub sales_rep_id: Option<SalesRepId>,
    pub order_date: NaiveDate,
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub items: Vec<OrderItem>,
    pub totals: OrderTotals,
    pub tax_class_fallbacks: Vec<u32>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DetailsUpdated. Only supplied fields are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailsUpdated {
    pub order_id: OrderId,
    pub client_id: Option<ClientId>,
    pub sales_rep_id: Option<SalesRepId>,
    pub order_date: Option<NaiveDate>,
    pub expected_delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemsReplaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemsReplaced {
    pub order_id: OrderId,
    pub items: Vec<OrderItem>,
    pub totals: OrderTotals,
    pub tax_class_fallbacks: Vec<u32>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TotalsRecomputed (from the persisted items).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalsRecomputed {
    pub order_id: OrderId,
    pub totals: OrderTotals,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub order_id: OrderId,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub substatus: Substatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderConfirmed. Triggers ledger posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub order_id: OrderId,
    pub invoice_number: Option<String>,
    pub totals: OrderTotals,
    pub confirmed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RiderAssigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiderAssigned {
    pub order_id: OrderId,
    pub rider_id: RiderId,
    pub dispatched_by: UserId,
    pub substatus: Substatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnedToStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnedToStock {
    pub order_id: OrderId,
    pub received_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PostingRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRecorded {
    pub order_id: OrderId,
    pub posting_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderCreated(OrderCreated),
    DetailsUpdated(DetailsUpdated),
    ItemsReplaced(ItemsReplaced),
    TotalsRecomputed(TotalsRecomputed),
    StatusChanged(StatusChanged),
    OrderConfirmed(OrderConfirmed),
    RiderAssigned(RiderAssigned),
    ReturnedToStock(ReturnedToStock),
    PostingRecorded(PostingRecorded),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "sales.order.created",
            OrderEvent::DetailsUpdated(_) => "sales.order.details_updated",
            OrderEvent::ItemsReplaced(_) => "sales.order.items_replaced",
            OrderEvent::TotalsRecomputed(_) => "sales.order.totals_recomputed",
            OrderEvent::StatusChanged(_) => "sales.order.status_changed",
            OrderEvent::OrderConfirmed(_) => "sales.order.confirmed",
            OrderEvent::RiderAssigned(_) => "sales.order.rider_assigned",
            OrderEvent::ReturnedToStock(_) => "sales.order.returned_to_stock",
            OrderEvent::PostingRecorded(_) => "sales.order.posting_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderCreated(e) => e.occurred_at,
            OrderEvent::DetailsUpdated(e) => e.occurred_at,
            OrderEvent::ItemsReplaced(e) => e.occurred_at,
            OrderEvent::TotalsRecomputed(e) => e.occurred_at,
            OrderEvent::StatusChanged(e) => e.occurred_at,
            OrderEvent::OrderConfirmed(e) => e.occurred_at,
            OrderEvent::RiderAssigned(e) => e.occurred_at,
            OrderEvent::ReturnedToStock(e) => e.occurred_at,
            OrderEvent::PostingRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderCreated(e) => {
                self.id = e.order_id;
                self.flow = e.flow;
                self.number = e.number.clone();
                self.client_id = e.client_id;
                self.sales_rep_id = e.sales_rep_id;
                self.order_date = e.order_date;
                self.expected_delivery_date = e.expected_delivery_date;
                self.notes = e.notes.clone();
                self.items = e.items.clone();
                self.totals = e.totals;
                self.status = OrderStatus::Draft;
                self.substatus = Substatus::Draft;
                self.created_by = e.created_by;
                self.created_at = e.occurred_at;
                self.created = true;
            }
            OrderEvent::DetailsUpdated(e) => {
                if let Some(client_id) = e.client_id {
                    self.client_id = client_id;
                }
                if let Some(sales_rep_id) = e.sales_rep_id {
                    self.sales_rep_id = Some(sales_rep_id);
                }
                if let Some(order_date) = e.order_date {
                    self.order_date = order_date;
                }
                if let Some(date) = e.expected_delivery_date {
                    self.expected_delivery_date = Some(date);
                }
                if let Some(notes) = &e.notes {
                    self.notes = Some(notes.clone());
                }
            }
            OrderEvent::ItemsReplaced(e) => {
                self.items = e.items.clone();
                self.totals = e.totals;
            }
            OrderEvent::TotalsRecomputed(e) => {
                self.totals = e.totals;
            }
            OrderEvent::StatusChanged(e) => {
                self.status = e.to;
                self.substatus = e.substatus;
            }
            OrderEvent::OrderConfirmed(e) => {
                if let Some(invoice_number) = &e.invoice_number {
                    self.invoice_number = Some(invoice_number.clone());
                }
                self.confirmed_at = Some(e.occurred_at);
            }
            OrderEvent::RiderAssigned(e) => {
                self.rider_id = Some(e.rider_id);
                self.substatus = e.substatus;
                self.assigned_at = Some(e.occurred_at);
                self.dispatched_by = Some(e.dispatched_by);
            }
            OrderEvent::ReturnedToStock(e) => {
                self.returned_to_stock = true;
                self.received_at = Some(e.occurred_at);
                self.received_by = Some(e.received_by);
            }
            OrderEvent::PostingRecorded(e) => {
                self.posting_id = Some(e.posting_id);
            }
        }

        self.updated_at = event.occurred_at();
        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::Create(cmd) => self.handle_create(cmd),
            OrderCommand::Update(cmd) => self.handle_update(cmd),
            OrderCommand::Confirm(cmd) => self.handle_confirm(cmd),
            OrderCommand::AssignRider(cmd) => self.handle_assign_rider(cmd),
            OrderCommand::ReturnToStock(cmd) => self.handle_return_to_stock(cmd),
            OrderCommand::RecordPosting(cmd) => self.handle_record_posting(cmd),
        }
    }
}

impl Order {
    fn ensure_created(&self) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found(format!("order {}", self.id)));
        }
        Ok(())
    }

    fn ensure_order_id(&self, order_id: OrderId) -> DomainResult<()> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateOrder) -> DomainResult<Vec<OrderEvent>> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        self.ensure_order_id(cmd.order_id)?;
        if cmd.number.trim().is_empty() {
            return Err(DomainError::validation("order number cannot be empty"));
        }

        let priced = price_items(&cmd.items)?;

        Ok(vec![OrderEvent::OrderCreated(OrderCreated {
            order_id: cmd.order_id,
            flow: cmd.flow,
            number: cmd.number.clone(),
            client_id: cmd.client_id,
            sales_rep_id: cmd.sales_rep_id,
            order_date: cmd.order_date,
            expected_delivery_date: cmd.expected_delivery_date,
            notes: cmd.notes.clone(),
            items: priced.items,
            totals: priced.totals,
            tax_class_fallbacks: priced.tax_class_fallbacks,
            created_by: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateOrder) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        let patch = &cmd.patch;
        let from = self.status;
        let to = patch.status.unwrap_or(from);

        if !from.can_transition_to(to) {
            return Err(DomainError::invariant(format!(
                "order {} cannot move from {from} to {to}",
                self.number
            )));
        }
        if let Some(client_id) = patch.client_id {
            if client_id != self.client_id && self.is_posted() {
                return Err(DomainError::conflict(format!(
                    "order {} has been posted; its client cannot change",
                    self.number
                )));
            }
        }

        let mut events = Vec::new();

        if patch.touches_details() {
            events.push(OrderEvent::DetailsUpdated(DetailsUpdated {
                order_id: self.id,
                client_id: patch.client_id,
                sales_rep_id: patch.sales_rep_id,
                order_date: patch.order_date,
                expected_delivery_date: patch.expected_delivery_date,
                notes: patch.notes.clone(),
                occurred_at: cmd.occurred_at,
            }));
        }

        let submitted = patch.items.as_deref().filter(|items| !items.is_empty());
        let totals = if self.items_frozen() {
            // Submitted items are ignored; totals come from the stored lines.
            let totals = totals_of(&self.items)?;
            events.push(OrderEvent::TotalsRecomputed(TotalsRecomputed {
                order_id: self.id,
                totals,
                occurred_at: cmd.occurred_at,
            }));
            totals
        } else if let Some(items) = submitted {
            let priced = price_items(items)?;
            let totals = priced.totals;
            events.push(OrderEvent::ItemsReplaced(ItemsReplaced {
                order_id: self.id,
                items: priced.items,
                totals,
                tax_class_fallbacks: priced.tax_class_fallbacks,
                occurred_at: cmd.occurred_at,
            }));
            totals
        } else if to.is_terminal() {
            self.totals
        } else {
            return Err(DomainError::validation("order must include at least one item"));
        };

        let substatus = self.substatus.after_transition(from, to);
        if to != from || substatus != self.substatus {
            events.push(OrderEvent::StatusChanged(StatusChanged {
                order_id: self.id,
                from,
                to,
                substatus,
                occurred_at: cmd.occurred_at,
            }));
        }

        if to == OrderStatus::Confirmed && from != OrderStatus::Confirmed && !self.is_posted() {
            events.push(OrderEvent::OrderConfirmed(OrderConfirmed {
                order_id: self.id,
                invoice_number: None,
                totals,
                confirmed_by: cmd.actor,
                occurred_at: cmd.occurred_at,
            }));
        }

        Ok(events)
    }

    fn handle_confirm(&self, cmd: &ConfirmOrder) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.status == OrderStatus::Confirmed || self.is_posted() {
            return Err(DomainError::conflict(format!(
                "order {} is already confirmed",
                self.number
            )));
        }
        if self.status != OrderStatus::Draft {
            return Err(DomainError::invariant(format!(
                "only draft orders can be confirmed; order {} is {}",
                self.number, self.status
            )));
        }
        if self.items.is_empty() {
            return Err(DomainError::validation("cannot confirm order without items"));
        }
        if cmd.invoice_number.trim().is_empty() {
            return Err(DomainError::validation("invoice number cannot be empty"));
        }

        let totals = totals_of(&self.items)?;
        let mut events = Vec::new();

        if cmd.expected_delivery_date.is_some() || cmd.notes.is_some() {
            events.push(OrderEvent::DetailsUpdated(DetailsUpdated {
                order_id: self.id,
                client_id: None,
                sales_rep_id: None,
                order_date: None,
                expected_delivery_date: cmd.expected_delivery_date,
                notes: cmd.notes.clone(),
                occurred_at: cmd.occurred_at,
            }));
        }
        events.push(OrderEvent::TotalsRecomputed(TotalsRecomputed {
            order_id: self.id,
            totals,
            occurred_at: cmd.occurred_at,
        }));
        events.push(OrderEvent::StatusChanged(StatusChanged {
            order_id: self.id,
            from: self.status,
            to: OrderStatus::Confirmed,
            substatus: self.substatus.after_transition(self.status, OrderStatus::Confirmed),
            occurred_at: cmd.occurred_at,
        }));
        events.push(OrderEvent::OrderConfirmed(OrderConfirmed {
            order_id: self.id,
            invoice_number: Some(cmd.invoice_number.clone()),
            totals,
            confirmed_by: cmd.actor,
            occurred_at: cmd.occurred_at,
        }));

        Ok(events)
    }

    fn handle_assign_rider(&self, cmd: &AssignRider) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.is_locked() {
            return Err(DomainError::conflict(format!(
                "cannot assign a rider to order {} while it is {}",
                self.number, self.status
            )));
        }
        if cmd.policy == RiderAssignmentPolicy::RequireConfirmed && self.status == OrderStatus::Draft {
            return Err(DomainError::conflict(format!(
                "order {} must be confirmed before a rider is assigned",
                self.number
            )));
        }

        Ok(vec![OrderEvent::RiderAssigned(RiderAssigned {
            order_id: self.id,
            rider_id: cmd.rider_id,
            dispatched_by: cmd.actor,
            substatus: self.substatus.max(Substatus::Dispatched),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return_to_stock(&self, cmd: &ReturnToStock) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.returned_to_stock {
            return Err(DomainError::conflict(format!(
                "order {} has already been returned to stock",
                self.number
            )));
        }
        if self.substatus != Substatus::Cancelled {
            return Err(DomainError::conflict(format!(
                "only cancelled orders can be returned to stock; order {} is {}",
                self.number, self.status
            )));
        }
        if self.items.is_empty() {
            return Err(DomainError::validation("order has no items to return to stock"));
        }

        Ok(vec![OrderEvent::ReturnedToStock(ReturnedToStock {
            order_id: self.id,
            received_by: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_posting(&self, cmd: &RecordPosting) -> DomainResult<Vec<OrderEvent>> {
        self.ensure_created()?;
        self.ensure_order_id(cmd.order_id)?;

        if self.is_posted() {
            return Err(DomainError::conflict(format!(
                "order {} is already posted",
                self.number
            )));
        }
        if self.status == OrderStatus::Draft {
            return Err(DomainError::invariant("cannot post a draft order"));
        }

        Ok(vec![OrderEvent::PostingRecorded(PostingRecorded {
            order_id: self.id,
            posting_id: cmd.posting_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use salespost_core::Money;
    use salespost_inventory::ProductId;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_actor() -> UserId {
        UserId::new()
    }

    fn item(qty: i64, price_minor: i64) -> ItemInput {
        ItemInput::new(ProductId::generate(), qty, Money::from_minor(price_minor))
    }

    fn run(order: &mut Order, command: OrderCommand) -> Vec<OrderEvent> {
        let events = order.handle(&command).unwrap();
        for event in &events {
            order.apply(event);
        }
        events
    }

    fn draft_with(items: Vec<ItemInput>) -> Order {
        let order_id = OrderId::generate();
        let mut order = Order::empty(order_id);
        run(
            &mut order,
            OrderCommand::Create(CreateOrder {
                order_id,
                flow: OrderFlow::SalesOrder,
                number: OrderFlow::SalesOrder.order_number(1),
                client_id: ClientId::generate(),
                sales_rep_id: None,
                order_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
                expected_delivery_date: None,
                notes: None,
                items,
                actor: test_actor(),
                occurred_at: test_time(),
            }),
        );
        order
    }

    fn draft() -> Order {
        draft_with(vec![item(2, 11_600), item(2, 11_600)])
    }

    fn update(order: &Order, patch: OrderPatch) -> OrderCommand {
        OrderCommand::Update(UpdateOrder {
            order_id: order.id_typed(),
            patch,
            actor: test_actor(),
            occurred_at: test_time(),
        })
    }

    fn confirm(order: &Order) -> OrderCommand {
        OrderCommand::Confirm(ConfirmOrder {
            order_id: order.id_typed(),
            invoice_number: format!("INV-{}", order.number()),
            expected_delivery_date: None,
            notes: None,
            actor: test_actor(),
            occurred_at: test_time(),
        })
    }

    fn cancel(order: &Order) -> OrderCommand {
        update(order, OrderPatch::status_only(OrderStatus::Cancelled))
    }

    #[test]
    fn order_number_is_zero_padded_per_flow() {
        assert_eq!(OrderFlow::SalesOrder.order_number(1), "SO-000001");
        assert_eq!(OrderFlow::UpliftSale.order_number(42), "UP-000042");
    }

    #[test]
    fn create_prices_items_and_starts_in_draft() {
        let order = draft();
        assert_eq!(order.status(), OrderStatus::Draft);
        assert_eq!(order.substatus(), Substatus::Draft);
        assert_eq!(order.totals().subtotal, Money::from_minor(40_000));
        assert_eq!(order.totals().tax_amount, Money::from_minor(6_400));
        assert_eq!(order.totals().total_amount, Money::from_minor(46_400));
        assert_eq!(order.version(), 1);
        assert!(!order.is_locked());
    }

    #[test]
    fn create_without_items_fails() {
        let order_id = OrderId::generate();
        let order = Order::empty(order_id);
        let err = order
            .handle(&OrderCommand::Create(CreateOrder {
                order_id,
                flow: OrderFlow::UpliftSale,
                number: "UP-000001".into(),
                client_id: ClientId::generate(),
                sales_rep_id: None,
                order_date: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
                expected_delivery_date: None,
                notes: None,
                items: vec![],
                actor: test_actor(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let order = draft();
        let before = order.clone();
        let _ = order.handle(&confirm(&order)).unwrap();
        assert_eq!(order, before);
    }

    #[test]
    fn confirm_emits_confirmation_exactly_once() {
        let mut order = draft();
        let events = { let command = confirm(&order); run(&mut order, command) };

        let confirmations = events
            .iter()
            .filter(|e| matches!(e, OrderEvent::OrderConfirmed(_)))
            .count();
        assert_eq!(confirmations, 1);
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert_eq!(order.substatus(), Substatus::Confirmed);
        assert_eq!(order.invoice_number(), Some("INV-SO-000001"));

        let err = order.handle(&confirm(&order)).unwrap_err();
        match err {
            DomainError::Conflict(msg) => assert!(msg.contains("already confirmed")),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn update_into_confirmed_triggers_posting_only_from_draft() {
        let mut order = draft();
        let patch = OrderPatch {
            status: Some(OrderStatus::Confirmed),
            items: Some(vec![item(1, 11_600)]),
            ..OrderPatch::default()
        };
        let events = { let command = update(&order, patch.clone()); run(&mut order, command) };
        assert!(events.iter().any(|e| matches!(e, OrderEvent::OrderConfirmed(_))));
        assert_eq!(order.totals().total_amount, Money::from_minor(11_600));

        // Re-saving a confirmed order does not confirm it again.
        let events = { let command = update(&order, patch); run(&mut order, command) };
        assert!(!events.iter().any(|e| matches!(e, OrderEvent::OrderConfirmed(_))));
    }

    #[test]
    fn update_requires_items_unless_terminal() {
        let order = draft();
        let err = order
            .handle(&update(&order, OrderPatch { notes: Some("call first".into()), ..OrderPatch::default() }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn cancelling_a_draft_without_items_preserves_totals() {
        let mut order = draft();
        let total = order.totals().total_amount;
        { let command = cancel(&order); run(&mut order, command) };

        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.substatus(), Substatus::Cancelled);
        assert_eq!(order.totals().total_amount, total);
        assert_eq!(order.items().len(), 2);
        assert!(order.is_locked());
    }

    #[test]
    fn locked_order_ignores_submitted_items() {
        let mut order = draft();
        { let command = cancel(&order); run(&mut order, command) };

        let patch = OrderPatch {
            notes: Some("customer refused".into()),
            items: Some(vec![item(100, 100)]),
            ..OrderPatch::default()
        };
        let events = { let command = update(&order, patch); run(&mut order, command) };

        assert!(!events.iter().any(|e| matches!(e, OrderEvent::ItemsReplaced(_))));
        assert_eq!(order.items().len(), 2);
        assert_eq!(order.totals().total_amount, Money::from_minor(46_400));
        assert_eq!(order.notes(), Some("customer refused"));
    }

    #[test]
    fn posted_order_keeps_the_items_it_was_posted_with() {
        let mut order = draft();
        { let command = confirm(&order); run(&mut order, command) };
        let order_id = order.id_typed();
        run(
            &mut order,
            OrderCommand::RecordPosting(RecordPosting {
                order_id,
                posting_id: AggregateId::new(),
                occurred_at: test_time(),
            }),
        );
        assert!(order.items_frozen());
        assert!(!order.is_locked());

        let patch = OrderPatch {
            status: Some(OrderStatus::Confirmed),
            items: Some(vec![item(1, 100)]),
            ..OrderPatch::default()
        };
        let events = { let command = update(&order, patch); run(&mut order, command) };

        assert!(!events.iter().any(|e| matches!(e, OrderEvent::ItemsReplaced(_))));
        assert_eq!(order.items().len(), 2);
        assert_eq!(order.totals().total_amount, Money::from_minor(46_400));

        // No items needed either: the stored lines stand.
        let patch = OrderPatch {
            notes: Some("gate code 4411".into()),
            ..OrderPatch::default()
        };
        { let command = update(&order, patch); run(&mut order, command) };
        assert_eq!(order.totals().total_amount, Money::from_minor(46_400));
    }

    #[test]
    fn forbidden_transitions_are_rejected() {
        let mut order = draft();
        let err = order
            .handle(&update(&order, OrderPatch::status_only(OrderStatus::Shipped)))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        { let command = cancel(&order); run(&mut order, command) };
        let err = order.handle(&confirm(&order)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn client_cannot_change_after_posting() {
        let mut order = draft();
        { let command = confirm(&order); run(&mut order, command) };
        let order_id = order.id_typed();
        run(
            &mut order,
            OrderCommand::RecordPosting(RecordPosting {
                order_id,
                posting_id: AggregateId::new(),
                occurred_at: test_time(),
            }),
        );

        let patch = OrderPatch {
            client_id: Some(ClientId::generate()),
            status: Some(OrderStatus::Cancelled),
            ..OrderPatch::default()
        };
        let err = order.handle(&update(&order, patch)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn rider_assignment_marks_dispatch() {
        let mut order = draft();
        let rider = RiderId::generate();
        let actor = test_actor();
        let order_id = order.id_typed();
        run(
            &mut order,
            OrderCommand::AssignRider(AssignRider {
                order_id,
                rider_id: rider,
                policy: RiderAssignmentPolicy::AnyStatus,
                actor,
                occurred_at: test_time(),
            }),
        );
        assert_eq!(order.rider_id(), Some(rider));
        assert_eq!(order.substatus(), Substatus::Dispatched);
        assert_eq!(order.dispatched_by(), Some(actor));
        assert!(order.assigned_at().is_some());
        assert_eq!(order.status(), OrderStatus::Draft);
    }

    #[test]
    fn rider_policy_can_require_confirmation() {
        let order = draft();
        let err = order
            .handle(&OrderCommand::AssignRider(AssignRider {
                order_id: order.id_typed(),
                rider_id: RiderId::generate(),
                policy: RiderAssignmentPolicy::RequireConfirmed,
                actor: test_actor(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn return_to_stock_requires_cancellation_and_happens_once() {
        let mut order = draft();
        let cmd = OrderCommand::ReturnToStock(ReturnToStock {
            order_id: order.id_typed(),
            actor: test_actor(),
            occurred_at: test_time(),
        });

        assert!(matches!(order.handle(&cmd), Err(DomainError::Conflict(_))));

        { let command = cancel(&order); run(&mut order, command) };
        run(&mut order, cmd.clone());
        assert!(order.returned_to_stock());

        let err = order.handle(&cmd).unwrap_err();
        match err {
            DomainError::Conflict(msg) => assert!(msg.contains("already been returned")),
            other => panic!("expected Conflict, got {other:?}"),
        }
    }

    #[test]
    fn deletion_is_refused_once_locked_or_posted() {
        let mut order = draft();
        assert!(order.ensure_deletable().is_ok());

        { let command = cancel(&order); run(&mut order, command) };
        assert!(matches!(order.ensure_deletable(), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn record_round_trip_keeps_state() {
        let mut order = draft();
        { let command = confirm(&order); run(&mut order, command) };
        let restored = Order::from_record(order.to_record());
        assert_eq!(restored, order);
    }

    #[test]
    fn events_are_named_by_context() {
        let order = draft();
        let events = order.handle(&confirm(&order)).unwrap();
        let names: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert!(names.contains(&"sales.order.confirmed"));
        assert!(names.contains(&"sales.order.status_changed"));
    }

    #[test]
    fn rider_policy_parses_config_spellings() {
        assert_eq!(RiderAssignmentPolicy::parse("any-status"), Some(RiderAssignmentPolicy::AnyStatus));
        assert_eq!(
            RiderAssignmentPolicy::parse("require-confirmed"),
            Some(RiderAssignmentPolicy::RequireConfirmed)
        );
        assert_eq!(RiderAssignmentPolicy::parse("sometimes"), None);
    }
}
