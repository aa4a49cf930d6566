//! Sales domain: tax decomposition, the order status model and the `Order`
//! aggregate shared by sales orders and uplift sales.
//!
//! Everything here is deterministic domain logic. Persistence, ledger posting
//! and stock movements are driven by `salespost-infra` from the events the
//! aggregate emits.

pub mod item;
pub mod order;
pub mod status;
pub mod tax;

pub use item::{ItemInput, OrderItem, PricedItems, price_items, totals_of};
pub use order::{
    AssignRider, ConfirmOrder, CreateOrder, DetailsUpdated, ItemsReplaced, Order, OrderCommand,
    OrderConfirmed, OrderCreated, OrderEvent, OrderFlow, OrderId, OrderPatch, OrderRecord,
    PostingRecorded, RecordPosting, ReturnToStock, ReturnedToStock, RiderAssigned,
    RiderAssignmentPolicy, StatusChanged, TotalsRecomputed, UpdateOrder,
};
pub use status::{OrderStatus, Substatus};
pub use tax::{OrderTotals, TaxBreakdown, TaxClass, TaxClassResolution, TaxEngine};
