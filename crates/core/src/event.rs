//! Domain event contract.

use chrono::{DateTime, Utc};

/// A domain event emitted by an aggregate's `handle`.
///
/// Events are immutable facts; the infra layer reacts to them (persisting item
/// sets, posting to the ledger) inside the same unit of work.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "sales.order.confirmed").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
