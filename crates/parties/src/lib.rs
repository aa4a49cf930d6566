//! Parties an order refers to: the client billed, the sales rep who took the
//! order and the rider who delivers it.
//!
//! Only identities and the client record live here; existence checks go through
//! the infra repositories.

pub mod party;

pub use party::{Client, ClientId, RiderId, SalesRepId};
