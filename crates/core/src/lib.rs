//! `salespost-core`: domain building blocks shared by every salespost crate.
//!
//! Pure primitives only: identifiers, money, the domain error model and the
//! aggregate/event traits. Nothing here performs IO.

pub mod aggregate;
pub mod error;
pub mod event;
pub mod id;
pub mod money;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use event::Event;
pub use id::{AggregateId, UserId};
pub use money::Money;
