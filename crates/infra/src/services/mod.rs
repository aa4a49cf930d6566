//! Order services: the state machine and the collaborators it drives inside
//! one store transaction.

mod error;
mod ledger_poster;
mod order_state_machine;
mod stock_adjuster;

pub use error::{ErrorKind, OrderError};
pub use ledger_poster::{LedgerPoster, PostingReceipt};
pub use order_state_machine::{
    ConfirmOrderRequest, CreateOrderRequest, OrderOutcome, OrderStateMachine, UpdateOrderRequest,
};
pub use stock_adjuster::{RestockedLine, StockAdjuster, StockReturnReceipt};
