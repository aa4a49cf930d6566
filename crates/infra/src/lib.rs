//! Infrastructure layer: transactional stores, the order services that drive
//! the domain crates, configuration and schema migrations.

pub mod config;
pub mod services;
pub mod store;


pub use config::{AppConfig, ConfigError, OrderPolicy};
pub use services::{
    ConfirmOrderRequest, CreateOrderRequest, ErrorKind, LedgerPoster, OrderError, OrderOutcome,
    OrderStateMachine, PostingReceipt, StockAdjuster, StockReturnReceipt, UpdateOrderRequest,
};
pub use store::{
    AccountingRepository, InMemoryStore, OrderRepository, PartyRepository, PostgresStore,
    ProductRepository, Store, StoreError, Transaction,
};
