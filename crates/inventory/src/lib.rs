//! Inventory domain: product stock counters and the plan for returning a
//! cancelled order's goods to stock.
//!
//! Pure domain logic (no IO). The infra `StockAdjuster` applies a
//! [`StockReturn`] through the product repository.

pub mod product;
pub mod stock_return;

pub use product::{ProductId, ProductStock};
pub use stock_return::{ReturnLine, StockReturn};
