use tracing::{info, instrument};

use salespost_inventory::{ProductId, StockReturn};
use salespost_sales::Order;

use super::error::OrderError;
use crate::store::{ProductRepository, StoreError};

/// Stock level of one product after a return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestockedLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub current_stock: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockReturnReceipt {
    pub lines: Vec<RestockedLine>,
}

impl StockReturnReceipt {
    pub fn total_units(&self) -> i64 {
        self.lines.iter().fold(0i64, |total, l| total.saturating_add(l.quantity))
    }
}

/// Puts the goods of a cancelled order back on the shelf.
#[derive(Debug, Clone, Copy, Default)]
pub struct StockAdjuster;

impl StockAdjuster {
    /// Increment stock for every product on `order`.
    ///
    /// The caller owns the order-level `returned_to_stock` gate; this only
    /// touches product counters. An unknown product fails the whole return.
    #[instrument(skip(self, tx, order), fields(order_id = %order.id_typed(), number = order.number()), err)]
    pub async fn return_order<T>(&self, tx: &mut T, order: &Order) -> Result<StockReturnReceipt, OrderError>
    where
        T: ProductRepository + ?Sized,
    {
        let plan = StockReturn::plan(order.items().iter().map(|i| (i.product_id, i.quantity)))?;

        let mut lines = Vec::with_capacity(plan.lines().len());
        for line in plan.lines() {
            let current_stock = tx
                .increment_stock(line.product_id, line.quantity)
                .await
                .map_err(|e| match e {
                    StoreError::Missing(_) => {
                        OrderError::Validation(format!("unknown product {}", line.product_id))
                    }
                    other => OrderError::Store(other),
                })?;
            info!(product_id = %line.product_id, quantity = line.quantity, current_stock, "stock returned");
            lines.push(RestockedLine {
                product_id: line.product_id,
                quantity: line.quantity,
                current_stock,
            });
        }

        Ok(StockReturnReceipt { lines })
    }
}
