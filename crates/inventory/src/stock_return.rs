//! Returning a cancelled order's goods to stock.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use salespost_core::{DomainError, DomainResult};

use crate::product::ProductId;

/// One product's consolidated return quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

/// Per-product quantities to add back to stock.
///
/// Lines for the same product are merged so each product counter is touched
/// once, in a stable (id) order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReturn {
    lines: Vec<ReturnLine>,
}

impl StockReturn {
    /// Build a return plan from `(product, quantity)` pairs.
    pub fn plan(items: impl IntoIterator<Item = (ProductId, i64)>) -> DomainResult<Self> {
        let mut merged: BTreeMap<ProductId, i64> = BTreeMap::new();
        for (product_id, quantity) in items {
            if quantity <= 0 {
                return Err(DomainError::validation(format!(
                    "returned quantity for product {product_id} must be positive"
                )));
            }
            let slot = merged.entry(product_id).or_insert(0);
            *slot = slot
                .checked_add(quantity)
                .ok_or_else(|| DomainError::invariant("return quantity overflow"))?;
        }
        if merged.is_empty() {
            return Err(DomainError::validation("order has no items to return to stock"));
        }
        Ok(Self {
            lines: merged
                .into_iter()
                .map(|(product_id, quantity)| ReturnLine { product_id, quantity })
                .collect(),
        })
    }

    pub fn lines(&self) -> &[ReturnLine] {
        &self.lines
    }

    pub fn total_units(&self) -> i64 {
        self.lines.iter().fold(0i64, |total, l| total.saturating_add(l.quantity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn merges_lines_for_the_same_product() {
        let soap = ProductId::generate();
        let rice = ProductId::generate();
        let plan = StockReturn::plan([(soap, 2), (rice, 5), (soap, 3)]).unwrap();

        assert_eq!(plan.lines().len(), 2);
        let soap_line = plan.lines().iter().find(|l| l.product_id == soap).unwrap();
        assert_eq!(soap_line.quantity, 5);
        assert_eq!(plan.total_units(), 10);
    }

    #[test]
    fn empty_plan_is_rejected() {
        let err = StockReturn::plan(Vec::new()).unwrap_err();
        match err {
            DomainError::Validation(msg) => assert!(msg.contains("no items")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        let err = StockReturn::plan([(ProductId::generate(), -1)]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn plan_preserves_total_units(quantities in prop::collection::vec(1i64..1000, 1..20)) {
            let products: Vec<ProductId> = (0..3).map(|_| ProductId::generate()).collect();
            let items: Vec<(ProductId, i64)> = quantities
                .iter()
                .enumerate()
                .map(|(i, q)| (products[i % products.len()], *q))
                .collect();
            let plan = StockReturn::plan(items).unwrap();
            prop_assert_eq!(plan.total_units(), quantities.iter().sum::<i64>());
            prop_assert!(plan.lines().len() <= products.len());
        }
    }
}
