use serde::{Deserialize, Serialize};

use salespost_core::{DomainError, DomainResult, Money};
use salespost_inventory::ProductId;

use crate::tax::{OrderTotals, TaxBreakdown, TaxClass, TaxEngine};

/// Line as submitted by a caller, before pricing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInput {
    pub product_id: ProductId,
    pub quantity: i64,
    /// Tax-inclusive price per unit.
    pub unit_price: Money,
    /// Raw tax class; `None` means standard.
    pub tax_class: Option<String>,
}

impl ItemInput {
    pub fn new(product_id: ProductId, quantity: i64, unit_price: Money) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
            tax_class: None,
        }
    }

    pub fn with_tax_class(mut self, tax_class: impl Into<String>) -> Self {
        self.tax_class = Some(tax_class.into());
        self
    }
}

/// Priced order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: i64,
    pub unit_price: Money,
    pub tax_class: TaxClass,
    pub net: Money,
    pub tax: Money,
    pub gross: Money,
}

impl OrderItem {
    pub fn breakdown(&self) -> TaxBreakdown {
        TaxBreakdown {
            net: self.net,
            tax: self.tax,
            gross: self.gross,
        }
    }
}

/// A full item set with its totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedItems {
    pub items: Vec<OrderItem>,
    pub totals: OrderTotals,
    /// Line numbers whose tax class was unrecognized and priced as standard.
    pub tax_class_fallbacks: Vec<u32>,
}

/// Validate and price a submitted item set. At least one line is required.
pub fn price_items(inputs: &[ItemInput]) -> DomainResult<PricedItems> {
    if inputs.is_empty() {
        return Err(DomainError::validation("order must include at least one item"));
    }

    let mut items = Vec::with_capacity(inputs.len());
    let mut tax_class_fallbacks = Vec::new();

    for (idx, input) in inputs.iter().enumerate() {
        let line_no = (idx as u32) + 1;
        let resolution = TaxClass::resolve(input.tax_class.as_deref());
        if resolution.fell_back {
            tax_class_fallbacks.push(line_no);
        }

        let breakdown = TaxEngine::compute_line(input.quantity, input.unit_price, resolution.class)
            .map_err(|e| match e {
                DomainError::Validation(msg) => DomainError::validation(format!("item {line_no}: {msg}")),
                other => other,
            })?;

        items.push(OrderItem {
            line_no,
            product_id: input.product_id,
            quantity: input.quantity,
            unit_price: input.unit_price,
            tax_class: resolution.class,
            net: breakdown.net,
            tax: breakdown.tax,
            gross: breakdown.gross,
        });
    }

    let totals = totals_of(&items)?;
    Ok(PricedItems {
        items,
        totals,
        tax_class_fallbacks,
    })
}

/// Recompute totals from persisted lines.
pub fn totals_of(items: &[OrderItem]) -> DomainResult<OrderTotals> {
    let breakdowns: Vec<TaxBreakdown> = items.iter().map(OrderItem::breakdown).collect();
    OrderTotals::from_breakdowns(&breakdowns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard(qty: i64, price_minor: i64) -> ItemInput {
        ItemInput::new(ProductId::generate(), qty, Money::from_minor(price_minor))
    }

    #[test]
    fn prices_each_line_and_numbers_them() {
        let priced = price_items(&[standard(2, 11_600), standard(2, 11_600)]).unwrap();
        assert_eq!(priced.items.len(), 2);
        assert_eq!(priced.items[0].line_no, 1);
        assert_eq!(priced.items[1].line_no, 2);
        assert_eq!(priced.totals.subtotal, Money::from_minor(40_000));
        assert_eq!(priced.totals.tax_amount, Money::from_minor(6_400));
        assert_eq!(priced.totals.total_amount, Money::from_minor(46_400));
        assert!(priced.tax_class_fallbacks.is_empty());
    }

    #[test]
    fn empty_item_set_is_rejected() {
        let err = price_items(&[]).unwrap_err();
        match err {
            DomainError::Validation(msg) => assert!(msg.contains("at least one item")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn bad_line_names_its_position() {
        let err = price_items(&[standard(1, 100), standard(0, 100)]).unwrap_err();
        match err {
            DomainError::Validation(msg) => assert!(msg.starts_with("item 2:")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn unknown_tax_class_is_reported_per_line() {
        let priced = price_items(&[
            standard(1, 11_600).with_tax_class("exempted"),
            standard(1, 11_600).with_tax_class("mystery"),
        ])
        .unwrap();
        assert_eq!(priced.items[0].tax_class, TaxClass::Exempt);
        assert_eq!(priced.items[1].tax_class, TaxClass::Standard);
        assert_eq!(priced.tax_class_fallbacks, vec![2]);
    }

    #[test]
    fn stored_breakdown_matches_the_tax_engine() {
        let priced = price_items(&[standard(3, 999)]).unwrap();
        let item = &priced.items[0];
        let again = TaxEngine::compute_line(item.quantity, item.unit_price, item.tax_class).unwrap();
        assert_eq!(again, item.breakdown());
    }
}
