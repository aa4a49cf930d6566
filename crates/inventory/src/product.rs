use serde::{Deserialize, Serialize};

use salespost_core::{DomainError, DomainResult, typed_id};

typed_id!(
    /// Product identifier.
    ProductId
);

/// Stock counter for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStock {
    id: ProductId,
    name: String,
    current_stock: i64,
}

impl ProductStock {
    pub fn new(id: ProductId, name: impl Into<String>, current_stock: i64) -> Self {
        Self {
            id,
            name: name.into(),
            current_stock,
        }
    }

    pub fn id(&self) -> ProductId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn current_stock(&self) -> i64 {
        self.current_stock
    }

    /// Put `quantity` units back on the shelf. Returns the new stock level.
    pub fn receive(&mut self, quantity: i64) -> DomainResult<i64> {
        if quantity <= 0 {
            return Err(DomainError::validation("returned quantity must be positive"));
        }
        self.current_stock = self
            .current_stock
            .checked_add(quantity)
            .ok_or_else(|| DomainError::invariant("stock counter overflow"))?;
        Ok(self.current_stock)
    }
}
