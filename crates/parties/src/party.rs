use serde::{Deserialize, Serialize};

use salespost_core::{Money, typed_id};

typed_id!(
    /// Client (customer) identifier.
    ClientId
);

typed_id!(
    /// Sales representative identifier.
    SalesRepId
);

typed_id!(
    /// Delivery rider identifier.
    RiderId
);

/// A billed client.
///
/// `balance` mirrors the latest running balance of the client's ledger. It is
/// only ever changed by appending a ledger row, so there is no setter here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    id: ClientId,
    name: String,
    balance: Money,
}

impl Client {
    pub fn new(id: ClientId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            balance: Money::ZERO,
        }
    }

    /// Rebuild a client read back from storage.
    pub fn restore(id: ClientId, name: impl Into<String>, balance: Money) -> Self {
        Self {
            id,
            name: name.into(),
            balance,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn balance(&self) -> Money {
        self.balance
    }
}
