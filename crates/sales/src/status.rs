//! Order status and sub-status.
//!
//! `OrderStatus` is the business lifecycle a caller asks for. `Substatus` is
//! the fulfilment ordinal (0..=5) that also tracks rider dispatch and decides
//! whether an order is locked.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use salespost_core::{DomainError, DomainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Draft,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
    Declined,
}

impl OrderStatus {
    /// Parse a caller-supplied status. Unknown strings are rejected.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "0" | "draft" | "pending" => Ok(OrderStatus::Draft),
            "1" | "confirmed" | "completed" | "sale" | "invoiced" => Ok(OrderStatus::Confirmed),
            "2" | "shipped" | "dispatched" => Ok(OrderStatus::Shipped),
            "3" | "delivered" => Ok(OrderStatus::Delivered),
            "4" | "cancel" | "cancelled" | "canceled" | "void" => Ok(OrderStatus::Cancelled),
            "5" | "decline" | "declined" => Ok(OrderStatus::Declined),
            _ => Err(DomainError::validation(format!("unknown order status: {raw:?}"))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Declined => "declined",
        }
    }

    /// Cancelled and declined orders keep their items and totals.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Declined)
    }

    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        use OrderStatus::*;

        if self == target {
            return true;
        }
        match self {
            Draft => matches!(target, Confirmed | Cancelled | Declined),
            Confirmed => matches!(target, Shipped | Delivered | Cancelled | Declined),
            Shipped => matches!(target, Delivered | Cancelled | Declined),
            Delivered | Cancelled | Declined => false,
        }
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::parse(s)
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fulfilment ordinal. Declaration order is the numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Substatus {
    Draft,
    Confirmed,
    Dispatched,
    Delivered,
    Cancelled,
    Declined,
}

impl Substatus {
    pub fn code(self) -> i16 {
        match self {
            Substatus::Draft => 0,
            Substatus::Confirmed => 1,
            Substatus::Dispatched => 2,
            Substatus::Delivered => 3,
            Substatus::Cancelled => 4,
            Substatus::Declined => 5,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(Substatus::Draft),
            1 => Some(Substatus::Confirmed),
            2 => Some(Substatus::Dispatched),
            3 => Some(Substatus::Delivered),
            4 => Some(Substatus::Cancelled),
            5 => Some(Substatus::Declined),
            _ => None,
        }
    }

    /// Delivered, cancelled and declined orders no longer accept item edits.
    pub fn is_locked(self) -> bool {
        self >= Substatus::Delivered
    }

    /// Sub-status after moving the order from `from` to `to`.
    pub fn after_transition(self, from: OrderStatus, to: OrderStatus) -> Substatus {
        match to {
            OrderStatus::Draft => self,
            OrderStatus::Confirmed if from != OrderStatus::Confirmed => self.max(Substatus::Confirmed),
            OrderStatus::Confirmed => self,
            OrderStatus::Shipped => self.max(Substatus::Dispatched),
            OrderStatus::Delivered => Substatus::Delivered,
            OrderStatus::Cancelled => Substatus::Cancelled,
            OrderStatus::Declined => Substatus::Declined,
        }
    }
}
