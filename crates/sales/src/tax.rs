//! Tax decomposition of tax-inclusive line prices.
//!
//! Unit prices are gross (tax included). The engine splits each line into net
//! and tax at the cent, per line, and order totals are plain sums of the lines.

use serde::{Deserialize, Serialize};

use salespost_core::{DomainError, DomainResult, Money};

/// Tax class attached to an order line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxClass {
    /// 16% VAT included in the price.
    Standard,
    ZeroRated,
    Exempt,
}

/// Outcome of reading a tax class supplied by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxClassResolution {
    pub class: TaxClass,
    /// The input was not recognized and the standard class was used instead.
    pub fell_back: bool,
}

impl TaxClass {
    /// Standard VAT rate in basis points.
    pub const STANDARD_RATE_BPS: i64 = 1_600;

    pub fn rate_bps(self) -> i64 {
        match self {
            TaxClass::Standard => Self::STANDARD_RATE_BPS,
            TaxClass::ZeroRated | TaxClass::Exempt => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaxClass::Standard => "standard",
            TaxClass::ZeroRated => "zero_rated",
            TaxClass::Exempt => "exempt",
        }
    }

    /// Strict parse; `None` for anything outside the known spellings.
    pub fn parse(raw: &str) -> Option<TaxClass> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "16%" | "standard" | "vat" => Some(TaxClass::Standard),
            "zero_rated" | "zero-rated" | "0%" => Some(TaxClass::ZeroRated),
            "exempt" | "exempted" => Some(TaxClass::Exempt),
            _ => None,
        }
    }

    /// Lenient read used for order lines: absent means standard, unknown falls
    /// back to standard and says so.
    pub fn resolve(raw: Option<&str>) -> TaxClassResolution {
        match raw {
            None => TaxClassResolution {
                class: TaxClass::Standard,
                fell_back: false,
            },
            Some(raw) => match TaxClass::parse(raw) {
                Some(class) => TaxClassResolution {
                    class,
                    fell_back: false,
                },
                None => TaxClassResolution {
                    class: TaxClass::Standard,
                    fell_back: true,
                },
            },
        }
    }
}

impl core::fmt::Display for TaxClass {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Net/tax/gross split of one line. `net + tax == gross` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxBreakdown {
    pub net: Money,
    pub tax: Money,
    pub gross: Money,
}

/// Pure tax calculator.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaxEngine;

impl TaxEngine {
    /// Split `quantity * unit_price` into net and tax for `class`.
    pub fn compute_line(quantity: i64, unit_price: Money, class: TaxClass) -> DomainResult<TaxBreakdown> {
        if quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if !unit_price.is_positive() {
            return Err(DomainError::validation("unit_price must be positive"));
        }

        let gross = unit_price
            .checked_mul(quantity)
            .ok_or_else(|| DomainError::validation("line amount is too large"))?;

        let rate = class.rate_bps();
        let net = if rate > 0 {
            gross
                .scale_rounded(10_000, 10_000 + rate)
                .ok_or_else(|| DomainError::validation("line amount is too large"))?
        } else {
            gross
        };

        Ok(TaxBreakdown {
            net,
            tax: gross - net,
            gross,
        })
    }
}

/// Order-level sums of line breakdowns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub tax_amount: Money,
    pub total_amount: Money,
}

impl OrderTotals {
    pub fn from_breakdowns<'a>(lines: impl IntoIterator<Item = &'a TaxBreakdown>) -> DomainResult<Self> {
        let overflow = || DomainError::validation("order total is too large");
        let mut totals = OrderTotals::default();
        for line in lines {
            totals.subtotal = totals.subtotal.checked_add(line.net).ok_or_else(overflow)?;
            totals.tax_amount = totals.tax_amount.checked_add(line.tax).ok_or_else(overflow)?;
            totals.total_amount = totals.total_amount.checked_add(line.gross).ok_or_else(overflow)?;
        }
        Ok(totals)
    }

    /// `subtotal + tax_amount == total_amount`.
    #[cfg(test)]
    fn is_balanced(&self) -> bool {
        self.subtotal.checked_add(self.tax_amount) == Some(self.total_amount)
    }
}
