use std::fmt::Display;

use mkt_common::Cents;
use serde::{Deserialize, Deserializer, Serialize};

/// An ISO-4217 currency code, normalised to upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Self {
        Self(code.trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(Self::new(&code))
    }
}

impl Default for Currency {
    fn default() -> Self {
        Self::new("USD")
    }
}

impl From<&str> for Currency {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A priced quantity. `amount` is the total for `quantity` units. Refund entries carry negative quantities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    pub amount: Cents,
    pub quantity: i64,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount: Cents, quantity: i64, currency: Currency) -> Self {
        Self { amount, quantity, currency }
    }

    /// The number of units this entry moves, regardless of direction.
    pub fn units(&self) -> u32 {
        u32::try_from(self.quantity.unsigned_abs()).unwrap_or(u32::MAX)
    }
}

/// A unit price as published on a listing, service or ticket type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPrice {
    pub amount: Cents,
    pub currency: Currency,
}

impl UnitPrice {
    pub fn times(&self, quantity: i64) -> Money {
        Money::new(self.amount * quantity, quantity, self.currency.clone())
    }
}
