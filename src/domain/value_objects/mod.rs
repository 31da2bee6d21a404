//! Value Objects for the storefront

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::Add;

/// Money value object. Always held at two decimal places.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.0 * Decimal::from(qty)) }
    pub fn is_positive(&self) -> bool { self.0 > Decimal::ZERO }

    /// Rounds up to whole currency units. Some providers only accept whole-unit charges.
    pub fn ceil_whole(&self) -> Money { Money::new(self.0.ceil()) }
}

impl Add for Money {
    type Output = Money;
    fn add(self, other: Money) -> Money { Money::new(self.0 + other.0) }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money { iter.fold(Money::ZERO, Add::add) }
}

impl From<Decimal> for Money {
    fn from(d: Decimal) -> Self { Money::new(d) }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:.2}", self.0) }
}

/// Largest quantity accepted on a single cart line.
pub const MAX_LINE_QUANTITY: u32 = 100;

/// Quantity value object, 1..=MAX_LINE_QUANTITY.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: i64) -> Option<Self> {
        if value < 1 || value > MAX_LINE_QUANTITY as i64 { None } else { Some(Self(value as u32)) }
    }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: Quantity) -> Option<Self> { Self::new(self.0 as i64 + other.0 as i64) }
}

/// Human-readable order number: `ORD-YYYYMMDD-XXXXXX`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub const SUFFIX_LEN: usize = 6;

    pub fn generate(at: DateTime<Utc>) -> Self {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(Self::SUFFIX_LEN)
            .map(|c| (c as char).to_ascii_uppercase())
            .collect();
        Self(format!("ORD-{}-{}", at.format("%Y%m%d"), suffix))
    }
    pub fn as_str(&self) -> &str { &self.0 }
    pub fn into_string(self) -> String { self.0 }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}
