//! Cart Aggregate

use uuid::Uuid;
use crate::domain::value_objects::Quantity;
use crate::{Result, StorefrontError};

/// Upper bound on distinct lines in one order.
pub const MAX_CART_LINES: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: Quantity,
}

#[derive(Clone, Debug, Default)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn new() -> Self { Self::default() }

    /// Builds a cart from raw `(product, variant, quantity)` tuples.
    pub fn from_items(items: impl IntoIterator<Item = (Uuid, Option<Uuid>, i64)>) -> Result<Self> {
        let mut cart = Self::new();
        for (product_id, variant_id, qty) in items {
            let quantity = Quantity::new(qty).ok_or(StorefrontError::InvalidQuantity)?;
            cart.add(CartLine { product_id, variant_id, quantity })?;
        }
        if cart.is_empty() { return Err(StorefrontError::EmptyCart); }
        Ok(cart)
    }

    pub fn lines(&self) -> &[CartLine] { &self.lines }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }

    pub fn add(&mut self, line: CartLine) -> Result<()> {
        if let Some(existing) = self.lines.iter_mut().find(|l| l.product_id == line.product_id && l.variant_id == line.variant_id) {
            existing.quantity = existing.quantity.add(line.quantity).ok_or(StorefrontError::InvalidQuantity)?;
            return Ok(());
        }
        if self.lines.len() >= MAX_CART_LINES {
            return Err(StorefrontError::InvalidRequest(format!("at most {MAX_CART_LINES} lines per order")));
        }
        self.lines.push(line);
        Ok(())
    }
}
