//! Aggregates module
pub mod product;
pub mod order;
pub mod cart;

pub use product::CatalogItem;
pub use order::{CancelReason, DeliveredUnit, Order, OrderLine, OrderState, PaymentProgress};
pub use cart::{Cart, CartLine};
