//! Domain model: order state machine, catalog view, cart, value objects and events
pub mod aggregates;
pub mod events;
pub mod value_objects;
