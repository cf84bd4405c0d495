//! Order workflow domain module (event-sourced).
//!
//! Business rules for wholesale orders placed by branch pharmacies,
//! implemented purely as deterministic domain logic (no IO, no HTTP,
//! no storage).

pub mod order;
pub mod status;

pub use order::{
    DeleteOrder, LineSpec, Order, OrderCommand, OrderDeleted, OrderEvent, OrderLine, OrderPlaced,
    OrderStatusChanged, PlaceOrder, TransitionOrder,
};
pub use status::OrderStatus;
