//! Event-driven policies reacting to published envelopes.

pub mod fulfillment;

pub use fulfillment::{FulfillmentStockPolicy, PolicyError};
