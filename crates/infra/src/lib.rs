//! Infrastructure layer: event store, command dispatch, read models,
//! projections and the fulfillment policy.

pub mod command_dispatcher;
pub mod event_store;
pub mod pagination;
pub mod policy;
pub mod projections;
pub mod read_model;
