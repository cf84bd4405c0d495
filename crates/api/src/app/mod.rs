//! HTTP application wiring (Axum router + service wiring).
//!
//! Layout, one concern per file:
//! - `services.rs`: infrastructure wiring (event store/bus, projections, dispatcher, policy)
//! - `routes/`: HTTP routes + handlers (one file per workflow)
//! - `dto.rs`: request/response DTOs and the JSON response envelope
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router over freshly wired in-memory services
/// (public entrypoint used by `main.rs`).
pub fn build_app() -> Router {
    build_app_with(Arc::new(services::build_services()))
}

/// Build the router over pre-wired services. Tests use this to seed the
/// catalog and branch directory before the first request.
pub fn build_app_with(services: Arc<services::AppServices>) -> Router {
    routes::router()
        .layer(Extension(services))
        .layer(ServiceBuilder::new())
}
