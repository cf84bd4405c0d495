use axum::{Router, routing::get};

pub mod credit;
pub mod orders;
pub mod returns;
pub mod stock;
pub mod system;

pub fn router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .nest("/orders", orders::router())
        .nest("/returns", returns::router())
        .nest("/stock", stock::router())
        .nest("/credit", credit::router())
}
