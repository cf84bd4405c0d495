use std::sync::Arc;

use axum::{
    Router,
    extract::{Extension, Path, Query},
    http::HeaderMap,
    routing::{get, post},
};
use chrono::Utc;

use apotheca_core::{AggregateId, BranchId, OrderId};
use apotheca_infra::pagination::PageRequest;
use apotheca_infra::projections::{ORDER_AGGREGATE_TYPE, OrderListFilter};
use apotheca_orders::{
    DeleteOrder, LineSpec, Order, OrderCommand, OrderStatus, PlaceOrder, TransitionOrder,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(place_order).get(list_orders))
        .route("/branch/:branch_id", get(list_branch_orders))
        .route("/:branch_id/:order_id", get(get_order).delete(delete_order))
        .route("/:branch_id/:order_id/status", post(transition_order))
}

pub async fn place_order(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<dto::PlaceOrderRequest>,
) -> axum::response::Response {
    let actor = match dto::actor_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let branch_id: BranchId = match dto::parse_id(&body.branch_id, "branch id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    // Ordering requires an existing, ACTIVE branch; the display name is
    // snapshotted onto the order.
    let branch = match services.active_branch(branch_id) {
        Ok(info) => info,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let mut lines = Vec::with_capacity(body.lines.len());
    for line in &body.lines {
        let product_id = match dto::parse_id(&line.product_id, "product id") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let product = match services.product(product_id) {
            Ok(info) => info,
            Err(e) => return errors::domain_error_to_response(e),
        };
        lines.push(LineSpec {
            product_id,
            product_name: product.name,
            quantity: line.quantity,
            unit_price: line.unit_price.unwrap_or(product.unit_price),
        });
    }

    let order_id = OrderId::new();
    let committed = match services.dispatch::<Order>(
        branch_id,
        AggregateId::from_uuid(*order_id.as_uuid()),
        ORDER_AGGREGATE_TYPE,
        OrderCommand::PlaceOrder(PlaceOrder {
            actor,
            branch_id,
            order_id,
            branch_name: branch.name,
            lines,
            occurred_at: Utc::now(),
        }),
        |_| Order::empty(order_id),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    dto::created(serde_json::json!({
        "id": order_id.to_string(),
        "eventsCommitted": committed.len(),
    }))
}

pub async fn get_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path((branch_id, order_id)): Path<(String, String)>,
) -> axum::response::Response {
    let branch_id: BranchId = match dto::parse_id(&branch_id, "branch id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let order_id: OrderId = match dto::parse_id(&order_id, "order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.orders.get(branch_id, order_id) {
        Some(rm) => dto::ok(rm),
        None => errors::domain_error_to_response(apotheca_core::DomainError::NotFound),
    }
}

pub async fn list_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListQuery>,
) -> axum::response::Response {
    let status = match &query.status {
        Some(s) => match dto::parse_symbol::<OrderStatus>(s) {
            Ok(v) => Some(v),
            Err(resp) => return resp,
        },
        None => None,
    };

    let filter = OrderListFilter {
        status,
        branch_name_contains: query.branch_name.clone(),
    };
    let page = PageRequest::new(query.page, query.size);
    dto::paged(services.orders.list(&filter, page))
}

pub async fn list_branch_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Path(branch_id): Path<String>,
    Query(query): Query<dto::BranchListQuery>,
) -> axum::response::Response {
    let branch_id: BranchId = match dto::parse_id(&branch_id, "branch id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status = match &query.status {
        Some(s) => match dto::parse_symbol::<OrderStatus>(s) {
            Ok(v) => Some(v),
            Err(resp) => return resp,
        },
        None => None,
    };

    let page = PageRequest::new(query.page, query.size);
    dto::paged(services.orders.list_by_branch(branch_id, status, page))
}

pub async fn transition_order(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Path((branch_id, order_id)): Path<(String, String)>,
    axum::Json(body): axum::Json<dto::TransitionRequest>,
) -> axum::response::Response {
    let actor = match dto::actor_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let branch_id: BranchId = match dto::parse_id(&branch_id, "branch id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let order_id: OrderId = match dto::parse_id(&order_id, "order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let to: OrderStatus = match dto::parse_symbol(&body.status) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let committed = match services.dispatch::<Order>(
        branch_id,
        AggregateId::from_uuid(*order_id.as_uuid()),
        ORDER_AGGREGATE_TYPE,
        OrderCommand::TransitionOrder(TransitionOrder {
            actor,
            order_id,
            to,
            occurred_at: Utc::now(),
        }),
        |_| Order::empty(order_id),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    dto::ok(serde_json::json!({
        "id": order_id.to_string(),
        "status": to,
        "eventsCommitted": committed.len(),
    }))
}

pub async fn delete_order(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Path((branch_id, order_id)): Path<(String, String)>,
) -> axum::response::Response {
    let actor = match dto::actor_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let branch_id: BranchId = match dto::parse_id(&branch_id, "branch id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let order_id: OrderId = match dto::parse_id(&order_id, "order id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.dispatch::<Order>(
        branch_id,
        AggregateId::from_uuid(*order_id.as_uuid()),
        ORDER_AGGREGATE_TYPE,
        OrderCommand::DeleteOrder(DeleteOrder {
            actor,
            order_id,
            occurred_at: Utc::now(),
        }),
        |_| Order::empty(order_id),
    ) {
        Ok(_) => dto::ok(serde_json::json!({ "id": order_id.to_string() })),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
