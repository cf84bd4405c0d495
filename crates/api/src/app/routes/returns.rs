use std::sync::Arc;

use axum::{
    Router,
    extract::{Extension, Path, Query},
    http::HeaderMap,
    routing::{get, post},
};
use chrono::Utc;

use apotheca_core::{AggregateId, BranchId, OrderId, ReturnId};
use apotheca_infra::pagination::PageRequest;
use apotheca_infra::projections::{RETURN_AGGREGATE_TYPE, ReturnListFilter};
use apotheca_returns::{
    OpenReturn, OrderRef, Return, ReturnCommand, ReturnLineSpec, ReturnStatus, TransitionReturn,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(open_return).get(list_returns))
        .route("/branch/:branch_id", get(list_branch_returns))
        .route("/:branch_id/:return_id", get(get_return))
        .route("/:branch_id/:return_id/status", post(transition_return))
}

pub async fn open_return(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<dto::OpenReturnRequest>,
) -> axum::response::Response {
    let actor = match dto::actor_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let branch_id: BranchId = match dto::parse_id(&body.branch_id, "branch id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let branch = match services.branch(branch_id) {
        Ok(info) => info,
        Err(e) => return errors::domain_error_to_response(e),
    };

    // The originating order is resolved from the read model; its line
    // products become the membership set the aggregate checks against.
    let order = match &body.order_id {
        Some(raw) => {
            let order_id: OrderId = match dto::parse_id(raw, "order id") {
                Ok(v) => v,
                Err(resp) => return resp,
            };
            match services.orders.get(branch_id, order_id) {
                Some(rm) => Some(OrderRef {
                    order_id,
                    branch_id: rm.branch_id,
                    products: rm.lines.iter().map(|l| l.product_id).collect(),
                }),
                None => {
                    return errors::domain_error_to_response(apotheca_core::DomainError::NotFound);
                }
            }
        }
        None => None,
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
        lines.push(ReturnLineSpec {
            product_id,
            product_name: product.name,
            quantity: line.quantity,
            unit_price: line.unit_price.unwrap_or(product.unit_price),
        });
    }

    let return_id = ReturnId::new();
    let committed = match services.dispatch::<Return>(
        branch_id,
        AggregateId::from_uuid(*return_id.as_uuid()),
        RETURN_AGGREGATE_TYPE,
        ReturnCommand::OpenReturn(OpenReturn {
            actor,
            branch_id,
            return_id,
            branch_name: branch.name,
            order,
            reason: body.reason.clone(),
            lines,
            occurred_at: Utc::now(),
        }),
        |_| Return::empty(return_id),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    dto::created(serde_json::json!({
        "id": return_id.to_string(),
        "eventsCommitted": committed.len(),
    }))
}

pub async fn get_return(
    Extension(services): Extension<Arc<AppServices>>,
    Path((branch_id, return_id)): Path<(String, String)>,
) -> axum::response::Response {
    let branch_id: BranchId = match dto::parse_id(&branch_id, "branch id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let return_id: ReturnId = match dto::parse_id(&return_id, "return id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.returns.get(branch_id, return_id) {
        Some(rm) => dto::ok(rm),
        None => errors::domain_error_to_response(apotheca_core::DomainError::NotFound),
    }
}

pub async fn list_returns(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListQuery>,
) -> axum::response::Response {
    let status = match &query.status {
        Some(s) => match dto::parse_symbol::<ReturnStatus>(s) {
            Ok(v) => Some(v),
            Err(resp) => return resp,
        },
        None => None,
    };

    let filter = ReturnListFilter {
        status,
        branch_name_contains: query.branch_name.clone(),
    };
    let page = PageRequest::new(query.page, query.size);
    dto::paged(services.returns.list(&filter, page))
}

pub async fn list_branch_returns(
    Extension(services): Extension<Arc<AppServices>>,
    Path(branch_id): Path<String>,
    Query(query): Query<dto::BranchListQuery>,
) -> axum::response::Response {
    let branch_id: BranchId = match dto::parse_id(&branch_id, "branch id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status = match &query.status {
        Some(s) => match dto::parse_symbol::<ReturnStatus>(s) {
            Ok(v) => Some(v),
            Err(resp) => return resp,
        },
        None => None,
    };

    let page = PageRequest::new(query.page, query.size);
    dto::paged(services.returns.list_by_branch(branch_id, status, page))
}

pub async fn transition_return(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Path((branch_id, return_id)): Path<(String, String)>,
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
    let return_id: ReturnId = match dto::parse_id(&return_id, "return id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let to: ReturnStatus = match dto::parse_symbol(&body.status) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let committed = match services.dispatch::<Return>(
        branch_id,
        AggregateId::from_uuid(*return_id.as_uuid()),
        RETURN_AGGREGATE_TYPE,
        ReturnCommand::TransitionReturn(TransitionReturn {
            actor,
            return_id,
            to,
            occurred_at: Utc::now(),
        }),
        |_| Return::empty(return_id),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    dto::ok(serde_json::json!({
        "id": return_id.to_string(),
        "status": to,
        "eventsCommitted": committed.len(),
    }))
}
