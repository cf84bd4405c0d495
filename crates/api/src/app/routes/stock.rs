use std::sync::Arc;

use axum::{
    Router,
    extract::{Extension, Path, Query},
    http::HeaderMap,
    routing::{get, post},
};
use chrono::Utc;

use apotheca_core::{BranchId, ProductId};
use apotheca_infra::pagination::PageRequest;
use apotheca_infra::projections::{
    STOCK_AGGREGATE_TYPE, StockHistoryFilter, StockSummaryFilter,
};
use apotheca_stock::{
    RecordStockTransaction, StockLedger, StockLedgerCommand, TransactionKind, stock_stream_id,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/transactions", post(record_transaction))
        .route("/:branch_id/summary", get(summary))
        .route("/:branch_id/history", get(history))
        .route("/:branch_id/statistics", get(statistics))
}

pub async fn record_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<dto::RecordStockTransactionRequest>,
) -> axum::response::Response {
    let actor = match dto::actor_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let branch_id: BranchId = match dto::parse_id(&body.branch_id, "branch id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let product_id: ProductId = match dto::parse_id(&body.product_id, "product id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let kind: TransactionKind = match dto::parse_symbol(&body.kind) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let product = match services.product(product_id) {
        Ok(info) => info,
        Err(e) => return errors::domain_error_to_response(e),
    };

    let stream = stock_stream_id(branch_id, product_id);
    let committed = match services.dispatch::<StockLedger>(
        branch_id,
        stream,
        STOCK_AGGREGATE_TYPE,
        StockLedgerCommand::RecordStockTransaction(RecordStockTransaction {
            actor,
            branch_id,
            product_id,
            product_name: product.name,
            magnitude: body.magnitude,
            kind,
            occurred_at: Utc::now(),
        }),
        StockLedger::empty,
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    dto::created(serde_json::json!({
        "branchId": branch_id.to_string(),
        "productId": product_id.to_string(),
        "kind": kind,
        "eventsCommitted": committed.len(),
    }))
}

pub async fn summary(
    Extension(services): Extension<Arc<AppServices>>,
    Path(branch_id): Path<String>,
    Query(query): Query<dto::StockSummaryQuery>,
) -> axum::response::Response {
    let branch_id: BranchId = match dto::parse_id(&branch_id, "branch id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let status = match &query.status {
        Some(s) => match dto::parse_status_label(s) {
            Ok(v) => Some(v),
            Err(resp) => return resp,
        },
        None => None,
    };

    let filter = StockSummaryFilter {
        keyword: query.keyword.clone(),
        status,
    };
    let page = PageRequest::new(query.page, query.size);
    dto::paged(services.stock.summary(branch_id, &filter, page))
}

pub async fn history(
    Extension(services): Extension<Arc<AppServices>>,
    Path(branch_id): Path<String>,
    Query(query): Query<dto::StockHistoryQuery>,
) -> axum::response::Response {
    let branch_id: BranchId = match dto::parse_id(&branch_id, "branch id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let product_id = match &query.product_id {
        Some(raw) => match dto::parse_id::<ProductId>(raw, "product id") {
            Ok(v) => Some(v),
            Err(resp) => return resp,
        },
        None => None,
    };
    let kind = match &query.kind {
        Some(s) => match dto::parse_symbol::<TransactionKind>(s) {
            Ok(v) => Some(v),
            Err(resp) => return resp,
        },
        None => None,
    };

    let filter = StockHistoryFilter {
        product_id,
        kind,
        from: query.from,
        to: query.to,
    };
    let page = PageRequest::new(query.page, query.size);
    dto::paged(services.stock.history(branch_id, &filter, page))
}

pub async fn statistics(
    Extension(services): Extension<Arc<AppServices>>,
    Path(branch_id): Path<String>,
    Query(query): Query<dto::StockStatisticsQuery>,
) -> axum::response::Response {
    let branch_id: BranchId = match dto::parse_id(&branch_id, "branch id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let stats = services
        .stock
        .statistics(branch_id, query.from, query.to, services.stats_tz);
    dto::ok(stats)
}
