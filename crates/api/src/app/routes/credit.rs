use std::sync::Arc;

use axum::{
    Router,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use chrono::Utc;
use uuid::Uuid;

use apotheca_core::{AccountId, AggregateId, BranchId};
use apotheca_credit::{
    Account, AccountCommand, ApproveCharge, ApproveSettlement, OpenAccount, RecordAdjustment,
    RejectCharge, RequestCharge, RequestSettlement,
};
use apotheca_infra::projections::ACCOUNT_AGGREGATE_TYPE;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/accounts", post(open_account))
        .route("/accounts/pending", get(pending_accounts))
        .route("/accounts/:branch_id/:account_id", get(get_account))
        .route("/accounts/:branch_id/:account_id/charges", post(request_charge))
        .route(
            "/accounts/:branch_id/:account_id/charges/:charge_id/approve",
            post(approve_charge),
        )
        .route(
            "/accounts/:branch_id/:account_id/charges/:charge_id/reject",
            post(reject_charge),
        )
        .route(
            "/accounts/:branch_id/:account_id/settlement",
            post(request_settlement),
        )
        .route(
            "/accounts/:branch_id/:account_id/settlement/approve",
            post(approve_settlement),
        )
        .route(
            "/accounts/:branch_id/:account_id/adjustments",
            post(record_adjustment),
        )
}

struct AccountPath {
    branch_id: BranchId,
    account_id: AccountId,
}

fn parse_account_path(
    branch_id: &str,
    account_id: &str,
) -> Result<AccountPath, axum::response::Response> {
    Ok(AccountPath {
        branch_id: dto::parse_id(branch_id, "branch id")?,
        account_id: dto::parse_id(account_id, "account id")?,
    })
}

fn parse_charge_id(raw: &str) -> Result<Uuid, axum::response::Response> {
    Uuid::parse_str(raw).map_err(|_| {
        errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid charge id")
    })
}

pub async fn open_account(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<dto::OpenAccountRequest>,
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

    let account_id = AccountId::new();
    let committed = match services.dispatch::<Account>(
        branch_id,
        AggregateId::from_uuid(*account_id.as_uuid()),
        ACCOUNT_AGGREGATE_TYPE,
        AccountCommand::OpenAccount(OpenAccount {
            actor,
            account_id,
            branch_id,
            branch_name: branch.name,
            occurred_at: Utc::now(),
        }),
        |_| Account::empty(account_id),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    dto::created(serde_json::json!({
        "id": account_id.to_string(),
        "eventsCommitted": committed.len(),
    }))
}

pub async fn get_account(
    Extension(services): Extension<Arc<AppServices>>,
    Path((branch_id, account_id)): Path<(String, String)>,
) -> axum::response::Response {
    let path = match parse_account_path(&branch_id, &account_id) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match services.credit.get(path.branch_id, path.account_id) {
        Some(rm) => dto::ok(rm),
        None => errors::domain_error_to_response(apotheca_core::DomainError::NotFound),
    }
}

/// Accounts needing operator attention: negative balance or settlement
/// requested, oldest account first.
pub async fn pending_accounts(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    dto::ok(services.credit.pending())
}

pub async fn request_charge(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Path((branch_id, account_id)): Path<(String, String)>,
    axum::Json(body): axum::Json<dto::ChargeRequestBody>,
) -> axum::response::Response {
    let actor = match dto::actor_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let path = match parse_account_path(&branch_id, &account_id) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let charge_id = Uuid::now_v7();
    let committed = match services.dispatch::<Account>(
        path.branch_id,
        AggregateId::from_uuid(*path.account_id.as_uuid()),
        ACCOUNT_AGGREGATE_TYPE,
        AccountCommand::RequestCharge(RequestCharge {
            actor,
            account_id: path.account_id,
            charge_id,
            amount: body.amount,
            occurred_at: Utc::now(),
        }),
        |_| Account::empty(path.account_id),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    dto::created(serde_json::json!({
        "chargeId": charge_id.to_string(),
        "eventsCommitted": committed.len(),
    }))
}

pub async fn approve_charge(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Path((branch_id, account_id, charge_id)): Path<(String, String, String)>,
) -> axum::response::Response {
    let actor = match dto::actor_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let path = match parse_account_path(&branch_id, &account_id) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let charge_id = match parse_charge_id(&charge_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.dispatch::<Account>(
        path.branch_id,
        AggregateId::from_uuid(*path.account_id.as_uuid()),
        ACCOUNT_AGGREGATE_TYPE,
        AccountCommand::ApproveCharge(ApproveCharge {
            actor,
            account_id: path.account_id,
            charge_id,
            occurred_at: Utc::now(),
        }),
        |_| Account::empty(path.account_id),
    ) {
        Ok(_) => dto::ok(serde_json::json!({ "chargeId": charge_id.to_string() })),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn reject_charge(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Path((branch_id, account_id, charge_id)): Path<(String, String, String)>,
) -> axum::response::Response {
    let actor = match dto::actor_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let path = match parse_account_path(&branch_id, &account_id) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    let charge_id = match parse_charge_id(&charge_id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.dispatch::<Account>(
        path.branch_id,
        AggregateId::from_uuid(*path.account_id.as_uuid()),
        ACCOUNT_AGGREGATE_TYPE,
        AccountCommand::RejectCharge(RejectCharge {
            actor,
            account_id: path.account_id,
            charge_id,
            occurred_at: Utc::now(),
        }),
        |_| Account::empty(path.account_id),
    ) {
        Ok(_) => dto::ok(serde_json::json!({ "chargeId": charge_id.to_string() })),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn request_settlement(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Path((branch_id, account_id)): Path<(String, String)>,
) -> axum::response::Response {
    let actor = match dto::actor_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let path = match parse_account_path(&branch_id, &account_id) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match services.dispatch::<Account>(
        path.branch_id,
        AggregateId::from_uuid(*path.account_id.as_uuid()),
        ACCOUNT_AGGREGATE_TYPE,
        AccountCommand::RequestSettlement(RequestSettlement {
            actor,
            account_id: path.account_id,
            occurred_at: Utc::now(),
        }),
        |_| Account::empty(path.account_id),
    ) {
        Ok(_) => dto::ok(serde_json::json!({ "id": path.account_id.to_string() })),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}

pub async fn approve_settlement(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Path((branch_id, account_id)): Path<(String, String)>,
) -> axum::response::Response {
    let actor = match dto::actor_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let path = match parse_account_path(&branch_id, &account_id) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let committed = match services.dispatch::<Account>(
        path.branch_id,
        AggregateId::from_uuid(*path.account_id.as_uuid()),
        ACCOUNT_AGGREGATE_TYPE,
        AccountCommand::ApproveSettlement(ApproveSettlement {
            actor,
            account_id: path.account_id,
            occurred_at: Utc::now(),
        }),
        |_| Account::empty(path.account_id),
    ) {
        Ok(c) => c,
        Err(e) => return errors::dispatch_error_to_response(e),
    };

    // Surface the settled magnitude from the committed event payload.
    let settled_amount = committed
        .first()
        .and_then(|e| e.payload.get("SettlementApproved"))
        .and_then(|p| p.get("settled_amount"))
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    dto::ok(serde_json::json!({
        "id": path.account_id.to_string(),
        "settledAmount": settled_amount,
    }))
}

pub async fn record_adjustment(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Path((branch_id, account_id)): Path<(String, String)>,
    axum::Json(body): axum::Json<dto::AdjustmentRequest>,
) -> axum::response::Response {
    let actor = match dto::actor_from_headers(&headers) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let path = match parse_account_path(&branch_id, &account_id) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    match services.dispatch::<Account>(
        path.branch_id,
        AggregateId::from_uuid(*path.account_id.as_uuid()),
        ACCOUNT_AGGREGATE_TYPE,
        AccountCommand::RecordAdjustment(RecordAdjustment {
            actor,
            account_id: path.account_id,
            delta: body.delta,
            reason: body.reason.clone(),
            occurred_at: Utc::now(),
        }),
        |_| Account::empty(path.account_id),
    ) {
        Ok(_) => dto::ok(serde_json::json!({ "id": path.account_id.to_string() })),
        Err(e) => errors::dispatch_error_to_response(e),
    }
}
