use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;

use apotheca_api::app::{build_app_with, services};
use apotheca_branches::{BranchInfo, BranchStatus};
use apotheca_catalog::{ProductCategory, ProductInfo};
use apotheca_core::{BranchId, ProductId};

struct TestServer {
    base_url: String,
    services: Arc<services::AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, bound to an ephemeral port, with the seedable
        // in-memory catalog/directory exposed through `services`.
        let services = Arc::new(services::build_services());
        let app = build_app_with(services.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
        }
    }

    fn seed_branch(&self, name: &str, status: BranchStatus) -> BranchId {
        let branch_id = BranchId::new();
        self.services.directory.insert(BranchInfo {
            branch_id,
            name: name.to_string(),
            registration_no: format!("reg-{branch_id}"),
            status,
        });
        branch_id
    }

    fn seed_product(&self, name: &str, unit_price: i64) -> ProductId {
        let product_id = ProductId::new();
        self.services.catalog.insert(ProductInfo {
            product_id,
            name: name.to_string(),
            unit_price,
            category: ProductCategory::OverTheCounter,
        });
        product_id
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The query side is eventually consistent; poll until the predicate holds.
async fn get_eventually(
    client: &reqwest::Client,
    url: &str,
    pred: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    for _ in 0..200 {
        let res = client.get(url).send().await.unwrap();
        if res.status() == StatusCode::OK {
            let body: serde_json::Value = res.json().await.unwrap();
            if pred(&body) {
                return body;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("resource at {url} did not reach the expected state within timeout");
}

async fn place_order(
    client: &reqwest::Client,
    base_url: &str,
    branch_id: BranchId,
    product_id: ProductId,
    quantity: u32,
    unit_price: i64,
) -> String {
    let res = client
        .post(format!("{base_url}/orders"))
        .json(&json!({
            "branch_id": branch_id.to_string(),
            "lines": [{
                "product_id": product_id.to_string(),
                "quantity": quantity,
                "unit_price": unit_price,
            }],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    body["data"]["id"].as_str().unwrap().to_string()
}

async fn transition_order(
    client: &reqwest::Client,
    base_url: &str,
    branch_id: BranchId,
    order_id: &str,
    status: &str,
) -> reqwest::Response {
    client
        .post(format!("{base_url}/orders/{branch_id}/{order_id}/status"))
        .json(&json!({ "status": status }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_endpoint_is_open() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn placed_order_snapshots_prices_and_branch_name() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let branch = srv.seed_branch("Gwangalli Pharmacy", BranchStatus::Active);
    let aspirin = srv.seed_product("Aspirin 500mg", 1000);

    let order_id = place_order(&client, &srv.base_url, branch, aspirin, 10, 1000).await;

    let url = format!("{}/orders/{branch}/{order_id}", srv.base_url);
    let body = get_eventually(&client, &url, |b| b["data"]["status"] == "REQUESTED").await;

    assert_eq!(body["data"]["total_price"], 10_000);
    assert_eq!(body["data"]["branch_name"], "Gwangalli Pharmacy");
    assert_eq!(body["data"]["lines"][0]["subtotal"], 10_000);
}

#[tokio::test]
async fn inactive_branch_cannot_order() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let branch = srv.seed_branch("Pending Pharmacy", BranchStatus::Pending);
    let aspirin = srv.seed_product("Aspirin 500mg", 1000);

    let res = client
        .post(format!("{}/orders", srv.base_url))
        .json(&json!({
            "branch_id": branch.to_string(),
            "lines": [{ "product_id": aspirin.to_string(), "quantity": 1 }],
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_state");
}

#[tokio::test]
async fn fulfillment_completion_moves_stock_in_then_out() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let branch = srv.seed_branch("Gwangalli Pharmacy", BranchStatus::Active);
    let aspirin = srv.seed_product("Aspirin 500mg", 1000);

    let order_id = place_order(&client, &srv.base_url, branch, aspirin, 10, 1000).await;
    for status in ["APPROVED", "PROCESSING", "SHIPPING", "COMPLETED"] {
        let res = transition_order(&client, &srv.base_url, branch, &order_id, status).await;
        assert_eq!(res.status(), StatusCode::OK, "transition to {status}");
    }

    let summary_url = format!("{}/stock/{branch}/summary", srv.base_url);
    let body = get_eventually(&client, &summary_url, |b| {
        b["totalElements"] == 1 && b["data"][0]["quantity"] == 10
    })
    .await;
    assert_eq!(body["data"][0]["product_name"], "Aspirin 500mg");

    // Return 3 units against the completed order; completion ships them out.
    let order_url = format!("{}/orders/{branch}/{order_id}", srv.base_url);
    get_eventually(&client, &order_url, |b| b["data"]["status"] == "COMPLETED").await;

    let res = client
        .post(format!("{}/returns", srv.base_url))
        .json(&json!({
            "branch_id": branch.to_string(),
            "order_id": order_id,
            "reason": "damaged packaging",
            "lines": [{ "product_id": aspirin.to_string(), "quantity": 3, "unit_price": 1000 }],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    let return_id = body["data"]["id"].as_str().unwrap().to_string();

    for status in ["APPROVED", "PROCESSING", "COMPLETED"] {
        let res = client
            .post(format!(
                "{}/returns/{branch}/{return_id}/status",
                srv.base_url
            ))
            .json(&json!({ "status": status }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK, "return transition to {status}");
    }

    get_eventually(&client, &summary_url, |b| b["data"][0]["quantity"] == 7).await;

    let history_url = format!("{}/stock/{branch}/history", srv.base_url);
    let body = get_eventually(&client, &history_url, |b| b["totalElements"] == 2).await;
    assert_eq!(body["data"][0]["kind"], "OUTBOUND");
    assert_eq!(body["data"][0]["magnitude"], 3);
}

#[tokio::test]
async fn return_lines_must_come_from_the_original_order() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let branch = srv.seed_branch("Gwangalli Pharmacy", BranchStatus::Active);
    let aspirin = srv.seed_product("Aspirin 500mg", 1000);
    let bandage = srv.seed_product("Bandage Roll", 500);

    let order_id = place_order(&client, &srv.base_url, branch, aspirin, 2, 1000).await;
    let order_url = format!("{}/orders/{branch}/{order_id}", srv.base_url);
    get_eventually(&client, &order_url, |b| b["data"]["status"] == "REQUESTED").await;

    let res = client
        .post(format!("{}/returns", srv.base_url))
        .json(&json!({
            "branch_id": branch.to_string(),
            "order_id": order_id,
            "reason": "wrong item",
            "lines": [{ "product_id": bandage.to_string(), "quantity": 1 }],
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_in_original_order");
}

#[tokio::test]
async fn terminal_orders_refuse_further_transitions() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let branch = srv.seed_branch("Gwangalli Pharmacy", BranchStatus::Active);
    let aspirin = srv.seed_product("Aspirin 500mg", 1000);

    let order_id = place_order(&client, &srv.base_url, branch, aspirin, 1, 1000).await;

    let res = transition_order(&client, &srv.base_url, branch, &order_id, "CANCELED").await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = transition_order(&client, &srv.base_url, branch, &order_id, "APPROVED").await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "already_finalized");
}

#[tokio::test]
async fn order_list_filters_and_paginates_consistently() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let branch = srv.seed_branch("Gwangalli Pharmacy", BranchStatus::Active);
    let aspirin = srv.seed_product("Aspirin 500mg", 1000);

    let mut order_ids = Vec::new();
    for _ in 0..5 {
        order_ids.push(place_order(&client, &srv.base_url, branch, aspirin, 1, 1000).await);
    }
    for order_id in order_ids.iter().take(2) {
        let res = transition_order(&client, &srv.base_url, branch, order_id, "APPROVED").await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    let list_url = format!("{}/orders?size=2", srv.base_url);
    let body = get_eventually(&client, &list_url, |b| b["totalElements"] == 5).await;
    assert_eq!(body["totalPages"], 3);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let approved_url = format!("{}/orders?status=approved", srv.base_url);
    get_eventually(&client, &approved_url, |b| b["totalElements"] == 2).await;

    let named_url = format!("{}/orders?branch_name=gwangalli", srv.base_url);
    get_eventually(&client, &named_url, |b| b["totalElements"] == 5).await;

    let branch_url = format!("{}/orders/branch/{branch}?status=APPROVED", srv.base_url);
    get_eventually(&client, &branch_url, |b| b["totalElements"] == 2).await;
}

#[tokio::test]
async fn settlement_zeroes_the_balance_and_reports_the_magnitude() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let branch = srv.seed_branch("Gwangalli Pharmacy", BranchStatus::Active);

    let res = client
        .post(format!("{}/credit/accounts", srv.base_url))
        .json(&json!({ "branch_id": branch.to_string() }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    let account_id = body["data"]["id"].as_str().unwrap().to_string();

    let res = client
        .post(format!(
            "{}/credit/accounts/{branch}/{account_id}/adjustments",
            srv.base_url
        ))
        .json(&json!({ "delta": -3000, "reason": "manual correction" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(format!(
            "{}/credit/accounts/{branch}/{account_id}/settlement",
            srv.base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let pending_url = format!("{}/credit/accounts/pending", srv.base_url);
    get_eventually(&client, &pending_url, |b| {
        b["data"]
            .as_array()
            .is_some_and(|rows| rows.iter().any(|r| r["account_id"] == account_id.as_str()))
    })
    .await;

    let res = client
        .post(format!(
            "{}/credit/accounts/{branch}/{account_id}/settlement/approve",
            srv.base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["data"]["settledAmount"], 3000);

    let account_url = format!("{}/credit/accounts/{branch}/{account_id}", srv.base_url);
    let body = get_eventually(&client, &account_url, |b| b["data"]["balance"] == 0).await;
    assert_eq!(body["data"]["credit_status"], "FULL");
}

#[tokio::test]
async fn charge_requests_apply_once() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let branch = srv.seed_branch("Gwangalli Pharmacy", BranchStatus::Active);

    let res = client
        .post(format!("{}/credit/accounts", srv.base_url))
        .json(&json!({ "branch_id": branch.to_string() }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    let account_id = body["data"]["id"].as_str().unwrap().to_string();

    let res = client
        .post(format!(
            "{}/credit/accounts/{branch}/{account_id}/charges",
            srv.base_url
        ))
        .json(&json!({ "amount": 5000 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    let charge_id = body["data"]["chargeId"].as_str().unwrap().to_string();

    let approve_url = format!(
        "{}/credit/accounts/{branch}/{account_id}/charges/{charge_id}/approve",
        srv.base_url
    );
    let res = client.post(&approve_url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let account_url = format!("{}/credit/accounts/{branch}/{account_id}", srv.base_url);
    let body = get_eventually(&client, &account_url, |b| b["data"]["balance"] == 5000).await;
    assert_eq!(body["data"]["charges"][0]["status"], "APPROVED");

    // A decided charge cannot be re-processed.
    let res = client.post(&approve_url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "already_finalized");
}

// The background subscriber never sees its channel disconnect (the policy's
// dispatcher keeps the bus alive), so it must not hold the tokio runtime
// open. Run a full server lifecycle on a scratch runtime and require the
// drop to come back.
#[test]
fn runtime_shutdown_is_not_blocked_by_the_subscriber() {
    let (done_tx, done_rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let srv = TestServer::spawn().await;
            let client = reqwest::Client::new();
            let res = client
                .get(format!("{}/health", srv.base_url))
                .send()
                .await
                .unwrap();
            assert_eq!(res.status(), StatusCode::OK);
        });
        drop(rt);
        let _ = done_tx.send(());
    });

    done_rx
        .recv_timeout(Duration::from_secs(30))
        .expect("runtime drop did not finish; the subscriber is pinning it");
}
