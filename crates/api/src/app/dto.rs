//! Request/response DTOs, the JSON response envelope and parse helpers.

use core::str::FromStr;

use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use apotheca_core::{Actor, BranchId, DomainError};
use apotheca_infra::pagination::Page;
use apotheca_stock::StockStatusLabel;

use crate::app::errors;

// -------------------------
// Response envelope
// -------------------------

/// Uniform success envelope; the pagination fields appear on list responses.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_elements: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_page: Option<u32>,
}

pub fn ok<T: Serialize>(data: T) -> axum::response::Response {
    (
        StatusCode::OK,
        axum::Json(Envelope {
            success: true,
            data,
            total_pages: None,
            total_elements: None,
            current_page: None,
        }),
    )
        .into_response()
}

pub fn created<T: Serialize>(data: T) -> axum::response::Response {
    (
        StatusCode::CREATED,
        axum::Json(Envelope {
            success: true,
            data,
            total_pages: None,
            total_elements: None,
            current_page: None,
        }),
    )
        .into_response()
}

pub fn paged<T: Serialize>(page: Page<T>) -> axum::response::Response {
    (
        StatusCode::OK,
        axum::Json(Envelope {
            success: true,
            data: page.items,
            total_pages: Some(page.total_pages),
            total_elements: Some(page.total_elements),
            current_page: Some(page.current_page),
        }),
    )
        .into_response()
}

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct OrderLineRequest {
    pub product_id: String,
    pub quantity: u32,
    /// Price snapshot for this line; falls back to the catalog list price.
    pub unit_price: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub branch_id: String,
    pub lines: Vec<OrderLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenReturnRequest {
    pub branch_id: String,
    pub order_id: Option<String>,
    pub reason: String,
    pub lines: Vec<OrderLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct RecordStockTransactionRequest {
    pub branch_id: String,
    pub product_id: String,
    pub magnitude: u32,
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenAccountRequest {
    pub branch_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ChargeRequestBody {
    pub amount: i64,
}

#[derive(Debug, Deserialize)]
pub struct AdjustmentRequest {
    pub delta: i64,
    pub reason: String,
}

// -------------------------
// Query DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub branch_name: Option<String>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct BranchListQuery {
    pub status: Option<String>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct StockSummaryQuery {
    pub keyword: Option<String>,
    pub status: Option<String>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct StockHistoryQuery {
    pub product_id: Option<String>,
    pub kind: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct StockStatisticsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

// -------------------------
// Parse helpers
// -------------------------

/// Caller identity. Authentication is out of scope; the caller states who it
/// is via the `x-actor` header ("operator", a branch id, or absent for the
/// operator default) and the domain layer enforces what that identity may do.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, axum::response::Response> {
    match headers.get("x-actor").and_then(|v| v.to_str().ok()) {
        None => Ok(Actor::Operator),
        Some(v) if v.eq_ignore_ascii_case("operator") => Ok(Actor::Operator),
        Some(v) => match v.parse::<BranchId>() {
            Ok(branch) => Ok(Actor::Branch(branch)),
            Err(_) => Err(errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_actor",
                "x-actor must be \"operator\" or a branch id",
            )),
        },
    }
}

pub fn parse_id<T>(s: &str, what: &str) -> Result<T, axum::response::Response>
where
    T: FromStr<Err = DomainError>,
{
    s.parse().map_err(|_| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_id",
            format!("invalid {what}"),
        )
    })
}

/// Status/kind symbols parse case-insensitively via the domain `FromStr`.
pub fn parse_symbol<T>(s: &str) -> Result<T, axum::response::Response>
where
    T: FromStr<Err = DomainError>,
{
    s.parse().map_err(errors::domain_error_to_response)
}

pub fn parse_status_label(s: &str) -> Result<StockStatusLabel, axum::response::Response> {
    match s.to_lowercase().as_str() {
        "danger" => Ok(StockStatusLabel::Danger),
        "warning" => Ok(StockStatusLabel::Warning),
        "normal" => Ok(StockStatusLabel::Normal),
        _ => Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_status_label",
            "status must be one of: danger, warning, normal",
        )),
    }
}
