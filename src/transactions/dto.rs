use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime};
use uuid::Uuid;

use super::repo_types::{SortBy, SortOrder, TxKind};
use crate::error::AppError;

pub const DEFAULT_LIMIT: i64 = 20;
pub const MAX_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub amount: Decimal,
    pub kind: TxKind,
    pub category_id: Option<Uuid>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub occurred_at: Option<OffsetDateTime>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTransactionRequest {
    pub amount: Option<Decimal>,
    pub kind: Option<TxKind>,
    pub category_id: Option<Uuid>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub occurred_at: Option<OffsetDateTime>,
    pub note: Option<String>,
}

/// Query string of `GET /transactions` and `GET /admin/transactions` and
/// their `/export` variants. `user_id` is honoured only on the admin routes,
/// `format` only on the exports.
#[derive(Debug, Default, Deserialize)]
pub struct ListTransactionsQuery {
    pub kind: Option<TxKind>,
    pub category_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub search: Option<String>,
    #[serde(default)]
    pub sort_by: SortBy,
    #[serde(default)]
    pub order: SortOrder,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct SuggestionsResponse {
    pub suggestions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteRequest {
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct BulkDeleteResponse {
    pub deleted: u64,
}

/// Accepts `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 timestamp.
pub fn parse_instant(raw: &str, field: &str) -> Result<OffsetDateTime, AppError> {
    let raw = raw.trim();
    if let Ok(at) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Ok(at);
    }
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .map(|d| d.midnight().assume_utc())
        .map_err(|_| AppError::bad_request(format!("Invalid {field}, expected YYYY-MM-DD")))
}
