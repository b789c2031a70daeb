//! CSV downloads of filtered transaction lists.

use std::collections::HashMap;

use anyhow::Context;
use axum::{
    http::header,
    response::{IntoResponse, Response},
};
use csv::Writer;
use rust_decimal::Decimal;
use serde::Serialize;
use time::{format_description::well_known::Rfc3339, macros::format_description, OffsetDateTime};
use tracing::info;
use uuid::Uuid;

use super::{
    dto::ListTransactionsQuery,
    repo_types::{Transaction, TransactionFilter},
    services::build_filter,
};
use crate::{
    categories::repo_types::Category, error::AppError, state::AppState,
    stats::aggregator::UNCATEGORIZED,
};

/// Upper bound on rows in one download.
pub const EXPORT_LIMIT: i64 = 5000;

#[derive(Serialize)]
struct ExportRow<'a> {
    id: Uuid,
    user_id: Uuid,
    occurred_at: String,
    kind: &'static str,
    amount: Decimal,
    category: &'a str,
    note: &'a str,
}

/// Builds the filter for an export: same filters as the list route, first
/// `EXPORT_LIMIT` rows, no paging.
pub fn export_filter(
    owner: Option<Uuid>,
    q: ListTransactionsQuery,
) -> Result<TransactionFilter, AppError> {
    match q.format.as_deref().map(str::trim) {
        None => {}
        Some(f) if f.eq_ignore_ascii_case("csv") => {}
        Some(_) => return Err(AppError::bad_request("Unsupported export format. Use csv")),
    }
    let mut filter = build_filter(owner, q)?;
    filter.limit = EXPORT_LIMIT;
    filter.offset = 0;
    Ok(filter)
}

pub fn render_csv(
    transactions: &[Transaction],
    categories: &[Category],
) -> anyhow::Result<Vec<u8>> {
    let names: HashMap<Uuid, &str> = categories.iter().map(|c| (c.id, c.name.as_str())).collect();

    let mut writer = Writer::from_writer(vec![]);
    for tx in transactions {
        writer
            .serialize(ExportRow {
                id: tx.id,
                user_id: tx.user_id,
                occurred_at: tx.occurred_at.format(&Rfc3339)?,
                kind: tx.kind.as_str(),
                amount: tx.amount,
                category: tx
                    .category_id
                    .and_then(|id| names.get(&id).copied())
                    .unwrap_or(UNCATEGORIZED),
                note: tx.note.as_deref().unwrap_or_default(),
            })
            .context("serialize export row")?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("finalize export: {}", e.error()))
}

fn file_name(prefix: &str, at: OffsetDateTime) -> anyhow::Result<String> {
    let stamp = at.format(format_description!(
        "[year][month][day]_[hour][minute][second]"
    ))?;
    Ok(format!("{prefix}_{stamp}.csv"))
}

/// Runs the filter and returns the rows as a `text/csv` attachment.
pub async fn download(
    state: &AppState,
    filter: &TransactionFilter,
    prefix: &str,
) -> Result<Response, AppError> {
    let (transactions, total) = state.store.list_transactions(filter).await?;
    let categories = state.store.categories_for(filter.owner).await?;
    let body = render_csv(&transactions, &categories)?;
    let name = file_name(prefix, state.clock.now())?;
    info!(rows = transactions.len(), total, file = %name, "transactions exported");

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{name}\""),
            ),
        ],
        body,
    )
        .into_response())
}
