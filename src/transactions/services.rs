use std::collections::BTreeSet;

use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{
        parse_instant, CreateTransactionRequest, ListTransactionsQuery, UpdateTransactionRequest,
        DEFAULT_LIMIT, MAX_LIMIT,
    },
    repo_types::{
        DateRange, NewTransaction, Transaction, TransactionFilter, TransactionPatch, TxKind,
    },
};
use crate::{error::AppError, state::AppState};

const MAX_NOTE_LEN: usize = 500;
const MAX_SUGGESTIONS: usize = 20;

/// Largest magnitude a `NUMERIC(14,2)` column holds.
fn max_amount() -> Decimal {
    Decimal::new(99_999_999_999_999, 2)
}

pub fn validate_amount(amount: Decimal) -> Result<Decimal, AppError> {
    if amount.is_sign_negative() {
        return Err(AppError::bad_request("Amount must not be negative"));
    }
    let amount = amount.normalize();
    if amount.scale() > 2 {
        return Err(AppError::bad_request("Amount has more than 2 decimal places"));
    }
    if amount > max_amount() {
        return Err(AppError::bad_request("Amount is too large"));
    }
    Ok(amount)
}

fn clean_note(note: Option<String>) -> Result<Option<String>, AppError> {
    match note.map(|n| n.trim().to_owned()) {
        Some(n) if n.chars().count() > MAX_NOTE_LEN => {
            Err(AppError::bad_request("Note is too long"))
        }
        Some(n) if n.is_empty() => Ok(None),
        other => Ok(other),
    }
}

/// The category must belong to `owner` and accept `kind`.
async fn check_category(
    state: &AppState,
    owner: Uuid,
    category_id: Uuid,
    kind: TxKind,
) -> Result<(), AppError> {
    let category = state
        .store
        .find_category(category_id, owner)
        .await?
        .ok_or(AppError::NotFound("Category"))?;
    if !category.kind.accepts(kind) {
        warn!(%category_id, kind = kind.as_str(), "category kind mismatch");
        return Err(AppError::bad_request(format!(
            "Category '{}' does not accept {} transactions",
            category.name,
            kind.as_str()
        )));
    }
    Ok(())
}

/// Builds a store filter from the query string. `owner = None` is the
/// unscoped admin view.
pub fn build_filter(
    owner: Option<Uuid>,
    q: ListTransactionsQuery,
) -> Result<TransactionFilter, AppError> {
    let range = DateRange {
        from: q.from.as_deref().map(|s| parse_instant(s, "from")).transpose()?,
        to: q.to.as_deref().map(|s| parse_instant(s, "to")).transpose()?,
    };
    if let (Some(min), Some(max)) = (q.min_amount, q.max_amount) {
        if min > max {
            return Err(AppError::bad_request("min_amount is greater than max_amount"));
        }
    }
    Ok(TransactionFilter {
        owner,
        kind: q.kind,
        category_id: q.category_id,
        range,
        min_amount: q.min_amount,
        max_amount: q.max_amount,
        search: q.search.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()),
        sort_by: q.sort_by,
        order: q.order,
        limit: q.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        offset: q.offset.unwrap_or(0).max(0),
    })
}

pub async fn create(
    state: &AppState,
    owner: Uuid,
    req: CreateTransactionRequest,
) -> Result<Transaction, AppError> {
    let amount = validate_amount(req.amount)?;
    if let Some(category_id) = req.category_id {
        check_category(state, owner, category_id, req.kind).await?;
    }
    let tx = state
        .store
        .create_transaction(NewTransaction {
            user_id: owner,
            category_id: req.category_id,
            kind: req.kind,
            amount,
            occurred_at: req.occurred_at.unwrap_or_else(|| state.clock.now()),
            note: clean_note(req.note)?,
        })
        .await?;
    info!(user_id = %owner, transaction_id = %tx.id, "transaction created");
    Ok(tx)
}

pub async fn update(
    state: &AppState,
    owner: Uuid,
    id: Uuid,
    req: UpdateTransactionRequest,
) -> Result<Transaction, AppError> {
    let current = state
        .store
        .find_transaction(id, Some(owner))
        .await?
        .ok_or(AppError::NotFound("Transaction"))?;

    let kind = req.kind.unwrap_or(current.kind);
    if let Some(category_id) = req.category_id.or(current.category_id) {
        if req.kind.is_some() || req.category_id.is_some() {
            check_category(state, owner, category_id, kind).await?;
        }
    }

    let patch = TransactionPatch {
        category_id: req.category_id,
        kind: req.kind,
        amount: req.amount.map(validate_amount).transpose()?,
        occurred_at: req.occurred_at,
        note: clean_note(req.note)?,
    };
    state
        .store
        .update_transaction(id, owner, patch)
        .await?
        .ok_or(AppError::NotFound("Transaction"))
}

pub async fn duplicate(state: &AppState, owner: Uuid, id: Uuid) -> Result<Transaction, AppError> {
    let original = state
        .store
        .find_transaction(id, Some(owner))
        .await?
        .ok_or(AppError::NotFound("Transaction"))?;
    let copy = state
        .store
        .create_transaction(NewTransaction {
            user_id: owner,
            category_id: original.category_id,
            kind: original.kind,
            amount: original.amount,
            occurred_at: state.clock.now(),
            note: Some(format!(
                "Copy of: {}",
                original.note.as_deref().unwrap_or_default()
            )),
        })
        .await?;
    info!(user_id = %owner, from = %id, transaction_id = %copy.id, "transaction duplicated");
    Ok(copy)
}

/// Autocomplete candidates for the search box: the owner's notes and
/// category names, deduplicated and sorted.
pub async fn search_suggestions(state: &AppState, owner: Uuid) -> Result<Vec<String>, AppError> {
    let notes = state
        .store
        .distinct_notes(owner, MAX_SUGGESTIONS as i64)
        .await?;
    let categories = state.store.list_categories(owner, None).await?;
    let all: BTreeSet<String> = notes
        .into_iter()
        .chain(categories.into_iter().map(|c| c.name))
        .collect();
    Ok(all.into_iter().take(MAX_SUGGESTIONS).collect())
}
