use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    Income,
    Expense,
}

impl TxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TxKind::Income => "income",
            TxKind::Expense => "expense",
        }
    }
}

impl std::str::FromStr for TxKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(TxKind::Income),
            "expense" => Ok(TxKind::Expense),
            other => Err(StoreError::Corrupt(format!("unknown transaction kind {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TransactionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub category_id: Option<Uuid>,
    pub kind: String,
    pub amount: Decimal,
    pub occurred_at: OffsetDateTime,
    pub note: Option<String>,
    pub created_at: OffsetDateTime,
}

/// A single income or expense entry. `amount` is always a non-negative magnitude.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    /// `None` once the category has been deleted.
    pub category_id: Option<Uuid>,
    pub kind: TxKind,
    pub amount: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
    pub note: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(r: TransactionRow) -> Result<Self, Self::Error> {
        if r.amount.is_sign_negative() {
            return Err(StoreError::Corrupt(format!(
                "transaction {} has negative amount",
                r.id
            )));
        }
        Ok(Self {
            kind: r.kind.parse()?,
            id: r.id,
            user_id: r.user_id,
            category_id: r.category_id,
            amount: r.amount,
            occurred_at: r.occurred_at,
            note: r.note,
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: Uuid,
    pub category_id: Option<Uuid>,
    pub kind: TxKind,
    pub amount: Decimal,
    pub occurred_at: OffsetDateTime,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionPatch {
    pub category_id: Option<Uuid>,
    pub kind: Option<TxKind>,
    pub amount: Option<Decimal>,
    pub occurred_at: Option<OffsetDateTime>,
    pub note: Option<String>,
}

/// Half-open `[from, to)` window; a missing bound is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<OffsetDateTime>,
    pub to: Option<OffsetDateTime>,
}

impl DateRange {
    pub fn new(from: OffsetDateTime, to: OffsetDateTime) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, at: OffsetDateTime) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at < to)
    }

    pub fn is_empty(&self) -> bool {
        matches!((self.from, self.to), (Some(from), Some(to)) if from >= to)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    OccurredAt,
    Amount,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    /// `None` only on the admin-wide paths.
    pub owner: Option<Uuid>,
    pub kind: Option<TxKind>,
    pub category_id: Option<Uuid>,
    pub range: DateRange,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub search: Option<String>,
    pub sort_by: SortBy,
    pub order: SortOrder,
    pub limit: i64,
    pub offset: i64,
}
