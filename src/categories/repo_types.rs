use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{error::StoreError, transactions::repo_types::TxKind};

/// Which transaction kinds a category may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindAffinity {
    Income,
    Expense,
    Both,
}

impl KindAffinity {
    pub fn as_str(self) -> &'static str {
        match self {
            KindAffinity::Income => "income",
            KindAffinity::Expense => "expense",
            KindAffinity::Both => "both",
        }
    }

    pub fn accepts(self, kind: TxKind) -> bool {
        matches!(
            (self, kind),
            (KindAffinity::Both, _)
                | (KindAffinity::Income, TxKind::Income)
                | (KindAffinity::Expense, TxKind::Expense)
        )
    }
}

impl std::str::FromStr for KindAffinity {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "income" => Ok(KindAffinity::Income),
            "expense" => Ok(KindAffinity::Expense),
            "both" => Ok(KindAffinity::Both),
            other => Err(StoreError::Corrupt(format!("unknown category kind {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct CategoryRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub kind: String,
    pub is_default: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub kind: KindAffinity,
    pub is_default: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl TryFrom<CategoryRow> for Category {
    type Error = StoreError;

    fn try_from(r: CategoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            kind: r.kind.parse()?,
            id: r.id,
            user_id: r.user_id,
            name: r.name,
            is_default: r.is_default,
            created_at: r.created_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewCategory {
    pub user_id: Uuid,
    pub name: String,
    pub kind: KindAffinity,
    pub is_default: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub kind: Option<KindAffinity>,
}

/// Seeded for every new account.
pub const DEFAULT_CATEGORIES: &[(&str, KindAffinity)] = &[
    ("Salary", KindAffinity::Income),
    ("Bonus", KindAffinity::Income),
    ("Food", KindAffinity::Expense),
    ("Transportation", KindAffinity::Expense),
    ("Housing", KindAffinity::Expense),
    ("Entertainment", KindAffinity::Expense),
    ("Utilities", KindAffinity::Expense),
];
