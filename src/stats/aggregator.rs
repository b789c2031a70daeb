//! Turns a transaction log into totals and bucketed sums.
//!
//! Everything here is a pure function of its arguments: sums use exact
//! decimal arithmetic, bucket order is fully determined by the keys, and a
//! transaction pointing at a missing category lands in the uncategorized
//! bucket instead of failing.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::{
    categories::repo_types::Category,
    transactions::repo_types::{DateRange, Transaction, TxKind},
};

pub const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    #[default]
    #[serde(alias = "by_category")]
    Category,
    #[serde(alias = "by_month")]
    Month,
    #[serde(alias = "by_day")]
    Day,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub key: String,
    pub income: Decimal,
    pub expense: Decimal,
    pub net: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsReport {
    pub group_by: GroupBy,
    #[serde(with = "time::serde::rfc3339::option")]
    pub from: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub to: Option<OffsetDateTime>,
    pub total_income: Decimal,
    pub total_expense: Decimal,
    pub net_balance: Decimal,
    pub transaction_count: u64,
    pub average_income: Decimal,
    pub average_expense: Decimal,
    pub buckets: Vec<Bucket>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Spender {
    pub user_id: Uuid,
    pub total_expense: Decimal,
}

/// Sort key: time buckets all share rank 0 and sort by their zero-padded
/// label; the uncategorized bucket has rank 1 so it trails named categories.
type BucketKey = (u8, String);

#[derive(Default)]
struct Sums {
    income: Decimal,
    expense: Decimal,
}

fn bucket_key(
    tx: &Transaction,
    group_by: GroupBy,
    names: &HashMap<Uuid, &str>,
) -> BucketKey {
    let at = tx.occurred_at.to_offset(UtcOffset::UTC);
    match group_by {
        GroupBy::Month => (0, format!("{:04}-{:02}", at.year(), u8::from(at.month()))),
        GroupBy::Day => (
            0,
            format!("{:04}-{:02}-{:02}", at.year(), u8::from(at.month()), at.day()),
        ),
        GroupBy::Category => match tx.category_id.and_then(|id| names.get(&id)) {
            Some(name) => (0, (*name).to_owned()),
            None => (1, UNCATEGORIZED.to_owned()),
        },
    }
}

fn average(total: Decimal, count: u64) -> Decimal {
    if count == 0 {
        Decimal::ZERO
    } else {
        (total / Decimal::from(count)).round_dp(2)
    }
}

/// Aggregates the transactions that fall inside `range`. `categories`
/// resolves category ids to bucket names.
pub fn aggregate(
    transactions: &[Transaction],
    categories: &[Category],
    range: &DateRange,
    group_by: GroupBy,
) -> StatsReport {
    let names: HashMap<Uuid, &str> = categories.iter().map(|c| (c.id, c.name.as_str())).collect();

    let mut buckets: BTreeMap<BucketKey, Sums> = BTreeMap::new();
    let (mut total_income, mut total_expense) = (Decimal::ZERO, Decimal::ZERO);
    let (mut income_count, mut expense_count) = (0u64, 0u64);

    for tx in transactions.iter().filter(|tx| range.contains(tx.occurred_at)) {
        let sums = buckets.entry(bucket_key(tx, group_by, &names)).or_default();
        match tx.kind {
            TxKind::Income => {
                sums.income += tx.amount;
                total_income += tx.amount;
                income_count += 1;
            }
            TxKind::Expense => {
                sums.expense += tx.amount;
                total_expense += tx.amount;
                expense_count += 1;
            }
        }
    }

    StatsReport {
        group_by,
        from: range.from,
        to: range.to,
        total_income,
        total_expense,
        net_balance: total_income - total_expense,
        transaction_count: income_count + expense_count,
        average_income: average(total_income, income_count),
        average_expense: average(total_expense, expense_count),
        buckets: buckets
            .into_iter()
            .map(|((_, key), s)| Bucket {
                key,
                net: s.income - s.expense,
                income: s.income,
                expense: s.expense,
            })
            .collect(),
    }
}

/// Users ranked by expense total, largest first; ties broken by user id.
pub fn top_spenders(transactions: &[Transaction], range: &DateRange, n: usize) -> Vec<Spender> {
    let mut totals: HashMap<Uuid, Decimal> = HashMap::new();
    for tx in transactions
        .iter()
        .filter(|tx| tx.kind == TxKind::Expense && range.contains(tx.occurred_at))
    {
        *totals.entry(tx.user_id).or_default() += tx.amount;
    }
    let mut ranked: Vec<Spender> = totals
        .into_iter()
        .map(|(user_id, total_expense)| Spender {
            user_id,
            total_expense,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.total_expense
            .cmp(&a.total_expense)
            .then(a.user_id.cmp(&b.user_id))
    });
    ranked.truncate(n);
    ranked
}
