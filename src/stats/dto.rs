use serde::{Deserialize, Serialize};

use super::aggregator::{GroupBy, Spender, StatsReport};
use crate::transactions::repo_types::Transaction;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangePreset {
    #[default]
    Month,
    Year,
    All,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(default)]
    pub group_by: GroupBy,
    #[serde(default)]
    pub range: RangePreset,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    #[serde(flatten)]
    pub report: StatsReport,
    pub recent: Vec<Transaction>,
}

#[derive(Debug, Serialize)]
pub struct AdminStatsResponse {
    #[serde(flatten)]
    pub report: StatsReport,
    pub user_count: i64,
    pub active_user_count: i64,
    pub top_spenders: Vec<Spender>,
}
