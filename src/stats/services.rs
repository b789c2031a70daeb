use time::{Date, Month, OffsetDateTime, UtcOffset};
use uuid::Uuid;

use super::{
    aggregator::{aggregate, top_spenders, GroupBy, StatsReport},
    dto::{AdminStatsResponse, DashboardResponse, RangePreset, StatsQuery},
};
use crate::{
    error::AppError,
    state::AppState,
    transactions::{dto::parse_instant, repo_types::DateRange},
};

pub const RECENT_LIMIT: usize = 5;
pub const TOP_SPENDERS: usize = 5;

fn first_of(year: i32, month: Month) -> Result<OffsetDateTime, AppError> {
    let date = Date::from_calendar_date(year, month, 1).map_err(anyhow::Error::from)?;
    Ok(date.midnight().assume_utc())
}

/// Calendar window containing `now` (UTC), half-open.
pub fn preset_range(preset: RangePreset, now: OffsetDateTime) -> Result<DateRange, AppError> {
    let now = now.to_offset(UtcOffset::UTC);
    Ok(match preset {
        RangePreset::All => DateRange::default(),
        RangePreset::Year => DateRange::new(
            first_of(now.year(), Month::January)?,
            first_of(now.year() + 1, Month::January)?,
        ),
        RangePreset::Month => {
            let next = match now.month() {
                Month::December => first_of(now.year() + 1, Month::January)?,
                m => first_of(now.year(), m.next())?,
            };
            DateRange::new(first_of(now.year(), now.month())?, next)
        }
    })
}

/// Explicit `from`/`to` win over the preset.
pub fn resolve_range(q: &StatsQuery, now: OffsetDateTime) -> Result<DateRange, AppError> {
    if q.from.is_none() && q.to.is_none() {
        return preset_range(q.range, now);
    }
    let range = DateRange {
        from: q.from.as_deref().map(|s| parse_instant(s, "from")).transpose()?,
        to: q.to.as_deref().map(|s| parse_instant(s, "to")).transpose()?,
    };
    if range.is_empty() {
        return Err(AppError::bad_request("'from' must be before 'to'"));
    }
    Ok(range)
}

/// Report over `owner`'s transactions, or over everyone's when `owner` is `None`.
pub async fn report(
    state: &AppState,
    owner: Option<Uuid>,
    range: &DateRange,
    group_by: GroupBy,
) -> Result<StatsReport, AppError> {
    let transactions = state.store.transactions_in_range(owner, range).await?;
    let categories = state.store.categories_for(owner).await?;
    Ok(aggregate(&transactions, &categories, range, group_by))
}

pub async fn dashboard(state: &AppState, owner: Uuid) -> Result<DashboardResponse, AppError> {
    let range = preset_range(RangePreset::Month, state.clock.now())?;
    let transactions = state.store.transactions_in_range(Some(owner), &range).await?;
    let categories = state.store.categories_for(Some(owner)).await?;

    let report = aggregate(&transactions, &categories, &range, GroupBy::Category);
    let recent = transactions.into_iter().rev().take(RECENT_LIMIT).collect();
    Ok(DashboardResponse { report, recent })
}

pub async fn admin_report(
    state: &AppState,
    range: &DateRange,
    group_by: GroupBy,
) -> Result<AdminStatsResponse, AppError> {
    let transactions = state.store.transactions_in_range(None, range).await?;
    let categories = state.store.categories_for(None).await?;
    let (user_count, active_user_count) = state.store.count_users().await?;

    Ok(AdminStatsResponse {
        report: aggregate(&transactions, &categories, range, group_by),
        user_count,
        active_user_count,
        top_spenders: top_spenders(&transactions, range, TOP_SPENDERS),
    })
}
