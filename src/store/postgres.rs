use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::{DataStore, RedeemOutcome};
use crate::{
    auth::repo_types::{
        NewResetToken, NewUser, PasswordResetToken, User, UserPatch, UserQuery, UserRow,
    },
    categories::repo_types::{Category, CategoryPatch, CategoryRow, KindAffinity, NewCategory},
    error::{StoreError, StoreResult},
    transactions::repo_types::{
        DateRange, NewTransaction, SortBy, SortOrder, Transaction, TransactionFilter,
        TransactionPatch, TransactionRow,
    },
};

const USER_COLUMNS: &str = "id, email, password_hash, name, role, is_active, created_at";
const CATEGORY_COLUMNS: &str = "id, user_id, name, kind, is_default, created_at";
const TRANSACTION_COLUMNS: &str =
    "id, user_id, category_id, kind, amount, occurred_at, note, created_at";

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn unique_violation(what: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(what),
        _ => StoreError::Backend(e),
    }
}

fn convert<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Escapes `%`, `_` and `\` so user input is matched literally by ILIKE.
fn like_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

fn push_range(qb: &mut QueryBuilder<'_, Postgres>, range: &DateRange) {
    if let Some(from) = range.from {
        qb.push(" AND occurred_at >= ").push_bind(from);
    }
    if let Some(to) = range.to {
        qb.push(" AND occurred_at < ").push_bind(to);
    }
}

fn push_transaction_filter(qb: &mut QueryBuilder<'_, Postgres>, f: &TransactionFilter) {
    qb.push(" WHERE TRUE");
    if let Some(owner) = f.owner {
        qb.push(" AND user_id = ").push_bind(owner);
    }
    if let Some(kind) = f.kind {
        qb.push(" AND kind = ").push_bind(kind.as_str());
    }
    if let Some(category_id) = f.category_id {
        qb.push(" AND category_id = ").push_bind(category_id);
    }
    push_range(qb, &f.range);
    if let Some(min) = f.min_amount {
        qb.push(" AND amount >= ").push_bind(min);
    }
    if let Some(max) = f.max_amount {
        qb.push(" AND amount <= ").push_bind(max);
    }
    if let Some(search) = f.search.as_deref().filter(|s| !s.is_empty()) {
        qb.push(" AND note ILIKE ").push_bind(like_pattern(search));
    }
}

#[async_trait]
impl DataStore for PgStore {
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn create_user(
        &self,
        user: NewUser,
        default_categories: &[(&str, KindAffinity)],
    ) -> StoreResult<User> {
        let mut tx = self.db.begin().await?;

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, email, password_hash, name, role)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.name)
        .bind(user.role.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(unique_violation("Email"))?;
        let user = User::try_from(row)?;

        for (name, kind) in default_categories {
            sqlx::query(
                r#"
                INSERT INTO categories (id, user_id, name, kind, is_default)
                VALUES ($1, $2, $3, $4, TRUE)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(user.id)
            .bind(*name)
            .bind(kind.as_str())
            .execute(&mut *tx)
            .await
            .map_err(unique_violation("Category"))?;
        }

        tx.commit().await?;
        Ok(user)
    }

    async fn update_user(&self, id: Uuid, patch: UserPatch) -> StoreResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
               SET email = COALESCE($2, email),
                   name = COALESCE($3, name)
             WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(patch.email)
        .bind(patch.name)
        .fetch_optional(&self.db)
        .await
        .map_err(unique_violation("Email"))?;
        row.map(User::try_from).transpose()
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<bool> {
        let res = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn set_user_active(&self, id: Uuid, active: bool) -> StoreResult<bool> {
        let res = sqlx::query("UPDATE users SET is_active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<bool> {
        // categories, transactions and reset tokens go with ON DELETE CASCADE
        let res = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn list_users(&self, query: &UserQuery) -> StoreResult<(Vec<User>, i64)> {
        let pattern = query
            .search
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(like_pattern);

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users WHERE $1::text IS NULL OR email ILIKE $1 OR name ILIKE $1",
        )
        .bind(&pattern)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
              FROM users
             WHERE $1::text IS NULL OR email ILIKE $1 OR name ILIKE $1
             ORDER BY created_at DESC, id
             LIMIT $2 OFFSET $3
            "#
        ))
        .bind(&pattern)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&self.db)
        .await?;

        Ok((convert(rows)?, total))
    }

    async fn count_users(&self) -> StoreResult<(i64, i64)> {
        let counts: (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE is_active) FROM users",
        )
        .fetch_one(&self.db)
        .await?;
        Ok(counts)
    }

    async fn insert_reset_token(&self, token: NewResetToken) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (id, user_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(&self.db)
        .await
        .map_err(unique_violation("Reset token"))?;
        Ok(())
    }

    async fn find_reset_token(&self, token_hash: &str) -> StoreResult<Option<PasswordResetToken>> {
        let token = sqlx::query_as::<_, PasswordResetToken>(
            r#"
            SELECT id, user_id, token_hash, expires_at, consumed, created_at
              FROM password_reset_tokens
             WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.db)
        .await?;
        Ok(token)
    }

    async fn invalidate_reset_tokens(&self, user_id: Uuid) -> StoreResult<u64> {
        let res = sqlx::query(
            "UPDATE password_reset_tokens SET consumed = TRUE WHERE user_id = $1 AND NOT consumed",
        )
        .bind(user_id)
        .execute(&self.db)
        .await?;
        Ok(res.rows_affected())
    }

    async fn redeem_reset_token(
        &self,
        token_hash: &str,
        new_password_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<RedeemOutcome> {
        let mut tx = self.db.begin().await?;

        let user_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE password_reset_tokens
               SET consumed = TRUE
             WHERE token_hash = $1 AND NOT consumed AND expires_at > $2
            RETURNING user_id
            "#,
        )
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = user_id else {
            tx.rollback().await?;
            return Ok(RedeemOutcome::Lost);
        };

        sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(new_password_hash)
            .execute(&mut *tx)
            .await?;

        let others = sqlx::query(
            "UPDATE password_reset_tokens SET consumed = TRUE WHERE user_id = $1 AND NOT consumed",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(%user_id, invalidated = others.rows_affected(), "reset token redeemed");
        Ok(RedeemOutcome::Redeemed { user_id })
    }

    async fn create_category(&self, category: NewCategory) -> StoreResult<Category> {
        let row = sqlx::query_as::<_, CategoryRow>(&format!(
            r#"
            INSERT INTO categories (id, user_id, name, kind, is_default)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {CATEGORY_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(category.user_id)
        .bind(&category.name)
        .bind(category.kind.as_str())
        .bind(category.is_default)
        .fetch_one(&self.db)
        .await
        .map_err(unique_violation("Category"))?;
        Category::try_from(row)
    }

    async fn find_category(&self, id: Uuid, owner: Uuid) -> StoreResult<Option<Category>> {
        let row = sqlx::query_as::<_, CategoryRow>(&format!(
            "SELECT {CATEGORY_COLUMNS} FROM categories WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.db)
        .await?;
        row.map(Category::try_from).transpose()
    }

    async fn list_categories(
        &self,
        owner: Uuid,
        kind: Option<KindAffinity>,
    ) -> StoreResult<Vec<Category>> {
        let rows = sqlx::query_as::<_, CategoryRow>(&format!(
            r#"
            SELECT {CATEGORY_COLUMNS}
              FROM categories
             WHERE user_id = $1 AND ($2::text IS NULL OR kind = $2)
             ORDER BY name, id
            "#
        ))
        .bind(owner)
        .bind(kind.map(KindAffinity::as_str))
        .fetch_all(&self.db)
        .await?;
        convert(rows)
    }

    async fn categories_for(&self, owner: Option<Uuid>) -> StoreResult<Vec<Category>> {
        let rows = sqlx::query_as::<_, CategoryRow>(&format!(
            r#"
            SELECT {CATEGORY_COLUMNS}
              FROM categories
             WHERE $1::uuid IS NULL OR user_id = $1
             ORDER BY name, id
            "#
        ))
        .bind(owner)
        .fetch_all(&self.db)
        .await?;
        convert(rows)
    }

    async fn update_category(
        &self,
        id: Uuid,
        owner: Uuid,
        patch: CategoryPatch,
    ) -> StoreResult<Option<Category>> {
        let row = sqlx::query_as::<_, CategoryRow>(&format!(
            r#"
            UPDATE categories
               SET name = COALESCE($3, name),
                   kind = COALESCE($4, kind)
             WHERE id = $1 AND user_id = $2
            RETURNING {CATEGORY_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner)
        .bind(patch.name)
        .bind(patch.kind.map(KindAffinity::as_str))
        .fetch_optional(&self.db)
        .await
        .map_err(unique_violation("Category"))?;
        row.map(Category::try_from).transpose()
    }

    async fn delete_category(&self, id: Uuid, owner: Uuid) -> StoreResult<bool> {
        // referencing transactions keep existing with category_id = NULL
        let res = sqlx::query("DELETE FROM categories WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn create_transaction(&self, tx: NewTransaction) -> StoreResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            INSERT INTO transactions (id, user_id, category_id, kind, amount, occurred_at, note)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(tx.user_id)
        .bind(tx.category_id)
        .bind(tx.kind.as_str())
        .bind(tx.amount)
        .bind(tx.occurred_at)
        .bind(tx.note)
        .fetch_one(&self.db)
        .await?;
        Transaction::try_from(row)
    }

    async fn find_transaction(
        &self,
        id: Uuid,
        owner: Option<Uuid>,
    ) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
              FROM transactions
             WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)
            "#
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.db)
        .await?;
        row.map(Transaction::try_from).transpose()
    }

    async fn update_transaction(
        &self,
        id: Uuid,
        owner: Uuid,
        patch: TransactionPatch,
    ) -> StoreResult<Option<Transaction>> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            UPDATE transactions
               SET category_id = COALESCE($3, category_id),
                   kind = COALESCE($4, kind),
                   amount = COALESCE($5, amount),
                   occurred_at = COALESCE($6, occurred_at),
                   note = COALESCE($7, note)
             WHERE id = $1 AND user_id = $2
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner)
        .bind(patch.category_id)
        .bind(patch.kind.map(|k| k.as_str()))
        .bind(patch.amount)
        .bind(patch.occurred_at)
        .bind(patch.note)
        .fetch_optional(&self.db)
        .await?;
        row.map(Transaction::try_from).transpose()
    }

    async fn delete_transactions(&self, owner: Uuid, ids: &[Uuid]) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM transactions WHERE user_id = $1 AND id = ANY($2)")
            .bind(owner)
            .bind(ids)
            .execute(&self.db)
            .await?;
        Ok(res.rows_affected())
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> StoreResult<(Vec<Transaction>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM transactions");
        push_transaction_filter(&mut count, filter);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(&self.db)
            .await?;

        let mut page = QueryBuilder::<Postgres>::new(format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions"
        ));
        push_transaction_filter(&mut page, filter);
        let column = match filter.sort_by {
            SortBy::OccurredAt => "occurred_at",
            SortBy::Amount => "amount",
        };
        let direction = match filter.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        page.push(format!(" ORDER BY {column} {direction}, id"));
        page.push(" LIMIT ").push_bind(filter.limit);
        page.push(" OFFSET ").push_bind(filter.offset);

        let rows = page
            .build_query_as::<TransactionRow>()
            .fetch_all(&self.db)
            .await?;
        Ok((convert(rows)?, total))
    }

    async fn distinct_notes(&self, owner: Uuid, limit: i64) -> StoreResult<Vec<String>> {
        let notes = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT btrim(note)
              FROM transactions
             WHERE user_id = $1 AND note IS NOT NULL AND btrim(note) <> ''
             ORDER BY 1
             LIMIT $2
            "#,
        )
        .bind(owner)
        .bind(limit)
        .fetch_all(&self.db)
        .await?;
        Ok(notes)
    }

    async fn transactions_in_range(
        &self,
        owner: Option<Uuid>,
        range: &DateRange,
    ) -> StoreResult<Vec<Transaction>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE TRUE"
        ));
        if let Some(owner) = owner {
            qb.push(" AND user_id = ").push_bind(owner);
        }
        push_range(&mut qb, range);
        qb.push(" ORDER BY occurred_at, id");

        let rows = qb.build_query_as::<TransactionRow>().fetch_all(&self.db).await?;
        convert(rows)
    }
}
