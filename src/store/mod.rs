//! Data Store collaborator: typed persistence for users, reset tokens,
//! categories and transactions.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::repo_types::{NewResetToken, NewUser, PasswordResetToken, User, UserPatch, UserQuery},
    categories::repo_types::{Category, CategoryPatch, KindAffinity, NewCategory},
    error::StoreResult,
    transactions::repo_types::{
        DateRange, NewTransaction, Transaction, TransactionFilter, TransactionPatch,
    },
};

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::PgStore;

/// Outcome of the atomic reset-token redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemOutcome {
    Redeemed { user_id: Uuid },
    /// The token was consumed or expired between lookup and redemption.
    Lost,
}

#[async_trait]
pub trait DataStore: Send + Sync {
    // users
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    /// Creates the user and its starter categories atomically. Fails with
    /// `StoreError::Conflict` when the email is taken.
    async fn create_user(
        &self,
        user: NewUser,
        default_categories: &[(&str, KindAffinity)],
    ) -> StoreResult<User>;
    async fn update_user(&self, id: Uuid, patch: UserPatch) -> StoreResult<Option<User>>;
    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<bool>;
    async fn set_user_active(&self, id: Uuid, active: bool) -> StoreResult<bool>;
    /// Removes the user together with their categories, transactions and reset tokens.
    async fn delete_user(&self, id: Uuid) -> StoreResult<bool>;
    async fn list_users(&self, query: &UserQuery) -> StoreResult<(Vec<User>, i64)>;
    /// Returns `(all users, active users)`.
    async fn count_users(&self) -> StoreResult<(i64, i64)>;

    // password reset tokens
    async fn insert_reset_token(&self, token: NewResetToken) -> StoreResult<()>;
    async fn find_reset_token(&self, token_hash: &str) -> StoreResult<Option<PasswordResetToken>>;
    /// Marks every outstanding token of the user consumed; returns how many were touched.
    async fn invalidate_reset_tokens(&self, user_id: Uuid) -> StoreResult<u64>;
    /// In one atomic step: consume the token only if it is unconsumed and
    /// `expires_at > now`, store the new password hash, and invalidate the
    /// user's other outstanding tokens.
    async fn redeem_reset_token(
        &self,
        token_hash: &str,
        new_password_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<RedeemOutcome>;

    // categories
    /// Fails with `StoreError::Conflict` when the owner already has that name.
    async fn create_category(&self, category: NewCategory) -> StoreResult<Category>;
    async fn find_category(&self, id: Uuid, owner: Uuid) -> StoreResult<Option<Category>>;
    /// Sorted by name.
    async fn list_categories(
        &self,
        owner: Uuid,
        kind: Option<KindAffinity>,
    ) -> StoreResult<Vec<Category>>;
    /// All categories of `owner`, or of everyone when `owner` is `None`.
    async fn categories_for(&self, owner: Option<Uuid>) -> StoreResult<Vec<Category>>;
    async fn update_category(
        &self,
        id: Uuid,
        owner: Uuid,
        patch: CategoryPatch,
    ) -> StoreResult<Option<Category>>;
    async fn delete_category(&self, id: Uuid, owner: Uuid) -> StoreResult<bool>;

    // transactions
    async fn create_transaction(&self, tx: NewTransaction) -> StoreResult<Transaction>;
    /// `owner = None` skips the ownership check.
    async fn find_transaction(&self, id: Uuid, owner: Option<Uuid>)
        -> StoreResult<Option<Transaction>>;
    async fn update_transaction(
        &self,
        id: Uuid,
        owner: Uuid,
        patch: TransactionPatch,
    ) -> StoreResult<Option<Transaction>>;
    async fn delete_transactions(&self, owner: Uuid, ids: &[Uuid]) -> StoreResult<u64>;
    /// One page of matches plus the total match count.
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> StoreResult<(Vec<Transaction>, i64)>;
    /// Distinct non-blank notes of the owner's transactions, trimmed and
    /// sorted, at most `limit`.
    async fn distinct_notes(&self, owner: Uuid, limit: i64) -> StoreResult<Vec<String>>;
    /// Every transaction of `owner` (or everyone's) inside `range`, oldest first.
    async fn transactions_in_range(
        &self,
        owner: Option<Uuid>,
        range: &DateRange,
    ) -> StoreResult<Vec<Transaction>>;
}
