use std::{
    collections::{BTreeSet, HashMap},
    sync::Mutex,
};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{DataStore, RedeemOutcome};
use crate::{
    auth::repo_types::{NewResetToken, NewUser, PasswordResetToken, User, UserPatch, UserQuery},
    categories::repo_types::{Category, CategoryPatch, KindAffinity, NewCategory},
    error::{StoreError, StoreResult},
    transactions::repo_types::{
        DateRange, NewTransaction, SortBy, SortOrder, Transaction, TransactionFilter,
        TransactionPatch,
    },
};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    tokens: Vec<PasswordResetToken>,
    categories: HashMap<Uuid, Category>,
    transactions: HashMap<Uuid, Transaction>,
}

/// In-process store with the same semantics as the Postgres schema
/// (unique keys, cascades, `ON DELETE SET NULL`).
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    /// When set, the next redemption finds its token already consumed.
    steal_next_redeem: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_tokens_of(&self, user_id: Uuid) -> Vec<PasswordResetToken> {
        let t = self.tables.lock().unwrap();
        t.tokens
            .iter()
            .filter(|tok| tok.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Makes the next `redeem_reset_token` behave as if another request
    /// consumed the token between lookup and redemption.
    pub fn consume_before_next_redeem(&self) {
        *self.steal_next_redeem.lock().unwrap() = true;
    }

    /// Inserts a transaction with a caller-chosen `created_at`.
    pub fn insert_transaction_raw(&self, tx: Transaction) {
        self.tables
            .lock()
            .unwrap()
            .transactions
            .insert(tx.id, tx);
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

fn matches_filter(tx: &Transaction, f: &TransactionFilter) -> bool {
    f.owner.map_or(true, |o| tx.user_id == o)
        && f.kind.map_or(true, |k| tx.kind == k)
        && f.category_id.map_or(true, |c| tx.category_id == Some(c))
        && f.range.contains(tx.occurred_at)
        && f.min_amount.map_or(true, |m| tx.amount >= m)
        && f.max_amount.map_or(true, |m| tx.amount <= m)
        && f.search.as_deref().filter(|s| !s.is_empty()).map_or(true, |s| {
            tx.note
                .as_deref()
                .map_or(false, |n| n.to_lowercase().contains(&s.to_lowercase()))
        })
}

fn page<T>(items: Vec<T>, limit: i64, offset: i64) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.lock().unwrap().users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let t = self.tables.lock().unwrap();
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn create_user(
        &self,
        user: NewUser,
        default_categories: &[(&str, KindAffinity)],
    ) -> StoreResult<User> {
        let mut t = self.tables.lock().unwrap();
        if t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("Email"));
        }
        let user = User {
            id: Uuid::new_v4(),
            email: user.email,
            password_hash: user.password_hash,
            name: user.name,
            role: user.role,
            is_active: true,
            created_at: now(),
        };
        t.users.insert(user.id, user.clone());
        for (name, kind) in default_categories {
            let category = Category {
                id: Uuid::new_v4(),
                user_id: user.id,
                name: (*name).to_owned(),
                kind: *kind,
                is_default: true,
                created_at: user.created_at,
            };
            t.categories.insert(category.id, category);
        }
        Ok(user)
    }

    async fn update_user(&self, id: Uuid, patch: UserPatch) -> StoreResult<Option<User>> {
        let mut t = self.tables.lock().unwrap();
        if let Some(email) = &patch.email {
            if t.users.values().any(|u| u.id != id && &u.email == email) {
                return Err(StoreError::Conflict("Email"));
            }
        }
        let Some(user) = t.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(email) = patch.email {
            user.email = email;
        }
        if let Some(name) = patch.name {
            user.name = name;
        }
        Ok(Some(user.clone()))
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> StoreResult<bool> {
        let mut t = self.tables.lock().unwrap();
        Ok(t.users
            .get_mut(&id)
            .map(|u| u.password_hash = password_hash.to_owned())
            .is_some())
    }

    async fn set_user_active(&self, id: Uuid, active: bool) -> StoreResult<bool> {
        let mut t = self.tables.lock().unwrap();
        Ok(t.users.get_mut(&id).map(|u| u.is_active = active).is_some())
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<bool> {
        let mut t = self.tables.lock().unwrap();
        if t.users.remove(&id).is_none() {
            return Ok(false);
        }
        t.tokens.retain(|tok| tok.user_id != id);
        t.categories.retain(|_, c| c.user_id != id);
        t.transactions.retain(|_, tx| tx.user_id != id);
        Ok(true)
    }

    async fn list_users(&self, query: &UserQuery) -> StoreResult<(Vec<User>, i64)> {
        let t = self.tables.lock().unwrap();
        let needle = query
            .search
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let mut users: Vec<User> = t
            .users
            .values()
            .filter(|u| {
                needle.as_deref().map_or(true, |n| {
                    u.email.to_lowercase().contains(n) || u.name.to_lowercase().contains(n)
                })
            })
            .cloned()
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        let total = users.len() as i64;
        Ok((page(users, query.limit, query.offset), total))
    }

    async fn count_users(&self) -> StoreResult<(i64, i64)> {
        let t = self.tables.lock().unwrap();
        let active = t.users.values().filter(|u| u.is_active).count();
        Ok((t.users.len() as i64, active as i64))
    }

    async fn insert_reset_token(&self, token: NewResetToken) -> StoreResult<()> {
        let mut t = self.tables.lock().unwrap();
        if t.tokens.iter().any(|tok| tok.token_hash == token.token_hash) {
            return Err(StoreError::Conflict("Reset token"));
        }
        t.tokens.push(PasswordResetToken {
            id: Uuid::new_v4(),
            user_id: token.user_id,
            token_hash: token.token_hash,
            expires_at: token.expires_at,
            consumed: false,
            created_at: token.created_at,
        });
        Ok(())
    }

    async fn find_reset_token(&self, token_hash: &str) -> StoreResult<Option<PasswordResetToken>> {
        let t = self.tables.lock().unwrap();
        Ok(t.tokens
            .iter()
            .find(|tok| tok.token_hash == token_hash)
            .cloned())
    }

    async fn invalidate_reset_tokens(&self, user_id: Uuid) -> StoreResult<u64> {
        let mut t = self.tables.lock().unwrap();
        let mut touched = 0;
        for tok in t
            .tokens
            .iter_mut()
            .filter(|tok| tok.user_id == user_id && !tok.consumed)
        {
            tok.consumed = true;
            touched += 1;
        }
        Ok(touched)
    }

    async fn redeem_reset_token(
        &self,
        token_hash: &str,
        new_password_hash: &str,
        now: OffsetDateTime,
    ) -> StoreResult<RedeemOutcome> {
        let steal = std::mem::take(&mut *self.steal_next_redeem.lock().unwrap());
        let mut t = self.tables.lock().unwrap();
        if steal {
            for tok in t.tokens.iter_mut().filter(|tok| tok.token_hash == token_hash) {
                tok.consumed = true;
            }
        }
        let Some(tok) = t
            .tokens
            .iter_mut()
            .find(|tok| tok.token_hash == token_hash && !tok.consumed && tok.expires_at > now)
        else {
            return Ok(RedeemOutcome::Lost);
        };
        tok.consumed = true;
        let user_id = tok.user_id;

        if let Some(user) = t.users.get_mut(&user_id) {
            user.password_hash = new_password_hash.to_owned();
        }
        for other in t.tokens.iter_mut().filter(|tok| tok.user_id == user_id) {
            other.consumed = true;
        }
        Ok(RedeemOutcome::Redeemed { user_id })
    }

    async fn create_category(&self, category: NewCategory) -> StoreResult<Category> {
        let mut t = self.tables.lock().unwrap();
        if t
            .categories
            .values()
            .any(|c| c.user_id == category.user_id && c.name == category.name)
        {
            return Err(StoreError::Conflict("Category"));
        }
        let category = Category {
            id: Uuid::new_v4(),
            user_id: category.user_id,
            name: category.name,
            kind: category.kind,
            is_default: category.is_default,
            created_at: now(),
        };
        t.categories.insert(category.id, category.clone());
        Ok(category)
    }

    async fn find_category(&self, id: Uuid, owner: Uuid) -> StoreResult<Option<Category>> {
        let t = self.tables.lock().unwrap();
        Ok(t.categories.get(&id).filter(|c| c.user_id == owner).cloned())
    }

    async fn list_categories(
        &self,
        owner: Uuid,
        kind: Option<KindAffinity>,
    ) -> StoreResult<Vec<Category>> {
        let t = self.tables.lock().unwrap();
        let mut out: Vec<Category> = t
            .categories
            .values()
            .filter(|c| c.user_id == owner && kind.map_or(true, |k| c.kind == k))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn categories_for(&self, owner: Option<Uuid>) -> StoreResult<Vec<Category>> {
        let t = self.tables.lock().unwrap();
        let mut out: Vec<Category> = t
            .categories
            .values()
            .filter(|c| owner.map_or(true, |o| c.user_id == o))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn update_category(
        &self,
        id: Uuid,
        owner: Uuid,
        patch: CategoryPatch,
    ) -> StoreResult<Option<Category>> {
        let mut t = self.tables.lock().unwrap();
        if let Some(name) = &patch.name {
            if t
                .categories
                .values()
                .any(|c| c.id != id && c.user_id == owner && &c.name == name)
            {
                return Err(StoreError::Conflict("Category"));
            }
        }
        let Some(category) = t.categories.get_mut(&id).filter(|c| c.user_id == owner) else {
            return Ok(None);
        };
        if let Some(name) = patch.name {
            category.name = name;
        }
        if let Some(kind) = patch.kind {
            category.kind = kind;
        }
        Ok(Some(category.clone()))
    }

    async fn delete_category(&self, id: Uuid, owner: Uuid) -> StoreResult<bool> {
        let mut t = self.tables.lock().unwrap();
        if t.categories.get(&id).map_or(true, |c| c.user_id != owner) {
            return Ok(false);
        }
        t.categories.remove(&id);
        for tx in t.transactions.values_mut() {
            if tx.category_id == Some(id) {
                tx.category_id = None;
            }
        }
        Ok(true)
    }

    async fn create_transaction(&self, tx: NewTransaction) -> StoreResult<Transaction> {
        let tx = Transaction {
            id: Uuid::new_v4(),
            user_id: tx.user_id,
            category_id: tx.category_id,
            kind: tx.kind,
            amount: tx.amount,
            occurred_at: tx.occurred_at,
            note: tx.note,
            created_at: now(),
        };
        self.insert_transaction_raw(tx.clone());
        Ok(tx)
    }

    async fn find_transaction(
        &self,
        id: Uuid,
        owner: Option<Uuid>,
    ) -> StoreResult<Option<Transaction>> {
        let t = self.tables.lock().unwrap();
        Ok(t.transactions
            .get(&id)
            .filter(|tx| owner.map_or(true, |o| tx.user_id == o))
            .cloned())
    }

    async fn update_transaction(
        &self,
        id: Uuid,
        owner: Uuid,
        patch: TransactionPatch,
    ) -> StoreResult<Option<Transaction>> {
        let mut t = self.tables.lock().unwrap();
        let Some(tx) = t.transactions.get_mut(&id).filter(|tx| tx.user_id == owner) else {
            return Ok(None);
        };
        if let Some(category_id) = patch.category_id {
            tx.category_id = Some(category_id);
        }
        if let Some(kind) = patch.kind {
            tx.kind = kind;
        }
        if let Some(amount) = patch.amount {
            tx.amount = amount;
        }
        if let Some(occurred_at) = patch.occurred_at {
            tx.occurred_at = occurred_at;
        }
        if let Some(note) = patch.note {
            tx.note = Some(note);
        }
        Ok(Some(tx.clone()))
    }

    async fn delete_transactions(&self, owner: Uuid, ids: &[Uuid]) -> StoreResult<u64> {
        let mut t = self.tables.lock().unwrap();
        let before = t.transactions.len();
        t.transactions
            .retain(|id, tx| !(tx.user_id == owner && ids.contains(id)));
        Ok((before - t.transactions.len()) as u64)
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> StoreResult<(Vec<Transaction>, i64)> {
        let t = self.tables.lock().unwrap();
        let mut out: Vec<Transaction> = t
            .transactions
            .values()
            .filter(|tx| matches_filter(tx, filter))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            let ord = match filter.sort_by {
                SortBy::OccurredAt => a.occurred_at.cmp(&b.occurred_at),
                SortBy::Amount => a.amount.cmp(&b.amount),
            };
            let ord = match filter.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            ord.then(a.id.cmp(&b.id))
        });
        let total = out.len() as i64;
        Ok((page(out, filter.limit, filter.offset), total))
    }

    async fn distinct_notes(&self, owner: Uuid, limit: i64) -> StoreResult<Vec<String>> {
        let t = self.tables.lock().unwrap();
        let notes: BTreeSet<String> = t
            .transactions
            .values()
            .filter(|tx| tx.user_id == owner)
            .filter_map(|tx| tx.note.as_deref().map(str::trim))
            .filter(|n| !n.is_empty())
            .map(str::to_owned)
            .collect();
        Ok(notes.into_iter().take(limit.max(0) as usize).collect())
    }

    async fn transactions_in_range(
        &self,
        owner: Option<Uuid>,
        range: &DateRange,
    ) -> StoreResult<Vec<Transaction>> {
        let t = self.tables.lock().unwrap();
        let mut out: Vec<Transaction> = t
            .transactions
            .values()
            .filter(|tx| owner.map_or(true, |o| tx.user_id == o) && range.contains(tx.occurred_at))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use time::{macros::datetime, Duration};

    use super::*;
    use crate::{auth::repo_types::Role, transactions::repo_types::TxKind};

    async fn user(store: &MemoryStore, email: &str) -> User {
        store
            .create_user(
                NewUser {
                    email: email.into(),
                    password_hash: "h".into(),
                    name: "N".into(),
                    role: Role::Standard,
                },
                &[],
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn deleting_category_detaches_transactions() {
        let store = MemoryStore::new();
        let u = user(&store, "a@b.io").await;
        let cat = store
            .create_category(NewCategory {
                user_id: u.id,
                name: "Food".into(),
                kind: KindAffinity::Expense,
                is_default: false,
            })
            .await
            .unwrap();
        let tx = store
            .create_transaction(NewTransaction {
                user_id: u.id,
                category_id: Some(cat.id),
                kind: TxKind::Expense,
                amount: Decimal::new(1250, 2),
                occurred_at: datetime!(2024-03-01 12:00 UTC),
                note: None,
            })
            .await
            .unwrap();

        assert!(store.delete_category(cat.id, u.id).await.unwrap());
        let tx = store.find_transaction(tx.id, Some(u.id)).await.unwrap().unwrap();
        assert_eq!(tx.category_id, None);
    }

    #[tokio::test]
    async fn redeem_is_single_use_and_checks_expiry() {
        let store = MemoryStore::new();
        let u = user(&store, "a@b.io").await;
        let now = datetime!(2024-03-01 12:00 UTC);
        store
            .insert_reset_token(NewResetToken {
                user_id: u.id,
                token_hash: "digest".into(),
                expires_at: now + Duration::hours(1),
                created_at: now,
            })
            .await
            .unwrap();

        let late = store
            .redeem_reset_token("digest", "new", now + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(late, RedeemOutcome::Lost);

        let first = store.redeem_reset_token("digest", "new", now).await.unwrap();
        assert_eq!(first, RedeemOutcome::Redeemed { user_id: u.id });
        let second = store.redeem_reset_token("digest", "newer", now).await.unwrap();
        assert_eq!(second, RedeemOutcome::Lost);

        let stored = store.find_user(u.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "new");
    }

    #[tokio::test]
    async fn redeem_invalidates_other_outstanding_tokens() {
        let store = MemoryStore::new();
        let u = user(&store, "a@b.io").await;
        let other = user(&store, "c@d.io").await;
        let now = datetime!(2024-03-01 12:00 UTC);
        for (owner, digest) in [(u.id, "first"), (u.id, "second"), (other.id, "theirs")] {
            store
                .insert_reset_token(NewResetToken {
                    user_id: owner,
                    token_hash: digest.into(),
                    expires_at: now + Duration::hours(1),
                    created_at: now,
                })
                .await
                .unwrap();
        }

        let outcome = store.redeem_reset_token("first", "new", now).await.unwrap();
        assert_eq!(outcome, RedeemOutcome::Redeemed { user_id: u.id });

        let second = store.find_reset_token("second").await.unwrap().unwrap();
        assert!(second.consumed);
        let theirs = store.find_reset_token("theirs").await.unwrap().unwrap();
        assert!(!theirs.consumed);
        assert_eq!(
            store.redeem_reset_token("second", "newer", now).await.unwrap(),
            RedeemOutcome::Lost
        );
    }

    #[tokio::test]
    async fn user_is_created_with_its_default_categories() {
        let store = MemoryStore::new();
        let defaults = [("Salary", KindAffinity::Income), ("Food", KindAffinity::Expense)];
        let u = store
            .create_user(
                NewUser {
                    email: "a@b.io".into(),
                    password_hash: "h".into(),
                    name: "N".into(),
                    role: Role::Standard,
                },
                &defaults,
            )
            .await
            .unwrap();
        assert_eq!(store.list_categories(u.id, None).await.unwrap().len(), 2);

        let dup = store
            .create_user(
                NewUser {
                    email: "a@b.io".into(),
                    password_hash: "h".into(),
                    name: "Again".into(),
                    role: Role::Standard,
                },
                &defaults,
            )
            .await;
        assert!(matches!(dup, Err(StoreError::Conflict("Email"))));
        assert_eq!(store.categories_for(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn deleting_user_cascades() {
        let store = MemoryStore::new();
        let u = user(&store, "a@b.io").await;
        let other = user(&store, "c@d.io").await;
        for owner in [u.id, other.id] {
            store
                .create_transaction(NewTransaction {
                    user_id: owner,
                    category_id: None,
                    kind: TxKind::Income,
                    amount: Decimal::ONE,
                    occurred_at: datetime!(2024-03-01 12:00 UTC),
                    note: None,
                })
                .await
                .unwrap();
        }

        assert!(store.delete_user(u.id).await.unwrap());
        let left = store
            .transactions_in_range(None, &DateRange::default())
            .await
            .unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].user_id, other.id);
    }
}
