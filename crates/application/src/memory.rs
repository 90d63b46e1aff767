//! 内存存储
//!
//! 同时实现账户与令牌两个存储接口，二者共享一把锁，
//! 因此令牌消费与账户变更可以在同一临界区内完成。
//! 用于开发模式（未配置数据库）与测试。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use domain::{
    Account, AccountChanges, AccountId, AccountRepository, AccountStatus, ConsumeEffect, Email,
    NewAccount, OneTimeKind, Page, PasswordHash, RepositoryError, RepositoryFuture,
    SearchCriteria, SortField, SortOrder, Timestamp, TokenRecord, TokenRepository,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    accounts: BTreeMap<i64, Account>,
    tokens: HashMap<(OneTimeKind, Email), TokenRecord>,
}

impl MemoryState {
    fn live(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id.0).filter(|a| a.is_live())
    }

    fn live_mut(&mut self, id: AccountId) -> Result<&mut Account, RepositoryError> {
        self.accounts
            .get_mut(&id.0)
            .filter(|a| a.is_live())
            .ok_or(RepositoryError::NotFound)
    }

    fn email_taken(&self, email: &Email, except: Option<AccountId>) -> bool {
        self.accounts
            .values()
            .any(|a| a.is_live() && &a.email == email && Some(a.id) != except)
    }

    fn filtered<F>(&self, predicate: F) -> Vec<Account>
    where
        F: Fn(&Account) -> bool,
    {
        self.accounts
            .values()
            .filter(|a| a.is_live() && predicate(a))
            .cloned()
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn compare(a: &Account, b: &Account, field: SortField) -> std::cmp::Ordering {
    match field {
        SortField::Id => a.id.cmp(&b.id),
        SortField::Name => a.name.cmp(&b.name),
        SortField::Email => a.email.as_str().cmp(b.email.as_str()),
        SortField::Role => a.role.cmp(&b.role),
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortField::BranchId => a.branch_id.cmp(&b.branch_id),
    }
    .then_with(|| a.id.cmp(&b.id))
}

impl AccountRepository for InMemoryStore {
    fn create(&self, account: NewAccount) -> RepositoryFuture<Account> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut guard = state.write().await;
            if guard.email_taken(&account.email, None) {
                return Err(RepositoryError::DuplicateEmail);
            }
            guard.next_id += 1;
            let stored = account.into_account(AccountId(guard.next_id));
            guard.accounts.insert(stored.id.0, stored.clone());
            Ok(stored)
        })
    }

    fn find_by_id(&self, id: AccountId) -> RepositoryFuture<Option<Account>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move { Ok(state.read().await.live(id).cloned()) })
    }

    fn find_by_email(&self, email: Email) -> RepositoryFuture<Option<Account>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let guard = state.read().await;
            Ok(guard.filtered(|a| a.email == email).into_iter().next())
        })
    }

    fn find_all_live(&self) -> RepositoryFuture<Vec<Account>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move { Ok(state.read().await.filtered(|_| true)) })
    }

    fn find_by_branch(&self, branch_id: i64) -> RepositoryFuture<Vec<Account>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            Ok(state
                .read()
                .await
                .filtered(|a| a.branch_id == Some(branch_id)))
        })
    }

    fn find_by_role(&self, role: String) -> RepositoryFuture<Vec<Account>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move { Ok(state.read().await.filtered(|a| a.role == role)) })
    }

    fn find_by_owner(&self, owner_id: i64) -> RepositoryFuture<Vec<Account>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            Ok(state
                .read()
                .await
                .filtered(|a| a.owner_id == Some(owner_id)))
        })
    }

    fn find_by_branch_paged(
        &self,
        branch_id: i64,
        offset: u64,
        limit: u32,
    ) -> RepositoryFuture<Page<Account>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let all = state
                .read()
                .await
                .filtered(|a| a.branch_id == Some(branch_id));
            let total = all.len() as u64;
            let items = all
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect();
            Ok(Page { items, total })
        })
    }

    fn exists_by_email(&self, email: Email) -> RepositoryFuture<bool> {
        let state = Arc::clone(&self.state);
        Box::pin(async move { Ok(state.read().await.email_taken(&email, None)) })
    }

    fn update(
        &self,
        id: AccountId,
        changes: AccountChanges,
        now: Timestamp,
    ) -> RepositoryFuture<Account> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut guard = state.write().await;
            if let Some(email) = &changes.email {
                if guard.email_taken(email, Some(id)) {
                    return Err(RepositoryError::DuplicateEmail);
                }
            }
            let account = guard.live_mut(id)?;
            account.apply(&changes, now);
            Ok(account.clone())
        })
    }

    fn soft_delete(&self, id: AccountId, now: Timestamp) -> RepositoryFuture<()> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut guard = state.write().await;
            let account = guard.live_mut(id)?;
            account.deleted_at = Some(now);
            account.updated_at = now;
            Ok(())
        })
    }

    fn update_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        now: Timestamp,
    ) -> RepositoryFuture<()> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut guard = state.write().await;
            let account = guard.live_mut(id)?;
            account.status = status;
            account.updated_at = now;
            Ok(())
        })
    }

    fn update_password(
        &self,
        id: AccountId,
        password_hash: PasswordHash,
        now: Timestamp,
    ) -> RepositoryFuture<()> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut guard = state.write().await;
            let account = guard.live_mut(id)?;
            account.password_hash = password_hash;
            account.updated_at = now;
            Ok(())
        })
    }

    fn search(&self, criteria: SearchCriteria) -> RepositoryFuture<Page<Account>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut matched = state.read().await.filtered(|a| criteria.matches(a));
            matched.sort_by(|a, b| {
                let ordering = compare(a, b, criteria.sort_by);
                match criteria.sort_order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            });
            let total = matched.len() as u64;
            let items = matched
                .into_iter()
                .skip(criteria.offset() as usize)
                .take(criteria.page_size as usize)
                .collect();
            Ok(Page { items, total })
        })
    }
}

impl TokenRepository for InMemoryStore {
    fn store(
        &self,
        kind: OneTimeKind,
        email: Email,
        token: String,
        expires_at: Timestamp,
        now: Timestamp,
    ) -> RepositoryFuture<()> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut guard = state.write().await;
            let created_at = guard
                .tokens
                .get(&(kind, email.clone()))
                .map(|r| r.created_at)
                .unwrap_or(now);
            guard.tokens.insert(
                (kind, email.clone()),
                TokenRecord {
                    kind,
                    email,
                    token,
                    expires_at,
                    used_at: None,
                    created_at,
                    updated_at: now,
                },
            );
            Ok(())
        })
    }

    fn consume(
        &self,
        kind: OneTimeKind,
        token: String,
        now: Timestamp,
        effect: ConsumeEffect,
    ) -> RepositoryFuture<Email> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut guard = state.write().await;
            let record = guard
                .tokens
                .values()
                .find(|r| r.kind == kind && r.token == token)
                .cloned()
                .ok_or(RepositoryError::TokenNotFound)?;
            if record.used_at.is_some() {
                return Err(RepositoryError::TokenAlreadyUsed);
            }
            if now >= record.expires_at {
                return Err(RepositoryError::TokenExpired);
            }

            // 先完成账户变更，成功后才写 used_at
            let account_id = guard
                .accounts
                .values()
                .find(|a| a.is_live() && a.email == record.email)
                .map(|a| a.id)
                .ok_or(RepositoryError::NotFound)?;
            let account = guard.live_mut(account_id)?;
            match effect {
                ConsumeEffect::UpdatePassword(hash) => account.password_hash = hash,
                ConsumeEffect::MarkEmailVerified => account.email_verified = true,
            }
            account.updated_at = now;

            if let Some(stored) = guard.tokens.get_mut(&(kind, record.email.clone())) {
                stored.used_at = Some(now);
                stored.updated_at = now;
            }
            Ok(record.email)
        })
    }

    fn find_latest(&self, kind: OneTimeKind, email: Email) -> RepositoryFuture<Option<TokenRecord>> {
        let state = Arc::clone(&self.state);
        Box::pin(async move { Ok(state.read().await.tokens.get(&(kind, email)).cloned()) })
    }

    fn mark_email_verified(&self, email: Email, now: Timestamp) -> RepositoryFuture<()> {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let mut guard = state.write().await;
            let account = guard
                .accounts
                .values_mut()
                .find(|a| a.is_live() && a.email == email)
                .ok_or(RepositoryError::NotFound)?;
            account.email_verified = true;
            account.updated_at = now;
            Ok(())
        })
    }
}
