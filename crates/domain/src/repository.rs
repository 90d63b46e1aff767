//! 存储层抽象
//!
//! 所有方法返回 `'static` 的装箱 future，调用方可以把它丢到任意任务中执行；
//! 丢弃 future 即取消对应的存储操作。

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::account::{Account, AccountChanges, AccountStatus, NewAccount};
use crate::errors::RepositoryError;
use crate::token::{ConsumeEffect, OneTimeKind, TokenRecord};
use crate::value_objects::{AccountId, Email, PasswordHash, Timestamp};

pub type RepositoryResult<T> = Result<T, RepositoryError>;
pub type RepositoryFuture<T> = BoxFuture<'static, RepositoryResult<T>>;

/// 排序字段白名单
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Id,
    Name,
    Email,
    Role,
    #[default]
    CreatedAt,
    UpdatedAt,
    BranchId,
}

impl SortField {
    /// 不在白名单内的取值回退为 `created_at`
    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "id" => Self::Id,
            "name" => Self::Name,
            "email" => Self::Email,
            "role" => Self::Role,
            "updated_at" => Self::UpdatedAt,
            "branch_id" => Self::BranchId,
            _ => Self::CreatedAt,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Email => "email",
            Self::Role => "role",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::BranchId => "branch_id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse_or_default(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("asc") {
            Self::Asc
        } else {
            Self::Desc
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// 已归一化的搜索条件（页码与页大小已经过钳制）
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCriteria {
    /// 名称或邮箱的大小写无关子串
    pub query: Option<String>,
    pub role: Option<String>,
    pub branch_id: Option<i64>,
    pub statuses: Vec<AccountStatus>,
    pub page: u32,
    pub page_size: u32,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

impl SearchCriteria {
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.page_size)
    }

    /// 内存实现与测试共用的过滤谓词
    pub fn matches(&self, account: &Account) -> bool {
        if !account.is_live() {
            return false;
        }
        if let Some(query) = &self.query {
            let query = query.to_lowercase();
            if !account.name.to_lowercase().contains(&query)
                && !account.email.as_str().contains(&query)
            {
                return false;
            }
        }
        if let Some(role) = &self.role {
            if &account.role != role {
                return false;
            }
        }
        if let Some(branch_id) = self.branch_id {
            if account.branch_id != Some(branch_id) {
                return false;
            }
        }
        self.statuses.is_empty() || self.statuses.contains(&account.status)
    }
}

/// 一页结果与满足条件的总数
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

pub trait AccountRepository: Send + Sync {
    fn create(&self, account: NewAccount) -> RepositoryFuture<Account>;

    /// 自助注册，使用 [`NewAccount::registration`] 构造的最小字段集
    fn register(&self, account: NewAccount) -> RepositoryFuture<Account> {
        self.create(account)
    }

    fn find_by_id(&self, id: AccountId) -> RepositoryFuture<Option<Account>>;
    fn find_by_email(&self, email: Email) -> RepositoryFuture<Option<Account>>;
    fn find_all_live(&self) -> RepositoryFuture<Vec<Account>>;
    fn find_by_branch(&self, branch_id: i64) -> RepositoryFuture<Vec<Account>>;
    fn find_by_role(&self, role: String) -> RepositoryFuture<Vec<Account>>;
    fn find_by_owner(&self, owner_id: i64) -> RepositoryFuture<Vec<Account>>;
    fn find_by_branch_paged(
        &self,
        branch_id: i64,
        offset: u64,
        limit: u32,
    ) -> RepositoryFuture<Page<Account>>;
    fn exists_by_email(&self, email: Email) -> RepositoryFuture<bool>;
    fn update(
        &self,
        id: AccountId,
        changes: AccountChanges,
        now: Timestamp,
    ) -> RepositoryFuture<Account>;
    fn soft_delete(&self, id: AccountId, now: Timestamp) -> RepositoryFuture<()>;
    fn update_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        now: Timestamp,
    ) -> RepositoryFuture<()>;
    fn update_password(
        &self,
        id: AccountId,
        password_hash: PasswordHash,
        now: Timestamp,
    ) -> RepositoryFuture<()>;
    fn search(&self, criteria: SearchCriteria) -> RepositoryFuture<Page<Account>>;
}

pub trait TokenRepository: Send + Sync {
    /// 插入或替换 (email, kind) 的令牌
    fn store(
        &self,
        kind: OneTimeKind,
        email: Email,
        token: String,
        expires_at: Timestamp,
        now: Timestamp,
    ) -> RepositoryFuture<()>;

    /// 校验未使用且未过期后，在同一事务内执行 `effect` 并写入 used_at
    fn consume(
        &self,
        kind: OneTimeKind,
        token: String,
        now: Timestamp,
        effect: ConsumeEffect,
    ) -> RepositoryFuture<Email>;

    fn find_latest(&self, kind: OneTimeKind, email: Email) -> RepositoryFuture<Option<TokenRecord>>;

    fn mark_email_verified(&self, email: Email, now: Timestamp) -> RepositoryFuture<()>;

    fn store_reset(
        &self,
        email: Email,
        token: String,
        expires_at: Timestamp,
        now: Timestamp,
    ) -> RepositoryFuture<()> {
        self.store(OneTimeKind::Reset, email, token, expires_at, now)
    }

    fn store_verification(
        &self,
        email: Email,
        token: String,
        expires_at: Timestamp,
        now: Timestamp,
    ) -> RepositoryFuture<()> {
        self.store(OneTimeKind::Verification, email, token, expires_at, now)
    }

    /// 消费重置令牌并更新密码
    fn consume_reset(
        &self,
        token: String,
        now: Timestamp,
        password_hash: PasswordHash,
    ) -> RepositoryFuture<Email> {
        self.consume(
            OneTimeKind::Reset,
            token,
            now,
            ConsumeEffect::UpdatePassword(password_hash),
        )
    }

    /// 消费验证令牌并标记邮箱已验证
    fn consume_verification(&self, token: String, now: Timestamp) -> RepositoryFuture<Email> {
        self.consume(
            OneTimeKind::Verification,
            token,
            now,
            ConsumeEffect::MarkEmailVerified,
        )
    }
}
