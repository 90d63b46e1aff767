use std::time::Duration;

use domain::{
    Account, AccountChanges, AccountId, AccountRepository, AccountStatus, ConsumeEffect, Email,
    NewAccount, OneTimeKind, Page, PasswordHash, RepositoryError, RepositoryFuture,
    SearchCriteria, Timestamp, TokenRecord, TokenRepository,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool, Postgres, QueryBuilder};

const ACCOUNT_COLUMNS: &str = "id, branch_id, name, email, password_hash, avatar, title, role, \
     owner_id, status, email_verified, created_at, updated_at, deleted_at";

const TOKEN_COLUMNS: &str = "email, token, expires_at, used_at, created_at, updated_at";

/// 在存储边界把 sqlx 错误归类，上层只看错误种类
fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            RepositoryError::DuplicateEmail
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => RepositoryError::unavailable(err.to_string()),
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

fn ensure_affected(rows: u64) -> Result<(), RepositoryError> {
    if rows == 0 {
        Err(RepositoryError::NotFound)
    } else {
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct AccountRecord {
    id: i64,
    branch_id: Option<i64>,
    name: String,
    email: String,
    password_hash: String,
    avatar: Option<String>,
    title: Option<String>,
    role: String,
    owner_id: Option<i64>,
    status: String,
    email_verified: bool,
    created_at: Timestamp,
    updated_at: Timestamp,
    deleted_at: Option<Timestamp>,
}

impl TryFrom<AccountRecord> for Account {
    type Error = RepositoryError;

    fn try_from(value: AccountRecord) -> Result<Self, Self::Error> {
        let email = Email::parse(value.email).map_err(|err| invalid_data(err.to_string()))?;
        let password_hash =
            PasswordHash::new(value.password_hash).map_err(|err| invalid_data(err.to_string()))?;
        let status = value
            .status
            .parse::<AccountStatus>()
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(Account {
            id: AccountId(value.id),
            branch_id: value.branch_id,
            name: value.name,
            email,
            password_hash,
            avatar: value.avatar,
            title: value.title,
            role: value.role,
            owner_id: value.owner_id,
            status,
            email_verified: value.email_verified,
            created_at: value.created_at,
            updated_at: value.updated_at,
            deleted_at: value.deleted_at,
        })
    }
}

fn into_accounts(records: Vec<AccountRecord>) -> Result<Vec<Account>, RepositoryError> {
    records.into_iter().map(Account::try_from).collect()
}

#[derive(Debug, FromRow)]
struct TokenRow {
    email: String,
    token: String,
    expires_at: Timestamp,
    used_at: Option<Timestamp>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl TokenRow {
    fn into_record(self, kind: OneTimeKind) -> Result<TokenRecord, RepositoryError> {
        Ok(TokenRecord {
            kind,
            email: Email::parse(self.email).map_err(|err| invalid_data(err.to_string()))?,
            token: self.token,
            expires_at: self.expires_at,
            used_at: self.used_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn token_table(kind: OneTimeKind) -> &'static str {
    match kind {
        OneTimeKind::Reset => "password_reset_tokens",
        OneTimeKind::Verification => "email_verification_tokens",
    }
}

/// LIKE 模式中的通配符按字面匹配
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn push_search_filters(builder: &mut QueryBuilder<'static, Postgres>, criteria: &SearchCriteria) {
    builder.push(" WHERE deleted_at IS NULL");
    if let Some(query) = &criteria.query {
        let pattern = like_pattern(query);
        builder
            .push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(role) = &criteria.role {
        builder.push(" AND role = ").push_bind(role.clone());
    }
    if let Some(branch_id) = criteria.branch_id {
        builder.push(" AND branch_id = ").push_bind(branch_id);
    }
    if !criteria.statuses.is_empty() {
        let statuses: Vec<String> = criteria
            .statuses
            .iter()
            .map(|status| status.as_str().to_string())
            .collect();
        builder.push(" AND status = ANY(").push_bind(statuses).push(")");
    }
}

#[derive(Clone)]
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn list_where(&self, clause: &'static str, value: ListKey) -> RepositoryFuture<Vec<Account>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let sql = format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE deleted_at IS NULL{clause} ORDER BY id"
            );
            let query = sqlx::query_as::<_, AccountRecord>(&sql);
            let query = match value {
                ListKey::None => query,
                ListKey::Id(id) => query.bind(id),
                ListKey::Text(text) => query.bind(text),
            };
            let records = query.fetch_all(&pool).await.map_err(map_sqlx_err)?;
            into_accounts(records)
        })
    }
}

enum ListKey {
    None,
    Id(i64),
    Text(String),
}

impl AccountRepository for PgAccountRepository {
    fn create(&self, account: NewAccount) -> RepositoryFuture<Account> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let sql = format!(
                r#"
                INSERT INTO accounts
                    (branch_id, name, email, password_hash, avatar, title, role, owner_id, status,
                     email_verified, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE, $10, $10)
                RETURNING {ACCOUNT_COLUMNS}
                "#
            );
            let record = sqlx::query_as::<_, AccountRecord>(&sql)
                .bind(account.branch_id)
                .bind(&account.name)
                .bind(account.email.as_str())
                .bind(account.password_hash.as_str())
                .bind(&account.avatar)
                .bind(&account.title)
                .bind(&account.role)
                .bind(account.owner_id)
                .bind(account.status.as_str())
                .bind(account.created_at)
                .fetch_one(&pool)
                .await
                .map_err(map_sqlx_err)?;

            Account::try_from(record)
        })
    }

    fn find_by_id(&self, id: AccountId) -> RepositoryFuture<Option<Account>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let sql = format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 AND deleted_at IS NULL"
            );
            let record = sqlx::query_as::<_, AccountRecord>(&sql)
                .bind(id.0)
                .fetch_optional(&pool)
                .await
                .map_err(map_sqlx_err)?;

            record.map(Account::try_from).transpose()
        })
    }

    fn find_by_email(&self, email: Email) -> RepositoryFuture<Option<Account>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let sql = format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE LOWER(email) = $1 AND deleted_at IS NULL"
            );
            let record = sqlx::query_as::<_, AccountRecord>(&sql)
                .bind(email.as_str())
                .fetch_optional(&pool)
                .await
                .map_err(map_sqlx_err)?;

            record.map(Account::try_from).transpose()
        })
    }

    fn find_all_live(&self) -> RepositoryFuture<Vec<Account>> {
        self.list_where("", ListKey::None)
    }

    fn find_by_branch(&self, branch_id: i64) -> RepositoryFuture<Vec<Account>> {
        self.list_where(" AND branch_id = $1", ListKey::Id(branch_id))
    }

    fn find_by_role(&self, role: String) -> RepositoryFuture<Vec<Account>> {
        self.list_where(" AND role = $1", ListKey::Text(role))
    }

    fn find_by_owner(&self, owner_id: i64) -> RepositoryFuture<Vec<Account>> {
        self.list_where(" AND owner_id = $1", ListKey::Id(owner_id))
    }

    fn find_by_branch_paged(
        &self,
        branch_id: i64,
        offset: u64,
        limit: u32,
    ) -> RepositoryFuture<Page<Account>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let total: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM accounts WHERE branch_id = $1 AND deleted_at IS NULL",
            )
            .bind(branch_id)
            .fetch_one(&pool)
            .await
            .map_err(map_sqlx_err)?;

            let sql = format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE branch_id = $1 AND deleted_at IS NULL \
                 ORDER BY id LIMIT $2 OFFSET $3"
            );
            let records = sqlx::query_as::<_, AccountRecord>(&sql)
                .bind(branch_id)
                .bind(i64::from(limit))
                .bind(i64::try_from(offset).unwrap_or(i64::MAX))
                .fetch_all(&pool)
                .await
                .map_err(map_sqlx_err)?;

            Ok(Page {
                items: into_accounts(records)?,
                total: u64::try_from(total).unwrap_or(0),
            })
        })
    }

    fn exists_by_email(&self, email: Email) -> RepositoryFuture<bool> {
        let pool = self.pool.clone();
        Box::pin(async move {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM accounts WHERE LOWER(email) = $1 AND deleted_at IS NULL)",
            )
            .bind(email.as_str())
            .fetch_one(&pool)
            .await
            .map_err(map_sqlx_err)
        })
    }

    fn update(
        &self,
        id: AccountId,
        changes: AccountChanges,
        now: Timestamp,
    ) -> RepositoryFuture<Account> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let mut tx = pool.begin().await.map_err(map_sqlx_err)?;

            let sql = format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
            );
            let record = sqlx::query_as::<_, AccountRecord>(&sql)
                .bind(id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_err)?
                .ok_or(RepositoryError::NotFound)?;

            let mut account = Account::try_from(record)?;
            account.apply(&changes, now);

            let sql = format!(
                r#"
                UPDATE accounts
                SET name = $2, email = $3, avatar = $4, title = $5, role = $6,
                    owner_id = $7, branch_id = $8, updated_at = $9
                WHERE id = $1
                RETURNING {ACCOUNT_COLUMNS}
                "#
            );
            let record = sqlx::query_as::<_, AccountRecord>(&sql)
                .bind(id.0)
                .bind(&account.name)
                .bind(account.email.as_str())
                .bind(&account.avatar)
                .bind(&account.title)
                .bind(&account.role)
                .bind(account.owner_id)
                .bind(account.branch_id)
                .bind(account.updated_at)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;

            tx.commit().await.map_err(map_sqlx_err)?;
            Account::try_from(record)
        })
    }

    fn soft_delete(&self, id: AccountId, now: Timestamp) -> RepositoryFuture<()> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE accounts SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(id.0)
            .bind(now)
            .execute(&pool)
            .await
            .map_err(map_sqlx_err)?;
            ensure_affected(result.rows_affected())
        })
    }

    fn update_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        now: Timestamp,
    ) -> RepositoryFuture<()> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE accounts SET status = $2, updated_at = $3 WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(id.0)
            .bind(status.as_str())
            .bind(now)
            .execute(&pool)
            .await
            .map_err(map_sqlx_err)?;
            ensure_affected(result.rows_affected())
        })
    }

    fn update_password(
        &self,
        id: AccountId,
        password_hash: PasswordHash,
        now: Timestamp,
    ) -> RepositoryFuture<()> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE accounts SET password_hash = $2, updated_at = $3 WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(id.0)
            .bind(password_hash.as_str())
            .bind(now)
            .execute(&pool)
            .await
            .map_err(map_sqlx_err)?;
            ensure_affected(result.rows_affected())
        })
    }

    fn search(&self, criteria: SearchCriteria) -> RepositoryFuture<Page<Account>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM accounts");
            push_search_filters(&mut count, &criteria);
            let total: i64 = count
                .build_query_scalar()
                .fetch_one(&pool)
                .await
                .map_err(map_sqlx_err)?;

            let mut select =
                QueryBuilder::<Postgres>::new(format!("SELECT {ACCOUNT_COLUMNS} FROM accounts"));
            push_search_filters(&mut select, &criteria);
            // 排序列来自白名单，直接拼接
            select.push(format!(
                " ORDER BY {} {}, id {}",
                criteria.sort_by.column(),
                criteria.sort_order.keyword(),
                criteria.sort_order.keyword()
            ));
            select
                .push(" LIMIT ")
                .push_bind(i64::from(criteria.page_size))
                .push(" OFFSET ")
                .push_bind(i64::try_from(criteria.offset()).unwrap_or(i64::MAX));

            let records = select
                .build_query_as::<AccountRecord>()
                .fetch_all(&pool)
                .await
                .map_err(map_sqlx_err)?;

            Ok(Page {
                items: into_accounts(records)?,
                total: u64::try_from(total).unwrap_or(0),
            })
        })
    }
}

#[derive(Clone)]
pub struct PgTokenRepository {
    pool: PgPool,
}

impl PgTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl TokenRepository for PgTokenRepository {
    fn store(
        &self,
        kind: OneTimeKind,
        email: Email,
        token: String,
        expires_at: Timestamp,
        now: Timestamp,
    ) -> RepositoryFuture<()> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let sql = format!(
                r#"
                INSERT INTO {table} (email, token, expires_at, used_at, created_at, updated_at)
                VALUES ($1, $2, $3, NULL, $4, $4)
                ON CONFLICT (email) DO UPDATE
                SET token = EXCLUDED.token,
                    expires_at = EXCLUDED.expires_at,
                    used_at = NULL,
                    updated_at = EXCLUDED.updated_at
                "#,
                table = token_table(kind)
            );
            sqlx::query(&sql)
                .bind(email.as_str())
                .bind(&token)
                .bind(expires_at)
                .bind(now)
                .execute(&pool)
                .await
                .map_err(map_sqlx_err)?;
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
        let pool = self.pool.clone();
        Box::pin(async move {
            let table = token_table(kind);
            let mut tx = pool.begin().await.map_err(map_sqlx_err)?;

            let sql = format!("SELECT {TOKEN_COLUMNS} FROM {table} WHERE token = $1 FOR UPDATE");
            let record = sqlx::query_as::<_, TokenRow>(&sql)
                .bind(&token)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_err)?
                .ok_or(RepositoryError::TokenNotFound)?
                .into_record(kind)?;

            if record.used_at.is_some() {
                return Err(RepositoryError::TokenAlreadyUsed);
            }
            if now >= record.expires_at {
                return Err(RepositoryError::TokenExpired);
            }

            // 账户变更失败时事务回滚，令牌保持未使用
            let affected = match effect {
                ConsumeEffect::UpdatePassword(hash) => sqlx::query(
                    "UPDATE accounts SET password_hash = $2, updated_at = $3 \
                     WHERE LOWER(email) = $1 AND deleted_at IS NULL",
                )
                .bind(record.email.as_str())
                .bind(hash.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await,
                ConsumeEffect::MarkEmailVerified => sqlx::query(
                    "UPDATE accounts SET email_verified = TRUE, updated_at = $2 \
                     WHERE LOWER(email) = $1 AND deleted_at IS NULL",
                )
                .bind(record.email.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await,
            }
            .map_err(map_sqlx_err)?;
            ensure_affected(affected.rows_affected())?;

            let sql = format!("UPDATE {table} SET used_at = $2, updated_at = $2 WHERE token = $1");
            sqlx::query(&sql)
                .bind(&token)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;

            tx.commit().await.map_err(map_sqlx_err)?;
            Ok(record.email)
        })
    }

    fn find_latest(&self, kind: OneTimeKind, email: Email) -> RepositoryFuture<Option<TokenRecord>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let sql = format!(
                "SELECT {TOKEN_COLUMNS} FROM {table} WHERE email = $1",
                table = token_table(kind)
            );
            let row = sqlx::query_as::<_, TokenRow>(&sql)
                .bind(email.as_str())
                .fetch_optional(&pool)
                .await
                .map_err(map_sqlx_err)?;
            row.map(|row| row.into_record(kind)).transpose()
        })
    }

    fn mark_email_verified(&self, email: Email, now: Timestamp) -> RepositoryFuture<()> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE accounts SET email_verified = TRUE, updated_at = $2 \
                 WHERE LOWER(email) = $1 AND deleted_at IS NULL",
            )
            .bind(email.as_str())
            .bind(now)
            .execute(&pool)
            .await
            .map_err(map_sqlx_err)?;
            ensure_affected(result.rows_affected())
        })
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("ada"), "%ada%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }

    #[test]
    fn test_pool_errors_are_unavailable() {
        assert!(map_sqlx_err(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(map_sqlx_err(sqlx::Error::PoolClosed).is_retryable());
        assert_eq!(map_sqlx_err(sqlx::Error::RowNotFound), RepositoryError::NotFound);
        assert!(!map_sqlx_err(sqlx::Error::Protocol("bad".into())).is_retryable());
    }
}
