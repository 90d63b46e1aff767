//! 服务测试用的替身实现

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use config::{AppConfig, ConfigHandle};
use domain::{
    Account, AccountChanges, AccountId, AccountRepository, AccountStatus, Email, NewAccount,
    OneTimeKind, Page, PasswordHash, RepositoryFuture, SearchCriteria, Timestamp, TokenKind,
    TokenRecord, TokenRepository,
};

use crate::{
    clock::{Clock, ManualClock},
    denylist::TokenDenylist,
    email::{EmailDispatcher, EmailError, EmailMessage, EmailSender},
    memory::InMemoryStore,
    password::{PasswordHasher, PasswordHasherError},
    rate_limiter::LoginAttemptLimiter,
    token::{IssuedToken, RealtimeSubject, TokenClaims, TokenError, TokenMaker},
};

use super::{
    AccountService, AccountServiceDependencies, CredentialService, CredentialServiceDependencies,
};

/// 明文加前缀的“哈希”，只用于测试；记录校验次数
#[derive(Default)]
pub(crate) struct PlainHasher {
    pub verifies: AtomicUsize,
}

#[async_trait]
impl PasswordHasher for PlainHasher {
    async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
        PasswordHash::new(format!("plain:{plaintext}"))
            .map_err(|err| PasswordHasherError::hash_error(err.to_string()))
    }

    async fn verify(
        &self,
        plaintext: &str,
        hashed: &PasswordHash,
    ) -> Result<bool, PasswordHasherError> {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        Ok(hashed.as_str() == format!("plain:{plaintext}"))
    }
}

/// 按 id 查询前先让出执行权，模拟真实存储的 I/O 等待
pub(crate) struct SlowLookupStore {
    inner: InMemoryStore,
}

impl AccountRepository for SlowLookupStore {
    fn create(&self, account: NewAccount) -> RepositoryFuture<Account> {
        self.inner.create(account)
    }

    fn find_by_id(&self, id: AccountId) -> RepositoryFuture<Option<Account>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            tokio::time::sleep(StdDuration::from_millis(20)).await;
            inner.find_by_id(id).await
        })
    }

    fn find_by_email(&self, email: Email) -> RepositoryFuture<Option<Account>> {
        self.inner.find_by_email(email)
    }

    fn find_all_live(&self) -> RepositoryFuture<Vec<Account>> {
        self.inner.find_all_live()
    }

    fn find_by_branch(&self, branch_id: i64) -> RepositoryFuture<Vec<Account>> {
        self.inner.find_by_branch(branch_id)
    }

    fn find_by_role(&self, role: String) -> RepositoryFuture<Vec<Account>> {
        self.inner.find_by_role(role)
    }

    fn find_by_owner(&self, owner_id: i64) -> RepositoryFuture<Vec<Account>> {
        self.inner.find_by_owner(owner_id)
    }

    fn find_by_branch_paged(
        &self,
        branch_id: i64,
        offset: u64,
        limit: u32,
    ) -> RepositoryFuture<Page<Account>> {
        self.inner.find_by_branch_paged(branch_id, offset, limit)
    }

    fn exists_by_email(&self, email: Email) -> RepositoryFuture<bool> {
        self.inner.exists_by_email(email)
    }

    fn update(
        &self,
        id: AccountId,
        changes: AccountChanges,
        now: Timestamp,
    ) -> RepositoryFuture<Account> {
        self.inner.update(id, changes, now)
    }

    fn soft_delete(&self, id: AccountId, now: Timestamp) -> RepositoryFuture<()> {
        self.inner.soft_delete(id, now)
    }

    fn update_status(
        &self,
        id: AccountId,
        status: AccountStatus,
        now: Timestamp,
    ) -> RepositoryFuture<()> {
        self.inner.update_status(id, status, now)
    }

    fn update_password(
        &self,
        id: AccountId,
        password_hash: PasswordHash,
        now: Timestamp,
    ) -> RepositoryFuture<()> {
        self.inner.update_password(id, password_hash, now)
    }

    fn search(&self, criteria: SearchCriteria) -> RepositoryFuture<Page<Account>> {
        self.inner.search(criteria)
    }
}

/// 不签名的令牌：声明直接序列化为 JSON
pub(crate) struct JsonTokenMaker {
    clock: Arc<dyn Clock>,
    config: ConfigHandle,
    serial: AtomicU64,
}

impl JsonTokenMaker {
    fn issue(
        &self,
        kind: TokenKind,
        sub: String,
        email: &str,
        account: Option<&Account>,
        ttl: StdDuration,
    ) -> Result<IssuedToken, TokenError> {
        let now = self.clock.now();
        let ttl = Duration::from_std(ttl).map_err(|err| TokenError::Creation(err.to_string()))?;
        let claims = TokenClaims {
            sub,
            user_id: account.map(|a| a.id.0),
            email: email.to_string(),
            role: account.map(|a| a.role.clone()),
            branch_id: account.and_then(|a| a.branch_id),
            kind,
            iss: "test".into(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: self.serial.fetch_add(1, Ordering::SeqCst).to_string(),
        };
        let token = serde_json::to_string(&claims).map_err(|err| TokenError::Creation(err.to_string()))?;
        Ok(IssuedToken { token, claims })
    }
}

impl TokenMaker for JsonTokenMaker {
    fn create_access(&self, account: &Account) -> Result<IssuedToken, TokenError> {
        let ttl = self.config.current().jwt.access_ttl();
        self.issue(TokenKind::Access, account.id.to_string(), account.email.as_str(), Some(account), ttl)
    }

    fn create_refresh(&self, account: &Account) -> Result<IssuedToken, TokenError> {
        let ttl = self.config.current().jwt.refresh_ttl();
        self.issue(TokenKind::Refresh, account.id.to_string(), account.email.as_str(), Some(account), ttl)
    }

    fn create_reset(&self, email: &Email) -> Result<IssuedToken, TokenError> {
        let ttl = self.config.current().jwt.reset_ttl();
        self.issue(TokenKind::Reset, email.to_string(), email.as_str(), None, ttl)
    }

    fn create_verification(&self, email: &Email) -> Result<IssuedToken, TokenError> {
        let ttl = self.config.current().jwt.verification_ttl();
        self.issue(TokenKind::Verification, email.to_string(), email.as_str(), None, ttl)
    }

    fn create_realtime(
        &self,
        subject: &RealtimeSubject,
        ttl: StdDuration,
    ) -> Result<IssuedToken, TokenError> {
        self.issue(TokenKind::Access, subject.user_id.clone(), subject.email.as_str(), None, ttl)
    }

    fn verify(&self, token: &str, expected: TokenKind) -> Result<TokenClaims, TokenError> {
        let claims: TokenClaims = serde_json::from_str(token).map_err(|_| TokenError::Malformed)?;
        if claims.kind != expected {
            return Err(TokenError::WrongKind {
                expected,
                actual: claims.kind,
            });
        }
        let now = self.clock.now().timestamp();
        if now < claims.nbf {
            return Err(TokenError::NotYetValid);
        }
        if now >= claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

/// 记录所有投递的邮件
#[derive(Default)]
pub(crate) struct RecordingEmailSender {
    pub sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<(), EmailError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

pub(crate) struct Harness {
    pub store: InMemoryStore,
    pub hasher: Arc<PlainHasher>,
    pub clock: Arc<ManualClock>,
    pub config: ConfigHandle,
    pub emails: Arc<RecordingEmailSender>,
    pub credentials: CredentialService,
    pub accounts: AccountService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let store = InMemoryStore::new();
        Self::build(config, store.clone(), Arc::new(store))
    }

    /// 凭证服务的按 id 查询会先挂起一段时间
    pub fn with_slow_account_lookups() -> Self {
        let store = InMemoryStore::new();
        let slow = SlowLookupStore {
            inner: store.clone(),
        };
        Self::build(AppConfig::default(), store, Arc::new(slow))
    }

    fn build(
        config: AppConfig,
        store: InMemoryStore,
        credential_accounts: Arc<dyn AccountRepository>,
    ) -> Self {
        let hasher = Arc::new(PlainHasher::default());
        let clock = Arc::new(ManualClock::default());
        let config = ConfigHandle::new(config);
        let emails = Arc::new(RecordingEmailSender::default());
        let email = EmailDispatcher::spawn(emails.clone(), 16);

        let token_maker = Arc::new(JsonTokenMaker {
            clock: clock.clone(),
            config: config.clone(),
            serial: AtomicU64::new(1),
        });

        let credentials = CredentialService::new(CredentialServiceDependencies {
            account_repository: credential_accounts,
            token_repository: Arc::new(store.clone()),
            password_hasher: hasher.clone(),
            token_maker,
            email: email.clone(),
            denylist: Arc::new(TokenDenylist::new()),
            login_limiter: Arc::new(LoginAttemptLimiter::new()),
            clock: clock.clone(),
            config: config.clone(),
        });
        let accounts = AccountService::new(AccountServiceDependencies {
            account_repository: Arc::new(store.clone()),
            password_hasher: hasher.clone(),
            email,
            clock: clock.clone(),
            config: config.clone(),
        });

        Self {
            store,
            hasher,
            clock,
            config,
            emails,
            credentials,
            accounts,
        }
    }

    /// 直接写入一个账户，绕过服务层校验
    pub async fn seed(
        &self,
        email: &str,
        password: &str,
        role: &str,
        branch_id: Option<i64>,
    ) -> Account {
        self.store
            .create(NewAccount::registration(
                format!("Seed {email}"),
                Email::parse(email).unwrap(),
                PasswordHash::new(format!("plain:{password}")).unwrap(),
                branch_id,
                role.to_string(),
                AccountStatus::Active,
                self.clock.now(),
            ))
            .await
            .unwrap()
    }

    /// 等待后台任务写入令牌
    pub async fn wait_for_token(&self, kind: OneTimeKind, email: &str) -> TokenRecord {
        let email = Email::parse(email).unwrap();
        for _ in 0..200 {
            if let Some(record) = self.store.find_latest(kind, email.clone()).await.unwrap() {
                return record;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        panic!("token for {email} was never stored");
    }

    pub async fn wait_for_emails(&self, count: usize) -> Vec<EmailMessage> {
        for _ in 0..200 {
            let sent = self.emails.sent.lock().unwrap().clone();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        panic!("expected {count} emails");
    }
}
