use std::sync::Arc;

use tokio::sync::OnceCell;

use config::{AppConfig, ConfigHandle};
use domain::{
    Account, AccountRepository, AccountStatus, Email, NewAccount, OneTimeKind, PasswordHash,
    TokenKind, TokenRepository,
};

use crate::{
    clock::Clock,
    denylist::TokenDenylist,
    dto::{AccountSummary, AuthResult, TokenPair, TokenValidation},
    email::{EmailDispatcher, EmailMessage},
    error::ApplicationError,
    password::PasswordHasher,
    rate_limiter::{LoginAttemptLimiter, RateLimitError},
    token::{TokenClaims, TokenError, TokenMaker},
};

use super::password_policy;

/// 邮箱不存在时用来校验的占位明文
const DUMMY_PASSWORD: &str = "dummy-Passw0rd!";

#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub branch_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub struct CredentialServiceDependencies {
    pub account_repository: Arc<dyn AccountRepository>,
    pub token_repository: Arc<dyn TokenRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub token_maker: Arc<dyn TokenMaker>,
    pub email: EmailDispatcher,
    pub denylist: Arc<TokenDenylist>,
    pub login_limiter: Arc<LoginAttemptLimiter>,
    pub clock: Arc<dyn Clock>,
    pub config: ConfigHandle,
}

/// 注册、登录、令牌与密码生命周期
pub struct CredentialService {
    deps: Arc<CredentialServiceDependencies>,
    dummy_hash: OnceCell<PasswordHash>,
}

impl CredentialService {
    pub fn new(deps: CredentialServiceDependencies) -> Self {
        Self {
            deps: Arc::new(deps),
            dummy_hash: OnceCell::new(),
        }
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<AccountSummary, ApplicationError> {
        self.register_inner(request)
            .await
            .map_err(|err| err.context("register"))
    }

    async fn register_inner(&self, request: RegisterRequest) -> Result<AccountSummary, ApplicationError> {
        let config = self.deps.config.current();
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(ApplicationError::validation("name", "cannot be empty"));
        }
        let email = Email::parse(request.email)?;
        password_policy(&config).check(&request.password)?;

        if self
            .deps
            .account_repository
            .exists_by_email(email.clone())
            .await?
        {
            return Err(ApplicationError::EmailAlreadyRegistered);
        }

        let password_hash = self.deps.password_hasher.hash(&request.password).await?;
        let status = if config.email.require_verification {
            AccountStatus::Pending
        } else {
            AccountStatus::Active
        };
        let account = NewAccount::registration(
            name,
            email,
            password_hash,
            request.branch_id,
            config.accounts.default_role.clone(),
            status,
            self.deps.clock.now(),
        );

        let stored = match self.deps.account_repository.register(account).await {
            Ok(stored) => stored,
            // 并发注册时由存储层唯一约束兜底
            Err(domain::RepositoryError::DuplicateEmail) => {
                return Err(ApplicationError::EmailAlreadyRegistered)
            }
            Err(err) => return Err(err.into()),
        };
        tracing::info!(account_id = %stored.id, "account registered");

        let deps = Arc::clone(&self.deps);
        let email = stored.email.clone();
        tokio::spawn(async move {
            if let Err(err) = issue_verification(&deps, &email).await {
                tracing::warn!(error = %err, "failed to issue verification token after registration");
            }
        });

        Ok(AccountSummary::from(&stored))
    }

    pub async fn login(&self, request: LoginRequest) -> Result<AuthResult, ApplicationError> {
        self.login_inner(request)
            .await
            .map_err(|err| err.context("login"))
    }

    async fn login_inner(&self, request: LoginRequest) -> Result<AuthResult, ApplicationError> {
        let config = self.deps.config.current();
        let email = Email::parse(request.email).map_err(|_| ApplicationError::InvalidCredentials)?;
        let now = self.deps.clock.now();

        self.deps
            .login_limiter
            .check(email.as_str(), now)
            .map_err(|RateLimitError::Locked { retry_after_secs }| {
                ApplicationError::RateLimited { retry_after_secs }
            })?;

        let account = match self
            .deps
            .account_repository
            .find_by_email(email.clone())
            .await?
        {
            Some(account) => account,
            None => {
                tracing::debug!("login rejected: email not found");
                self.verify_against_dummy(&request.password).await;
                self.record_login_failure(&config, &email);
                return Err(ApplicationError::InvalidCredentials);
            }
        };

        let matches = self
            .deps
            .password_hasher
            .verify(&request.password, &account.password_hash)
            .await?;
        if !matches {
            tracing::debug!(account_id = %account.id, "login rejected: password mismatch");
            self.record_login_failure(&config, &email);
            return Err(ApplicationError::InvalidCredentials);
        }

        if !account.status.can_sign_in() {
            tracing::warn!(account_id = %account.id, status = %account.status, "login rejected: account disabled");
            return Err(ApplicationError::forbidden(format!(
                "account is {}",
                account.status
            )));
        }
        if config.email.require_verification && !account.email_verified {
            return Err(ApplicationError::EmailNotVerified);
        }

        self.deps.login_limiter.reset(email.as_str());
        let tokens = self.issue_pair(&account)?;
        tracing::info!(account_id = %account.id, "login succeeded");

        Ok(AuthResult {
            tokens,
            account: AccountSummary::from(&account),
        })
    }

    /// 未知邮箱也付出一次完整的哈希校验开销，响应时间不暴露账户是否存在
    async fn verify_against_dummy(&self, password: &str) {
        let hasher = &self.deps.password_hasher;
        let dummy = self
            .dummy_hash
            .get_or_try_init(|| async { hasher.hash(DUMMY_PASSWORD).await })
            .await;
        match dummy {
            Ok(hashed) => {
                let _ = hasher.verify(password, hashed).await;
            }
            Err(err) => tracing::debug!(error = %err, "dummy hash unavailable"),
        }
    }

    fn record_login_failure(&self, config: &AppConfig, email: &Email) {
        let locked = self.deps.login_limiter.record_failure(
            email.as_str(),
            self.deps.clock.now(),
            config.security.max_login_attempts,
            config.security.lockout_window(),
        );
        if locked {
            tracing::warn!("login locked after repeated failures");
        }
    }

    /// 登出只做审计；开启黑名单时令牌在自然过期前不可再用
    pub async fn logout(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), ApplicationError> {
        let config = self.deps.config.current();
        let now = self.deps.clock.now();
        match self.deps.token_maker.verify(access_token, TokenKind::Access) {
            Ok(claims) => {
                if config.jwt.denylist_enabled {
                    self.deps.denylist.deny(&claims, now);
                }
                tracing::info!(subject = %claims.sub, "logged out");
            }
            Err(err) => tracing::debug!(error = %err, "logout with unverifiable access token"),
        }

        if let Some(refresh_token) = refresh_token {
            if config.jwt.denylist_enabled {
                if let Ok(claims) = self.deps.token_maker.verify(refresh_token, TokenKind::Refresh) {
                    self.deps.denylist.deny(&claims, now);
                }
            }
        }
        Ok(())
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthResult, ApplicationError> {
        self.refresh_inner(refresh_token)
            .await
            .map_err(|err| err.context("refresh_token"))
    }

    async fn refresh_inner(&self, refresh_token: &str) -> Result<AuthResult, ApplicationError> {
        let config = self.deps.config.current();
        let claims = self
            .deps
            .token_maker
            .verify(refresh_token, TokenKind::Refresh)
            .map_err(|err| ApplicationError::invalid_token(err.to_string()))?;
        let now = self.deps.clock.now();
        // 单次使用时先占位再查库，并发的重放在这里就失败
        let admitted = if config.jwt.refresh_single_use {
            self.deps.denylist.deny(&claims, now)
        } else {
            !self.deps.denylist.is_denied(&claims, now)
        };
        if !admitted {
            return Err(ApplicationError::invalid_token("token revoked"));
        }

        let account = self.account_for(&claims).await?;
        if !account.status.can_sign_in() {
            return Err(ApplicationError::forbidden(format!(
                "account is {}",
                account.status
            )));
        }

        let tokens = self.issue_pair(&account)?;
        Ok(AuthResult {
            tokens,
            account: AccountSummary::from(&account),
        })
    }

    /// 校验访问令牌，永远不返回错误
    pub async fn validate(&self, access_token: &str) -> TokenValidation {
        let claims = match self.deps.token_maker.verify(access_token, TokenKind::Access) {
            Ok(claims) => claims,
            Err(err) => return TokenValidation::invalid(err.to_string()),
        };
        if self.deps.denylist.is_denied(&claims, self.deps.clock.now()) {
            return TokenValidation::invalid("token revoked");
        }
        TokenValidation {
            valid: true,
            user_id: claims.user_id,
            expires_at: Some(claims.expires_at()),
            reason: None,
        }
    }

    /// 校验访问令牌并返回声明，供传输层鉴权使用
    pub fn authenticate(&self, access_token: &str) -> Result<TokenClaims, ApplicationError> {
        let claims = self
            .deps
            .token_maker
            .verify(access_token, TokenKind::Access)?;
        if self.deps.denylist.is_denied(&claims, self.deps.clock.now()) {
            return Err(ApplicationError::invalid_token("token revoked"));
        }
        Ok(claims)
    }

    pub async fn change_password(
        &self,
        account_id: domain::AccountId,
        request: ChangePasswordRequest,
    ) -> Result<(), ApplicationError> {
        self.change_password_inner(account_id, request)
            .await
            .map_err(|err| err.context("change_password"))
    }

    async fn change_password_inner(
        &self,
        account_id: domain::AccountId,
        request: ChangePasswordRequest,
    ) -> Result<(), ApplicationError> {
        let config = self.deps.config.current();
        let account = self
            .deps
            .account_repository
            .find_by_id(account_id)
            .await?
            .ok_or(ApplicationError::UserNotFound)?;

        let matches = self
            .deps
            .password_hasher
            .verify(&request.current_password, &account.password_hash)
            .await?;
        if !matches {
            return Err(ApplicationError::PasswordMismatch);
        }
        password_policy(&config).check(&request.new_password)?;

        let password_hash = self.deps.password_hasher.hash(&request.new_password).await?;
        self.deps
            .account_repository
            .update_password(account.id, password_hash, self.deps.clock.now())
            .await?;
        tracing::info!(account_id = %account.id, "password changed");

        self.deps
            .email
            .submit(EmailMessage::password_changed(account.email.as_str()));
        Ok(())
    }

    /// 无论邮箱是否存在都返回成功
    pub async fn forgot_password(&self, email: &str) -> Result<(), ApplicationError> {
        self.forgot_password_inner(email)
            .await
            .map_err(|err| err.context("forgot_password"))
    }

    async fn forgot_password_inner(&self, email: &str) -> Result<(), ApplicationError> {
        let Ok(email) = Email::parse(email) else {
            return Ok(());
        };
        let Some(account) = self
            .deps
            .account_repository
            .find_by_email(email.clone())
            .await?
        else {
            tracing::debug!("password reset requested for unknown email");
            return Ok(());
        };

        let issued = self.deps.token_maker.create_reset(&account.email)?;
        self.deps
            .token_repository
            .store_reset(
                account.email.clone(),
                issued.token.clone(),
                issued.expires_at(),
                self.deps.clock.now(),
            )
            .await?;

        let config = self.deps.config.current();
        self.deps.email.submit(EmailMessage::password_reset(
            account.email.as_str(),
            &config.email.app_base_url,
            &issued.token,
        ));
        tracing::info!(account_id = %account.id, "password reset token issued");
        Ok(())
    }

    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<(), ApplicationError> {
        self.reset_password_inner(token, new_password)
            .await
            .map_err(|err| err.context("reset_password"))
    }

    async fn reset_password_inner(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<(), ApplicationError> {
        let config = self.deps.config.current();
        self.verify_one_time(token, TokenKind::Reset)?;
        password_policy(&config).check(new_password)?;

        let password_hash = self.deps.password_hasher.hash(new_password).await?;
        let email = self
            .deps
            .token_repository
            .consume_reset(token.to_string(), self.deps.clock.now(), password_hash)
            .await
            .map_err(one_time_error)?;

        self.deps.login_limiter.reset(email.as_str());
        tracing::info!("password reset completed");
        Ok(())
    }

    pub async fn verify_email(&self, token: &str) -> Result<(), ApplicationError> {
        self.verify_email_inner(token)
            .await
            .map_err(|err| err.context("verify_email"))
    }

    async fn verify_email_inner(&self, token: &str) -> Result<(), ApplicationError> {
        self.verify_one_time(token, TokenKind::Verification)?;
        self.deps
            .token_repository
            .consume_verification(token.to_string(), self.deps.clock.now())
            .await
            .map_err(one_time_error)?;
        tracing::info!("email verified");
        Ok(())
    }

    /// 无论邮箱是否存在都返回成功
    pub async fn resend_verification(&self, email: &str) -> Result<(), ApplicationError> {
        self.resend_verification_inner(email)
            .await
            .map_err(|err| err.context("resend_verification"))
    }

    async fn resend_verification_inner(&self, email: &str) -> Result<(), ApplicationError> {
        let Ok(email) = Email::parse(email) else {
            return Ok(());
        };
        match self
            .deps
            .account_repository
            .find_by_email(email.clone())
            .await?
        {
            Some(account) if account.email_verified => {
                tracing::debug!(account_id = %account.id, "verification resend skipped: already verified");
                Ok(())
            }
            Some(account) => issue_verification(&self.deps, &account.email).await,
            None => Ok(()),
        }
    }

    fn issue_pair(&self, account: &Account) -> Result<TokenPair, ApplicationError> {
        let access = self.deps.token_maker.create_access(account)?;
        let refresh = self.deps.token_maker.create_refresh(account)?;
        Ok(TokenPair {
            access_expires_at: access.expires_at(),
            access_token: access.token,
            refresh_expires_at: refresh.expires_at(),
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
        })
    }

    async fn account_for(&self, claims: &TokenClaims) -> Result<Account, ApplicationError> {
        let id = claims
            .user_id
            .or_else(|| claims.sub.parse().ok())
            .ok_or_else(|| ApplicationError::invalid_token("missing subject"))?;
        self.deps
            .account_repository
            .find_by_id(domain::AccountId(id))
            .await?
            .ok_or_else(|| ApplicationError::invalid_token("account no longer exists"))
    }

    /// 一次性令牌先校验签名与种类，过期单独报告
    fn verify_one_time(&self, token: &str, kind: TokenKind) -> Result<TokenClaims, ApplicationError> {
        match self.deps.token_maker.verify(token, kind) {
            Ok(claims) => Ok(claims),
            Err(TokenError::Expired) => Err(ApplicationError::TokenExpired),
            Err(err) => Err(ApplicationError::invalid_token(err.to_string())),
        }
    }
}

/// 签发验证令牌、落库并投递邮件
async fn issue_verification(
    deps: &CredentialServiceDependencies,
    email: &Email,
) -> Result<(), ApplicationError> {
    let issued = deps.token_maker.create_verification(email)?;
    deps.token_repository
        .store(
            OneTimeKind::Verification,
            email.clone(),
            issued.token.clone(),
            issued.expires_at(),
            deps.clock.now(),
        )
        .await?;

    let config = deps.config.current();
    if config.email.verification_enabled {
        deps.email.submit(EmailMessage::verification(
            email.as_str(),
            &config.email.app_base_url,
            &issued.token,
        ));
    }
    Ok(())
}

fn one_time_error(err: domain::RepositoryError) -> ApplicationError {
    match err {
        domain::RepositoryError::NotFound => ApplicationError::invalid_token("account no longer exists"),
        other => other.into(),
    }
}
