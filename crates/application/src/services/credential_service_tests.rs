//! 凭证服务单元测试
//!
//! 覆盖注册、登录、刷新、登出、改密、找回密码与邮箱验证流程。

use std::sync::atomic::Ordering;

use chrono::Duration;
use config::AppConfig;
use domain::{AccountId, AccountRepository, AccountStatus, Email, OneTimeKind, TokenRepository};

use super::test_support::Harness;
use crate::clock::Clock;
use super::{ChangePasswordRequest, LoginRequest, RegisterRequest};
use crate::email::EmailKind;
use crate::error::{ApplicationError, ErrorKind};

fn register_ada() -> RegisterRequest {
    RegisterRequest {
        name: "Ada".into(),
        email: "ada@example.com".into(),
        password: "Passw0rd!".into(),
        branch_id: Some(1),
    }
}

fn login(email: &str, password: &str) -> LoginRequest {
    LoginRequest {
        email: email.into(),
        password: password.into(),
    }
}

#[tokio::test]
async fn test_register_then_login() {
    let h = Harness::new();
    let account = h.credentials.register(register_ada()).await.unwrap();
    assert!(account.id > 0);
    assert_eq!(account.role, "user");
    assert_eq!(account.status, AccountStatus::Active);

    let record = h.wait_for_token(OneTimeKind::Verification, "ada@example.com").await;
    assert!(record.used_at.is_none());

    let auth = h
        .credentials
        .login(login("ada@example.com", "Passw0rd!"))
        .await
        .unwrap();
    assert_eq!(auth.account.id, account.id);

    let validation = h.credentials.validate(&auth.tokens.access_token).await;
    assert!(validation.valid);
    assert_eq!(validation.user_id, Some(account.id));
}

#[tokio::test]
async fn test_duplicate_email_rejected() {
    let h = Harness::new();
    h.credentials.register(register_ada()).await.unwrap();

    let mut again = register_ada();
    again.email = "ADA@example.com".into();
    let err = h.credentials.register(again).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmailAlreadyRegistered);
    assert_eq!(err.operation(), Some("register"));
    assert_eq!(h.store.find_all_live().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_register_rejects_weak_password() {
    let h = Harness::new();
    let mut request = register_ada();
    request.password = "weak".into();
    match h.credentials.register(request).await.unwrap_err().root() {
        ApplicationError::WeakPassword { unmet } => assert!(unmet.len() >= 3),
        other => panic!("Expected WeakPassword, got {:?}", other),
    }
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let h = Harness::new();
    h.credentials.register(register_ada()).await.unwrap();

    let unknown = h
        .credentials
        .login(login("nobody@example.com", "Passw0rd!"))
        .await
        .unwrap_err();
    let mismatch = h
        .credentials
        .login(login("ada@example.com", "Wrong0rd!"))
        .await
        .unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::InvalidCredentials);
    assert_eq!(mismatch.kind(), ErrorKind::InvalidCredentials);
    assert_eq!(unknown.to_string(), mismatch.to_string());
}

#[tokio::test]
async fn test_unknown_email_still_runs_password_check() {
    let h = Harness::new();
    assert_eq!(h.hasher.verifies.load(Ordering::SeqCst), 0);

    for n in 1..=2 {
        let err = h
            .credentials
            .login(login("nobody@example.com", "Passw0rd!"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
        assert_eq!(h.hasher.verifies.load(Ordering::SeqCst), n);
    }
}

#[tokio::test]
async fn test_register_rejects_password_past_bcrypt_byte_limit() {
    let h = Harness::new();
    let mut request = register_ada();
    request.password = format!("{}X1!aA", "Aa1!".repeat(18));
    assert_eq!(request.password.len(), 77);

    match h.credentials.register(request).await.unwrap_err() {
        ApplicationError::WeakPassword { unmet } => {
            assert!(unmet.iter().any(|r| r == "at most 72 bytes"));
        }
        other => panic!("Expected WeakPassword, got {:?}", other),
    }
}

#[tokio::test]
async fn test_login_lockout_after_repeated_failures() {
    let mut config = AppConfig::default();
    config.security.max_login_attempts = 3;
    let h = Harness::with_config(config);
    h.seed("ada@example.com", "Passw0rd!", "user", None).await;

    for _ in 0..3 {
        let err = h
            .credentials
            .login(login("ada@example.com", "nope"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
    }
    let locked = h
        .credentials
        .login(login("ada@example.com", "Passw0rd!"))
        .await
        .unwrap_err();
    assert_eq!(locked.kind(), ErrorKind::RateLimited);

    h.clock.advance(Duration::minutes(16));
    assert!(h
        .credentials
        .login(login("ada@example.com", "Passw0rd!"))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_suspended_account_cannot_login() {
    let h = Harness::new();
    let account = h.seed("ada@example.com", "Passw0rd!", "user", None).await;
    h.store
        .update_status(account.id, AccountStatus::Suspended, h.clock.now())
        .await
        .unwrap();

    let err = h
        .credentials
        .login(login("ada@example.com", "Passw0rd!"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn test_require_verification_blocks_unverified_login() {
    let mut config = AppConfig::default();
    config.email.verification_enabled = true;
    config.email.require_verification = true;
    let h = Harness::with_config(config);

    let account = h.credentials.register(register_ada()).await.unwrap();
    assert_eq!(account.status, AccountStatus::Pending);
    let err = h
        .credentials
        .login(login("ada@example.com", "Passw0rd!"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EmailNotVerified);

    let record = h.wait_for_token(OneTimeKind::Verification, "ada@example.com").await;
    let sent = h.wait_for_emails(1).await;
    assert_eq!(sent[0].kind, EmailKind::Verification);
    assert!(sent[0].body.contains(&record.token));

    h.credentials.verify_email(&record.token).await.unwrap();
    assert!(h
        .credentials
        .login(login("ada@example.com", "Passw0rd!"))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_access_token_expires_after_lifetime() {
    let h = Harness::new();
    h.seed("ada@example.com", "Passw0rd!", "user", None).await;
    let auth = h
        .credentials
        .login(login("ada@example.com", "Passw0rd!"))
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(14));
    assert!(h.credentials.validate(&auth.tokens.access_token).await.valid);

    h.clock.advance(Duration::minutes(1));
    let validation = h.credentials.validate(&auth.tokens.access_token).await;
    assert!(!validation.valid);
    assert_eq!(validation.reason.as_deref(), Some("token expired"));
}

#[tokio::test]
async fn test_refresh_issues_new_pair_and_is_single_use() {
    let h = Harness::new();
    let account = h.seed("ada@example.com", "Passw0rd!", "user", None).await;
    let auth = h
        .credentials
        .login(login("ada@example.com", "Passw0rd!"))
        .await
        .unwrap();

    h.clock.advance(Duration::seconds(5));
    let refreshed = h.credentials.refresh(&auth.tokens.refresh_token).await.unwrap();
    assert_eq!(refreshed.account.id, account.id.0);
    assert_ne!(refreshed.tokens.access_token, auth.tokens.access_token);

    let replay = h.credentials.refresh(&auth.tokens.refresh_token).await.unwrap_err();
    assert_eq!(replay.kind(), ErrorKind::InvalidToken);

    // 访问令牌不能当作刷新令牌使用
    let wrong_kind = h.credentials.refresh(&auth.tokens.access_token).await.unwrap_err();
    assert_eq!(wrong_kind.kind(), ErrorKind::InvalidToken);
}

#[tokio::test]
async fn test_concurrent_refresh_admits_only_one() {
    let h = Harness::with_slow_account_lookups();
    h.seed("ada@example.com", "Passw0rd!", "user", None).await;
    let auth = h
        .credentials
        .login(login("ada@example.com", "Passw0rd!"))
        .await
        .unwrap();
    let token = auth.tokens.refresh_token;

    // 两次刷新都会在按 id 查询时挂起
    let (first, second) = tokio::join!(h.credentials.refresh(&token), h.credentials.refresh(&token));
    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let rejected = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert_eq!(rejected.kind(), ErrorKind::InvalidToken);
}

#[tokio::test]
async fn test_refresh_reuse_allowed_when_not_single_use() {
    let mut config = AppConfig::default();
    config.jwt.refresh_single_use = false;
    let h = Harness::with_config(config);
    h.seed("ada@example.com", "Passw0rd!", "user", None).await;
    let auth = h
        .credentials
        .login(login("ada@example.com", "Passw0rd!"))
        .await
        .unwrap();

    assert!(h.credentials.refresh(&auth.tokens.refresh_token).await.is_ok());
    assert!(h.credentials.refresh(&auth.tokens.refresh_token).await.is_ok());
}

#[tokio::test]
async fn test_logout_denies_access_token() {
    let h = Harness::new();
    h.seed("ada@example.com", "Passw0rd!", "user", None).await;
    let auth = h
        .credentials
        .login(login("ada@example.com", "Passw0rd!"))
        .await
        .unwrap();

    h.credentials
        .logout(&auth.tokens.access_token, Some(&auth.tokens.refresh_token))
        .await
        .unwrap();

    let validation = h.credentials.validate(&auth.tokens.access_token).await;
    assert!(!validation.valid);
    assert_eq!(validation.reason.as_deref(), Some("token revoked"));
    assert!(h.credentials.refresh(&auth.tokens.refresh_token).await.is_err());

    // 无法解析的令牌也返回成功
    assert!(h.credentials.logout("garbage", None).await.is_ok());
}

#[tokio::test]
async fn test_change_password() {
    let h = Harness::new();
    let account = h.seed("ada@example.com", "Passw0rd!", "user", None).await;

    let mismatch = h
        .credentials
        .change_password(
            account.id,
            ChangePasswordRequest {
                current_password: "wrong".into(),
                new_password: "NewPa$$1A".into(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(mismatch.kind(), ErrorKind::PasswordMismatch);

    h.credentials
        .change_password(
            account.id,
            ChangePasswordRequest {
                current_password: "Passw0rd!".into(),
                new_password: "NewPa$$1A".into(),
            },
        )
        .await
        .unwrap();

    assert!(h.credentials.login(login("ada@example.com", "NewPa$$1A")).await.is_ok());
    let sent = h.wait_for_emails(1).await;
    assert_eq!(sent[0].kind, EmailKind::PasswordChanged);

    let missing = h
        .credentials
        .change_password(
            AccountId(999),
            ChangePasswordRequest {
                current_password: "x".into(),
                new_password: "NewPa$$1A".into(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::UserNotFound);
}

#[tokio::test]
async fn test_forgot_then_reset_round_trip() {
    let h = Harness::new();
    h.seed("ada@example.com", "Passw0rd!", "user", None).await;

    h.credentials.forgot_password("ada@example.com").await.unwrap();
    let token = h
        .store
        .find_latest(OneTimeKind::Reset, Email::parse("ada@example.com").unwrap())
        .await
        .unwrap()
        .expect("reset token stored")
        .token;

    h.credentials.reset_password(&token, "NewPa$$1A").await.unwrap();

    let replay = h.credentials.reset_password(&token, "Other1!A").await.unwrap_err();
    assert_eq!(replay.kind(), ErrorKind::InvalidToken);

    let old = h
        .credentials
        .login(login("ada@example.com", "Passw0rd!"))
        .await
        .unwrap_err();
    assert_eq!(old.kind(), ErrorKind::InvalidCredentials);
    assert!(h.credentials.login(login("ada@example.com", "NewPa$$1A")).await.is_ok());
}

#[tokio::test]
async fn test_forgot_password_is_uniform_for_unknown_email() {
    let h = Harness::new();
    assert!(h.credentials.forgot_password("nobody@example.com").await.is_ok());
    assert!(h.credentials.forgot_password("not-an-email").await.is_ok());
    assert!(h.credentials.resend_verification("nobody@example.com").await.is_ok());
    assert!(h
        .store
        .find_latest(OneTimeKind::Reset, Email::parse("nobody@example.com").unwrap())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_reset_rejects_expired_token() {
    let h = Harness::new();
    h.seed("ada@example.com", "Passw0rd!", "user", None).await;
    h.credentials.forgot_password("ada@example.com").await.unwrap();
    let token = h
        .store
        .find_latest(OneTimeKind::Reset, Email::parse("ada@example.com").unwrap())
        .await
        .unwrap()
        .unwrap()
        .token;

    h.clock.advance(Duration::minutes(61));
    let err = h.credentials.reset_password(&token, "NewPa$$1A").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TokenExpired);
}

#[tokio::test]
async fn test_expired_verification_leaves_flag_unset() {
    let h = Harness::new();
    let account = h.seed("ada@example.com", "Passw0rd!", "user", None).await;

    h.credentials.resend_verification("ada@example.com").await.unwrap();
    let token = h
        .store
        .find_latest(OneTimeKind::Verification, account.email.clone())
        .await
        .unwrap()
        .unwrap()
        .token;

    h.clock.advance(Duration::hours(24) + Duration::seconds(1));
    let err = h.credentials.verify_email(&token).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TokenExpired);

    let stored = h.store.find_by_id(account.id).await.unwrap().unwrap();
    assert!(!stored.email_verified);
}

#[tokio::test]
async fn test_verification_token_cannot_reset_password() {
    let h = Harness::new();
    let account = h.seed("ada@example.com", "Passw0rd!", "user", None).await;
    h.credentials.resend_verification("ada@example.com").await.unwrap();
    let token = h
        .store
        .find_latest(OneTimeKind::Verification, account.email.clone())
        .await
        .unwrap()
        .unwrap()
        .token;

    let err = h.credentials.reset_password(&token, "NewPa$$1A").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidToken);
}
