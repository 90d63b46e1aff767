#![allow(dead_code)]

use std::sync::Arc;

use application::{
    AccountService, AccountServiceDependencies, Clock, CredentialService,
    CredentialServiceDependencies, Dispatcher, EmailDispatcher, Hub, InMemoryStore,
    LoginAttemptLimiter, PasswordHasher, SystemClock, TokenDenylist, TokenMaker,
};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use config::{AppConfig, ConfigHandle};
use domain::{Account, AccountRepository, AccountStatus, Email, NewAccount};
use infrastructure::{BcryptPasswordHasher, JwtTokenMaker, LogEmailSender};
use serde_json::Value;
use tower::ServiceExt;
use web_api::{router, AppState};

pub const PASSWORD: &str = "Passw0rd!";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: InMemoryStore,
    pub hasher: Arc<BcryptPasswordHasher>,
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.password.bcrypt_cost = 4;
    config
}

pub async fn build_app() -> TestApp {
    build_app_with(test_config()).await
}

/// 内存存储 + 真实的 bcrypt / JWT 实现
pub async fn build_app_with(config: AppConfig) -> TestApp {
    let config = ConfigHandle::new(config);
    let store = InMemoryStore::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let hasher = Arc::new(BcryptPasswordHasher::new(config.clone()));
    let token_maker: Arc<dyn TokenMaker> =
        Arc::new(JwtTokenMaker::new(config.clone(), clock.clone()));
    let email = EmailDispatcher::spawn(Arc::new(LogEmailSender), 16);

    let credential_service = CredentialService::new(CredentialServiceDependencies {
        account_repository: Arc::new(store.clone()),
        token_repository: Arc::new(store.clone()),
        password_hasher: hasher.clone(),
        token_maker: token_maker.clone(),
        email: email.clone(),
        denylist: Arc::new(TokenDenylist::new()),
        login_limiter: Arc::new(LoginAttemptLimiter::new()),
        clock: clock.clone(),
        config: config.clone(),
    });
    let account_service = AccountService::new(AccountServiceDependencies {
        account_repository: Arc::new(store.clone()),
        password_hasher: hasher.clone(),
        email,
        clock,
        config: config.clone(),
    });

    let (hub, _hub_task) = Hub::spawn();
    let dispatcher = Arc::new(Dispatcher::with_default_routes(hub.clone()));

    let state = AppState::new(
        Arc::new(credential_service),
        Arc::new(account_service),
        token_maker,
        hub,
        dispatcher,
        config,
    );

    TestApp {
        router: router(state.clone()),
        state,
        store,
        hasher,
    }
}

impl TestApp {
    /// 直接写入一个账户，密码为 [`PASSWORD`]
    pub async fn seed(&self, email: &str, role: &str, branch_id: Option<i64>) -> Account {
        let hash = self.hasher.hash(PASSWORD).await.expect("hash");
        self.store
            .create(NewAccount::registration(
                format!("Seed {email}"),
                Email::parse(email).expect("email"),
                hash,
                branch_id,
                role.to_string(),
                AccountStatus::Active,
                chrono::Utc::now(),
            ))
            .await
            .expect("seed account")
    }

    /// 不经过登录接口直接签发访问令牌
    pub fn access_token(&self, account: &Account) -> String {
        self.state
            .token_maker
            .create_access(account)
            .expect("access token")
            .token
    }

    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = self.router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.call(
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(serde_json::json!({ "email": email, "password": password })),
        )
        .await
    }
}
