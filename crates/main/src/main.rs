//! 主应用程序入口
//!
//! 加载配置、装配账户服务与实时推送中心，启动 Axum Web API 服务。

use std::{env, net::SocketAddr, sync::Arc};

use application::{
    AccountService, AccountServiceDependencies, Clock, CredentialService,
    CredentialServiceDependencies, Dispatcher, EmailDispatcher, Hub, LoginAttemptLimiter,
    SystemClock, TokenDenylist, TokenMaker,
};
use config::{watch_config_file, AppConfig, ConfigHandle, CONFIG_FILE_ENV};
use infrastructure::{BcryptPasswordHasher, Infrastructure, JwtTokenMaker};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config);
    tracing::info!(config = %config.sanitize(), "config loaded");

    let config = ConfigHandle::new(config);
    config.on_change(|cfg| {
        tracing::info!(environment = ?cfg.environment, "config switched");
    });

    // 文件监听器被丢弃时停止监听，需要保持到进程结束
    let _watcher = match env::var(CONFIG_FILE_ENV) {
        Ok(path) => match watch_config_file(&path, config.clone()) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                tracing::warn!(error = %err, path = %path, "failed to start config file watcher");
                None
            }
        },
        Err(_) => None,
    };

    let current = config.current();
    let infrastructure = Infrastructure::connect(&current).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let password_hasher = Arc::new(BcryptPasswordHasher::new(config.clone()));
    let token_maker: Arc<dyn TokenMaker> =
        Arc::new(JwtTokenMaker::new(config.clone(), clock.clone()));
    let email = EmailDispatcher::spawn(
        infrastructure.email_sender.clone(),
        current.email.queue_capacity,
    );

    let credential_service = CredentialService::new(CredentialServiceDependencies {
        account_repository: infrastructure.accounts.clone(),
        token_repository: infrastructure.tokens.clone(),
        password_hasher: password_hasher.clone(),
        token_maker: token_maker.clone(),
        email: email.clone(),
        denylist: Arc::new(TokenDenylist::new()),
        login_limiter: Arc::new(LoginAttemptLimiter::new()),
        clock: clock.clone(),
        config: config.clone(),
    });

    let account_service = AccountService::new(AccountServiceDependencies {
        account_repository: infrastructure.accounts.clone(),
        password_hasher,
        email,
        clock,
        config: config.clone(),
    });

    let (hub, hub_task) = Hub::spawn();
    let dispatcher = Arc::new(Dispatcher::with_default_routes(hub.clone()));

    let state = AppState::new(
        Arc::new(credential_service),
        Arc::new(account_service),
        token_maker,
        hub,
        dispatcher,
        config.clone(),
    );

    let app = router(state);
    let addr: SocketAddr = format!("{}:{}", current.server.host, current.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("account service listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    hub_task.abort();
    if let Some(pool) = infrastructure.pool {
        pool.close().await;
    }
    tracing::info!("server stopped");
    Ok(())
}

/// RUST_LOG 优先，其次使用配置中的日志级别
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    if config.logging.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!(error = %err, "failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received, draining connections");
}
