use std::sync::Arc;
use std::time::Duration;

use application::{EmailSender, InMemoryStore};
use config::AppConfig;
use domain::{AccountRepository, TokenRepository};
use sqlx::PgPool;
use thiserror::Error;

use crate::{
    email::{LogEmailSender, SmtpEmailSender},
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgAccountRepository, PgTokenRepository},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("email transport error: {0}")]
    Email(#[from] application::EmailError),
}

/// 存储与外部通道的具体实现
#[derive(Clone)]
pub struct Infrastructure {
    pub accounts: Arc<dyn AccountRepository>,
    pub tokens: Arc<dyn TokenRepository>,
    pub email_sender: Arc<dyn EmailSender>,
    /// 使用内存存储时为 `None`
    pub pool: Option<PgPool>,
}

impl Infrastructure {
    /// 连接数据库并执行迁移；未配置数据库地址时退回内存存储
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let email_sender = build_email_sender(config)?;

        let url = config
            .database
            .url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty());

        let Some(url) = url else {
            tracing::warn!("database.url not set, using in-memory store (data is not persisted)");
            let store = InMemoryStore::new();
            return Ok(Self {
                accounts: Arc::new(store.clone()),
                tokens: Arc::new(store),
                email_sender,
                pool: None,
            });
        };

        let pool = create_pg_pool(
            url,
            config.database.max_connections,
            Duration::from_secs(config.database.acquire_timeout_secs),
        )
        .await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!(
            max_connections = config.database.max_connections,
            "database pool ready, migrations applied"
        );

        Ok(Self {
            accounts: Arc::new(PgAccountRepository::new(pool.clone())),
            tokens: Arc::new(PgTokenRepository::new(pool.clone())),
            email_sender,
            pool: Some(pool),
        })
    }
}

/// 配置了 SMTP 账号或处于生产环境时外发邮件，其余情况只写日志
fn build_email_sender(config: &AppConfig) -> Result<Arc<dyn EmailSender>, InfrastructureError> {
    if config.email.smtp_user.is_some() || config.is_production() {
        Ok(Arc::new(SmtpEmailSender::new(&config.email)?))
    } else {
        Ok(Arc::new(LogEmailSender))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Email;

    #[tokio::test]
    async fn test_connect_without_database_uses_memory_store() {
        let mut config = AppConfig::default();
        config.database.url = Some("   ".into());

        let infrastructure = Infrastructure::connect(&config).await.unwrap();
        assert!(infrastructure.pool.is_none());

        let email = Email::parse("nobody@example.com").unwrap();
        assert!(!infrastructure.accounts.exists_by_email(email).await.unwrap());
    }
}
