//! 统一配置中心
//!
//! 提供账户服务的全局配置管理，包括：
//! - 服务与数据库连接
//! - JWT 签名与令牌有效期
//! - 密码策略、分页、安全与邮件设置
//! - 实时推送（WebSocket）参数
//!
//! 加载顺序：内置默认值 -> 可选配置文件（`APP_CONFIG_FILE`）-> `APP_` 前缀环境变量。

mod handle;
mod watch;

pub use handle::ConfigHandle;
pub use watch::watch_config_file;

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 配置文件路径的环境变量
pub const CONFIG_FILE_ENV: &str = "APP_CONFIG_FILE";

/// bcrypt 截断点：更长的密码无法被完整校验
const BCRYPT_INPUT_LIMIT: usize = 72;
const DEV_SECRET_MARKERS: [&str; 3] = ["dev-secret", "change-me", "not-for-production"];
const SUPPORTED_ALGORITHMS: [&str; 3] = ["HS256", "HS384", "HS512"];

/// 运行环境
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[serde(default)]
    pub environment: Environment,
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub jwt: JwtConfig,
    #[validate(nested)]
    pub password: PasswordPolicyConfig,
    #[validate(nested)]
    pub accounts: AccountsConfig,
    #[validate(nested)]
    pub pagination: PaginationConfig,
    #[validate(nested)]
    pub security: SecurityConfig,
    #[validate(nested)]
    pub email: EmailConfig,
    #[validate(nested)]
    pub realtime: RealtimeConfig,
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    /// 打开后错误响应会附带内部错误信息
    #[serde(default)]
    pub debug: bool,
    #[validate(range(min = 1, max = 600))]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// 数据库配置
///
/// `url` 为空时使用内存存储（仅限非生产环境）。
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[validate(range(min = 1))]
    pub max_connections: u32,
    #[validate(range(min = 1))]
    pub acquire_timeout_secs: u64,
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JwtConfig {
    pub secret_key: String,
    pub algorithm: String,
    #[validate(length(min = 1))]
    pub issuer: String,
    #[validate(range(min = 1))]
    pub access_token_minutes: u64,
    #[validate(range(min = 1))]
    pub refresh_token_days: u64,
    #[validate(range(min = 1))]
    pub reset_token_minutes: u64,
    #[validate(range(min = 1))]
    pub verification_token_hours: u64,
    /// 刷新令牌使用一次后即加入黑名单
    pub refresh_single_use: bool,
    /// 登出时将令牌加入黑名单
    pub denylist_enabled: bool,
}

impl JwtConfig {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_minutes * 60)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_days * 24 * 3600)
    }

    pub fn reset_ttl(&self) -> Duration {
        Duration::from_secs(self.reset_token_minutes * 60)
    }

    pub fn verification_ttl(&self) -> Duration {
        Duration::from_secs(self.verification_token_hours * 3600)
    }
}

/// 密码策略
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PasswordPolicyConfig {
    #[validate(range(min = 1))]
    pub min_length: usize,
    #[validate(range(min = 1, max = 1024))]
    pub max_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_numbers: bool,
    pub require_special_chars: bool,
    pub special_chars: String,
    #[validate(range(min = 4, max = 31))]
    pub bcrypt_cost: u32,
}

/// 账户取值白名单
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AccountsConfig {
    pub valid_roles: Vec<String>,
    pub valid_statuses: Vec<String>,
    #[validate(length(min = 1))]
    pub default_role: String,
}

impl AccountsConfig {
    pub fn is_valid_role(&self, role: &str) -> bool {
        self.valid_roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }

    pub fn is_valid_status(&self, status: &str) -> bool {
        self.valid_statuses.iter().any(|s| s.eq_ignore_ascii_case(status))
    }
}

/// 分页配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PaginationConfig {
    #[validate(range(min = 1))]
    pub default_size: u32,
    #[validate(range(min = 1))]
    pub max_size: u32,
    #[validate(range(min = 1))]
    pub hard_limit: u32,
}

/// 安全配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SecurityConfig {
    #[validate(range(min = 1))]
    pub max_login_attempts: u32,
    #[validate(range(min = 1))]
    pub account_lockout_minutes: u64,
    #[validate(range(min = 1))]
    pub session_timeout_minutes: u64,
    pub require_https: bool,
}

impl SecurityConfig {
    pub fn lockout_window(&self) -> Duration {
        Duration::from_secs(self.account_lockout_minutes * 60)
    }
}

/// 邮件配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EmailConfig {
    pub verification_enabled: bool,
    pub require_verification: bool,
    #[validate(length(min = 1))]
    pub smtp_host: String,
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_user: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    #[validate(email)]
    pub from_address: String,
    pub from_name: String,
    /// 邮件中链接的前缀
    pub app_base_url: String,
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
}

/// 实时推送配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RealtimeConfig {
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
    #[validate(range(min = 1))]
    pub ping_interval_secs: u64,
    #[validate(range(min = 1))]
    pub pong_wait_secs: u64,
    #[validate(range(min = 1))]
    pub ws_token_hours: u64,
}

impl RealtimeConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` 或 `json`
    pub format: String,
}

impl Default for AppConfig {
    /// 开发环境默认值
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 8080,
                debug: false,
                request_timeout_secs: 30,
                cors_origins: vec!["*".into()],
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                acquire_timeout_secs: 5,
            },
            jwt: JwtConfig {
                secret_key: "dev-secret-key-change-me-before-any-deployment".into(),
                algorithm: "HS256".into(),
                issuer: "account-service".into(),
                access_token_minutes: 15,
                refresh_token_days: 7,
                reset_token_minutes: 60,
                verification_token_hours: 24,
                refresh_single_use: true,
                denylist_enabled: true,
            },
            password: PasswordPolicyConfig {
                min_length: 8,
                max_length: 72,
                require_uppercase: true,
                require_lowercase: true,
                require_numbers: true,
                require_special_chars: true,
                special_chars: "!@#$%^&*()_+-=[]{}|;:,.<>?/".into(),
                bcrypt_cost: 12,
            },
            accounts: AccountsConfig {
                valid_roles: vec!["admin".into(), "manager".into(), "user".into()],
                valid_statuses: vec![
                    "active".into(),
                    "inactive".into(),
                    "suspended".into(),
                    "pending".into(),
                ],
                default_role: "user".into(),
            },
            pagination: PaginationConfig {
                default_size: 10,
                max_size: 100,
                hard_limit: 1000,
            },
            security: SecurityConfig {
                max_login_attempts: 5,
                account_lockout_minutes: 15,
                session_timeout_minutes: 24 * 60,
                require_https: false,
            },
            email: EmailConfig {
                verification_enabled: false,
                require_verification: false,
                smtp_host: "localhost".into(),
                smtp_port: 587,
                smtp_user: None,
                smtp_password: None,
                from_address: "noreply@example.com".into(),
                from_name: "Account Service".into(),
                app_base_url: "http://localhost:8080".into(),
                queue_capacity: 100,
            },
            realtime: RealtimeConfig {
                queue_capacity: 256,
                ping_interval_secs: 54,
                pong_wait_secs: 60,
                ws_token_hours: 24,
            },
            logging: LoggingConfig {
                level: "info".into(),
                format: "pretty".into(),
            },
        }
    }
}

impl AppConfig {
    /// 按 默认值 -> 配置文件 -> 环境变量 的顺序加载并校验
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_FILE_ENV).ok();
        Self::load_from(path.as_deref().map(Path::new))
    }

    /// 从指定文件（可选）加载，环境变量仍然覆盖文件中的值
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            fig = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yml") | Some("yaml") => fig.merge(Yaml::file(path)),
                Some("json") => fig.merge(Json::file(path)),
                _ => fig.merge(Toml::file(path)),
            };
        }
        fig = fig.merge(Env::prefixed("APP_").split("__"));

        let cfg: AppConfig = fig.extract().map_err(|err| ConfigError::Load(Box::new(err)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 字段范围校验 + 跨字段规则
    pub fn validate(&self) -> Result<(), ConfigError> {
        Validate::validate(self)?;

        let mut violations = Vec::new();

        if self.password.max_length < self.password.min_length {
            violations.push("password.max_length must not be less than password.min_length".to_string());
        }
        if self.password.max_length > BCRYPT_INPUT_LIMIT {
            violations.push(format!(
                "password.max_length must not exceed {BCRYPT_INPUT_LIMIT} (bcrypt input limit)"
            ));
        }
        if self.pagination.default_size > self.pagination.max_size {
            violations.push("pagination.default_size must not exceed pagination.max_size".to_string());
        }
        if self.pagination.max_size > self.pagination.hard_limit {
            violations.push("pagination.max_size must not exceed pagination.hard_limit".to_string());
        }

        if self.jwt.secret_key.len() < 32 {
            violations.push("jwt.secret_key must be at least 32 bytes".to_string());
        }
        if !SUPPORTED_ALGORITHMS.contains(&self.jwt.algorithm.as_str()) {
            violations.push(format!(
                "jwt.algorithm must be one of {}",
                SUPPORTED_ALGORITHMS.join(", ")
            ));
        }

        if self.environment == Environment::Production {
            if !self.security.require_https {
                violations.push("security.require_https must be enabled in production".to_string());
            }
            if self.jwt.secret_key.len() < 64 {
                violations.push("jwt.secret_key must be at least 64 bytes in production".to_string());
            }
            if DEV_SECRET_MARKERS
                .iter()
                .any(|marker| self.jwt.secret_key.contains(marker))
            {
                violations.push("cannot use development JWT secret in production".to_string());
            }
            if self.database.url.is_none() {
                violations.push("database.url is required in production".to_string());
            }
            if self.password.bcrypt_cost < 10 {
                violations.push("password.bcrypt_cost must be at least 10 in production".to_string());
            }
        }

        if self.email.require_verification && !self.email.verification_enabled {
            violations.push(
                "email.require_verification requires email.verification_enabled".to_string(),
            );
        }

        if self.accounts.valid_roles.is_empty() {
            violations.push("accounts.valid_roles must not be empty".to_string());
        } else if !self.accounts.is_valid_role(&self.accounts.default_role) {
            violations.push("accounts.default_role must be one of accounts.valid_roles".to_string());
        }
        if self.accounts.valid_statuses.is_empty() {
            violations.push("accounts.valid_statuses must not be empty".to_string());
        }

        if self.realtime.ping_interval_secs >= self.realtime.pong_wait_secs {
            violations.push(
                "realtime.ping_interval_secs must be shorter than realtime.pong_wait_secs".to_string(),
            );
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(violations))
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// 用于日志输出的脱敏表示
    pub fn sanitize(&self) -> String {
        let mut redacted = self.clone();
        redacted.jwt.secret_key = "[REDACTED]".into();
        if redacted.database.url.is_some() {
            redacted.database.url = Some("postgres://[REDACTED]".into());
        }
        if redacted.email.smtp_password.is_some() {
            redacted.email.smtp_password = Some("[REDACTED]".into());
        }
        format!("{:?}", redacted)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(Box<figment::Error>),
    #[error("invalid configuration field: {0}")]
    Field(#[from] validator::ValidationErrors),
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
    #[error("failed to watch configuration file: {0}")]
    Watch(#[from] notify::Error),
}
