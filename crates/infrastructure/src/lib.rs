//! 基础设施层实现。
//!
//! 提供 PostgreSQL 存储、bcrypt 密码哈希、JWT 令牌签发与 SMTP 邮件等适配器，
//! 实现应用/领域层定义的接口。

pub mod builder;
pub mod email;
pub mod migrations;
pub mod password;
pub mod repository;
pub mod token;

pub use builder::{Infrastructure, InfrastructureError};
pub use email::{LogEmailSender, SmtpEmailSender};
pub use migrations::MIGRATOR;
pub use password::BcryptPasswordHasher;
pub use repository::{create_pg_pool, PgAccountRepository, PgTokenRepository};
pub use token::JwtTokenMaker;
