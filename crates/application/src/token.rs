//! 令牌签发端口
//!
//! 访问令牌与刷新令牌是无状态的；重置与验证令牌同样是签名令牌，
//! 但还会写入令牌存储以实现一次性语义。

use chrono::{DateTime, Utc};
use domain::{Account, Email, HubRole, TokenKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TokenError {
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("malformed token")]
    Malformed,
    #[error("expected {expected} token, got {actual}")]
    WrongKind {
        expected: TokenKind,
        actual: TokenKind,
    },
    #[error("failed to create token: {0}")]
    Creation(String),
}

/// 令牌中携带的声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// 访问/刷新令牌为账户 ID，重置/验证令牌为邮箱
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<i64>,
    pub kind: TokenKind,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
}

impl TokenClaims {
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.iat, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// 已签发的令牌及其声明
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

impl IssuedToken {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.claims.expires_at()
    }
}

/// 实时通道令牌的主体
#[derive(Debug, Clone)]
pub struct RealtimeSubject {
    pub user_id: String,
    pub email: Email,
    pub role: HubRole,
}

pub trait TokenMaker: Send + Sync {
    fn create_access(&self, account: &Account) -> Result<IssuedToken, TokenError>;
    fn create_refresh(&self, account: &Account) -> Result<IssuedToken, TokenError>;
    fn create_reset(&self, email: &Email) -> Result<IssuedToken, TokenError>;
    fn create_verification(&self, email: &Email) -> Result<IssuedToken, TokenError>;
    /// 实时通道握手用的访问令牌，有效期由调用方给定
    fn create_realtime(
        &self,
        subject: &RealtimeSubject,
        ttl: std::time::Duration,
    ) -> Result<IssuedToken, TokenError>;
    fn verify(&self, token: &str, expected: TokenKind) -> Result<TokenClaims, TokenError>;
}
