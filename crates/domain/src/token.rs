//! 令牌种类与一次性令牌记录

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value_objects::{Email, PasswordHash, Timestamp};

/// 令牌种类，决定有效期与用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    Reset,
    Verification,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::Reset => "reset",
            Self::Verification => "verification",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 需要落库的一次性令牌种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OneTimeKind {
    Reset,
    Verification,
}

impl OneTimeKind {
    pub fn token_kind(self) -> TokenKind {
        match self {
            Self::Reset => TokenKind::Reset,
            Self::Verification => TokenKind::Verification,
        }
    }
}

/// 一次性令牌记录，每个 (email, kind) 只保留最新的一条
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRecord {
    pub kind: OneTimeKind,
    pub email: Email,
    pub token: String,
    pub expires_at: Timestamp,
    pub used_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TokenRecord {
    /// 未使用且未过期
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        self.used_at.is_none() && now < self.expires_at
    }
}

/// 消费令牌时在同一事务内执行的账户变更
#[derive(Debug, Clone)]
pub enum ConsumeEffect {
    UpdatePassword(PasswordHash),
    MarkEmailVerified,
}
