//! 领域模型错误定义
//!
//! `DomainError` 描述输入与业务规则的违反；`RepositoryError` 是存储层在自身边界上
//! 完成分类后的错误，上层只依据变体判断，不解析错误消息。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 字段校验失败
    #[error("验证失败: {field}: {message}")]
    ValidationError { field: String, message: String },

    /// 参数非法
    #[error("参数非法: {field}: {message}")]
    InvalidArgument { field: String, message: String },

    /// 密码不满足强度策略
    #[error("密码强度不足: {}", unmet.join(", "))]
    WeakPassword { unmet: Vec<String> },

    /// 会话状态机的非法迁移
    #[error("非法状态迁移: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl DomainError {
    /// 创建验证错误
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 创建参数非法错误
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

/// 存储层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("email already in use")]
    DuplicateEmail,
    #[error("token not found")]
    TokenNotFound,
    #[error("token expired")]
    TokenExpired,
    #[error("token already used")]
    TokenAlreadyUsed,
    /// 连接失败、超时、连接池关闭
    #[error("storage unavailable: {message}")]
    Unavailable { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
