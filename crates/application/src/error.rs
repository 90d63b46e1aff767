use std::collections::BTreeMap;

use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::email::EmailError;
use crate::password::PasswordHasherError;
use crate::realtime::HubError;
use crate::token::TokenError;

/// 面向调用方的错误种类，传输层据此选择状态码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    ValidationFailed,
    WeakPassword,
    InvalidCredentials,
    InvalidToken,
    TokenExpired,
    PasswordMismatch,
    Forbidden,
    EmailNotVerified,
    UserNotFound,
    EmailAlreadyRegistered,
    DuplicateEmail,
    RateLimited,
    ServiceUnavailable,
    RepositoryError,
    InternalError,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput => "INVALID_INPUT",
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::WeakPassword => "WEAK_PASSWORD",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::PasswordMismatch => "PASSWORD_MISMATCH",
            Self::Forbidden => "FORBIDDEN",
            Self::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::EmailAlreadyRegistered => "EMAIL_ALREADY_REGISTERED",
            Self::DuplicateEmail => "DUPLICATE_EMAIL",
            Self::RateLimited => "RATE_LIMITED",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::RepositoryError => "REPOSITORY_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("validation failed")]
    ValidationFailed { fields: BTreeMap<String, String> },
    #[error("password does not meet requirements: {}", unmet.join(", "))]
    WeakPassword { unmet: Vec<String> },
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid token: {reason}")]
    InvalidToken { reason: String },
    #[error("token expired")]
    TokenExpired,
    #[error("current password does not match")]
    PasswordMismatch,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("email address not verified")]
    EmailNotVerified,
    #[error("user not found")]
    UserNotFound,
    #[error("email already registered")]
    EmailAlreadyRegistered,
    #[error("email already in use")]
    DuplicateEmail,
    #[error("too many attempts, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("repository error: {0}")]
    Repository(String),
    #[error("internal error: {0}")]
    Internal(String),
    /// 附带操作名的包装，不改变内部错误的种类
    #[error("{operation}: {source}")]
    Context {
        operation: &'static str,
        #[source]
        source: Box<ApplicationError>,
    },
}

impl ApplicationError {
    pub fn invalid_token(reason: impl Into<String>) -> Self {
        Self::InvalidToken {
            reason: reason.into(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(field.into(), reason.into());
        Self::ValidationFailed { fields }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    /// 包上操作名；已经包过的错误不再重复包装
    pub fn context(self, operation: &'static str) -> Self {
        match self {
            Self::Context { .. } => self,
            other => Self::Context {
                operation,
                source: Box::new(other),
            },
        }
    }

    /// 去掉上下文包装后的原始错误
    pub fn root(&self) -> &ApplicationError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Self::Context { operation, .. } => Some(operation),
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            Self::WeakPassword { .. } => ErrorKind::WeakPassword,
            Self::InvalidCredentials => ErrorKind::InvalidCredentials,
            Self::InvalidToken { .. } => ErrorKind::InvalidToken,
            Self::TokenExpired => ErrorKind::TokenExpired,
            Self::PasswordMismatch => ErrorKind::PasswordMismatch,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::EmailNotVerified => ErrorKind::EmailNotVerified,
            Self::UserNotFound => ErrorKind::UserNotFound,
            Self::EmailAlreadyRegistered => ErrorKind::EmailAlreadyRegistered,
            Self::DuplicateEmail => ErrorKind::DuplicateEmail,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            Self::Repository(_) => ErrorKind::RepositoryError,
            Self::Internal(_) => ErrorKind::InternalError,
            Self::Context { .. } => ErrorKind::InternalError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::ServiceUnavailable | ErrorKind::RateLimited)
    }
}

impl From<DomainError> for ApplicationError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::ValidationError { field, message } => Self::validation(field, message),
            DomainError::InvalidArgument { field, message } => {
                Self::InvalidInput(format!("{field}: {message}"))
            }
            DomainError::WeakPassword { unmet } => Self::WeakPassword { unmet },
            other @ DomainError::InvalidTransition { .. } => Self::Internal(other.to_string()),
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => Self::UserNotFound,
            RepositoryError::DuplicateEmail => Self::DuplicateEmail,
            RepositoryError::TokenNotFound => Self::invalid_token("token not found"),
            RepositoryError::TokenAlreadyUsed => Self::invalid_token("token already used"),
            RepositoryError::TokenExpired => Self::TokenExpired,
            RepositoryError::Unavailable { message } => Self::ServiceUnavailable(message),
            RepositoryError::Storage { message } => Self::Repository(message),
        }
    }
}

impl From<PasswordHasherError> for ApplicationError {
    fn from(value: PasswordHasherError) -> Self {
        match value {
            PasswordHasherError::TooLong { max_bytes } => Self::WeakPassword {
                unmet: vec![format!("at most {max_bytes} bytes")],
            },
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<TokenError> for ApplicationError {
    fn from(value: TokenError) -> Self {
        match value {
            TokenError::Expired => Self::TokenExpired,
            TokenError::Creation(message) => Self::Internal(message),
            other => Self::invalid_token(other.to_string()),
        }
    }
}

impl From<EmailError> for ApplicationError {
    fn from(value: EmailError) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<HubError> for ApplicationError {
    fn from(value: HubError) -> Self {
        match value {
            HubError::Closed => Self::ServiceUnavailable(value.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}
