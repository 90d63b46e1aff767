use application::{ApplicationError, ErrorKind};
use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub retryable: bool,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope<'a> {
    success: bool,
    error: &'a ErrorBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    debug: Option<&'a str>,
}

/// 传输层错误：状态码加统一的错误信封
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
    /// 完整错误链，只在 debug 模式下输出
    internal: Option<String>,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
                details: None,
                retryable: false,
            },
            internal: None,
            retry_after_secs: None,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::InvalidInput.code(), message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, ErrorKind::Forbidden.code(), message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.body.code
    }

    /// 渲染响应；`debug` 为真时附带内部错误链
    pub fn render(&self, debug: bool) -> Response {
        let envelope = ErrorEnvelope {
            success: false,
            error: &self.body,
            debug: if debug { self.internal.as_deref() } else { None },
        };
        let mut response = (self.status, Json(envelope)).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput
        | ErrorKind::ValidationFailed
        | ErrorKind::WeakPassword
        | ErrorKind::PasswordMismatch => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidCredentials | ErrorKind::InvalidToken | ErrorKind::TokenExpired => {
            StatusCode::UNAUTHORIZED
        }
        ErrorKind::Forbidden | ErrorKind::EmailNotVerified => StatusCode::FORBIDDEN,
        ErrorKind::UserNotFound => StatusCode::NOT_FOUND,
        ErrorKind::EmailAlreadyRegistered | ErrorKind::DuplicateEmail => StatusCode::CONFLICT,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::RepositoryError | ErrorKind::InternalError => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        let kind = error.kind();
        let status = status_for(kind);

        let message = match kind {
            ErrorKind::RepositoryError | ErrorKind::InternalError => {
                "internal server error".to_string()
            }
            ErrorKind::ServiceUnavailable => "service temporarily unavailable".to_string(),
            _ => error.root().to_string(),
        };

        let mut retry_after_secs = None;
        let details = match error.root() {
            ApplicationError::ValidationFailed { fields } => Some(json!({ "fields": fields })),
            ApplicationError::WeakPassword { unmet } => Some(json!({ "unmet": unmet })),
            ApplicationError::RateLimited { retry_after_secs: secs } => {
                retry_after_secs = Some(*secs);
                Some(json!({ "retryAfterSecs": secs }))
            }
            _ => None,
        };

        if status.is_server_error() {
            tracing::error!(error = %error, code = kind.code(), "request failed");
        } else {
            tracing::debug!(error = %error, code = kind.code(), "request rejected");
        }

        Self {
            status,
            body: ErrorBody {
                code: kind.code(),
                message,
                details,
                retryable: error.is_retryable(),
            },
            internal: Some(error.to_string()),
            retry_after_secs,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = self.render(false);
        // 留给 debug 中间件重新渲染
        response.extensions_mut().insert(self);
        response
    }
}
