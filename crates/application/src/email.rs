//! 邮件通知
//!
//! 所有邮件经由有界队列交给后台 worker 发送。队列满时丢弃新邮件并记录告警，
//! 发送失败只记录日志，不会影响调用方的结果。

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("invalid email message: {0}")]
    InvalidMessage(String),
    #[error("email transport failed: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailKind {
    Verification,
    PasswordReset,
    PasswordChanged,
    AccountDeleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailMessage {
    pub kind: EmailKind,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl EmailMessage {
    pub fn verification(to: &str, base_url: &str, token: &str) -> Self {
        Self {
            kind: EmailKind::Verification,
            to: to.to_string(),
            subject: "Verify your email address".to_string(),
            body: format!(
                "Welcome! Confirm your email address by opening the link below:\n\n{}/verify-email?token={}\n",
                base_url.trim_end_matches('/'),
                token
            ),
        }
    }

    pub fn password_reset(to: &str, base_url: &str, token: &str) -> Self {
        Self {
            kind: EmailKind::PasswordReset,
            to: to.to_string(),
            subject: "Reset your password".to_string(),
            body: format!(
                "A password reset was requested for your account. Open the link below to choose a new password:\n\n{}/reset-password?token={}\n\nIf you did not request this, you can ignore this email.\n",
                base_url.trim_end_matches('/'),
                token
            ),
        }
    }

    pub fn password_changed(to: &str) -> Self {
        Self {
            kind: EmailKind::PasswordChanged,
            to: to.to_string(),
            subject: "Your password was changed".to_string(),
            body: "The password for your account was just changed. Contact support if this was not you.\n"
                .to_string(),
        }
    }

    pub fn account_deleted(to: &str) -> Self {
        Self {
            kind: EmailKind::AccountDeleted,
            to: to.to_string(),
            subject: "Your account was deleted".to_string(),
            body: "Your account has been deleted.\n".to_string(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), EmailError>;
}

/// 邮件后台队列的提交端，克隆后共享同一个 worker
#[derive(Clone)]
pub struct EmailDispatcher {
    tx: mpsc::Sender<EmailMessage>,
}

impl EmailDispatcher {
    /// 启动后台 worker；需要在 tokio 运行时内调用
    pub fn spawn(sender: Arc<dyn EmailSender>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<EmailMessage>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let kind = message.kind;
                if let Err(err) = sender.send(message).await {
                    tracing::warn!(error = %err, kind = ?kind, "email delivery failed, dropping");
                }
            }
            tracing::debug!("email worker stopped");
        });
        Self { tx }
    }

    /// 提交邮件，队列已满或已关闭时丢弃并返回 `false`
    pub fn submit(&self, message: EmailMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                tracing::warn!(kind = ?message.kind, "email queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                tracing::warn!(kind = ?message.kind, "email worker gone, dropping message");
                false
            }
        }
    }
}
