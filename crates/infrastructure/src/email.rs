use application::{EmailError, EmailMessage, EmailSender};
use async_trait::async_trait;
use config::EmailConfig;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

/// 通过 SMTP 投递邮件
pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    /// 配置了账号时走 TLS 中继，否则按本地无认证中继处理
    pub fn new(config: &EmailConfig) -> Result<Self, EmailError> {
        let from: Mailbox = format!("{} <{}>", config.from_name, config.from_address)
            .parse()
            .map_err(|err| EmailError::InvalidMessage(format!("from address: {err}")))?;

        let transport = match (&config.smtp_user, &config.smtp_password) {
            (Some(user), Some(password)) => {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                    .map_err(|err| EmailError::Transport(err.to_string()))?
                    .port(config.smtp_port)
                    .credentials(Credentials::new(user.clone(), password.clone()))
                    .build()
            }
            _ => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
                .port(config.smtp_port)
                .build(),
        };

        Ok(Self { transport, from })
    }

    fn build(&self, message: EmailMessage) -> Result<Message, EmailError> {
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|err| EmailError::InvalidMessage(format!("recipient: {err}")))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body)
            .map_err(|err| EmailError::InvalidMessage(err.to_string()))
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<(), EmailError> {
        let kind = message.kind;
        let email = self.build(message)?;
        self.transport
            .send(email)
            .await
            .map_err(|err| EmailError::Transport(err.to_string()))?;
        tracing::debug!(kind = ?kind, "email sent");
        Ok(())
    }
}

/// 未配置 SMTP 时使用：只记录日志，不外发
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<(), EmailError> {
        tracing::info!(
            kind = ?message.kind,
            to = %message.to,
            subject = %message.subject,
            "email not sent (SMTP not configured)"
        );
        Ok(())
    }
}
