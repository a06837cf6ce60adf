//! SMTP 投递。每次运行只建立一个连接池，发送失败按认证失败和其他失败两类上报。

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::composer::ComposedMessage;
use crate::config::MailConfig;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// 服务器拒绝登录，本次运行不再继续发送
    #[error("SMTP 认证失败: {0}")]
    Auth(String),

    #[error("邮件发送失败: {0}")]
    Transient(String),

    #[error("邮件构建失败: {0}")]
    Build(String),
}

impl DeliveryError {
    pub fn is_auth(&self) -> bool {
        matches!(self, DeliveryError::Auth(_))
    }
}

/// 邮件发送通道
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &ComposedMessage) -> Result<(), DeliveryError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    recipient: Mailbox,
}

impl SmtpMailer {
    /// 465 端口使用隐式 TLS，其余端口使用 STARTTLS
    pub fn new(config: &MailConfig) -> Result<Self, DeliveryError> {
        let sender: Mailbox = config
            .sender
            .parse()
            .map_err(|e| DeliveryError::Build(format!("发件人地址无效 {}: {}", config.sender, e)))?;
        let recipient: Mailbox = config
            .recipient
            .parse()
            .map_err(|e| {
                DeliveryError::Build(format!("收件人地址无效 {}: {}", config.recipient, e))
            })?;

        let builder = if config.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_server)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
        }
        .map_err(|e| DeliveryError::Build(format!("SMTP 服务器配置错误: {}", e)))?;

        let transport = builder
            .port(config.smtp_port)
            .credentials(Credentials::new(config.username.clone(), config.password.clone()))
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();

        Ok(Self {
            transport,
            sender,
            recipient,
        })
    }

    /// 只检查连接和登录，不发送邮件
    pub async fn test_connection(&self) -> Result<bool, DeliveryError> {
        self.transport.test_connection().await.map_err(classify)
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: &ComposedMessage) -> Result<(), DeliveryError> {
        let email = build_message(message, &self.sender, &self.recipient)?;

        match self.transport.send(email).await {
            Ok(response) => {
                info!("邮件发送成功: {} ({})", message.subject, response.code());
                Ok(())
            }
            Err(e) => {
                let err = classify(e);
                error!("邮件发送失败 {}: {}", message.paper_id, err);
                Err(err)
            }
        }
    }
}

/// multipart/related：HTML 正文加按 Content-ID 引用的内嵌图片
pub fn build_message(
    message: &ComposedMessage,
    sender: &Mailbox,
    recipient: &Mailbox,
) -> Result<Message, DeliveryError> {
    let mut body = MultiPart::related().singlepart(SinglePart::html(message.html.clone()));

    for image in &message.inline_images {
        let content_type = ContentType::parse(mime_for(&image.filename))
            .map_err(|e| DeliveryError::Build(e.to_string()))?;
        let attachment = Attachment::new_inline(image.content_id.clone())
            .body(image.bytes.clone(), content_type);
        body = body.singlepart(attachment);
    }

    Message::builder()
        .from(sender.clone())
        .to(recipient.clone())
        .subject(message.subject.clone())
        .multipart(body)
        .map_err(|e| DeliveryError::Build(e.to_string()))
}

fn mime_for(filename: &str) -> &'static str {
    let lower = filename.to_ascii_lowercase();
    if lower.ends_with(".jpg") || lower.ends_with(".jpeg") {
        "image/jpeg"
    } else {
        "image/png"
    }
}

/// 53x 响应码（530/534/535）视为认证失败
fn classify(e: lettre::transport::smtp::Error) -> DeliveryError {
    let auth = e
        .status()
        .map(|code| is_auth_code(&code.to_string()))
        .unwrap_or(false);

    if auth {
        DeliveryError::Auth(e.to_string())
    } else {
        DeliveryError::Transient(e.to_string())
    }
}

fn is_auth_code(code: &str) -> bool {
    code.starts_with("53")
}
