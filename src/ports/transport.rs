//! 出站传输端口：邮件与短信发送请求

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::capabilities::Channel;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// 服务商暂时不可用，可重试
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Transport rejected request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailRequest {
    pub to: String,
    pub subject: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailReceipt {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub user_id: String,
    pub channel: Channel,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageReceipt {
    pub id: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_email(&self, email: EmailRequest) -> Result<EmailReceipt, TransportError>;

    async fn send_message(&self, message: OutboundMessage) -> Result<MessageReceipt, TransportError>;
}
