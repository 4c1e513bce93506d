//! Outbound notification channels
//!
//! Email and WhatsApp delivery behind trait seams so the dispatcher can be
//! tested without network access.

pub mod email;
pub mod whatsapp;

pub use email::SmtpEmailChannel;
pub use whatsapp::GatewayWhatsappChannel;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result type alias for channel operations
pub type SendResult = Result<(), ChannelError>;

/// Unified error type for outbound channel operations
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Send failed: {0}")]
    Send(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Channel not configured")]
    NotConfigured,
}

/// Per-recipient delivery outcome, persisted to the notification history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelResult {
    pub recipient: String,
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChannelResult {
    pub fn sent(recipient: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            sent: true,
            error: None,
        }
    }

    pub fn failed(recipient: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            sent: false,
            error: Some(error.into()),
        }
    }
}

/// Transactional email sender
#[async_trait]
pub trait EmailChannel: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body_html: &str, body_text: &str) -> SendResult;
}

/// WhatsApp messaging gateway
#[async_trait]
pub trait WhatsappChannel: Send + Sync {
    /// Messaging-instance identifier connected for the account, if any.
    /// `None` means the account never linked a device; the dispatcher skips
    /// the WhatsApp branch entirely in that case.
    async fn connected_instance(&self, account_id: i64) -> Result<Option<String>, ChannelError>;

    async fn send(&self, instance_id: &str, to_number: &str, text: &str) -> SendResult;
}

/// Strip everything but digits from a destination phone number
pub fn normalize_number(number: &str) -> String {
    number.chars().filter(|c| c.is_ascii_digit()).collect()
}
