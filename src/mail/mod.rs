//! Mail provider contract
//!
//! The inbox lives in an external service; the engine only sees the
//! `MailProvider` trait and a read-only `Message` projection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result type alias for mail provider operations
pub type MailResult<T> = Result<T, MailError>;

/// Unified error type for mail provider operations
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Not connected")]
    NotConnected,

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),
}

/// Read-only message projection fetched from the mail provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: String,
    pub snippet: String,
    pub label_ids: Vec<String>,
    pub is_unread: bool,
}

/// Inclusive date range for full scans, RFC 3339 bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DateRange {
    pub after: String,
    pub before: String,
}

/// One page of a date-range listing
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Token for the next page; `None` when the listing is exhausted
    pub next_page_token: Option<String>,
}

/// Result of an incremental history fetch.
///
/// An expired cursor is a normal variant, not an error: callers fall back
/// to a full scan instead of unwinding.
#[derive(Debug, Clone)]
pub enum HistoryDelta {
    Messages {
        messages: Vec<Message>,
        new_cursor: String,
    },
    CursorExpired,
}

/// Contract the engine requires from the mail provider.
///
/// Mutations apply to the provider's copy of the mailbox; the engine never
/// stores messages itself.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Most recent unread messages, newest first, bounded by `limit`
    async fn list_unread(&self, limit: u32) -> MailResult<Vec<Message>>;

    /// One page of messages in a date range
    async fn list_by_date_range(
        &self,
        range: &DateRange,
        page_token: Option<&str>,
    ) -> MailResult<MessagePage>;

    /// Remove the unread flag
    async fn mark_read(&self, message_id: &str) -> MailResult<()>;

    /// Remove the message from the inbox
    async fn archive(&self, message_id: &str) -> MailResult<()>;

    /// Attach an arbitrary provider label
    async fn apply_label(&self, message_id: &str, label_id: &str) -> MailResult<()>;

    /// Messages added since the cursor was recorded
    async fn history_since(&self, cursor: &str) -> MailResult<HistoryDelta>;
}
