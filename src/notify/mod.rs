//! Notification channel delivery. One sender per channel type, dispatched on
//! the stored channel record.

mod discord;
mod message;
mod telegram;

pub use self::discord::DiscordSender;
pub use self::message::{detail_from_message, format_message, MessageInput};
pub use self::telegram::TelegramSender;

use async_trait::async_trait;

use crate::db::models::{Notification, NotificationType, PingStatus};

#[derive(Debug, thiserror::Error)]
pub enum SenderError {
    #[error("invalid channel configuration: {0}")]
    InvalidConfiguration(String),
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("email notification not implemented")]
    EmailNotImplemented,
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        notification: &Notification,
        title: &str,
        description: &str,
        status: PingStatus,
    ) -> Result<(), SenderError>;
}

/// Delivers a rendered message through the channel the record describes.
pub async fn send(
    client: &reqwest::Client,
    notification: &Notification,
    title: &str,
    description: &str,
    status: PingStatus,
) -> Result<(), SenderError> {
    match notification.notification_type {
        NotificationType::Discord => {
            DiscordSender::new(client.clone())
                .send(notification, title, description, status)
                .await
        }
        NotificationType::Telegram => {
            TelegramSender::new(client.clone())
                .send(notification, title, description, status)
                .await
        }
        NotificationType::Email => Err(SenderError::EmailNotImplemented),
    }
}

pub(crate) async fn check_response(response: reqwest::Response) -> Result<(), SenderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "failed to read error body".to_string());
    Err(SenderError::SendFailed(format!(
        "unexpected status {status}: {}",
        body.trim()
    )))
}
