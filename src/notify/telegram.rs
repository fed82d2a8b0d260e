use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{check_response, NotificationSender, SenderError};
use crate::db::models::{Notification, PingStatus, TelegramNotificationConfig};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Pushes a plain-text message through the Telegram Bot API.
pub struct TelegramSender {
    client: Client,
    api_base: String,
}

impl TelegramSender {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            api_base: TELEGRAM_API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    fn with_api_base(client: Client, api_base: String) -> Self {
        Self { client, api_base }
    }
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn send(
        &self,
        notification: &Notification,
        title: &str,
        description: &str,
        _status: PingStatus,
    ) -> Result<(), SenderError> {
        let cfg: TelegramNotificationConfig = serde_json::from_value(notification.config.clone())
            .map_err(|err| SenderError::InvalidConfiguration(format!("decode telegram config: {err}")))?;

        if cfg.bot_token.is_empty() || cfg.chat_id.is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "telegram bot_token and chat_id are required".to_string(),
            ));
        }

        let url = format!(
            "{}/bot{}/sendMessage",
            self.api_base.trim_end_matches('/'),
            cfg.bot_token
        );
        let text = format!("{title}\n\n{description}");
        let payload = TelegramMessage {
            chat_id: &cfg.chat_id,
            text: text.trim(),
        };

        let response = self.client.post(&url).json(&payload).send().await?;
        check_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel(config: serde_json::Value) -> Notification {
        Notification {
            id: 1,
            team_id: 1,
            notification_type: crate::db::models::NotificationType::Telegram,
            name: "tg".to_string(),
            config,
            updated_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn posts_trimmed_text_to_bot_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/bottoken123/sendMessage"))
            .and(body_partial_json(serde_json::json!({
                "chat_id": "-100",
                "text": "api is DOWN\n\ndetails",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let notification = channel(serde_json::json!({
            "bot_token": "token123",
            "chat_id": "-100",
        }));

        let sender = TelegramSender::with_api_base(reqwest::Client::new(), server.uri());
        sender
            .send(&notification, "api is DOWN", "details", PingStatus::Failed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_credentials_are_a_config_error() {
        let notification = channel(serde_json::json!({ "bot_token": "", "chat_id": "" }));
        let sender = TelegramSender::new(reqwest::Client::new());
        let err = sender
            .send(&notification, "t", "d", PingStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, SenderError::InvalidConfiguration(_)));
    }
}
