use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{check_response, NotificationSender, SenderError};
use crate::db::models::{DiscordNotificationConfig, Notification, PingStatus};

const FALLBACK_USERNAME: &str = "Knocker";

/// Pushes an embed to a Discord webhook.
pub struct DiscordSender {
    client: Client,
}

impl DiscordSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotificationSender for DiscordSender {
    async fn send(
        &self,
        notification: &Notification,
        title: &str,
        description: &str,
        status: PingStatus,
    ) -> Result<(), SenderError> {
        let cfg: DiscordNotificationConfig = serde_json::from_value(notification.config.clone())
            .map_err(|err| SenderError::InvalidConfiguration(format!("decode discord config: {err}")))?;

        if cfg.webhook_url.is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "discord webhook_url is required".to_string(),
            ));
        }

        let payload = json!({
            "username": sanitize_username(&notification.name),
            "embeds": [{
                "title": title,
                "description": description,
                "color": color_for_status(status),
            }],
        });

        let response = self.client.post(&cfg.webhook_url).json(&payload).send().await?;
        check_response(response).await
    }
}

/// Discord rejects usernames containing "discord" in any casing.
fn sanitize_username(name: &str) -> String {
    let mut remaining = name;
    let mut clean = String::with_capacity(name.len());
    while let Some(pos) = remaining.to_ascii_lowercase().find("discord") {
        clean.push_str(&remaining[..pos]);
        remaining = &remaining[pos + "discord".len()..];
    }
    clean.push_str(remaining);

    let clean = clean.trim();
    if clean.is_empty() {
        FALLBACK_USERNAME.to_string()
    } else {
        clean.to_string()
    }
}

fn color_for_status(status: PingStatus) -> u32 {
    match status {
        PingStatus::Successful => 0x2ecc71,
        PingStatus::Timeout => 0xf1c40f,
        PingStatus::Failed => 0xe74c3c,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn username_strips_discord_case_insensitively() {
        assert_eq!(sanitize_username("My Discord Alerts"), "My  Alerts");
        assert_eq!(sanitize_username("DISCORDdiscord"), FALLBACK_USERNAME);
        assert_eq!(sanitize_username("ops"), "ops");
    }

    #[test]
    fn colors_map_by_status() {
        assert_eq!(color_for_status(PingStatus::Successful), 0x2ecc71);
        assert_eq!(color_for_status(PingStatus::Timeout), 0xf1c40f);
        assert_eq!(color_for_status(PingStatus::Failed), 0xe74c3c);
    }

    fn channel(config: serde_json::Value) -> Notification {
        Notification {
            id: 1,
            team_id: 1,
            notification_type: crate::db::models::NotificationType::Discord,
            name: "ops".to_string(),
            config,
            updated_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn posts_embed_payload_to_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "username": "ops",
                "embeds": [{"title": "api is DOWN", "color": 0xe74c3c}],
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notification = channel(serde_json::json!({
            "webhook_url": format!("{}/hook", server.uri()),
        }));

        let sender = DiscordSender::new(reqwest::Client::new());
        sender
            .send(&notification, "api is DOWN", "details", PingStatus::Failed)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_2xx_fails_the_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let notification = channel(serde_json::json!({ "webhook_url": server.uri() }));

        let sender = DiscordSender::new(reqwest::Client::new());
        let err = sender
            .send(&notification, "t", "d", PingStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, SenderError::SendFailed(_)));
    }

    #[tokio::test]
    async fn missing_webhook_url_is_a_config_error() {
        let notification = channel(serde_json::json!({ "webhook_url": "" }));
        let sender = DiscordSender::new(reqwest::Client::new());
        let err = sender
            .send(&notification, "t", "d", PingStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, SenderError::InvalidConfiguration(_)));
    }
}
