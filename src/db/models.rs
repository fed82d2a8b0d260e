//! Row types shared across the repository, the queue payloads and the
//! worker runtime.
//!
//! Status-like columns are stored as plain text; the enums here convert
//! through `TryFrom<String>` so `FromRow` can decode them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Raised when a text column holds a value outside the known variants.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value {value:?}")]
pub struct UnknownEnumValue {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl TryFrom<String> for $name {
            type Error = UnknownEnumValue;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                match value.as_str() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(UnknownEnumValue { kind: $kind, value }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorType {
    Http,
    Ping,
}

text_enum!(MonitorType, "monitor type", { Http => "http", Ping => "ping" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Up,
    Down,
}

text_enum!(MonitorStatus, "monitor status", { Up => "up", Down => "down" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingStatus {
    Successful,
    Failed,
    Timeout,
}

text_enum!(PingStatus, "ping status", {
    Successful => "successful",
    Failed => "failed",
    Timeout => "timeout",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Detected,
    Investigating,
    Identified,
    Monitoring,
    Resolved,
}

text_enum!(IncidentStatus, "incident status", {
    Detected => "detected",
    Investigating => "investigating",
    Identified => "identified",
    Monitoring => "monitoring",
    Resolved => "resolved",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentEventType {
    Detected,
    NotificationSent,
    ManuallyResolved,
    AutoResolved,
    Investigating,
    Identified,
    Update,
    Monitoring,
    Published,
    Unpublished,
}

text_enum!(IncidentEventType, "incident event type", {
    Detected => "detected",
    NotificationSent => "notification_sent",
    ManuallyResolved => "manually_resolved",
    AutoResolved => "auto_resolved",
    Investigating => "investigating",
    Identified => "identified",
    Update => "update",
    Monitoring => "monitoring",
    Published => "published",
    Unpublished => "unpublished",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Discord,
    Telegram,
    Email,
}

text_enum!(NotificationType, "notification type", {
    Discord => "discord",
    Telegram => "telegram",
    Email => "email",
});

/// Represents a tenant-owned probe definition.
/// Corresponds to the `monitors` table; `region_ids` and `notification_ids`
/// are aggregated from the junction tables by the queries that need them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Monitor {
    pub id: i64,
    pub team_id: i64,
    pub name: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type", try_from = "String")]
    pub monitor_type: MonitorType,
    pub config: serde_json::Value,
    pub interval: i32,
    #[sqlx(try_from = "String")]
    pub status: MonitorStatus,
    pub last_checked: DateTime<Utc>,
    pub next_check: DateTime<Utc>,
    pub failure_threshold: i16,
    pub recovery_threshold: i16,
    #[serde(default)]
    #[sqlx(default)]
    pub region_ids: Vec<i64>,
    #[serde(default)]
    #[sqlx(default)]
    pub notification_ids: Vec<i64>,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Monitor {
    /// Decodes the opaque config blob for an HTTP monitor.
    pub fn http_config(&self) -> Result<HttpMonitorConfig, serde_json::Error> {
        serde_json::from_value(self.config.clone())
    }

    /// Decodes the opaque config blob for an ICMP monitor.
    pub fn ping_config(&self) -> Result<PingMonitorConfig, serde_json::Error> {
        serde_json::from_value(self.config.clone())
    }
}

/// Probe settings for `type = http` monitors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpMonitorConfig {
    pub url: String,
    #[serde(default = "default_http_method")]
    pub method: String,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub body_encoding: BodyEncoding,
    /// Empty means the default 2xx acceptance.
    #[serde(default)]
    pub accepted_status_codes: Vec<u16>,
    #[serde(default)]
    pub request_timeout: u64,
    #[serde(default)]
    pub max_redirects: usize,
    #[serde(default)]
    pub ignore_tls_error: bool,
    #[serde(default)]
    pub upside_down_mode: bool,
}

fn default_http_method() -> String {
    "GET".to_string()
}

impl HttpMonitorConfig {
    /// Rejects configs a probe could never execute. Runs at decode time so
    /// the operator error is reported once per probe, not as a retry storm.
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("url is required".to_string());
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(format!("url {:?} must be http or https", self.url));
        }
        if self.method.is_empty() {
            return Err("method is required".to_string());
        }
        Ok(())
    }
}

impl Default for HttpMonitorConfig {
    fn default() -> Self {
        HttpMonitorConfig {
            url: String::new(),
            method: default_http_method(),
            headers: std::collections::HashMap::new(),
            body: String::new(),
            body_encoding: BodyEncoding::default(),
            accepted_status_codes: Vec::new(),
            request_timeout: 0,
            max_redirects: 0,
            ignore_tls_error: false,
            upside_down_mode: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyEncoding {
    #[default]
    Json,
    Text,
}

/// Probe settings for `type = ping` monitors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingMonitorConfig {
    pub host: String,
    #[serde(default = "default_packet_size")]
    pub packet_size: usize,
    #[serde(default = "default_ping_timeout")]
    pub timeout_seconds: u64,
}

impl PingMonitorConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("host is required".to_string());
        }
        Ok(())
    }
}

fn default_packet_size() -> usize {
    56
}

fn default_ping_timeout() -> u64 {
    5
}

/// Represents one probe attempt.
/// Corresponds to the `pings` hypertable; rows are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Ping {
    pub time: DateTime<Utc>,
    pub monitor_id: i64,
    pub region_id: i64,
    pub latency: i32,
    #[sqlx(try_from = "String")]
    pub status: PingStatus,
}

/// Represents an available probe location.
/// Corresponds to the `regions` table; loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Region {
    pub id: i64,
    pub name: String,
    pub display_name: String,
}

/// Represents a period of degraded health across one or more monitors.
/// Corresponds to the `incidents` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Incident {
    pub id: i64,
    #[sqlx(try_from = "String")]
    pub status: IncidentStatus,
    pub severity: i16,
    pub is_public: bool,
    pub auto_resolve: bool,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit row attached to an incident.
/// Corresponds to the `event_timelines` table, whose incident column is
/// historically named `event_id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EventTimeline {
    pub id: i64,
    #[sqlx(rename = "event_id")]
    pub incident_id: i64,
    pub created_by: Option<i64>,
    pub message: String,
    #[sqlx(try_from = "String")]
    pub event_type: IncidentEventType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Represents a notification channel a team has configured.
/// Corresponds to the `notifications` table; `config` is channel-specific.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: i64,
    pub team_id: i64,
    #[serde(rename = "type")]
    #[sqlx(rename = "type", try_from = "String")]
    pub notification_type: NotificationType,
    pub name: String,
    pub config: serde_json::Value,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordNotificationConfig {
    pub webhook_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramNotificationConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_status_round_trips_through_text() {
        for status in [PingStatus::Successful, PingStatus::Failed, PingStatus::Timeout] {
            let text = status.as_str().to_string();
            assert_eq!(PingStatus::try_from(text).unwrap(), status);
        }
        assert!(PingStatus::try_from("flaky".to_string()).is_err());
    }

    #[test]
    fn http_config_defaults_apply() {
        let cfg: HttpMonitorConfig =
            serde_json::from_value(serde_json::json!({ "url": "https://example.com" })).unwrap();
        assert_eq!(cfg.method, "GET");
        assert_eq!(cfg.body_encoding, BodyEncoding::Json);
        assert!(cfg.accepted_status_codes.is_empty());
        assert!(!cfg.upside_down_mode);
    }

    #[test]
    fn ping_config_defaults_apply() {
        let cfg: PingMonitorConfig =
            serde_json::from_value(serde_json::json!({ "host": "1.1.1.1" })).unwrap();
        assert_eq!(cfg.packet_size, 56);
        assert_eq!(cfg.timeout_seconds, 5);
    }
}
