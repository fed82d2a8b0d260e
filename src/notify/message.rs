//! Rendering of notification text from a probe outcome.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::db::models::PingStatus;

/// Data used to build one notification message.
#[derive(Debug, Clone)]
pub struct MessageInput {
    pub monitor_name: String,
    pub status: PingStatus,
    pub region_display_name: String,
    pub latency_ms: i32,
    pub checked_at: DateTime<Utc>,
    pub detail: String,
}

/// Produces the `(title, description)` pair every channel renders from.
pub fn format_message(input: &MessageInput) -> (String, String) {
    let title = format!(
        "{} is {}",
        input.monitor_name,
        input.status.as_str().to_uppercase()
    );

    let mut description = format!("Monitor: {}\n", input.monitor_name);
    if !input.region_display_name.is_empty() {
        description.push_str(&format!("Region: {}\n", input.region_display_name));
    }
    description.push_str(&format!("Status: {}\n", input.status.as_str().to_uppercase()));

    if input.latency_ms > 0 {
        description.push_str(&format!("\nLatency: {}ms", input.latency_ms));
    }

    description.push_str(&format!(
        "\nChecked at: {}",
        input.checked_at.to_rfc3339_opts(SecondsFormat::Secs, true)
    ));

    let detail = input.detail.trim();
    if !detail.is_empty() {
        description.push_str(&format!("\n\nDetails: {detail}"));
    }

    (title, description.trim().to_string())
}

/// Normalizes the stored detail for display; a blank detail falls back to
/// nothing rather than noise.
pub fn detail_from_message(detail: Option<&str>) -> String {
    detail.map(str::trim).unwrap_or_default().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn input() -> MessageInput {
        MessageInput {
            monitor_name: "api".to_string(),
            status: PingStatus::Failed,
            region_display_name: "Taiwan, Taipei".to_string(),
            latency_ms: 123,
            checked_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            detail: "received HTTP 503 Service Unavailable".to_string(),
        }
    }

    #[test]
    fn title_uppercases_status() {
        let (title, _) = format_message(&input());
        assert_eq!(title, "api is FAILED");
    }

    #[test]
    fn description_contains_all_sections() {
        let (_, description) = format_message(&input());
        assert!(description.contains("Monitor: api"));
        assert!(description.contains("Region: Taiwan, Taipei"));
        assert!(description.contains("Status: FAILED"));
        assert!(description.contains("Latency: 123ms"));
        assert!(description.contains("Checked at: 2025-06-01T12:00:00Z"));
        assert!(description.ends_with("Details: received HTTP 503 Service Unavailable"));
    }

    #[test]
    fn zero_latency_and_empty_sections_are_omitted() {
        let mut msg = input();
        msg.latency_ms = 0;
        msg.region_display_name = String::new();
        msg.detail = "  ".to_string();

        let (_, description) = format_message(&msg);
        assert!(!description.contains("Latency"));
        assert!(!description.contains("Region"));
        assert!(!description.contains("Details"));
    }
}
