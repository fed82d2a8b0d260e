//! Probe executors. One probe attempt per call, classified into the three
//! sample statuses the rest of the pipeline understands.

mod http;
mod icmp;

pub use self::http::run_http;
pub use self::icmp::run_icmp;

use std::time::Duration;

use crate::db::models::{Monitor, MonitorType, PingStatus};

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// Monitor config blob did not decode. Unknown monitor types are also
    /// rejected at decode time, before a probe ever runs.
    #[error("invalid monitor config: {0}")]
    Config(#[from] serde_json::Error),
    /// Config decoded but can never execute (missing url, bad scheme).
    #[error("invalid monitor config: {0}")]
    Invalid(String),
    #[error("create pinger: {0}")]
    Socket(#[from] std::io::Error),
}

/// Outcome of one probe attempt.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub success: bool,
    pub duration: Duration,
    pub status: PingStatus,
    pub message: String,
}

impl ProbeResult {
    fn success(duration: Duration) -> Self {
        ProbeResult {
            success: true,
            duration,
            status: PingStatus::Successful,
            message: String::new(),
        }
    }

    fn failure(duration: Duration, status: PingStatus, message: String) -> Self {
        ProbeResult {
            success: false,
            duration,
            status,
            message,
        }
    }
}

/// Executes a monitor. Configuration errors surface as `ProbeError`; network
/// outcomes, including timeouts, come back as a classified `ProbeResult`.
pub async fn run(monitor: &Monitor) -> Result<ProbeResult, ProbeError> {
    match monitor.monitor_type {
        MonitorType::Http => {
            let cfg = monitor.http_config()?;
            cfg.validate().map_err(ProbeError::Invalid)?;
            run_http(&cfg).await
        }
        MonitorType::Ping => {
            let cfg = monitor.ping_config()?;
            cfg.validate().map_err(ProbeError::Invalid)?;
            run_icmp(&cfg).await
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::db::models::{HttpMonitorConfig, PingMonitorConfig};

    #[test]
    fn http_config_validation_catches_unusable_urls() {
        let mut cfg = HttpMonitorConfig::default();
        assert!(cfg.validate().is_err());

        cfg.url = "ftp://example.com".to_string();
        assert!(cfg.validate().is_err());

        cfg.url = "https://example.com".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn ping_config_validation_requires_a_host() {
        let cfg: PingMonitorConfig =
            serde_json::from_value(serde_json::json!({ "host": "" })).unwrap();
        assert!(cfg.validate().is_err());

        let cfg: PingMonitorConfig =
            serde_json::from_value(serde_json::json!({ "host": "1.1.1.1" })).unwrap();
        assert!(cfg.validate().is_ok());
    }
}
