//! HTTP probe executor.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::redirect::Policy;
use reqwest::{Client, Method};

use super::{ProbeError, ProbeResult};
use crate::db::models::{BodyEncoding, HttpMonitorConfig, PingStatus};

/// Applied when the monitor does not set its own timeout, keeping every
/// probe well inside the 120 s task deadline.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn run_http(cfg: &HttpMonitorConfig) -> Result<ProbeResult, ProbeError> {
    let client = build_client(cfg)?;

    let method = Method::from_bytes(cfg.method.as_bytes())
        .map_err(|_| ProbeError::Config(serde::de::Error::custom(format!(
            "invalid http method {:?}",
            cfg.method
        ))))?;

    let mut request = client.request(method, &cfg.url);

    let mut headers = HeaderMap::new();
    for (key, value) in &cfg.headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| ProbeError::Config(serde::de::Error::custom(format!(
                "invalid header name {key:?}"
            ))))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ProbeError::Config(serde::de::Error::custom(format!(
                "invalid header value for {key:?}"
            ))))?;
        headers.insert(name, value);
    }

    if !cfg.body.is_empty() && !headers.contains_key(CONTENT_TYPE) {
        let content_type = match cfg.body_encoding {
            BodyEncoding::Json => "application/json",
            BodyEncoding::Text => "text/plain",
        };
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    request = request.headers(headers);
    if !cfg.body.is_empty() {
        request = request.body(cfg.body.clone());
    }

    let start = Instant::now();
    let response = request.send().await;
    let duration = start.elapsed();

    match response {
        Ok(response) => {
            let status_code = response.status();
            let accepted = is_accepted_status(&cfg.accepted_status_codes, status_code.as_u16());
            let success = if cfg.upside_down_mode { !accepted } else { accepted };

            if success {
                Ok(ProbeResult::success(duration))
            } else {
                Ok(ProbeResult::failure(
                    duration,
                    PingStatus::Failed,
                    status_failure_message(status_code, cfg.upside_down_mode),
                ))
            }
        }
        Err(err) => {
            let (status, message) = classify_http_error(&err);
            Ok(ProbeResult::failure(duration, status, message))
        }
    }
}

fn build_client(cfg: &HttpMonitorConfig) -> Result<Client, ProbeError> {
    let timeout = if cfg.request_timeout > 0 {
        Duration::from_secs(cfg.request_timeout)
    } else {
        DEFAULT_TIMEOUT
    };

    let mut builder = Client::builder().timeout(timeout);

    // Zero keeps reqwest's default redirect behavior; a positive value caps
    // the chain and surfaces the last response instead of erroring.
    if cfg.max_redirects > 0 {
        let max = cfg.max_redirects;
        builder = builder.redirect(Policy::custom(move |attempt| {
            if attempt.previous().len() >= max {
                attempt.stop()
            } else {
                attempt.follow()
            }
        }));
    }

    if cfg.ignore_tls_error {
        builder = builder.danger_accept_invalid_certs(true);
    }

    Ok(builder.build()?)
}

pub(crate) fn is_accepted_status(accepted: &[u16], status: u16) -> bool {
    if accepted.is_empty() {
        return (200..300).contains(&status);
    }
    accepted.contains(&status)
}

fn status_failure_message(status: reqwest::StatusCode, upside_down: bool) -> String {
    let reason = status
        .canonical_reason()
        .map(|text| format!(" {text}"))
        .unwrap_or_default();

    if upside_down {
        format!(
            "upside_down_mode: received HTTP {}{} which counts as failure",
            status.as_u16(),
            reason
        )
    } else {
        format!("received HTTP {}{}", status.as_u16(), reason)
    }
}

/// Maps a transport error to a sample status. Timeouts are their own status;
/// certificate problems keep a stable "tls " prefix for operator diagnosis.
pub(crate) fn classify_http_error(err: &reqwest::Error) -> (PingStatus, String) {
    if err.is_timeout() {
        return (PingStatus::Timeout, "request timed out".to_string());
    }

    let text = root_cause_text(err);
    if let Some(message) = tls_error_message(&text) {
        return (PingStatus::Failed, message);
    }

    (PingStatus::Failed, text)
}

/// Rustls and native-tls surface certificate trouble as opaque error text,
/// so classification matches on the root-cause wording.
fn tls_error_message(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();

    if lowered.contains("certificate") || lowered.contains("unknown issuer") {
        return Some(format!("tls certificate invalid: {text}"));
    }
    if lowered.contains("handshake") || lowered.contains("tls") || lowered.contains("ssl") {
        return Some(format!("tls handshake failed: {text}"));
    }

    None
}

fn root_cause_text(err: &reqwest::Error) -> String {
    let mut cause: &dyn std::error::Error = err;
    while let Some(source) = cause.source() {
        cause = source;
    }
    cause.to_string()
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        ProbeError::Socket(std::io::Error::other(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::HttpMonitorConfig;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: String) -> HttpMonitorConfig {
        HttpMonitorConfig {
            url,
            ..Default::default()
        }
    }

    #[test]
    fn empty_accepted_list_defaults_to_2xx() {
        assert!(is_accepted_status(&[], 200));
        assert!(is_accepted_status(&[], 299));
        assert!(!is_accepted_status(&[], 301));
        assert!(!is_accepted_status(&[], 503));
    }

    #[test]
    fn explicit_accepted_list_is_exact() {
        assert!(is_accepted_status(&[301, 418], 418));
        assert!(!is_accepted_status(&[301, 418], 200));
    }

    #[test]
    fn certificate_errors_get_the_tls_prefix() {
        let message =
            tls_error_message("invalid peer certificate: UnknownIssuer").unwrap();
        assert!(message.starts_with("tls certificate invalid:"));

        let message = tls_error_message("received fatal alert: HandshakeFailure").unwrap();
        assert!(message.starts_with("tls handshake failed:"));

        assert!(tls_error_message("connection refused").is_none());
    }

    #[tokio::test]
    async fn explicit_status_list_accepts_redirect_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(418))
            .mount(&server)
            .await;

        let mut cfg = config(server.uri());
        cfg.accepted_status_codes = vec![418];

        let result = run_http(&cfg).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status, PingStatus::Successful);
    }

    #[tokio::test]
    async fn ok_response_is_successful() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut cfg = config(format!("{}/health", server.uri()));
        cfg.method = "GET".to_string();

        let result = run_http(&cfg).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status, PingStatus::Successful);
        assert!(result.message.is_empty());
    }

    #[tokio::test]
    async fn server_error_is_failed_with_status_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = run_http(&config(server.uri())).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.status, PingStatus::Failed);
        assert_eq!(result.message, "received HTTP 503 Service Unavailable");
    }

    #[tokio::test]
    async fn upside_down_mode_inverts_classification() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/up"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut cfg = config(format!("{}/up", server.uri()));
        cfg.upside_down_mode = true;
        let result = run_http(&cfg).await.unwrap();
        assert!(!result.success);
        assert!(result.message.starts_with("upside_down_mode:"));

        let mut cfg = config(format!("{}/down", server.uri()));
        cfg.upside_down_mode = true;
        let result = run_http(&cfg).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status, PingStatus::Successful);
    }

    #[tokio::test]
    async fn timeout_is_classified_as_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let mut cfg = config(server.uri());
        cfg.request_timeout = 1;

        let result = run_http(&cfg).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.status, PingStatus::Timeout);
        assert_eq!(result.message, "request timed out");
    }

    #[tokio::test]
    async fn capped_redirects_surface_the_last_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hop/3"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/hop/2"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hop/2"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/hop/1"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hop/1"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut cfg = config(format!("{}/hop/3", server.uri()));
        cfg.max_redirects = 1;

        // The cap counts the original request, so the first redirect
        // response is surfaced instead of followed.
        let result = run_http(&cfg).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.status, PingStatus::Failed);
        assert_eq!(result.message, "received HTTP 302 Found");
    }

    #[tokio::test]
    async fn json_body_gets_default_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", "application/json"))
            .and(body_string(r#"{"ok":true}"#))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut cfg = config(server.uri());
        cfg.method = "POST".to_string();
        cfg.body = r#"{"ok":true}"#.to_string();

        let result = run_http(&cfg).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn explicit_content_type_is_not_overridden() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", "application/xml"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut cfg = config(server.uri());
        cfg.method = "POST".to_string();
        cfg.body = "<ok/>".to_string();
        cfg.headers
            .insert("Content-Type".to_string(), "application/xml".to_string());

        let result = run_http(&cfg).await.unwrap();
        assert!(result.success);
    }
}
