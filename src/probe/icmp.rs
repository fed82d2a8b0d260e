//! ICMP probe executor.
//!
//! A raw socket is attempted first; when the process lacks the capability
//! the executor retries once over an unprivileged datagram socket and gives
//! up after that.

use std::io;
use std::net::{IpAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use rand::random;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, SurgeError, ICMP};

use super::{ProbeError, ProbeResult};
use crate::db::models::{PingMonitorConfig, PingStatus};

pub async fn run_icmp(cfg: &PingMonitorConfig) -> Result<ProbeResult, ProbeError> {
    let target = resolve_host(&cfg.host).await?;

    let timeout = Duration::from_secs(if cfg.timeout_seconds == 0 {
        5
    } else {
        cfg.timeout_seconds
    });
    let payload = vec![0u8; cfg.packet_size];

    let client = match raw_client(target) {
        Ok(client) => client,
        Err(err) if is_permission_error(&err) => unprivileged_client(target)?,
        Err(err) => return Err(err.into()),
    };

    let start = Instant::now();
    let mut pinger = client.pinger(target, PingIdentifier(random())).await;
    pinger.timeout(timeout);

    let outcome = pinger.ping(PingSequence(0), &payload).await;
    let duration = start.elapsed();

    Ok(match outcome {
        Ok((_reply, rtt)) => ProbeResult::success(rtt),
        Err(SurgeError::Timeout { .. }) => ProbeResult::failure(
            duration,
            PingStatus::Timeout,
            "no reply received".to_string(),
        ),
        Err(err) => ProbeResult::failure(duration, PingStatus::Failed, err.to_string()),
    })
}

fn raw_client(target: IpAddr) -> io::Result<Client> {
    let kind = icmp_kind(target);
    let config = Config::builder()
        .kind(kind)
        .sock_type_hint(socket2::Type::RAW)
        .build();
    Client::new(&config)
}

fn unprivileged_client(target: IpAddr) -> io::Result<Client> {
    let kind = icmp_kind(target);
    let config = Config::builder()
        .kind(kind)
        .sock_type_hint(socket2::Type::DGRAM)
        .build();
    Client::new(&config)
}

fn icmp_kind(target: IpAddr) -> ICMP {
    match target {
        IpAddr::V4(_) => ICMP::V4,
        IpAddr::V6(_) => ICMP::V6,
    }
}

fn is_permission_error(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::PermissionDenied)
        || err.to_string().to_lowercase().contains("operation not permitted")
}

async fn resolve_host(host: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let host_with_port = format!("{host}:0");
    let resolved = tokio::task::spawn_blocking(move || {
        host_with_port
            .to_socket_addrs()
            .map(|mut addrs| addrs.next())
    })
    .await
    .map_err(|err| ProbeError::Socket(io::Error::other(err)))??;

    resolved.map(|addr| addr.ip()).ok_or_else(|| {
        ProbeError::Socket(io::Error::new(
            io::ErrorKind::NotFound,
            "dns resolution returned no addresses",
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn literal_addresses_skip_resolution() {
        let ip = resolve_host("127.0.0.1").await.unwrap();
        assert_eq!(ip, IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));

        let ip = resolve_host("::1").await.unwrap();
        assert!(ip.is_ipv6());
    }

    #[test]
    fn permission_errors_are_recognized() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(is_permission_error(&denied));

        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(!is_permission_error(&refused));
    }
}
