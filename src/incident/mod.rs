//! Incident engine: a hysteresis state machine per monitor.
//!
//! Each probe completion runs one engine step inside a single transaction.
//! Decision logic lives in pure functions; storage goes through the
//! [`IncidentStore`] seam so the step itself is testable without Postgres.
//! Concurrency control is delegated entirely to the partial unique index on
//! open incidents: a `UniqueViolation` means another worker won the race
//! and is handled by re-reading.

mod store;

pub use self::store::{IncidentStore, PgIncidentStore};

use chrono::Utc;
use sqlx::PgPool;
use tracing::debug;

use crate::db::models::{
    Incident, IncidentEventType, IncidentStatus, Monitor, MonitorStatus, Ping, PingStatus,
};
use crate::db::repository::RepoError;
use crate::ids;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] RepoError),
    #[error(transparent)]
    Id(#[from] ids::IdError),
    #[error("transaction error: {0}")]
    Transaction(#[from] sqlx::Error),
}

/// Runs one engine step for a freshly recorded probe outcome, in its own
/// transaction. Returns the notification message when the step opened or
/// resolved an incident; the caller fans out dispatch tasks only after the
/// commit here has succeeded.
pub async fn process(
    pool: &PgPool,
    monitor: &Monitor,
    ping: &Ping,
    region_id: i64,
    detail: &str,
) -> Result<Option<String>, EngineError> {
    let mut tx = pool.begin().await?;

    let notify = {
        let mut store = PgIncidentStore::new(&mut tx);
        step(&mut store, monitor, ping, region_id, detail).await?
    };

    tx.commit().await?;
    Ok(notify)
}

/// One state-machine step against an already-open transaction.
pub async fn step<S: IncidentStore>(
    store: &mut S,
    monitor: &Monitor,
    ping: &Ping,
    region_id: i64,
    detail: &str,
) -> Result<Option<String>, EngineError> {
    let open_incident = store.get_open_incident(monitor.id).await?;

    // Aggregate status reflects the latest probe, independent of hysteresis.
    let target_status = if ping.status == PingStatus::Successful {
        MonitorStatus::Up
    } else {
        MonitorStatus::Down
    };
    if target_status != monitor.status {
        store
            .update_monitor_status(monitor.id, target_status, Utc::now())
            .await?;
    }

    if ping.status == PingStatus::Successful {
        handle_recovery(store, monitor, ping, region_id, detail, open_incident).await
    } else {
        handle_failure(store, monitor, ping, region_id, detail, open_incident).await
    }
}

async fn handle_failure<S: IncidentStore>(
    store: &mut S,
    monitor: &Monitor,
    ping: &Ping,
    region_id: i64,
    detail: &str,
    mut open_incident: Option<Incident>,
) -> Result<Option<String>, EngineError> {
    let threshold = monitor.failure_threshold.max(0) as usize;
    if threshold == 0 {
        return Ok(None);
    }

    let window = failure_window(threshold);
    let recent = store
        .recent_pings(monitor.id, region_id, window as i64 - 1)
        .await?;

    let mut samples = Vec::with_capacity(recent.len() + 1);
    samples.push(ping.clone());
    samples.extend(recent);

    let now = Utc::now();
    let message = incident_message(region_id, detail, ping.status);

    if should_open_incident(&samples, threshold) && open_incident.is_none() {
        let incident = Incident {
            id: ids::next_id()?,
            status: IncidentStatus::Detected,
            severity: 0,
            is_public: false,
            auto_resolve: true,
            started_at: ping.time,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        };

        match store
            .create_incident_with_timeline(&incident, monitor.id, &message)
            .await
        {
            Ok(()) => {
                debug!(monitor_id = monitor.id, incident_id = incident.id, "incident opened");
                return Ok(Some(message));
            }
            Err(EngineError::Storage(err)) if err.is_unique_violation() => {
                // Another worker created it concurrently; fall through to
                // the update path without notifying.
                open_incident = store.get_open_incident(monitor.id).await?;
            }
            Err(err) => return Err(err),
        }
    }

    if let Some(incident) = open_incident {
        let last_event = store.get_last_event(incident.id).await?;
        let unchanged = last_event
            .as_ref()
            .map(|event| event.message.trim() == message)
            .unwrap_or(false);

        if !unchanged {
            store
                .append_event(incident.id, &message, IncidentEventType::Update, now)
                .await?;
        }
    }

    Ok(None)
}

async fn handle_recovery<S: IncidentStore>(
    store: &mut S,
    monitor: &Monitor,
    ping: &Ping,
    region_id: i64,
    detail: &str,
    open_incident: Option<Incident>,
) -> Result<Option<String>, EngineError> {
    let Some(incident) = open_incident else {
        return Ok(None);
    };

    let threshold = monitor.recovery_threshold.max(0) as usize;
    if threshold == 0 {
        return Ok(None);
    }

    let recent = store
        .recent_pings(monitor.id, region_id, threshold as i64 - 1)
        .await?;

    let mut samples = Vec::with_capacity(recent.len() + 1);
    samples.push(ping.clone());
    samples.extend(recent);

    if !recovery_complete(&samples, threshold) {
        return Ok(None);
    }

    let now = Utc::now();
    let message = incident_message_with_fallback(region_id, detail, "recovered");

    store.mark_incident_resolved(incident.id, ping.time, now).await?;
    store
        .append_event(incident.id, &message, IncidentEventType::AutoResolved, now)
        .await?;

    debug!(monitor_id = monitor.id, incident_id = incident.id, "incident auto-resolved");
    Ok(Some(message))
}

/// Detection window: half again the failure threshold, rounded up.
pub fn failure_window(failure_threshold: usize) -> usize {
    failure_threshold + failure_threshold.div_ceil(2)
}

/// Counts non-successful samples among the first `window` entries.
pub fn count_failures(samples: &[Ping], window: usize) -> usize {
    samples
        .iter()
        .take(window)
        .filter(|ping| ping.status != PingStatus::Successful)
        .count()
}

/// True when the newest-first sample window justifies opening an incident.
pub fn should_open_incident(samples: &[Ping], failure_threshold: usize) -> bool {
    if failure_threshold == 0 || samples.len() < failure_threshold {
        return false;
    }
    count_failures(samples, failure_window(failure_threshold)) >= failure_threshold
}

/// True when the last `recovery_threshold` samples are all successful.
pub fn recovery_complete(samples: &[Ping], recovery_threshold: usize) -> bool {
    if recovery_threshold == 0 || samples.len() < recovery_threshold {
        return false;
    }
    samples
        .iter()
        .take(recovery_threshold)
        .all(|ping| ping.status == PingStatus::Successful)
}

/// `"<region_id>: <detail or status>"`, the message stored on timeline rows
/// and sent to channels.
pub fn incident_message(region_id: i64, detail: &str, status: PingStatus) -> String {
    incident_message_with_fallback(region_id, detail, status.as_str())
}

fn incident_message_with_fallback(region_id: i64, detail: &str, fallback: &str) -> String {
    let detail = detail.trim();
    let body = if detail.is_empty() {
        fallback.trim()
    } else {
        detail
    };
    let body = if body.is_empty() { "status unknown" } else { body };
    format!("{region_id}: {body}")
}
