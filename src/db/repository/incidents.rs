//! Operations the incident engine depends on. The partial unique index on
//! open incidents (via `incident_monitors`) is the concurrency source of
//! truth; callers must treat `UniqueViolation` as an expected outcome.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use super::RepoError;
use crate::db::models::{EventTimeline, Incident, MonitorStatus};

/// Latest non-resolved incident touching a monitor, if any.
pub async fn get_open_incident_by_monitor_id(
    conn: &mut PgConnection,
    monitor_id: i64,
) -> Result<Option<Incident>, RepoError> {
    const QUERY: &str = r#"
        SELECT i.id, i.status, i.severity, i.is_public, i.auto_resolve,
               i.started_at, i.resolved_at, i.created_at, i.updated_at
        FROM incidents i
        INNER JOIN incident_monitors im ON im.incident_id = i.id
        WHERE im.monitor_id = $1
          AND i.status <> 'resolved'
        ORDER BY i.started_at DESC, i.id DESC
        LIMIT 1
    "#;

    let incident = sqlx::query_as::<_, Incident>(QUERY)
        .bind(monitor_id)
        .fetch_optional(conn)
        .await?;

    Ok(incident)
}

pub async fn create_incident(conn: &mut PgConnection, incident: &Incident) -> Result<(), RepoError> {
    const QUERY: &str = r#"
        INSERT INTO incidents (id, status, severity, is_public, auto_resolve,
                               started_at, resolved_at, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
    "#;

    sqlx::query(QUERY)
        .bind(incident.id)
        .bind(incident.status.as_str())
        .bind(incident.severity)
        .bind(incident.is_public)
        .bind(incident.auto_resolve)
        .bind(incident.started_at)
        .bind(incident.resolved_at)
        .bind(incident.created_at)
        .bind(incident.updated_at)
        .execute(conn)
        .await?;

    Ok(())
}

/// Links an incident to an affected monitor. The partial unique index lives
/// on this table, so a concurrent open surfaces here as `UniqueViolation`.
pub async fn create_incident_monitor(
    conn: &mut PgConnection,
    junction_id: i64,
    incident_id: i64,
    monitor_id: i64,
) -> Result<(), RepoError> {
    const QUERY: &str = r#"
        INSERT INTO incident_monitors (id, incident_id, monitor_id)
        VALUES ($1, $2, $3)
    "#;

    sqlx::query(QUERY)
        .bind(junction_id)
        .bind(incident_id)
        .bind(monitor_id)
        .execute(conn)
        .await?;

    Ok(())
}

/// Closes an incident. The junction rows flip to `resolved` in the same
/// call so the partial unique index frees the monitor for future incidents.
pub async fn mark_incident_resolved(
    conn: &mut PgConnection,
    incident_id: i64,
    resolved_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
) -> Result<(), RepoError> {
    const QUERY: &str = r#"
        UPDATE incidents
        SET status = 'resolved',
            resolved_at = $2,
            updated_at = $3
        WHERE id = $1
    "#;

    sqlx::query(QUERY)
        .bind(incident_id)
        .bind(resolved_at)
        .bind(updated_at)
        .execute(&mut *conn)
        .await?;

    sqlx::query("UPDATE incident_monitors SET resolved = TRUE WHERE incident_id = $1")
        .bind(incident_id)
        .execute(conn)
        .await?;

    Ok(())
}

pub async fn create_event_timeline(
    conn: &mut PgConnection,
    event: &EventTimeline,
) -> Result<(), RepoError> {
    const QUERY: &str = r#"
        INSERT INTO event_timelines (id, event_id, created_by, message, event_type,
                                     created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
    "#;

    sqlx::query(QUERY)
        .bind(event.id)
        .bind(event.incident_id)
        .bind(event.created_by)
        .bind(&event.message)
        .bind(event.event_type.as_str())
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(conn)
        .await?;

    Ok(())
}

/// Most recent timeline entry for an incident.
pub async fn get_last_event_timeline(
    conn: &mut PgConnection,
    incident_id: i64,
) -> Result<Option<EventTimeline>, RepoError> {
    const QUERY: &str = r#"
        SELECT id, event_id, created_by, message, event_type, created_at, updated_at
        FROM event_timelines
        WHERE event_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT 1
    "#;

    let event = sqlx::query_as::<_, EventTimeline>(QUERY)
        .bind(incident_id)
        .fetch_optional(conn)
        .await?;

    Ok(event)
}

/// Writes the monitor's aggregate up/down status.
pub async fn update_monitor_status(
    conn: &mut PgConnection,
    monitor_id: i64,
    status: MonitorStatus,
    updated_at: DateTime<Utc>,
) -> Result<(), RepoError> {
    const QUERY: &str = r#"
        UPDATE monitors
        SET status = $2,
            updated_at = $3
        WHERE id = $1
    "#;

    sqlx::query(QUERY)
        .bind(monitor_id)
        .bind(status.as_str())
        .bind(updated_at)
        .execute(conn)
        .await?;

    Ok(())
}
