//! Storage seam for the incident engine.
//!
//! The engine step depends on exactly these operations; the Postgres
//! implementation runs them against the step's open transaction, and tests
//! substitute an in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Acquire, PgConnection};

use crate::db::models::{
    EventTimeline, Incident, IncidentEventType, MonitorStatus, Ping,
};
use crate::db::repository::{incidents, pings};
use crate::ids;

use super::EngineError;

#[async_trait]
pub trait IncidentStore: Send {
    async fn get_open_incident(&mut self, monitor_id: i64) -> Result<Option<Incident>, EngineError>;

    /// Latest samples for `(monitor, region)`, newest first, at most `limit`.
    async fn recent_pings(
        &mut self,
        monitor_id: i64,
        region_id: i64,
        limit: i64,
    ) -> Result<Vec<Ping>, EngineError>;

    async fn update_monitor_status(
        &mut self,
        monitor_id: i64,
        status: MonitorStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    /// Atomically creates the incident, its monitor link and the opening
    /// timeline rows (`detected`, `notification_sent`). A concurrent open
    /// incident for the monitor surfaces as `RepoError::UniqueViolation`
    /// with no partial rows left behind.
    async fn create_incident_with_timeline(
        &mut self,
        incident: &Incident,
        monitor_id: i64,
        message: &str,
    ) -> Result<(), EngineError>;

    async fn mark_incident_resolved(
        &mut self,
        incident_id: i64,
        resolved_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    async fn get_last_event(
        &mut self,
        incident_id: i64,
    ) -> Result<Option<EventTimeline>, EngineError>;

    async fn append_event(
        &mut self,
        incident_id: i64,
        message: &str,
        event_type: IncidentEventType,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError>;
}

/// Postgres-backed store; borrows the engine step's transaction.
pub struct PgIncidentStore<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgIncidentStore<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl IncidentStore for PgIncidentStore<'_> {
    async fn get_open_incident(&mut self, monitor_id: i64) -> Result<Option<Incident>, EngineError> {
        Ok(incidents::get_open_incident_by_monitor_id(self.conn, monitor_id).await?)
    }

    async fn recent_pings(
        &mut self,
        monitor_id: i64,
        region_id: i64,
        limit: i64,
    ) -> Result<Vec<Ping>, EngineError> {
        Ok(
            pings::list_recent_pings_by_monitor_and_region(self.conn, monitor_id, region_id, limit)
                .await?,
        )
    }

    async fn update_monitor_status(
        &mut self,
        monitor_id: i64,
        status: MonitorStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        Ok(incidents::update_monitor_status(self.conn, monitor_id, status, updated_at).await?)
    }

    async fn create_incident_with_timeline(
        &mut self,
        incident: &Incident,
        monitor_id: i64,
        message: &str,
    ) -> Result<(), EngineError> {
        // A failed insert aborts the enclosing Postgres transaction, so the
        // whole creation runs under a savepoint and a unique violation rolls
        // back to it, leaving the outer transaction usable for the re-read.
        let mut savepoint = Acquire::begin(&mut *self.conn).await?;

        let outcome: Result<(), EngineError> = async {
            incidents::create_incident(&mut savepoint, incident).await?;
            incidents::create_incident_monitor(
                &mut savepoint,
                ids::next_id()?,
                incident.id,
                monitor_id,
            )
            .await?;
            insert_event(
                &mut savepoint,
                incident.id,
                message,
                IncidentEventType::Detected,
                incident.created_at,
            )
            .await?;
            insert_event(
                &mut savepoint,
                incident.id,
                message,
                IncidentEventType::NotificationSent,
                incident.created_at,
            )
            .await?;
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) => {
                savepoint.commit().await?;
                Ok(())
            }
            Err(err) => {
                savepoint.rollback().await?;
                Err(err)
            }
        }
    }

    async fn mark_incident_resolved(
        &mut self,
        incident_id: i64,
        resolved_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        Ok(incidents::mark_incident_resolved(self.conn, incident_id, resolved_at, updated_at).await?)
    }

    async fn get_last_event(
        &mut self,
        incident_id: i64,
    ) -> Result<Option<EventTimeline>, EngineError> {
        Ok(incidents::get_last_event_timeline(self.conn, incident_id).await?)
    }

    async fn append_event(
        &mut self,
        incident_id: i64,
        message: &str,
        event_type: IncidentEventType,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        insert_event(self.conn, incident_id, message, event_type, at).await
    }
}

async fn insert_event(
    conn: &mut PgConnection,
    incident_id: i64,
    message: &str,
    event_type: IncidentEventType,
    at: DateTime<Utc>,
) -> Result<(), EngineError> {
    let event = EventTimeline {
        id: ids::next_id()?,
        incident_id,
        created_by: None,
        message: message.to_string(),
        event_type,
        created_at: at,
        updated_at: at,
    };
    incidents::create_event_timeline(conn, &event).await?;
    Ok(())
}
