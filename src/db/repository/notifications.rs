//! Operations the notification dispatch path depends on.

use sqlx::PgConnection;

use super::RepoError;
use crate::db::models::{Monitor, Notification};

/// Fetches a monitor scoped to its owning team, with its linked channel IDs.
/// Returns `None` when the monitor is gone or owned by a different team.
pub async fn get_monitor_by_id(
    conn: &mut PgConnection,
    team_id: i64,
    monitor_id: i64,
) -> Result<Option<Monitor>, RepoError> {
    const QUERY: &str = r#"
        SELECT
            m.id,
            m.team_id,
            m.name,
            m.type,
            m.config,
            m.interval,
            m.status,
            m.last_checked,
            m.next_check,
            m.failure_threshold,
            m.recovery_threshold,
            COALESCE(
                array_agg(mn.notification_id ORDER BY mn.id)
                    FILTER (WHERE mn.notification_id IS NOT NULL),
                '{}'
            ) AS notification_ids,
            m.updated_at,
            m.created_at
        FROM monitors m
        LEFT JOIN monitor_notifications mn ON m.id = mn.monitor_id
        WHERE m.id = $1 AND m.team_id = $2
        GROUP BY m.id
    "#;

    let monitor = sqlx::query_as::<_, Monitor>(QUERY)
        .bind(monitor_id)
        .bind(team_id)
        .fetch_optional(conn)
        .await?;

    Ok(monitor)
}

/// Fetches a notification channel scoped to its owning team.
pub async fn get_notification_by_id(
    conn: &mut PgConnection,
    team_id: i64,
    notification_id: i64,
) -> Result<Option<Notification>, RepoError> {
    const QUERY: &str = r#"
        SELECT id, team_id, type, name, config, updated_at, created_at
        FROM notifications
        WHERE id = $1 AND team_id = $2
    "#;

    let notification = sqlx::query_as::<_, Notification>(QUERY)
        .bind(notification_id)
        .bind(team_id)
        .fetch_optional(conn)
        .await?;

    Ok(notification)
}

/// Channel IDs linked to a monitor, in link order.
pub async fn get_notification_ids_by_monitor_id(
    conn: &mut PgConnection,
    monitor_id: i64,
) -> Result<Vec<i64>, RepoError> {
    const QUERY: &str = r#"
        SELECT notification_id
        FROM monitor_notifications
        WHERE monitor_id = $1
        ORDER BY id
    "#;

    let ids = sqlx::query_scalar::<_, i64>(QUERY)
        .bind(monitor_id)
        .fetch_all(conn)
        .await?;

    Ok(ids)
}
