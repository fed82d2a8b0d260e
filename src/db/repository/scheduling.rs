//! Operations the scheduler depends on.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use super::RepoError;
use crate::db::models::Monitor;

/// Fetches every monitor whose `next_check` has elapsed, oldest first,
/// together with its region fan-out set.
pub async fn list_monitors_due_for_check(conn: &mut PgConnection) -> Result<Vec<Monitor>, RepoError> {
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
                array_agg(mr.region_id ORDER BY mr.region_id)
                    FILTER (WHERE mr.region_id IS NOT NULL),
                '{}'
            ) AS region_ids,
            m.updated_at,
            m.created_at
        FROM monitors m
        LEFT JOIN monitor_regions mr ON m.id = mr.monitor_id
        WHERE m.next_check <= NOW()
        GROUP BY m.id
        ORDER BY m.next_check ASC
    "#;

    let monitors = sqlx::query_as::<_, Monitor>(QUERY).fetch_all(conn).await?;
    Ok(monitors)
}

/// Advances scheduling state for a batch in one statement. Each monitor gets
/// its own `next_check`; `last_checked` is shared. The two slices are
/// positionally paired via unnest.
pub async fn batch_update_monitors_last_checked(
    conn: &mut PgConnection,
    monitor_ids: &[i64],
    next_checks: &[DateTime<Utc>],
    last_checked: DateTime<Utc>,
) -> Result<(), RepoError> {
    if monitor_ids.is_empty() {
        return Ok(());
    }

    if monitor_ids.len() != next_checks.len() {
        return Err(RepoError::RowCountMismatch {
            expected: monitor_ids.len() as u64,
            written: next_checks.len() as u64,
        });
    }

    const QUERY: &str = r#"
        UPDATE monitors AS m
        SET
            last_checked = $1,
            next_check   = data.next_check
        FROM (
            SELECT
                unnest($2::bigint[])      AS id,
                unnest($3::timestamptz[]) AS next_check
        ) AS data
        WHERE m.id = data.id
    "#;

    sqlx::query(QUERY)
        .bind(last_checked)
        .bind(monitor_ids)
        .bind(next_checks)
        .execute(conn)
        .await?;

    Ok(())
}
