//! Operations on the ping hypertable. Rows are append-only; nothing here
//! ever mutates an existing sample.

use sqlx::PgConnection;

use super::RepoError;
use crate::db::models::Ping;

/// Bulk-inserts a batch of samples in a single statement. The written row
/// count must equal the input length.
pub async fn batch_insert_pings(conn: &mut PgConnection, pings: &[Ping]) -> Result<(), RepoError> {
    if pings.is_empty() {
        return Ok(());
    }

    let mut times = Vec::with_capacity(pings.len());
    let mut monitor_ids = Vec::with_capacity(pings.len());
    let mut region_ids = Vec::with_capacity(pings.len());
    let mut latencies = Vec::with_capacity(pings.len());
    let mut statuses = Vec::with_capacity(pings.len());
    for ping in pings {
        times.push(ping.time);
        monitor_ids.push(ping.monitor_id);
        region_ids.push(ping.region_id);
        latencies.push(ping.latency);
        statuses.push(ping.status.as_str());
    }

    const QUERY: &str = r#"
        INSERT INTO pings (time, monitor_id, region_id, latency, status)
        SELECT *
        FROM unnest($1::timestamptz[], $2::bigint[], $3::bigint[], $4::int[], $5::text[])
    "#;

    let written = sqlx::query(QUERY)
        .bind(&times)
        .bind(&monitor_ids)
        .bind(&region_ids)
        .bind(&latencies)
        .bind(&statuses)
        .execute(conn)
        .await?
        .rows_affected();

    if written != pings.len() as u64 {
        return Err(RepoError::RowCountMismatch {
            expected: pings.len() as u64,
            written,
        });
    }

    Ok(())
}

/// Latest samples for a monitor in one region, newest first. The incident
/// engine's hysteresis windows are read through this.
pub async fn list_recent_pings_by_monitor_and_region(
    conn: &mut PgConnection,
    monitor_id: i64,
    region_id: i64,
    limit: i64,
) -> Result<Vec<Ping>, RepoError> {
    if limit <= 0 {
        return Ok(Vec::new());
    }

    const QUERY: &str = r#"
        SELECT time, monitor_id, region_id, latency, status
        FROM pings
        WHERE monitor_id = $1 AND region_id = $2
        ORDER BY time DESC
        LIMIT $3
    "#;

    let pings = sqlx::query_as::<_, Ping>(QUERY)
        .bind(monitor_id)
        .bind(region_id)
        .bind(limit)
        .fetch_all(conn)
        .await?;

    Ok(pings)
}
