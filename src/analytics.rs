//! Read-only view over the database-maintained rollups of the ping
//! hypertable. The status-page path computes SLI from these; the core never
//! writes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};

use crate::db::repository::RepoError;

/// One 30-minute bucket from the `monitor_30min_summary` continuous
/// aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MonitorAnalyticsBucket {
    pub bucket: DateTime<Utc>,
    pub region_id: i64,
    pub monitor_id: i64,
    pub total_count: i64,
    pub good_count: i64,
    pub p50_ms: f64,
    pub p75_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// One day of availability counts for a monitor.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MonitorDailySummary {
    pub monitor_id: i64,
    pub day: DateTime<Utc>,
    pub total_count: i64,
    pub good_count: i64,
}

pub async fn list_analytics_buckets(
    pool: &PgPool,
    monitor_id: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<MonitorAnalyticsBucket>, RepoError> {
    const QUERY: &str = r#"
        SELECT bucket, region_id, monitor_id, total_count, good_count,
               p50_ms, p75_ms, p90_ms, p95_ms, p99_ms
        FROM monitor_30min_summary
        WHERE monitor_id = $1 AND bucket >= $2 AND bucket < $3
        ORDER BY bucket ASC
    "#;

    let buckets = sqlx::query_as::<_, MonitorAnalyticsBucket>(QUERY)
        .bind(monitor_id)
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await?;

    Ok(buckets)
}

pub async fn list_daily_summaries(
    pool: &PgPool,
    monitor_id: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<MonitorDailySummary>, RepoError> {
    const QUERY: &str = r#"
        SELECT monitor_id, day, total_count, good_count
        FROM monitor_daily_summary
        WHERE monitor_id = $1 AND day >= $2 AND day < $3
        ORDER BY day ASC
    "#;

    let summaries = sqlx::query_as::<_, MonitorDailySummary>(QUERY)
        .bind(monitor_id)
        .bind(from)
        .bind(to)
        .fetch_all(pool)
        .await?;

    Ok(summaries)
}
