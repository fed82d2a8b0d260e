//! Central scheduler: claims due monitors every tick and fans them out to
//! the per-region queues.
//!
//! The claim is a read-and-commit; no transaction is held across enqueue.
//! A crash between enqueue and the batch update only causes a benign
//! duplicate enqueue on the next tick.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::Rng;
use sqlx::PgPool;
use tracing::{debug, error, info};

use crate::db::models::Monitor;
use crate::db::repository::scheduling;
use crate::queue::QueueClient;

const TICK_INTERVAL: Duration = Duration::from_secs(2);
const BATCH_SIZE: usize = 20;
const MAX_JITTER_SECS: f64 = 5.0;

/// Runs the scheduling loop forever. Operational errors skip the tick and
/// are retried two seconds later; nothing here terminates the process.
pub async fn run(pool: PgPool, queue: QueueClient) {
    info!("starting scheduler");

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(err) = tick(&pool, &queue).await {
            error!(error = %err, "scheduler tick failed");
        }
    }
}

async fn tick(pool: &PgPool, queue: &QueueClient) -> Result<(), sqlx::Error> {
    let due = {
        let mut tx = pool.begin().await?;
        let due = match scheduling::list_monitors_due_for_check(&mut tx).await {
            Ok(due) => due,
            Err(err) => {
                error!(error = %err, "failed to fetch due monitors");
                return Ok(());
            }
        };
        tx.commit().await?;
        due
    };

    if due.is_empty() {
        return Ok(());
    }
    debug!(count = due.len(), "fetched due monitors");

    let batches: Vec<&[Monitor]> = due.chunks(BATCH_SIZE).collect();
    join_all(
        batches
            .into_iter()
            .map(|batch| schedule_batch(pool, queue, batch)),
    )
    .await;

    Ok(())
}

/// Enqueues one task per `(monitor, region)` pair, then advances the whole
/// batch's scheduling state in a single short transaction.
async fn schedule_batch(pool: &PgPool, queue: &QueueClient, batch: &[Monitor]) {
    for monitor in batch {
        for &region_id in &monitor.region_ids {
            if let Err(err) = queue.enqueue_monitor_ping(monitor, region_id).await {
                error!(
                    monitor_id = monitor.id,
                    region_id,
                    error = %err,
                    "failed to enqueue monitor task"
                );
            }
        }
    }

    let now = Utc::now();
    let monitor_ids: Vec<i64> = batch.iter().map(|monitor| monitor.id).collect();
    let next_checks: Vec<DateTime<Utc>> =
        batch.iter().map(|monitor| next_check_at(now, monitor.interval)).collect();

    if let Err(err) = advance_batch(pool, &monitor_ids, &next_checks, now).await {
        error!(count = monitor_ids.len(), error = %err, "failed to advance batch schedule");
    }
}

async fn advance_batch(
    pool: &PgPool,
    monitor_ids: &[i64],
    next_checks: &[DateTime<Utc>],
    now: DateTime<Utc>,
) -> Result<(), crate::db::repository::RepoError> {
    let mut tx = pool.begin().await.map_err(crate::db::repository::RepoError::from)?;
    scheduling::batch_update_monitors_last_checked(&mut tx, monitor_ids, next_checks, now).await?;
    tx.commit().await.map_err(crate::db::repository::RepoError::from)
}

/// `now + interval + jitter`, strictly after the `last_checked` being
/// written alongside it.
fn next_check_at(now: DateTime<Utc>, interval_secs: i32) -> DateTime<Utc> {
    let interval = Duration::from_secs(interval_secs.max(0) as u64);
    now + interval + jitter(interval_secs)
}

/// Uniform jitter in `[0, min(interval * 0.3, 5s))`, spreading fleets of
/// same-interval monitors off a shared phase.
fn jitter(interval_secs: i32) -> Duration {
    let cap = (f64::from(interval_secs.max(0)) * 0.3).min(MAX_JITTER_SECS);
    if cap <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_under_the_five_second_cap() {
        for _ in 0..1000 {
            let jitter = jitter(60);
            assert!(jitter < Duration::from_secs(5));
        }
    }

    #[test]
    fn jitter_scales_with_short_intervals() {
        // 30% of a 10s interval is 3s, below the cap.
        for _ in 0..1000 {
            let jitter = jitter(10);
            assert!(jitter < Duration::from_secs(3));
        }
    }

    #[test]
    fn jitter_handles_degenerate_intervals() {
        assert_eq!(jitter(0), Duration::ZERO);
        assert_eq!(jitter(-5), Duration::ZERO);
    }

    #[test]
    fn next_check_is_within_jitter_bounds() {
        let now = Utc::now();
        for _ in 0..1000 {
            let next = next_check_at(now, 60);
            let delta = (next - now).num_milliseconds();
            assert!(delta >= 60_000, "next_check must not undershoot the interval");
            assert!(delta < 65_000, "jitter must cap at five seconds");
        }
    }

    #[test]
    fn next_check_always_advances_past_now() {
        let now = Utc::now();
        let next = next_check_at(now, 30);
        assert!(next > now);
    }
}
