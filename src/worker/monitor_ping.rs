//! Handler for `monitor:ping:{region_id}` tasks.

use chrono::Utc;
use tracing::{error, warn};

use super::Worker;
use crate::db::models::{Monitor, Ping, PingStatus};
use crate::db::repository::{notifications, RepoError};
use crate::incident;
use crate::probe;
use crate::queue::{MonitorPingPayload, NotificationPayload, TaskEnvelope, TaskError};

impl Worker {
    /// Probes the monitor, records the sample and advances the incident
    /// state machine. Probe failures are data, not task failures: only an
    /// undecodable payload makes the task itself fail, and that is not
    /// retried.
    pub(super) async fn handle_monitor_ping(&self, task: &TaskEnvelope) -> Result<(), TaskError> {
        let payload: MonitorPingPayload = serde_json::from_value(task.payload.clone())?;

        let (ping, detail) = self.ping_monitor(&payload.monitor, payload.region).await;

        self.recorder.record(ping.clone()).await;

        match incident::process(&self.pool, &payload.monitor, &ping, payload.region, &detail).await
        {
            Ok(Some(message)) => {
                self.enqueue_notification_tasks(&payload.monitor, &ping, payload.region, &message)
                    .await;
            }
            Ok(None) => {}
            Err(err) => {
                // State is unchanged; the next probe re-evaluates from
                // scratch, so no retry here.
                error!(
                    monitor_id = payload.monitor.id,
                    region_id = payload.region,
                    error = %err,
                    "incident handling failed"
                );
            }
        }

        Ok(())
    }

    async fn ping_monitor(&self, monitor: &Monitor, region_id: i64) -> (Ping, String) {
        let mut ping = Ping {
            time: Utc::now(),
            monitor_id: monitor.id,
            region_id,
            latency: 0,
            status: PingStatus::Failed,
        };

        match probe::run(monitor).await {
            Ok(result) => {
                ping.status = result.status;
                ping.latency = clamp_latency_ms(result.duration.as_millis());
                (ping, result.message)
            }
            Err(err) => {
                warn!(
                    monitor_id = monitor.id,
                    region_id,
                    error = %err,
                    "monitor probe could not run"
                );
                (ping, err.to_string())
            }
        }
    }

    /// Fans one dispatch task out per channel linked to the monitor. Failing
    /// to enqueue is logged and skipped; the incident timeline already
    /// recorded the transition.
    async fn enqueue_notification_tasks(
        &self,
        monitor: &Monitor,
        ping: &Ping,
        region_id: i64,
        detail: &str,
    ) {
        let notification_ids = match self.load_notification_ids(monitor.id).await {
            Ok(ids) => ids,
            Err(err) => {
                error!(monitor_id = monitor.id, error = %err, "failed to fetch notification ids");
                return;
            }
        };

        for notification_id in notification_ids {
            let payload = NotificationPayload {
                team_id: monitor.team_id,
                monitor_id: monitor.id,
                notification_id,
                region_id,
                ping: ping.clone(),
                detail: Some(detail.to_string()),
            };

            if let Err(err) = self.queue.enqueue_notification(&payload).await {
                error!(
                    monitor_id = monitor.id,
                    notification_id,
                    error = %err,
                    "failed to enqueue notification task"
                );
            }
        }
    }

    async fn load_notification_ids(&self, monitor_id: i64) -> Result<Vec<i64>, RepoError> {
        let mut tx = self.pool.begin().await.map_err(RepoError::from)?;
        let ids = notifications::get_notification_ids_by_monitor_id(&mut tx, monitor_id).await?;
        tx.commit().await.map_err(RepoError::from)?;
        Ok(ids)
    }
}

fn clamp_latency_ms(millis: u128) -> i32 {
    millis.min(i32::MAX as u128) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_clamps_to_i32() {
        assert_eq!(clamp_latency_ms(0), 0);
        assert_eq!(clamp_latency_ms(1500), 1500);
        assert_eq!(clamp_latency_ms(u128::MAX), i32::MAX);
    }
}
