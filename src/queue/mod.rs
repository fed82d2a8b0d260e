//! Redis-backed task queue.
//!
//! Tasks are JSON envelopes on per-queue lists. Monitor pings go to the
//! queue named after their region ID; notification dispatch shares the
//! `default` queue; `critical` is reserved for operational use. A popped
//! task is parked on a processing list until acknowledged, so a worker
//! crash redelivers it on the next startup.

pub mod consumer;

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::models::{Monitor, Ping};
use crate::db::repository::RepoError;
use crate::ids;
use crate::notify::SenderError;

pub const QUEUE_DEFAULT: &str = "default";
pub const QUEUE_CRITICAL: &str = "critical";

pub const KIND_NOTIFICATION_DISPATCH: &str = "notification:dispatch";

/// Every task carries this deadline; probe timeouts apply beneath it.
pub const TASK_TIMEOUT_SECS: u64 = 120;

const DEFAULT_MAX_RETRIES: u32 = 5;

/// Task kind for a monitor ping bound to one region.
pub fn monitor_ping_kind(region_id: i64) -> String {
    format!("monitor:ping:{region_id}")
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("encode task payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Id(#[from] ids::IdError),
}

/// Why a task handler gave up, and whether the queue should try again.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("invalid task payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] RepoError),
    #[error(transparent)]
    Dispatch(#[from] SenderError),
    #[error("task deadline exceeded")]
    DeadlineExceeded,
}

impl TaskError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::InvalidPayload(_) => false,
            TaskError::Dispatch(SenderError::InvalidConfiguration(_)) => false,
            TaskError::Dispatch(SenderError::EmailNotImplemented) => false,
            TaskError::Storage(_) | TaskError::Dispatch(_) | TaskError::DeadlineExceeded => true,
        }
    }
}

/// Wire envelope for every queued task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEnvelope {
    pub id: i64,
    pub kind: String,
    pub payload: serde_json::Value,
    pub timeout_secs: u64,
    pub attempt: u32,
    pub max_retries: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Payload of `monitor:ping:{region_id}` tasks: the full monitor snapshot
/// plus the region the probe must run from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorPingPayload {
    pub monitor: Monitor,
    pub region: i64,
}

/// Payload of `notification:dispatch` tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationPayload {
    pub team_id: i64,
    pub monitor_id: i64,
    pub notification_id: i64,
    pub region_id: i64,
    pub ping: Ping,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub(crate) fn queue_key(queue: &str) -> String {
    format!("knocker:queue:{queue}")
}

pub(crate) fn processing_key(queue: &str) -> String {
    format!("knocker:processing:{queue}")
}

pub(crate) fn delayed_key(queue: &str) -> String {
    format!("knocker:delayed:{queue}")
}

/// Enqueue side of the queue. Cheap to clone; shares one multiplexed
/// connection.
#[derive(Clone)]
pub struct QueueClient {
    manager: ConnectionManager,
}

impl QueueClient {
    pub async fn connect(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }

    pub fn from_manager(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    pub(crate) fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Enqueues a monitor ping task on the region's queue.
    pub async fn enqueue_monitor_ping(
        &self,
        monitor: &Monitor,
        region_id: i64,
    ) -> Result<(), QueueError> {
        let payload = MonitorPingPayload {
            monitor: monitor.clone(),
            region: region_id,
        };
        let envelope = self.envelope(monitor_ping_kind(region_id), serde_json::to_value(&payload)?)?;
        self.push(&region_id.to_string(), &envelope).await
    }

    /// Enqueues a notification dispatch task on the shared default queue.
    pub async fn enqueue_notification(&self, payload: &NotificationPayload) -> Result<(), QueueError> {
        let envelope = self.envelope(
            KIND_NOTIFICATION_DISPATCH.to_string(),
            serde_json::to_value(payload)?,
        )?;
        self.push(QUEUE_DEFAULT, &envelope).await
    }

    /// Parks a failed task on the delayed set until its retry time. The set
    /// survives worker crashes; consumers promote due members back onto the
    /// queue.
    pub(crate) async fn enqueue_delayed(
        &self,
        queue: &str,
        envelope: &TaskEnvelope,
        fire_at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let body = serde_json::to_string(envelope)?;
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .zadd(delayed_key(queue), body, fire_at.timestamp_millis())
            .await?;
        debug!(
            task_id = envelope.id,
            kind = %envelope.kind,
            queue,
            attempt = envelope.attempt,
            "task parked for retry"
        );
        Ok(())
    }

    /// Moves delayed tasks whose retry time has passed back onto the queue.
    /// Safe to run from many consumers: the `ZREM` decides a single winner
    /// per member.
    pub(crate) async fn promote_due(&self, queue: &str) -> Result<u64, QueueError> {
        let mut conn = self.manager.clone();
        let now = Utc::now().timestamp_millis();

        let due: Vec<String> = conn
            .zrangebyscore_limit(delayed_key(queue), 0, now, 0, 100)
            .await?;

        let mut promoted = 0u64;
        for body in due {
            let removed: i64 = conn.zrem(delayed_key(queue), &body).await?;
            if removed == 0 {
                continue;
            }
            let _: i64 = conn.lpush(queue_key(queue), &body).await?;
            promoted += 1;
        }

        Ok(promoted)
    }

    fn envelope(&self, kind: String, payload: serde_json::Value) -> Result<TaskEnvelope, QueueError> {
        Ok(TaskEnvelope {
            id: ids::next_id()?,
            kind,
            payload,
            timeout_secs: TASK_TIMEOUT_SECS,
            attempt: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            enqueued_at: Utc::now(),
        })
    }

    async fn push(&self, queue: &str, envelope: &TaskEnvelope) -> Result<(), QueueError> {
        let body = serde_json::to_string(envelope)?;
        let mut conn = self.manager.clone();
        let _: i64 = conn.lpush(queue_key(queue), body).await?;
        debug!(task_id = envelope.id, kind = %envelope.kind, queue, "task enqueued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{MonitorStatus, MonitorType, PingStatus};

    fn monitor() -> Monitor {
        Monitor {
            id: 42,
            team_id: 7,
            name: "api".to_string(),
            monitor_type: MonitorType::Http,
            config: serde_json::json!({ "url": "https://example.com" }),
            interval: 60,
            status: MonitorStatus::Up,
            last_checked: Utc::now(),
            next_check: Utc::now(),
            failure_threshold: 3,
            recovery_threshold: 2,
            region_ids: vec![1, 2],
            notification_ids: vec![],
            updated_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn monitor_ping_kind_embeds_region() {
        assert_eq!(monitor_ping_kind(12), "monitor:ping:12");
    }

    #[test]
    fn monitor_ping_payload_round_trips() {
        let payload = MonitorPingPayload {
            monitor: monitor(),
            region: 2,
        };
        let encoded = serde_json::to_string(&payload).unwrap();
        let decoded: MonitorPingPayload = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn notification_payload_round_trips_without_detail() {
        let payload = NotificationPayload {
            team_id: 7,
            monitor_id: 42,
            notification_id: 9,
            region_id: 2,
            ping: Ping {
                time: Utc::now(),
                monitor_id: 42,
                region_id: 2,
                latency: 120,
                status: PingStatus::Failed,
            },
            detail: None,
        };
        let encoded = serde_json::to_value(&payload).unwrap();
        assert!(encoded.get("detail").is_none());
        let decoded: NotificationPayload = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn retry_policy_follows_error_kind() {
        let invalid: TaskError =
            serde_json::from_str::<TaskEnvelope>("not json").unwrap_err().into();
        assert!(!invalid.is_retryable());

        assert!(TaskError::DeadlineExceeded.is_retryable());
        assert!(TaskError::Dispatch(SenderError::SendFailed("502".to_string())).is_retryable());
        assert!(!TaskError::Dispatch(SenderError::EmailNotImplemented).is_retryable());
    }
}
