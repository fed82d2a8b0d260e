//! Weighted queue consumer.
//!
//! Queues are drained in proportion to their weights by cycling through a
//! schedule built from them. Popped tasks are parked on a per-queue
//! processing list and acknowledged with `LREM` once the handler settles, so
//! tasks survive a worker crash; leftovers are swept back on startup.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use super::{processing_key, queue_key, QueueClient, QueueError, TaskEnvelope, TaskError};

/// Upper bound on in-flight tasks per worker process.
pub const MAX_IN_FLIGHT: usize = 10_000;

const IDLE_POLL: Duration = Duration::from_millis(500);
const PROMOTE_INTERVAL: Duration = Duration::from_secs(1);
const RETRY_BACKOFF_CAP_SECS: u64 = 60;

#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, task: &TaskEnvelope) -> Result<(), TaskError>;
}

pub struct QueueConsumer {
    client: QueueClient,
    /// `(queue name, weight)`, weights decide the drain ratio.
    queues: Vec<(String, u32)>,
    in_flight: Arc<Semaphore>,
}

impl QueueConsumer {
    pub fn new(client: QueueClient, queues: Vec<(String, u32)>) -> Self {
        Self {
            client,
            queues,
            in_flight: Arc::new(Semaphore::new(MAX_IN_FLIGHT)),
        }
    }

    /// Consumes forever. Operational errors are logged and retried; this
    /// only returns if the redis connection is irrecoverably gone.
    pub async fn run<H: TaskHandler>(&self, handler: Arc<H>) -> Result<(), QueueError> {
        self.requeue_orphans().await?;

        let schedule = weighted_schedule(&self.queues);
        let mut cursor = 0usize;
        let mut drained_streak = 0usize;
        let mut last_promote = tokio::time::Instant::now();

        loop {
            if last_promote.elapsed() >= PROMOTE_INTERVAL {
                last_promote = tokio::time::Instant::now();
                for (queue, _) in &self.queues {
                    if let Err(err) = self.client.promote_due(queue).await {
                        error!(error = %err, queue = %queue, "failed to promote delayed tasks");
                    }
                }
            }

            let queue = &schedule[cursor % schedule.len()];
            cursor = cursor.wrapping_add(1);

            match self.pop(queue).await {
                Ok(Some(raw)) => {
                    drained_streak = 0;
                    self.dispatch(queue.clone(), raw, handler.clone()).await;
                }
                Ok(None) => {
                    drained_streak += 1;
                    if drained_streak >= schedule.len() {
                        drained_streak = 0;
                        tokio::time::sleep(IDLE_POLL).await;
                    }
                }
                Err(err) => {
                    error!(error = %err, queue = %queue, "queue pop failed");
                    tokio::time::sleep(IDLE_POLL).await;
                }
            }
        }
    }

    /// Moves one task from the queue onto its processing list.
    async fn pop(&self, queue: &str) -> Result<Option<String>, QueueError> {
        let mut conn = self.client.manager();
        let raw: Option<String> = conn
            .lmove(
                queue_key(queue),
                processing_key(queue),
                redis::Direction::Right,
                redis::Direction::Left,
            )
            .await?;
        Ok(raw)
    }

    async fn dispatch<H: TaskHandler>(&self, queue: String, raw: String, handler: Arc<H>) {
        let permit = match self.in_flight.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let client = self.client.clone();
        tokio::spawn(async move {
            let _permit = permit;
            process_one(client, &queue, raw, handler.as_ref()).await;
        });
    }

    /// Sweeps tasks a previous process left mid-flight back onto the queue.
    async fn requeue_orphans(&self) -> Result<(), QueueError> {
        let mut conn = self.client.manager();
        for (queue, _) in &self.queues {
            let mut swept = 0u64;
            loop {
                let moved: Option<String> = conn
                    .lmove(
                        processing_key(queue),
                        queue_key(queue),
                        redis::Direction::Right,
                        redis::Direction::Left,
                    )
                    .await?;
                if moved.is_none() {
                    break;
                }
                swept += 1;
            }
            if swept > 0 {
                warn!(queue = %queue, count = swept, "requeued tasks from a previous run");
            }
        }
        Ok(())
    }
}

async fn process_one<H: TaskHandler>(client: QueueClient, queue: &str, raw: String, handler: &H) {
    let envelope: TaskEnvelope = match serde_json::from_str(&raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            // Malformed frames cannot be retried into anything better.
            error!(error = %err, queue, "dropping undecodable task frame");
            ack(client.manager(), queue, &raw).await;
            return;
        }
    };

    let deadline = Duration::from_secs(envelope.timeout_secs.max(1));
    let outcome = match tokio::time::timeout(deadline, handler.handle(&envelope)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(TaskError::DeadlineExceeded),
    };

    match outcome {
        Ok(()) => {
            debug!(task_id = envelope.id, kind = %envelope.kind, "task done");
        }
        Err(err) if err.is_retryable() && envelope.attempt < envelope.max_retries => {
            let retry = TaskEnvelope {
                attempt: envelope.attempt + 1,
                ..envelope
            };
            let delay = retry_backoff(retry.attempt);
            warn!(
                task_id = retry.id,
                kind = %retry.kind,
                attempt = retry.attempt,
                delay_secs = delay.as_secs(),
                error = %err,
                "task failed, scheduling retry"
            );

            let fire_at = Utc::now() + delay;
            if let Err(err) = client.enqueue_delayed(queue, &retry, fire_at).await {
                error!(task_id = retry.id, error = %err, "failed to park task for retry");
            }
        }
        Err(err) => {
            // Exhausted or non-retryable: record and drop, the next probe
            // cycle supersedes whatever this task would have done.
            error!(task_id = envelope.id, kind = %envelope.kind, error = %err, "task abandoned");
        }
    }

    ack(client.manager(), queue, &raw).await;
}

async fn ack(mut conn: ConnectionManager, queue: &str, raw: &str) {
    let removed: Result<i64, _> = conn.lrem(processing_key(queue), 1, raw).await;
    if let Err(err) = removed {
        error!(error = %err, queue, "failed to ack task");
    }
}

fn retry_backoff(attempt: u32) -> Duration {
    let secs = 2u64.saturating_pow(attempt).min(RETRY_BACKOFF_CAP_SECS);
    Duration::from_secs(secs)
}

/// Expands `[(q, w)]` into a drain schedule, e.g. weights 6/3/1 yield a ten
/// slot cycle.
fn weighted_schedule(queues: &[(String, u32)]) -> Vec<String> {
    let mut schedule = Vec::new();
    for (queue, weight) in queues {
        for _ in 0..(*weight).max(1) {
            schedule.push(queue.clone());
        }
    }
    if schedule.is_empty() {
        schedule.push(super::QUEUE_DEFAULT.to_string());
    }
    schedule
}
