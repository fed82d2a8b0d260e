//! Region-bound worker runtime.
//!
//! One process consumes its region's monitor-ping queue plus the shared
//! `default` and `critical` queues, and drives the probe, recorder and
//! incident paths for every task.

mod monitor_ping;
mod notification_dispatch;
pub mod recorder;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{info, warn};

use crate::config;
use crate::queue::consumer::{QueueConsumer, TaskHandler};
use crate::queue::{
    QueueClient, QueueError, TaskEnvelope, TaskError, KIND_NOTIFICATION_DISPATCH, QUEUE_CRITICAL,
    QUEUE_DEFAULT,
};
use self::recorder::{PgPingSink, PingRecorder};

const MONITOR_PING_PREFIX: &str = "monitor:ping:";

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("APP_REGION {0:?} is not a known region")]
    UnknownRegion(String),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub struct Worker {
    pub(crate) pool: PgPool,
    pub(crate) queue: QueueClient,
    pub(crate) recorder: Arc<PingRecorder>,
    pub(crate) http: reqwest::Client,
}

impl Worker {
    pub fn new(pool: PgPool, queue: QueueClient, recorder: Arc<PingRecorder>) -> Self {
        Self {
            pool,
            queue,
            recorder,
            http: reqwest::Client::new(),
        }
    }
}

/// Builds the recorder a worker process records through. The process owner
/// keeps a handle so it can drain the buffer on shutdown.
pub fn new_recorder(pool: PgPool) -> Arc<PingRecorder> {
    Arc::new(PingRecorder::new(Arc::new(PgPingSink::new(pool))))
}

#[async_trait]
impl TaskHandler for Worker {
    async fn handle(&self, task: &TaskEnvelope) -> Result<(), TaskError> {
        if task.kind == KIND_NOTIFICATION_DISPATCH {
            self.handle_notification_dispatch(task).await
        } else if task.kind.starts_with(MONITOR_PING_PREFIX) {
            self.handle_monitor_ping(task).await
        } else {
            warn!(kind = %task.kind, "unknown task kind, dropping");
            Ok(())
        }
    }
}

/// Runs a worker bound to the region named by `APP_REGION`. Only returns on
/// an irrecoverable queue failure; the caller owns the recorder and drains
/// it when the process shuts down.
pub async fn run(
    pool: PgPool,
    queue: QueueClient,
    recorder: Arc<PingRecorder>,
) -> Result<(), WorkerError> {
    let cfg = config::get();
    let region = config::region_by_name(&cfg.app_region)
        .ok_or_else(|| WorkerError::UnknownRegion(cfg.app_region.clone()))?;

    info!(region = %region.name, region_id = region.id, "starting worker");

    let handler = Arc::new(Worker::new(pool, queue.clone(), recorder));
    let consumer = QueueConsumer::new(
        queue,
        vec![
            (region.id.to_string(), 6),
            (QUEUE_DEFAULT.to_string(), 3),
            (QUEUE_CRITICAL.to_string(), 1),
        ],
    );

    consumer.run(handler).await?;
    Ok(())
}
