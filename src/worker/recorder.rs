//! Buffered ping recorder.
//!
//! `record` never blocks the probe path: samples go into a bounded channel
//! drained by a single flusher task that bulk-writes on size or time. A full
//! buffer spills into a dedicated one-off flush rather than dropping the
//! sample.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::db::models::Ping;
use crate::db::repository::{pings, RepoError};

const DEFAULT_FLUSH_SIZE: usize = 1000;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const FLUSH_DEADLINE: Duration = Duration::from_secs(5);

/// Destination of flushed batches. The Postgres sink is the production
/// implementation; tests substitute their own.
#[async_trait]
pub trait PingSink: Send + Sync + 'static {
    async fn flush(&self, batch: &[Ping]) -> Result<(), RepoError>;
}

/// Writes batches into the ping hypertable, one transaction per flush with a
/// fixed deadline so a stuck database cannot wedge the flusher.
pub struct PgPingSink {
    pool: PgPool,
}

impl PgPingSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PingSink for PgPingSink {
    async fn flush(&self, batch: &[Ping]) -> Result<(), RepoError> {
        let write = async {
            let mut tx = self.pool.begin().await.map_err(RepoError::Storage)?;
            pings::batch_insert_pings(&mut tx, batch).await?;
            tx.commit().await.map_err(RepoError::Storage)
        };

        match tokio::time::timeout(FLUSH_DEADLINE, write).await {
            Ok(result) => result,
            Err(_) => Err(RepoError::Timeout),
        }
    }
}

pub struct PingRecorder {
    tx: mpsc::Sender<Ping>,
    sink: Arc<dyn PingSink>,
    /// Present until `shutdown` takes it; the stop side tells the flusher to
    /// drain and exit so shutdown works through a shared reference.
    flusher: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl PingRecorder {
    pub fn new(sink: Arc<dyn PingSink>) -> Self {
        Self::with_config(sink, DEFAULT_FLUSH_SIZE, DEFAULT_FLUSH_INTERVAL)
    }

    pub fn with_config(sink: Arc<dyn PingSink>, flush_size: usize, interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(flush_size * 4);
        let (stop_tx, stop_rx) = oneshot::channel();
        let flusher = tokio::spawn(run_flusher(rx, stop_rx, sink.clone(), flush_size, interval));
        Self {
            tx,
            sink,
            flusher: Mutex::new(Some((stop_tx, flusher))),
        }
    }

    /// Hands a sample to the flusher without blocking. When the buffer is
    /// full the sample gets its own immediate flush; if that also fails it
    /// re-enters the buffer with backpressure so nothing is silently lost.
    pub async fn record(&self, ping: Ping) {
        let Err(err) = self.tx.try_send(ping) else {
            return;
        };

        match err {
            mpsc::error::TrySendError::Full(ping) => {
                let sink = self.sink.clone();
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    if sink.flush(std::slice::from_ref(&ping)).await.is_err() {
                        let _ = tx.send(ping).await;
                    }
                });
            }
            mpsc::error::TrySendError::Closed(_) => {
                error!("ping recorder is shut down, sample dropped");
            }
        }
    }

    /// Drains everything still buffered and stops the flusher. Called once
    /// on clean shutdown; later calls are no-ops and samples recorded after
    /// this are dropped.
    pub async fn shutdown(&self) {
        let Some((stop_tx, flusher)) = self.flusher.lock().await.take() else {
            return;
        };
        let _ = stop_tx.send(());
        let _ = flusher.await;
    }
}

async fn run_flusher(
    mut rx: mpsc::Receiver<Ping>,
    mut stop_rx: oneshot::Receiver<()>,
    sink: Arc<dyn PingSink>,
    flush_size: usize,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let flush_threshold = (flush_size * 4) / 5;
    let mut batch: Vec<Ping> = Vec::with_capacity(flush_size);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(ping) => {
                    batch.push(ping);
                    if batch.len() >= flush_threshold {
                        flush(sink.as_ref(), &mut batch).await;
                    }
                }
                None => {
                    flush(sink.as_ref(), &mut batch).await;
                    break;
                }
            },
            _ = ticker.tick() => {
                flush(sink.as_ref(), &mut batch).await;
            }
            // Also fires when the recorder is dropped without a shutdown.
            _ = &mut stop_rx => {
                while let Ok(ping) = rx.try_recv() {
                    batch.push(ping);
                }
                flush(sink.as_ref(), &mut batch).await;
                break;
            }
        }
    }
}

/// Failed batches stay buffered and ride along on the next wake-up.
async fn flush(sink: &dyn PingSink, batch: &mut Vec<Ping>) {
    if batch.is_empty() {
        return;
    }

    match sink.flush(batch).await {
        Ok(()) => {
            debug!(count = batch.len(), "flushed ping batch");
            batch.clear();
        }
        Err(err) => {
            error!(count = batch.len(), error = %err, "failed to flush ping batch");
        }
    }
}
