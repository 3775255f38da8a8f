//! Outbox flusher: ships decided-but-undelivered messages to the broker.
//!
//! One worker per queue. Each worker reads the oldest batch in insertion
//! order, publishes it, and deletes the rows only after the sink reports
//! broker ack. A crash between publish and delete re-publishes the batch,
//! which receivers tolerate.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use ledgerd_protocol::OutboxQueue;
use ledgerd_store::LedgerStore;

use crate::sink::BrokerSink;

#[derive(Debug, Clone)]
pub struct FlusherConfig {
    /// Idle pause between polls of an empty queue.
    pub period: Duration,
    pub batch_size: i64,
}

impl Default for FlusherConfig {
    fn default() -> Self {
        Self { period: Duration::from_secs(2), batch_size: 10_000 }
    }
}

/// Publishes one batch from one queue. Returns the number of rows shipped.
pub async fn flush_queue_once(
    store: &dyn LedgerStore,
    sink: &dyn BrokerSink,
    queue: OutboxQueue,
    batch_size: i64,
) -> Result<u64, String> {
    let rows = store.outbox_batch(queue, batch_size).await.map_err(|e| e.to_string())?;
    if rows.is_empty() {
        return Ok(0);
    }
    sink.publish(queue, &rows).await.map_err(|e| e.to_string())?;
    let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
    store.outbox_ack(queue, &ids).await.map_err(|e| e.to_string())?;
    debug!(queue = queue.as_str(), count = ids.len(), "flushed outbox batch");
    Ok(ids.len() as u64)
}

async fn run_queue_worker(
    store: Arc<dyn LedgerStore>,
    sink: Arc<dyn BrokerSink>,
    queue: OutboxQueue,
    config: FlusherConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        match flush_queue_once(store.as_ref(), sink.as_ref(), queue, config.batch_size).await {
            Ok(count) if count > 0 => {
                // More rows may be waiting; keep draining.
                continue;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(queue = queue.as_str(), error = %err, "outbox flush failed; will retry");
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(config.period) => {}
            _ = shutdown.changed() => {}
        }
        if *shutdown.borrow() {
            break;
        }
    }
}

/// Runs one worker per outbox queue until shutdown.
pub async fn run_flusher(
    store: Arc<dyn LedgerStore>,
    sink: Arc<dyn BrokerSink>,
    config: FlusherConfig,
    shutdown: watch::Receiver<bool>,
) {
    info!("outbox flusher started");
    let mut workers = JoinSet::new();
    for queue in OutboxQueue::ALL {
        workers.spawn(run_queue_worker(
            store.clone(),
            sink.clone(),
            queue,
            config.clone(),
            shutdown.clone(),
        ));
    }
    while workers.join_next().await.is_some() {}
    info!("outbox flusher stopped");
}
