//! The broker boundary.
//!
//! The real AMQP client lives in a sidecar process; this service only
//! needs "publish these rows, in order, and tell me when they are safe to
//! delete". At-least-once is enough: every outgoing message is idempotent
//! on the receiving side.

use async_trait::async_trait;
use std::sync::Mutex;
use thiserror::Error;

use ledgerd_protocol::OutboxQueue;
use ledgerd_store::OutboxRow;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("broker publish failed: {0}")]
    Publish(String),
}

#[async_trait]
pub trait BrokerSink: Send + Sync {
    /// Publishes the rows in order. Returning `Ok` means the broker has
    /// acked all of them.
    async fn publish(&self, queue: OutboxQueue, rows: &[OutboxRow]) -> Result<(), SinkError>;
}

/// Collects published rows in memory. For tests.
#[derive(Debug, Default)]
pub struct InMemorySink {
    published: Mutex<Vec<(OutboxQueue, OutboxRow)>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(OutboxQueue, OutboxRow)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerSink for InMemorySink {
    async fn publish(&self, queue: OutboxQueue, rows: &[OutboxRow]) -> Result<(), SinkError> {
        let mut published = self.published.lock().unwrap();
        published.extend(rows.iter().map(|row| (queue, row.clone())));
        Ok(())
    }
}

/// Writes messages to stdout as JSON lines, one envelope per message. The
/// development transport: a sidecar (or a human) reads the stream.
#[derive(Debug, Default)]
pub struct StdoutSink;

#[async_trait]
impl BrokerSink for StdoutSink {
    async fn publish(&self, queue: OutboxQueue, rows: &[OutboxRow]) -> Result<(), SinkError> {
        use std::io::Write;
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for row in rows {
            let envelope = serde_json::json!({
                "queue": queue.as_str(),
                "exchange": row.exchange,
                "routing_key": row.routing_key,
                "message": row.payload,
            });
            writeln!(out, "{envelope}").map_err(|e| SinkError::Publish(e.to_string()))?;
        }
        out.flush().map_err(|e| SinkError::Publish(e.to_string()))?;
        Ok(())
    }
}
