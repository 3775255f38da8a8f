//! Consumer loops for the protocol and chores queues.
//!
//! The transport is behind `MessageSource`: in production a broker sidecar
//! feeds the process, in development stdin does (one JSON message per
//! line). Handling honors a soft timeout: a handler that exceeds it has
//! its transaction dropped and the message is requeued for redelivery.
//! Undecodable bodies are logged and dropped.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::watch;
use tracing::{error, info, warn};

use ledgerd_engine::Engine;
use ledgerd_protocol::{parse_chore, parse_inbound};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Soft per-message deadline, derived from the broker's redelivery
    /// visibility.
    pub handler_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self { handler_timeout: Duration::from_secs(30) }
    }
}

#[async_trait]
pub trait MessageSource: Send {
    /// The next delivery, or `None` when the source is closed.
    async fn recv(&mut self) -> Option<Vec<u8>>;

    /// Hands a delivery back for later redelivery (transient failure).
    async fn requeue(&mut self, body: Vec<u8>);
}

/// Reads one JSON message per line from stdin. Requeued messages are
/// retried before new input is read.
pub struct StdinSource {
    lines: tokio::io::Lines<BufReader<Stdin>>,
    requeued: VecDeque<Vec<u8>>,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            requeued: VecDeque::new(),
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSource for StdinSource {
    async fn recv(&mut self) -> Option<Vec<u8>> {
        if let Some(body) = self.requeued.pop_front() {
            return Some(body);
        }
        loop {
            match self.lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Some(line.into_bytes()),
                Ok(None) => return None,
                Err(err) => {
                    error!(error = %err, "stdin read failed");
                    return None;
                }
            }
        }
    }

    async fn requeue(&mut self, body: Vec<u8>) {
        // Brief pause so a persistent failure does not spin hot.
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.requeued.push_back(body);
    }
}

/// An mpsc-backed source, for tests and embedded use.
pub struct ChannelSource {
    tx: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
    rx: tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ChannelSource {
    pub fn new() -> Self {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn sender(&self) -> tokio::sync::mpsc::UnboundedSender<Vec<u8>> {
        self.tx.clone()
    }
}

impl Default for ChannelSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    async fn requeue(&mut self, body: Vec<u8>) {
        let _ = self.tx.send(body);
    }
}

/// Consumes protocol messages until the source closes or shutdown is
/// signalled.
pub async fn run_protocol_consumer(
    engine: Engine,
    mut source: impl MessageSource,
    config: ConsumerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("protocol consumer started");
    loop {
        let body = tokio::select! {
            body = source.recv() => body,
            _ = shutdown.changed() => {
                if *shutdown.borrow() { break; }
                continue;
            }
        };
        let Some(body) = body else { break };

        let message = match parse_inbound(&body) {
            Ok(message) => message,
            Err(err) => {
                error!(error = %err, "dropping an undecodable protocol message");
                continue;
            }
        };
        let handled =
            tokio::time::timeout(config.handler_timeout, engine.process_message(&message, Utc::now()))
                .await;
        match handled {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(
                    message_type = message.type_name(),
                    error = %err,
                    "message handling failed; requeueing for redelivery"
                );
                source.requeue(body).await;
            }
            Err(_) => {
                warn!(
                    message_type = message.type_name(),
                    "message handling timed out; requeueing for redelivery"
                );
                source.requeue(body).await;
            }
        }
    }
    info!("protocol consumer stopped");
}

/// Consumes chore messages until the source closes or shutdown is
/// signalled.
pub async fn run_chores_consumer(
    engine: Engine,
    mut source: impl MessageSource,
    config: ConsumerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("chores consumer started");
    loop {
        let body = tokio::select! {
            body = source.recv() => body,
            _ = shutdown.changed() => {
                if *shutdown.borrow() { break; }
                continue;
            }
        };
        let Some(body) = body else { break };

        let chore = match parse_chore(&body) {
            Ok(chore) => chore,
            Err(err) => {
                error!(error = %err, "dropping an undecodable chore message");
                continue;
            }
        };
        let handled =
            tokio::time::timeout(config.handler_timeout, engine.process_chore(&chore, Utc::now()))
                .await;
        match handled {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(chore_type = chore.type_name(), error = %err, "chore failed; requeueing");
                source.requeue(body).await;
            }
            Err(_) => {
                warn!(chore_type = chore.type_name(), "chore timed out; requeueing");
                source.requeue(body).await;
            }
        }
    }
    info!("chores consumer stopped");
}
