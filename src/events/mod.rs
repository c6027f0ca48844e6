//! Event source adapter: decodes usage events delivered by the external
//! pub/sub transport and appends them to the raw event store.
//!
//! The broker client itself lives outside this crate; it hands serialized
//! payloads to a [`ChannelEventSource`] and the [`IngestWorker`] does the
//! rest. Redelivered duplicates are tolerated downstream via idempotent
//! window materialization.

use crate::storage::RawEventStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{error, info, warn};

/// A single usage event as attributed to a user and a served resource.
///
/// Immutable once stored. Retention is governed by the cleanup job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    pub user_id: String,
    pub resource_id: String,
    pub token_count: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("negative token count: {0}")]
    NegativeTokenCount(i64),
    #[error("empty {0} id")]
    EmptyId(&'static str),
}

impl DecodeError {
    /// Stable label used for the dropped-event metrics counter.
    pub fn reason(&self) -> &'static str {
        match self {
            DecodeError::Malformed(_) => "malformed",
            DecodeError::NegativeTokenCount(_) => "negative_token_count",
            DecodeError::EmptyId(_) => "empty_id",
        }
    }
}

/// Wire shape of a usage event message.
///
/// Token counts arrive as signed integers so that a negative count can be
/// rejected with a specific reason instead of a generic serde error.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    user_id: String,
    resource_id: String,
    token_count: i64,
    timestamp: DateTime<Utc>,
}

/// Decode and validate a serialized usage event payload.
pub fn decode_event(payload: &[u8]) -> Result<UsageEvent, DecodeError> {
    let wire: WireEvent = serde_json::from_slice(payload)?;

    if wire.user_id.is_empty() {
        return Err(DecodeError::EmptyId("user"));
    }
    if wire.resource_id.is_empty() {
        return Err(DecodeError::EmptyId("resource"));
    }
    if wire.token_count < 0 {
        return Err(DecodeError::NegativeTokenCount(wire.token_count));
    }

    Ok(UsageEvent {
        user_id: wire.user_id,
        resource_id: wire.resource_id,
        token_count: wire.token_count as u64,
        timestamp: wire.timestamp,
    })
}

/// Seam between the external transport and the ingest worker.
///
/// `None` means the source is closed and the worker should stop.
#[async_trait]
pub trait EventSource: Send {
    async fn next_message(&mut self) -> Option<Vec<u8>>;
}

/// Event source backed by a bounded tokio channel. The broker consumer glue
/// holds the sender half and forwards each received message payload.
pub struct ChannelEventSource {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChannelEventSource {
    pub fn new(capacity: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn next_message(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

/// Drains an event source, appending valid events to the raw event store.
///
/// Malformed payloads are dropped with a logged reason and a counter bump,
/// never failing the worker. Store write errors are reported the same way;
/// the at-least-once transport is expected to redeliver.
pub struct IngestWorker {
    raw_events: Arc<dyn RawEventStore>,
    op_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl IngestWorker {
    pub fn new(
        raw_events: Arc<dyn RawEventStore>,
        op_timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            raw_events,
            op_timeout,
            shutdown,
        }
    }

    pub async fn run<S: EventSource>(mut self, mut source: S) {
        info!("Ingest worker started");

        loop {
            if *self.shutdown.borrow() {
                info!("Ingest worker received shutdown signal");
                break;
            }

            tokio::select! {
                message = source.next_message() => {
                    match message {
                        Some(payload) => self.handle_message(&payload).await,
                        None => {
                            info!("Event source closed, stopping ingest worker");
                            break;
                        }
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        info!("Ingest worker received shutdown signal");
                        break;
                    }
                }
            }
        }

        info!("Ingest worker stopped");
    }

    async fn handle_message(&self, payload: &[u8]) {
        let event = match decode_event(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("Dropping usage event: {}", e);
                crate::metrics::track_event_dropped(e.reason());
                return;
            }
        };

        let result = match timeout(self.op_timeout, self.raw_events.append(event)).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Appending usage event timed out after {:?}",
                    self.op_timeout
                );
                crate::metrics::track_event_append(false);
                return;
            }
        };

        match result {
            Ok(()) => crate::metrics::track_event_append(true),
            Err(e) => {
                error!("Failed to append usage event: {}", e);
                crate::metrics::track_event_append(false);
            }
        }
    }
}
