//! In-memory event source for the `Echolog` coordination library.
//!
//! This crate provides an in-memory implementation of the `EventSource`
//! contract from the echolog crate, useful for testing and development
//! scenarios where persistence is not required. It honors the full delivery
//! protocol: each materialization replays every stored event for the log
//! identity in stored order, emits exactly one `Recovered` marker, and then
//! delivers every subsequent write by any writer in append order.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use echolog::errors::{SourceError, SourceResult};
use echolog::{Delivery, EventSource, EventWriter, LogId, SourceHandle};
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

const DEFAULT_DELIVERY_BUFFER: usize = 256;

/// Per-log storage plus the delivery channels of every live materialization.
struct LogState<E> {
    events: Vec<E>,
    subscribers: Vec<mpsc::Sender<Delivery<E>>>,
}

impl<E> Default for LogState<E> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            subscribers: Vec::new(),
        }
    }
}

impl<E: Clone> LogState<E> {
    /// Sends one delivery to every subscriber, pruning the ones whose
    /// receiver is gone.
    async fn broadcast(&mut self, delivery: Delivery<E>) {
        let mut index = 0;
        while index < self.subscribers.len() {
            if self.subscribers[index].send(delivery.clone()).await.is_ok() {
                index += 1;
            } else {
                self.subscribers.swap_remove(index);
            }
        }
    }
}

/// Thread-safe in-memory event source for testing.
///
/// Cloning shares the underlying logs, so one source can back several
/// engines (and observers) that collaborate through the same log identity.
///
/// Delivery channels are bounded: a materialization's channel holds at
/// least `delivery_buffer` envelopes (and always enough for the replay).
/// A consumer must keep draining its deliveries while appending; a single
/// append larger than the buffer with an absent consumer will suspend the
/// writer, which is the intended backpressure.
pub struct InMemoryEventSource<E> {
    logs: Arc<StdMutex<HashMap<LogId, Arc<Mutex<LogState<E>>>>>>,
    delivery_buffer: usize,
}

impl<E> Clone for InMemoryEventSource<E> {
    fn clone(&self) -> Self {
        Self {
            logs: Arc::clone(&self.logs),
            delivery_buffer: self.delivery_buffer,
        }
    }
}

impl<E> Default for InMemoryEventSource<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> InMemoryEventSource<E> {
    /// Creates a new empty in-memory event source.
    pub fn new() -> Self {
        Self {
            logs: Arc::new(StdMutex::new(HashMap::new())),
            delivery_buffer: DEFAULT_DELIVERY_BUFFER,
        }
    }

    /// Overrides the per-materialization delivery buffer size.
    #[must_use]
    pub fn with_delivery_buffer(mut self, capacity: usize) -> Self {
        self.delivery_buffer = capacity.max(1);
        self
    }

    fn log(&self, log_id: &LogId) -> Arc<Mutex<LogState<E>>> {
        let mut logs = self.logs.lock().expect("lock poisoned");
        Arc::clone(logs.entry(log_id.clone()).or_default())
    }
}

impl<E: Clone> InMemoryEventSource<E> {
    /// Snapshot of everything stored for a log identity, in stored order.
    pub async fn stored_events(&self, log_id: &LogId) -> Vec<E> {
        self.log(log_id).lock().await.events.clone()
    }
}

struct MemoryWriter<E> {
    log: Arc<Mutex<LogState<E>>>,
    log_id: LogId,
}

#[async_trait]
impl<E> EventWriter<E> for MemoryWriter<E>
where
    E: Clone + Send + 'static,
{
    async fn append(&mut self, events: Vec<E>) -> SourceResult<()> {
        let mut state = self.log.lock().await;
        trace!(log_id = %self.log_id, count = events.len(), "appending events");
        for event in events {
            state.events.push(event.clone());
            state.broadcast(Delivery::Delivered(event)).await;
        }
        Ok(())
    }
}

#[async_trait]
impl<E> EventSource for InMemoryEventSource<E>
where
    E: Clone + Send + 'static,
{
    type Event = E;

    async fn materialize(&self, log_id: &LogId) -> SourceResult<SourceHandle<E>> {
        let log = self.log(log_id);
        let mut state = log.lock().await;

        // The replay fits before anything can consume, so these sends
        // cannot block: capacity covers every stored event plus the marker.
        let capacity = self.delivery_buffer.max(state.events.len() + 1);
        let (delivery_tx, delivery_rx) = mpsc::channel(capacity);
        for event in &state.events {
            delivery_tx
                .try_send(Delivery::Delivered(event.clone()))
                .map_err(|_| SourceError::Closed)?;
        }
        delivery_tx
            .try_send(Delivery::Recovered)
            .map_err(|_| SourceError::Closed)?;

        // Registered only after the replay: live deliveries strictly follow
        // the marker on this channel.
        state.subscribers.push(delivery_tx);
        trace!(log_id = %log_id, replayed = state.events.len(), "materialized log");

        let writer = MemoryWriter {
            log: Arc::clone(&log),
            log_id: log_id.clone(),
        };
        Ok(SourceHandle::new(Box::new(writer), delivery_rx))
    }
}
