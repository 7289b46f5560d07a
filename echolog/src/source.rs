//! Event source abstraction.
//!
//! An event source is the one shared, multi-writer collaborator in the
//! system: an append-only log addressed by [`LogId`]. The core never talks
//! to a broker or a journal directly; it programs against this port and the
//! delivery protocol in [`crate::envelope`].
//!
//! Materializing a source for a log identity yields a [`SourceHandle`]: a
//! write side that accepts ordered batches of events, and a read side that
//! produces the `Delivered* Recovered Delivered*` sequence for that
//! identity. Concrete backends (broker topic-partitions, durable journals,
//! the in-memory source in `echolog-memory`) all satisfy the same contract.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::envelope::Delivery;
use crate::errors::SourceResult;
use crate::types::LogId;

/// The write side of a materialized event source.
///
/// Submission order must be preserved in the resulting stored order for the
/// log identity, and a failed write must be surfaced as an error rather than
/// silently dropped. Backpressure from the backing storage is expressed by
/// `append` suspending until the batch is accepted.
#[async_trait]
pub trait EventWriter<E>: Send {
    /// Appends a batch of events to the log, in order.
    async fn append(&mut self, events: Vec<E>) -> SourceResult<()>;
}

/// A materialized connection to one log identity: the write side plus the
/// delivery stream for the read side.
pub struct SourceHandle<E> {
    /// Accepts events for durable storage on this log identity.
    pub writer: Box<dyn EventWriter<E>>,
    /// Produces the delivery sequence defined by [`Delivery`].
    pub deliveries: mpsc::Receiver<Delivery<E>>,
}

impl<E> SourceHandle<E> {
    /// Bundles a writer and a delivery receiver into a handle.
    pub fn new(writer: Box<dyn EventWriter<E>>, deliveries: mpsc::Receiver<Delivery<E>>) -> Self {
        Self { writer, deliveries }
    }
}

impl<E> std::fmt::Debug for SourceHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle").finish_non_exhaustive()
    }
}

/// An append-only event log addressable by [`LogId`].
///
/// Each call to [`materialize`](Self::materialize) opens a fresh connection
/// to the given log identity and must honor the delivery protocol: replay of
/// everything stored so far, one `Recovered` marker, then live deliveries of
/// every subsequent write by any writer, in the log's total order.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// The domain event type this source stores.
    type Event: Send + 'static;

    /// Opens a connection to the given log identity.
    async fn materialize(&self, log_id: &LogId) -> SourceResult<SourceHandle<Self::Event>>;
}
