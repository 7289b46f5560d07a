//! Error types for Echolog.
//!
//! The taxonomy follows the failure surfaces of the system:
//!
//! - **`SourceError`**: the event source cannot be reached, rejects a write,
//!   or disappears. Infrastructure-level; never retried by the core.
//! - **`EngineError`**: a coordination engine instance hit a protocol
//!   violation or lost its source mid-cycle. Fatal to that instance.
//! - **`RouterError`**: a pairing could not be constructed, or an existing
//!   pairing is no longer accepting requests.
//!
//! Domain-level validation failures are deliberately absent: a rejected
//! request produces zero events and an error-carrying response through the
//! normal response path, without touching the engine's state machine.

use thiserror::Error;

/// Errors surfaced by an event source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source's backing storage could not be reached.
    #[error("could not connect to event source: {0}")]
    ConnectionFailed(String),

    /// The source refused or failed to store a batch of events.
    ///
    /// The engine awaiting the echo of this batch fails its in-flight
    /// request rather than waiting for an acknowledgement that will never
    /// arrive.
    #[error("event source rejected write: {0}")]
    WriteRejected(String),

    /// The source's connection was closed.
    #[error("event source connection closed")]
    Closed,
}

/// Result type for event source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Fatal failures of a coordination engine instance.
///
/// Any of these terminates the engine task with `Err`; the engine never
/// guesses its way past a protocol violation or a lost source.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A second `Recovered` marker was observed on the delivery stream.
    ///
    /// The delivery protocol permits exactly one marker per materialization,
    /// so a duplicate means the source is misbehaving.
    #[error("delivery protocol violation: second recovery marker observed")]
    DuplicateRecoveryMarker,

    /// The source rejected the events emitted for the in-flight request.
    #[error("failed to write events to the source")]
    WriteFailed(#[from] SourceError),

    /// The delivery stream ended while writes were still unacknowledged,
    /// or before the recovery marker was observed.
    #[error("delivery stream ended with {unacknowledged} writes unacknowledged")]
    DeliveriesClosed {
        /// Number of emitted events whose echo was never observed.
        unacknowledged: usize,
    },

    /// The response output was dropped while the engine still had a
    /// response to emit.
    #[error("response channel closed before the engine finished")]
    ResponsesClosed,
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the router.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The factory could not bring up an engine/source pairing.
    ///
    /// Only the triggering request fails; no registry entry is retained for
    /// the identifier.
    #[error("could not construct engine pairing for aggregate '{id}'")]
    Construction {
        /// The aggregate identifier whose pairing failed to construct.
        id: String,
        /// The underlying source failure.
        #[source]
        source: SourceError,
    },

    /// The engine for this identifier has terminated and no longer accepts
    /// requests.
    #[error("engine for aggregate '{id}' is no longer accepting requests")]
    EngineUnavailable {
        /// The aggregate identifier whose engine went away.
        id: String,
    },
}

/// Result type for router operations.
pub type RouterResult<T> = Result<T, RouterError>;
