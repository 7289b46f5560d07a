//! `Echolog` - event-sourced request coordination over append-only logs.
//!
//! Echolog turns a request into zero or more domain events plus a deferred
//! response, writes the events to a shared append-only log, folds the
//! events echoed back from the log (its own and, in collaborative
//! deployments, other processors') into in-memory state, and only then
//! emits the response. A caller never observes a response computed from
//! state that has not been durably logged.
//!
//! The crate provides three tightly coupled pieces:
//!
//! - the [`Delivery`] envelope protocol every event source must honor
//!   (replay, one `Recovered` marker, then live deliveries);
//! - the per-aggregate [`Engine`] enforcing request→write→echo→respond;
//! - the [`Router`] mapping aggregate identifiers to lazily created,
//!   reused engine pairings.
//!
//! Physical log backends (broker topic-partitions, durable journals) live
//! behind the [`EventSource`] port; `echolog-memory` ships an in-memory
//! implementation for tests and development.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod behavior;
pub mod engine;
pub mod envelope;
pub mod errors;
pub mod router;
pub mod source;
pub mod types;

pub use behavior::{Behavior, Reaction, ResponseBuilder};
pub use engine::{spawn_engine, Engine, EngineConfig, EnginePairing};
pub use envelope::Delivery;
pub use errors::{
    EngineError, EngineResult, RouterError, RouterResult, SourceError, SourceResult,
};
pub use router::{EngineFactory, PairingFactory, Router};
pub use source::{EventSource, EventWriter, SourceHandle};
pub use types::LogId;
