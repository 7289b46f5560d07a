//! The delivery envelope protocol shared by every event source.
//!
//! A materialized read side of an event source produces a sequence of
//! [`Delivery`] values. Within one materialization the sequence is always
//!
//! ```text
//! Delivered(e)* Recovered Delivered(e)*
//! ```
//!
//! - zero or more `Delivered` values replaying every previously stored event
//!   for the log identity, in stored order;
//! - exactly one `Recovered` marker, emitted even when nothing has ever been
//!   stored;
//! - then, for the remaining lifetime of the connection, one `Delivered` per
//!   event subsequently written to the same log identity by any writer, in
//!   the log's total order.
//!
//! A consumer must not treat any event as live until it has observed
//! `Recovered`, and must apply every delivered event exactly once regardless
//! of phase.

use serde::{Deserialize, Serialize};

/// One element of an event source's delivery sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery<E> {
    /// A stored event, either replayed from before this materialization or
    /// observed live after it.
    Delivered(E),
    /// The one-time marker separating replay from live delivery.
    Recovered,
}

impl<E> Delivery<E> {
    /// Returns `true` for the recovery boundary marker.
    pub const fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered)
    }

    /// Returns the delivered event, if any.
    pub const fn delivered(&self) -> Option<&E> {
        match self {
            Self::Delivered(event) => Some(event),
            Self::Recovered => None,
        }
    }

    /// Consumes the envelope, returning the delivered event, if any.
    #[allow(clippy::missing_const_for_fn)] // E: Drop prevents const here
    pub fn into_delivered(self) -> Option<E> {
        match self {
            Self::Delivered(event) => Some(event),
            Self::Recovered => None,
        }
    }
}
