//! The domain seam: how an aggregate folds events and answers requests.
//!
//! A [`Behavior`] bundles the two pure functions an aggregate needs:
//!
//! - the **event handler** [`apply`](Behavior::apply), folding one stored
//!   event into the state, and
//! - the **request handler** [`decide`](Behavior::decide), turning a request
//!   into an ordered list of events plus a deferred response builder.
//!
//! Neither function performs I/O. Everything effectful - writing events,
//! waiting for their echo, emitting the response - belongs to the
//! [`Engine`](crate::engine::Engine) driving the behavior.
//!
//! # Example
//!
//! ```rust
//! use echolog::{Behavior, Reaction};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! enum CounterEvent {
//!     Added(u64),
//! }
//!
//! struct Counter;
//!
//! impl Behavior for Counter {
//!     type State = u64;
//!     type Event = CounterEvent;
//!     type Request = u64;
//!     type Response = u64;
//!
//!     fn initial_state(&self) -> u64 {
//!         0
//!     }
//!
//!     fn apply(&self, state: &mut u64, event: &CounterEvent) {
//!         let CounterEvent::Added(amount) = event;
//!         *state += amount;
//!     }
//!
//!     fn decide(&self, _state: &u64, amount: u64) -> Reaction<u64, CounterEvent, u64> {
//!         if amount == 0 {
//!             // Validation failure: zero events, error response.
//!             return Reaction::reply(|_state| 0);
//!         }
//!         Reaction::new(vec![CounterEvent::Added(amount)], |state| *state)
//!     }
//! }
//! ```

/// A deferred response: built from the state as it stands after every event
/// of the triggering request has been observed back from the log.
pub type ResponseBuilder<S, R> = Box<dyn FnOnce(&S) -> R + Send>;

/// The outcome of handling one request: the events to emit (possibly none)
/// and the builder for the eventual response.
pub struct Reaction<S, E, R> {
    pub(crate) events: Vec<E>,
    pub(crate) respond: ResponseBuilder<S, R>,
}

impl<S, E, R> Reaction<S, E, R> {
    /// A reaction that emits `events` and responds once they have all been
    /// echoed back from the log.
    pub fn new(events: Vec<E>, respond: impl FnOnce(&S) -> R + Send + 'static) -> Self {
        Self {
            events,
            respond: Box::new(respond),
        }
    }

    /// A reaction with no events: the response is built from the current
    /// state immediately.
    ///
    /// This is the normal path for domain validation failures - the request
    /// is rejected via the response without touching the log.
    pub fn reply(respond: impl FnOnce(&S) -> R + Send + 'static) -> Self {
        Self::new(Vec::new(), respond)
    }

    /// The events this reaction will emit, in emission order.
    pub fn events(&self) -> &[E] {
        &self.events
    }
}

impl<S, E: std::fmt::Debug, R> std::fmt::Debug for Reaction<S, E, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reaction")
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

/// Domain logic for one aggregate type.
///
/// An engine instance owns exactly one behavior and one state; the state is
/// never shared. Both methods must be pure: replaying the same event
/// sequence into a fresh state must always reconstruct the same state.
pub trait Behavior: Send + 'static {
    /// The aggregate's state, owned exclusively by its engine instance.
    type State: Send + 'static;
    /// The domain event type written to and delivered from the log.
    type Event: Clone + PartialEq + Send + 'static;
    /// The request type this aggregate accepts.
    type Request: Send + 'static;
    /// The response type produced for each request.
    type Response: Send + 'static;

    /// The state of an aggregate with no stored events.
    fn initial_state(&self) -> Self::State;

    /// Folds one delivered event into the state.
    ///
    /// Called for every event delivered from the log - replayed or live,
    /// own or written by a collaborating engine on the same log identity.
    fn apply(&self, state: &mut Self::State, event: &Self::Event);

    /// Handles one request against the current state.
    fn decide(
        &self,
        state: &Self::State,
        request: Self::Request,
    ) -> Reaction<Self::State, Self::Event, Self::Response>;

    /// Whether a delivered event is the echo of a pending emitted event.
    ///
    /// Defaults to value equality. Note the ambiguity this leaves open: if
    /// two engines sharing a log concurrently emit value-identical events,
    /// each may dequeue the other's echo. A domain whose event type carries
    /// a correlation key should override this to compare keys instead.
    fn matches(&self, pending: &Self::Event, delivered: &Self::Event) -> bool {
        pending == delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Noted(&'static str);

    struct Notebook;

    impl Behavior for Notebook {
        type State = Vec<&'static str>;
        type Event = Noted;
        type Request = &'static str;
        type Response = usize;

        fn initial_state(&self) -> Self::State {
            Vec::new()
        }

        fn apply(&self, state: &mut Self::State, event: &Noted) {
            state.push(event.0);
        }

        fn decide(&self, _state: &Self::State, note: &'static str) -> Reaction<Self::State, Noted, usize> {
            Reaction::new(vec![Noted(note)], |state: &Vec<&'static str>| state.len())
        }
    }

    #[test]
    fn reply_reaction_carries_no_events() {
        let reaction: Reaction<(), Noted, usize> = Reaction::reply(|()| 7);
        assert!(reaction.events().is_empty());
        assert_eq!((reaction.respond)(&()), 7);
    }

    #[test]
    fn default_matching_is_value_equality() {
        let notebook = Notebook;
        assert!(notebook.matches(&Noted("a"), &Noted("a")));
        assert!(!notebook.matches(&Noted("a"), &Noted("b")));
    }

    #[test]
    fn apply_folds_in_order() {
        let notebook = Notebook;
        let mut state = notebook.initial_state();
        notebook.apply(&mut state, &Noted("first"));
        notebook.apply(&mut state, &Noted("second"));
        assert_eq!(state, vec!["first", "second"]);
    }
}
