//! The coordination engine: the stateful request/event/response processor.
//!
//! One engine instance owns one aggregate's state and serializes its
//! requests. The engine consumes two inputs (requests; deliveries from the
//! event source) and produces two outputs (events to the source's write
//! side; responses), enforcing the request→write→echo→respond protocol:
//!
//! 1. **RECOVERING**: only deliveries are consumed. Every replayed event is
//!    folded into the state; the `Recovered` marker flips the engine live.
//!    Requests are not polled, so upstream demand is suspended.
//! 2. **LIVE, idle**: a request is handled by the behavior's request
//!    handler. Zero events means the response is built and emitted
//!    immediately. Otherwise the events go onto the pending-write queue,
//!    are appended to the source, and the response builder is parked.
//! 3. **LIVE, awaiting-echo**: no new request is polled - this is the
//!    serialization point that gives one in-flight request per aggregate.
//!    Every delivered event is folded into the state unconditionally (also
//!    events written by collaborating engines sharing the log). A delivery
//!    matching the head of the pending queue dequeues it; when the queue
//!    drains, the parked response builder runs against the now-current
//!    state and the engine returns to idle.
//!
//! Deferring the response until the emitted events come back through the
//! same channel every consumer reads is what gives read-your-writes
//! consistency without any synchronous acknowledgement API from the log:
//! the echo is the acknowledgement.
//!
//! Flow control is demand-driven throughout: all channels are bounded, the
//! write side is an awaited call, and the engine suspends rather than
//! buffers when downstream demand is absent. Deliveries are always drained
//! ahead of requests (`biased` select) and keep draining while an append is
//! in flight, so the state never goes stale and a source whose deliveries
//! backpressure its own write side cannot wedge the engine.

use std::collections::VecDeque;
use std::mem;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, trace, Instrument};

use crate::behavior::{Behavior, Reaction, ResponseBuilder};
use crate::envelope::Delivery;
use crate::errors::{EngineError, EngineResult, SourceResult};
use crate::source::{EventSource, EventWriter, SourceHandle};
use crate::types::LogId;

/// Channel capacities for an engine pairing.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capacity of the request input channel.
    pub request_buffer: usize,
    /// Capacity of the response output channel.
    pub response_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_buffer: 16,
            response_buffer: 16,
        }
    }
}

/// The engine's phase. `AwaitingEcho` carries the pending-write queue and
/// the parked response builder, so a non-empty queue without a builder (or
/// the reverse) is unrepresentable.
enum Mode<S, E, R> {
    Recovering,
    Idle,
    AwaitingEcho {
        pending: VecDeque<E>,
        respond: ResponseBuilder<S, R>,
    },
}

/// One resolved input of the run loop.
enum Input<Req, E> {
    Request(Option<Req>),
    Delivery(Option<Delivery<E>>),
}

/// Everything the engine owns apart from the write side. Split out so the
/// delivery handlers can run while an append future borrows the writer.
struct Core<B: Behavior> {
    behavior: B,
    state: B::State,
    mode: Mode<B::State, B::Event, B::Response>,
    responses: mpsc::Sender<B::Response>,
}

impl<B: Behavior> Core<B> {
    /// Folds one delivered event and advances the echo queue.
    async fn on_delivered(&mut self, event: B::Event) -> EngineResult<()> {
        // Every delivered event updates the state, whether it is a replayed
        // event, an awaited echo, or a collaborator's write.
        self.behavior.apply(&mut self.state, &event);

        match mem::replace(&mut self.mode, Mode::Idle) {
            Mode::AwaitingEcho {
                mut pending,
                respond,
            } => {
                let head_matches = pending
                    .front()
                    .is_some_and(|head| self.behavior.matches(head, &event));
                if head_matches {
                    pending.pop_front();
                }
                if pending.is_empty() {
                    trace!("all pending writes acknowledged");
                    let response = respond(&self.state);
                    self.emit(response).await?;
                } else {
                    self.mode = Mode::AwaitingEcho { pending, respond };
                }
            }
            other => self.mode = other,
        }
        Ok(())
    }

    /// Handles the recovery boundary marker.
    fn on_recovered(&mut self) -> EngineResult<()> {
        if matches!(self.mode, Mode::Recovering) {
            debug!("replay complete, engine live");
            self.mode = Mode::Idle;
            Ok(())
        } else {
            Err(EngineError::DuplicateRecoveryMarker)
        }
    }

    async fn emit(&mut self, response: B::Response) -> EngineResult<()> {
        self.responses
            .send(response)
            .await
            .map_err(|_| EngineError::ResponsesClosed)
    }

    fn unacknowledged(&self) -> usize {
        match &self.mode {
            Mode::AwaitingEcho { pending, .. } => pending.len(),
            _ => 0,
        }
    }
}

/// A coordination engine instance for one aggregate.
///
/// Construct with [`Engine::new`] and drive with [`Engine::run`], or use
/// [`spawn_engine`] to materialize a source and spawn the run loop in one
/// step.
pub struct Engine<B: Behavior> {
    core: Core<B>,
    writer: Box<dyn EventWriter<B::Event>>,
}

impl<B: Behavior> Engine<B> {
    /// Creates an engine in the RECOVERING phase with the behavior's
    /// initial state.
    pub fn new(
        behavior: B,
        writer: Box<dyn EventWriter<B::Event>>,
        responses: mpsc::Sender<B::Response>,
    ) -> Self {
        let state = behavior.initial_state();
        Self {
            core: Core {
                behavior,
                state,
                mode: Mode::Recovering,
                responses,
            },
            writer,
        }
    }

    /// Runs the engine until its request input closes while idle, or a
    /// fatal condition occurs.
    ///
    /// Closing the request input lets the current awaiting-echo cycle
    /// complete before the engine terminates; a delivery stream that ends
    /// mid-cycle terminates the engine without emitting a response for the
    /// unacknowledged writes.
    pub async fn run(
        mut self,
        mut requests: mpsc::Receiver<B::Request>,
        mut deliveries: mpsc::Receiver<Delivery<B::Event>>,
    ) -> EngineResult<()> {
        loop {
            let accepting = matches!(self.core.mode, Mode::Idle);
            let input = tokio::select! {
                biased;

                delivery = deliveries.recv() => Input::Delivery(delivery),
                request = requests.recv(), if accepting => Input::Request(request),
            };
            match input {
                Input::Delivery(Some(Delivery::Delivered(event))) => {
                    self.core.on_delivered(event).await?;
                }
                Input::Delivery(Some(Delivery::Recovered)) => self.core.on_recovered()?,
                Input::Delivery(None) => {
                    return Err(EngineError::DeliveriesClosed {
                        unacknowledged: self.core.unacknowledged(),
                    });
                }
                Input::Request(Some(request)) => {
                    self.on_request(request, &mut deliveries).await?;
                }
                Input::Request(None) => {
                    debug!("request input closed, engine terminating");
                    return Ok(());
                }
            }
        }
    }

    /// Handles one request while idle.
    ///
    /// Deliveries keep being folded while the append is in flight: the
    /// source may echo the very events being written (or depend on the
    /// delivery channel draining) before `append` returns.
    async fn on_request(
        &mut self,
        request: B::Request,
        deliveries: &mut mpsc::Receiver<Delivery<B::Event>>,
    ) -> EngineResult<()> {
        let Reaction { events, respond } = self.core.behavior.decide(&self.core.state, request);
        if events.is_empty() {
            // Nothing to log: the response reflects already-durable state.
            let response = respond(&self.core.state);
            return self.core.emit(response).await;
        }

        trace!(count = events.len(), "appending events to source");
        let pending: VecDeque<B::Event> = events.iter().cloned().collect();
        self.core.mode = Mode::AwaitingEcho { pending, respond };

        let mut append = self.writer.append(events);
        loop {
            tokio::select! {
                biased;

                delivery = deliveries.recv() => match delivery {
                    Some(Delivery::Delivered(event)) => self.core.on_delivered(event).await?,
                    Some(Delivery::Recovered) => self.core.on_recovered()?,
                    None => {
                        return Err(EngineError::DeliveriesClosed {
                            unacknowledged: self.core.unacknowledged(),
                        });
                    }
                },

                result = &mut append => return result.map_err(EngineError::from),
            }
        }
    }
}

/// A running engine joined to an event source: the request input, the
/// response output, and the handle of the engine task.
#[derive(Debug)]
pub struct EnginePairing<Req, Res> {
    /// Feeds requests to the engine, one in flight at a time.
    pub requests: mpsc::Sender<Req>,
    /// Yields responses in request order.
    pub responses: mpsc::Receiver<Res>,
    /// Resolves when the engine terminates; `Err` carries the fatal
    /// condition for protocol violations and infrastructure failures.
    pub task: JoinHandle<EngineResult<()>>,
}

/// Materializes `source` for `log_id`, joins a fresh engine to it, and
/// spawns the run loop.
///
/// The spawned engine starts in the RECOVERING phase, replaying everything
/// stored for the log identity before servicing its first request.
pub async fn spawn_engine<B, S>(
    behavior: B,
    source: &S,
    log_id: LogId,
    config: &EngineConfig,
) -> SourceResult<EnginePairing<B::Request, B::Response>>
where
    B: Behavior,
    S: EventSource<Event = B::Event> + ?Sized,
{
    let SourceHandle { writer, deliveries } = source.materialize(&log_id).await?;
    let (request_tx, request_rx) = mpsc::channel(config.request_buffer);
    let (response_tx, response_rx) = mpsc::channel(config.response_buffer);

    let engine = Engine::new(behavior, writer, response_tx);
    let span = info_span!("engine", %log_id);
    let task = tokio::spawn(engine.run(request_rx, deliveries).instrument(span));

    Ok(EnginePairing {
        requests: request_tx,
        responses: response_rx,
        task,
    })
}
