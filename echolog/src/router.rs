//! Per-aggregate routing: one engine pairing per aggregate identifier,
//! created on first use and reused thereafter.
//!
//! The router exposes a single request-in/response-out surface over a
//! registry of engine pairings. For each incoming request it computes the
//! aggregate identifier, looks the identifier up (constructing a fresh
//! pairing through the factory on a miss - which triggers that pairing's
//! own recovery against its backing log identity), and forwards the request
//! to the pairing's input. Responses from every pairing are funneled onto
//! one shared output and interleave freely across aggregates.
//!
//! Ordering: requests sharing an identifier are served by the same engine
//! instance in arrival order (the engine serializes them); requests with
//! different identifiers progress independently. The registry lock covers
//! only map access: each identifier gets a placeholder cell, and both
//! construction and channel-capacity waits happen outside the lock, so a
//! slow construction or a full pairing suspends only submitters for that
//! identifier.
//!
//! The registry only grows: evicting idle pairings is not yet supported.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, OnceCell};
use tracing::{debug, warn};

use crate::behavior::Behavior;
use crate::engine::{spawn_engine, EngineConfig, EnginePairing};
use crate::errors::{RouterError, RouterResult, SourceResult};
use crate::source::EventSource;
use crate::types::LogId;

/// Constructs a fresh engine/source pairing for an aggregate identifier.
///
/// The router guarantees at most one successful `build` per identifier per
/// router lifetime. A failed `build` fails only the triggering request and
/// leaves the identifier's cell unconstructed, so a later request for the
/// same identifier retries construction.
#[async_trait]
pub trait PairingFactory<K>: Send + Sync {
    /// The request type routed to the pairings.
    type Request: Send + 'static;
    /// The response type the pairings produce.
    type Response: Send + 'static;

    /// Builds and starts a pairing for `id`.
    async fn build(&self, id: &K) -> SourceResult<EnginePairing<Self::Request, Self::Response>>;
}

/// The canonical [`PairingFactory`]: a behavior constructor, an event
/// source, and a mapping from aggregate identifier to log identity.
pub struct EngineFactory<S, MakeB, ToLog> {
    source: S,
    make_behavior: MakeB,
    log_id_of: ToLog,
    config: EngineConfig,
}

impl<S, MakeB, ToLog> EngineFactory<S, MakeB, ToLog> {
    /// Creates a factory with the default [`EngineConfig`].
    pub fn new(source: S, make_behavior: MakeB, log_id_of: ToLog) -> Self {
        Self {
            source,
            make_behavior,
            log_id_of,
            config: EngineConfig::default(),
        }
    }

    /// Overrides the engine channel configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }
}

#[async_trait]
impl<K, B, S, MakeB, ToLog> PairingFactory<K> for EngineFactory<S, MakeB, ToLog>
where
    K: Send + Sync,
    B: Behavior,
    S: EventSource<Event = B::Event>,
    MakeB: Fn(&K) -> B + Send + Sync,
    ToLog: Fn(&K) -> LogId + Send + Sync,
{
    type Request = B::Request;
    type Response = B::Response;

    async fn build(&self, id: &K) -> SourceResult<EnginePairing<B::Request, B::Response>> {
        let behavior = (self.make_behavior)(id);
        let log_id = (self.log_id_of)(id);
        spawn_engine(behavior, &self.source, log_id, &self.config).await
    }
}

/// Maps each request to a dedicated engine pairing by aggregate identifier.
///
/// Construct with [`Router::new`], which also hands back the shared
/// response receiver. Clone-free by design: callers own one router per
/// logical service and share it by reference.
pub struct Router<K, Req, Res> {
    aggregate_id: Box<dyn Fn(&Req) -> K + Send + Sync>,
    factory: Box<dyn PairingFactory<K, Request = Req, Response = Res>>,
    // Placeholder cells: the map lock is never held across construction,
    // and concurrent submitters for one identifier share a single build.
    registry: Mutex<HashMap<K, Arc<OnceCell<mpsc::Sender<Req>>>>>,
    responses: mpsc::Sender<Res>,
}

impl<K, Req, Res> Router<K, Req, Res>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    Req: Send + 'static,
    Res: Send + 'static,
{
    /// Creates a router and the shared response output it feeds.
    ///
    /// `aggregate_id` must be deterministic and total over all accepted
    /// request values: the same request value always routes to the same
    /// aggregate.
    pub fn new(
        aggregate_id: impl Fn(&Req) -> K + Send + Sync + 'static,
        factory: impl PairingFactory<K, Request = Req, Response = Res> + 'static,
        response_buffer: usize,
    ) -> (Self, mpsc::Receiver<Res>) {
        let (response_tx, response_rx) = mpsc::channel(response_buffer);
        let router = Self {
            aggregate_id: Box::new(aggregate_id),
            factory: Box::new(factory),
            registry: Mutex::new(HashMap::new()),
            responses: response_tx,
        };
        (router, response_rx)
    }

    /// Routes one request to its aggregate's engine, constructing the
    /// pairing on first use.
    ///
    /// Suspends while the pairing's request channel is at capacity; only
    /// submitters for the same identifier are affected. The eventual
    /// response arrives on the shared response receiver.
    pub async fn submit(&self, request: Req) -> RouterResult<()> {
        let id = (self.aggregate_id)(&request);

        let cell = {
            let mut registry = self.registry.lock().await;
            Arc::clone(registry.entry(id.clone()).or_default())
        };
        let entry = cell
            .get_or_try_init(|| self.construct(&id))
            .await?
            .clone();

        entry
            .send(request)
            .await
            .map_err(|_| RouterError::EngineUnavailable { id: id.to_string() })
    }

    /// Number of constructed pairings. A failed construction leaves its
    /// cell empty, so it is not counted; entries are never evicted, so
    /// this only grows over the router's lifetime.
    pub async fn aggregate_count(&self) -> usize {
        self.registry
            .lock()
            .await
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    /// Builds and registers the pairing for `id`. Runs inside the
    /// identifier's cell, outside the registry lock; on failure the cell
    /// stays empty and a later request retries.
    async fn construct(&self, id: &K) -> RouterResult<mpsc::Sender<Req>> {
        debug!(%id, "constructing engine pairing");
        let pairing = self
            .factory
            .build(id)
            .await
            .map_err(|source| RouterError::Construction {
                id: id.to_string(),
                source,
            })?;
        let EnginePairing {
            requests,
            responses,
            task,
        } = pairing;
        self.forward_responses(id.clone(), responses, task);
        Ok(requests)
    }

    /// Copies one pairing's responses onto the shared output and reports
    /// how the engine terminated once the stream ends.
    fn forward_responses(
        &self,
        id: K,
        mut responses: mpsc::Receiver<Res>,
        task: tokio::task::JoinHandle<crate::errors::EngineResult<()>>,
    ) {
        let shared = self.responses.clone();
        tokio::spawn(async move {
            while let Some(response) = responses.recv().await {
                if shared.send(response).await.is_err() {
                    // The shared output is gone; nobody is listening.
                    return;
                }
            }
            match task.await {
                Ok(Ok(())) => debug!(%id, "engine terminated cleanly"),
                Ok(Err(error)) => warn!(%id, %error, "engine terminated with failure"),
                Err(join_error) => warn!(%id, %join_error, "engine task aborted"),
            }
        });
    }
}

impl<K, Req, Res> std::fmt::Debug for Router<K, Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").finish_non_exhaustive()
    }
}
