//! Router behavior: lazy per-aggregate engine creation, instance reuse,
//! cross-aggregate independence, and construction-failure isolation.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Credited, Ledger, LedgerRequest, LedgerResponse};
use echolog::errors::{SourceError, SourceResult};
use echolog::{EngineFactory, EventSource, EventWriter, LogId, Router, RouterError, SourceHandle};
use echolog_memory::InMemoryEventSource;
use tokio::sync::mpsc;

fn ledger_router(
    source: InMemoryEventSource<Credited>,
) -> (Router<String, LedgerRequest, LedgerResponse>, mpsc::Receiver<LedgerResponse>) {
    let factory = EngineFactory::new(
        source,
        |_id: &String| Ledger,
        |id: &String| LogId::try_new(id.clone()).unwrap(),
    );
    Router::new(
        |request: &LedgerRequest| request.account().to_string(),
        factory,
        32,
    )
}

fn deposit(account: &str, amount: u64) -> LedgerRequest {
    LedgerRequest::Deposit {
        account: account.to_string(),
        amount,
    }
}

#[tokio::test]
async fn same_aggregate_requests_are_served_fifo_by_one_engine() {
    common::init_tracing();
    let (router, mut responses) = ledger_router(InMemoryEventSource::new());

    for amount in [1, 2, 3] {
        router.submit(deposit("alice", amount)).await.unwrap();
    }

    let balances: Vec<u64> = [
        responses.recv().await.unwrap().unwrap().balance,
        responses.recv().await.unwrap().unwrap().balance,
        responses.recv().await.unwrap().unwrap().balance,
    ]
    .to_vec();
    assert_eq!(balances, vec![1, 3, 6]);
    assert_eq!(router.aggregate_count().await, 1);
}

#[tokio::test]
async fn distinct_aggregates_get_independent_engines() {
    let (router, mut responses) = ledger_router(InMemoryEventSource::new());

    router.submit(deposit("alice", 10)).await.unwrap();
    router.submit(deposit("bob", 20)).await.unwrap();
    assert_eq!(router.aggregate_count().await, 2);

    // Responses interleave freely across aggregates; collect both and
    // check each aggregate saw only its own events.
    let mut receipts = vec![
        responses.recv().await.unwrap().unwrap(),
        responses.recv().await.unwrap().unwrap(),
    ];
    receipts.sort_by(|a, b| a.account.cmp(&b.account));
    assert_eq!(receipts[0].account, "alice");
    assert_eq!(receipts[0].balance, 10);
    assert_eq!(receipts[1].account, "bob");
    assert_eq!(receipts[1].balance, 20);
}

/// Wraps the in-memory source, slowing down writes for one log identity.
struct SlowedSource {
    inner: InMemoryEventSource<Credited>,
    slow: LogId,
    delay: Duration,
}

struct SlowedWriter {
    inner: Box<dyn EventWriter<Credited>>,
    delay: Duration,
}

#[async_trait]
impl EventWriter<Credited> for SlowedWriter {
    async fn append(&mut self, events: Vec<Credited>) -> SourceResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.append(events).await
    }
}

#[async_trait]
impl EventSource for SlowedSource {
    type Event = Credited;

    async fn materialize(&self, log_id: &LogId) -> SourceResult<SourceHandle<Credited>> {
        let handle = self.inner.materialize(log_id).await?;
        if *log_id == self.slow {
            Ok(SourceHandle::new(
                Box::new(SlowedWriter {
                    inner: handle.writer,
                    delay: self.delay,
                }),
                handle.deliveries,
            ))
        } else {
            Ok(handle)
        }
    }
}

#[tokio::test]
async fn a_slow_aggregate_does_not_hold_up_the_others() {
    let source = SlowedSource {
        inner: InMemoryEventSource::new(),
        slow: LogId::try_new("slow").unwrap(),
        delay: Duration::from_millis(200),
    };
    let factory = EngineFactory::new(
        source,
        |_id: &String| Ledger,
        |id: &String| LogId::try_new(id.clone()).unwrap(),
    );
    let (router, mut responses) = Router::new(
        |request: &LedgerRequest| request.account().to_string(),
        factory,
        32,
    );

    // Submitted first, but its write is slow; the fast aggregate's
    // response overtakes it on the shared output.
    router.submit(deposit("slow", 1)).await.unwrap();
    router.submit(deposit("fast", 2)).await.unwrap();

    let first = responses.recv().await.unwrap().unwrap();
    let second = responses.recv().await.unwrap().unwrap();
    assert_eq!(first.account, "fast");
    assert_eq!(second.account, "slow");
}

/// Delays materialization for one log identity, modelling a slow backend.
struct DelayedSource {
    inner: InMemoryEventSource<Credited>,
    slow: LogId,
    delay: Duration,
}

#[async_trait]
impl EventSource for DelayedSource {
    type Event = Credited;

    async fn materialize(&self, log_id: &LogId) -> SourceResult<SourceHandle<Credited>> {
        if *log_id == self.slow {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.materialize(log_id).await
    }
}

#[tokio::test]
async fn slow_construction_does_not_block_other_aggregates() {
    let source = DelayedSource {
        inner: InMemoryEventSource::new(),
        slow: LogId::try_new("slow").unwrap(),
        delay: Duration::from_millis(200),
    };
    let factory = EngineFactory::new(
        source,
        |_id: &String| Ledger,
        |id: &String| LogId::try_new(id.clone()).unwrap(),
    );
    let (router, mut responses) = Router::new(
        |request: &LedgerRequest| request.account().to_string(),
        factory,
        32,
    );
    let router = Arc::new(router);

    // The first submitter is stuck constructing the slow pairing; a
    // request for another aggregate must get through meanwhile.
    let slow_submitter = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.submit(deposit("slow", 1)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    router.submit(deposit("fast", 2)).await.unwrap();
    let first = responses.recv().await.unwrap().unwrap();
    assert_eq!(first.account, "fast");

    slow_submitter.await.unwrap().unwrap();
    let second = responses.recv().await.unwrap().unwrap();
    assert_eq!(second.account, "slow");
}

/// Fails materialization a configured number of times for one log identity.
struct FlakySource {
    inner: InMemoryEventSource<Credited>,
    broken: LogId,
    failures_left: Arc<AtomicUsize>,
}

#[async_trait]
impl EventSource for FlakySource {
    type Event = Credited;

    async fn materialize(&self, log_id: &LogId) -> SourceResult<SourceHandle<Credited>> {
        if *log_id == self.broken {
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(SourceError::ConnectionFailed("injected outage".to_string()));
            }
        }
        self.inner.materialize(log_id).await
    }
}

#[tokio::test]
async fn construction_failure_fails_only_the_triggering_request() {
    common::init_tracing();
    let source = FlakySource {
        inner: InMemoryEventSource::new(),
        broken: LogId::try_new("carol").unwrap(),
        failures_left: Arc::new(AtomicUsize::new(1)),
    };
    let factory = EngineFactory::new(
        source,
        |_id: &String| Ledger,
        |id: &String| LogId::try_new(id.clone()).unwrap(),
    );
    let (router, mut responses) = Router::new(
        |request: &LedgerRequest| request.account().to_string(),
        factory,
        32,
    );

    let outcome = router.submit(deposit("carol", 5)).await;
    assert!(matches!(
        outcome,
        Err(RouterError::Construction { ref id, .. }) if id == "carol"
    ));
    // No half-constructed entry is retained.
    assert_eq!(router.aggregate_count().await, 0);

    // Other aggregates are unaffected.
    router.submit(deposit("dave", 3)).await.unwrap();
    assert_eq!(responses.recv().await.unwrap().unwrap().balance, 3);

    // The source recovered, so a later request for the same identifier
    // constructs the pairing after all.
    router.submit(deposit("carol", 5)).await.unwrap();
    assert_eq!(responses.recv().await.unwrap().unwrap().balance, 5);
    assert_eq!(router.aggregate_count().await, 2);
}
