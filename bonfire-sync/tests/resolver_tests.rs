use bonfire_sync::{AggregationConfig, IdSet, LiveResolver};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::stream::{self, BoxStream, StreamExt};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Poll;
use tokio_test::task::{self, Spawn};
use tokio_test::{assert_pending, assert_ready};

type Resolver = LiveResolver<&'static str, String, String>;

/// Increments its counter when the subscription holding it is dropped.
struct CancelGuard(Arc<AtomicUsize>);

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct Counters {
    subscribed: Arc<AtomicUsize>,
    cancelled: Arc<AtomicUsize>,
}

impl Counters {
    fn subscribed(&self) -> usize {
        self.subscribed.load(Ordering::SeqCst)
    }

    fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Wraps `stream` so that subscribing and dropping are counted.
    fn track<T: Send + 'static>(&self, stream: BoxStream<'static, T>) -> BoxStream<'static, T> {
        self.subscribed.fetch_add(1, Ordering::SeqCst);
        let guard = CancelGuard(self.cancelled.clone());
        stream
            .map(move |item| {
                let _held = &guard;
                item
            })
            .boxed()
    }
}

type Entity = Result<String, String>;

/// Per-id entity channels. A pair is opened when an id is sent to the
/// resolver, so values can be queued before the resolver subscribes.
#[derive(Default)]
struct Entities {
    senders: HashMap<&'static str, UnboundedSender<Entity>>,
    waiting: HashMap<&'static str, UnboundedReceiver<Entity>>,
}

impl Entities {
    /// Opens a fresh pair unless the current one is still usable.
    fn open(&mut self, id: &'static str) {
        let usable = self.senders.get(id).is_some_and(|tx| !tx.is_closed());
        if !usable {
            let (tx, rx) = unbounded();
            self.senders.insert(id, tx);
            self.waiting.insert(id, rx);
        }
    }

    /// Hands the waiting receiver to a new subscription.
    fn subscribe(&mut self, id: &'static str) -> UnboundedReceiver<Entity> {
        if !self.waiting.contains_key(id) {
            self.senders.remove(id);
            self.open(id);
        }
        self.waiting.remove(id).unwrap()
    }
}

/// Drives a resolver by hand: pushes identifier sets and per-id entity values.
struct Harness {
    ids: UnboundedSender<Result<IdSet<&'static str>, String>>,
    entities: Arc<Mutex<Entities>>,
    counters: Counters,
}

impl Harness {
    fn new() -> (Self, Resolver) {
        let (ids_tx, ids_rx) = unbounded();
        let entities: Arc<Mutex<Entities>> = Arc::default();
        let counters = Counters::default();

        let resolver = {
            let entities = entities.clone();
            let counters = counters.clone();
            LiveResolver::new(ids_rx, move |id: &&'static str| {
                let rx = entities.lock().unwrap().subscribe(*id);
                counters.track(rx.boxed())
            })
        };

        let harness = Self {
            ids: ids_tx,
            entities,
            counters,
        };
        (harness, resolver)
    }

    fn set_ids(&self, ids: &[&'static str]) {
        let mut entities = self.entities.lock().unwrap();
        for id in ids {
            entities.open(*id);
        }
        self.ids
            .unbounded_send(Ok(ids.iter().copied().collect()))
            .unwrap();
    }

    fn send(&self, id: &'static str, entity: Entity) {
        let entities = self.entities.lock().unwrap();
        entities.senders[id].unbounded_send(entity).unwrap();
    }

    fn resolve(&self, id: &'static str, value: &str) {
        self.send(id, Ok(value.to_string()));
    }

    fn fail(&self, id: &'static str, error: &str) {
        self.send(id, Err(error.to_string()));
    }

    /// Ends the entity stream for `id`.
    fn complete(&self, id: &'static str) {
        self.entities.lock().unwrap().senders.remove(id);
    }
}

fn next_aggregate(resolver: &mut Spawn<Resolver>) -> Vec<String> {
    assert_ready!(resolver.poll_next()).unwrap().unwrap()
}

// ── Aggregation ─────────────────────────────────────────────────

#[test]
fn first_set_emits_even_before_anything_resolves() {
    let (harness, resolver) = Harness::new();
    let mut resolver = task::spawn(resolver);
    assert_pending!(resolver.poll_next());

    harness.set_ids(&["a", "b"]);
    assert!(resolver.is_woken());
    assert_eq!(next_aggregate(&mut resolver), Vec::<String>::new());
    assert_eq!(resolver.live_subscriptions(), 2);
}

#[test]
fn aggregate_follows_id_set_order_not_resolution_order() {
    let (harness, resolver) = Harness::new();
    let mut resolver = task::spawn(resolver);
    harness.set_ids(&["a", "b"]);
    next_aggregate(&mut resolver);

    harness.resolve("b", "B");
    assert!(resolver.is_woken());
    assert_eq!(next_aggregate(&mut resolver), vec!["B"]);

    harness.resolve("a", "A");
    assert_eq!(next_aggregate(&mut resolver), vec!["A", "B"]);
}

#[test]
fn entities_ready_at_first_poll_share_one_emission() {
    let (harness, resolver) = Harness::new();
    let mut resolver = task::spawn(resolver);
    harness.set_ids(&["a", "b"]);
    harness.resolve("b", "B");
    harness.resolve("a", "A");

    assert_eq!(next_aggregate(&mut resolver), vec!["A", "B"]);
    assert_pending!(resolver.poll_next());
    assert_eq!(harness.counters.subscribed(), 2);
}

#[test]
fn entity_update_re_emits_and_identical_value_does_not() {
    let (harness, resolver) = Harness::new();
    let mut resolver = task::spawn(resolver);
    harness.set_ids(&["a"]);
    next_aggregate(&mut resolver);

    harness.resolve("a", "A");
    assert_eq!(next_aggregate(&mut resolver), vec!["A"]);

    harness.resolve("a", "A2");
    assert_eq!(next_aggregate(&mut resolver), vec!["A2"]);

    harness.resolve("a", "A2");
    assert_pending!(resolver.poll_next());
}

#[test]
fn reordered_set_re_emits_in_new_order() {
    let (harness, resolver) = Harness::new();
    let mut resolver = task::spawn(resolver);
    harness.set_ids(&["a", "b"]);
    harness.resolve("a", "A");
    harness.resolve("b", "B");
    assert_eq!(next_aggregate(&mut resolver), vec!["A", "B"]);

    harness.set_ids(&["b", "a"]);
    assert_eq!(next_aggregate(&mut resolver), vec!["B", "A"]);
    assert_eq!(harness.counters.subscribed(), 2);
}

// ── Subscription lifecycle ──────────────────────────────────────

#[test]
fn unchanged_set_keeps_existing_subscriptions() {
    let (harness, resolver) = Harness::new();
    let mut resolver = task::spawn(resolver);
    harness.set_ids(&["a", "b"]);
    next_aggregate(&mut resolver);

    harness.set_ids(&["a", "b"]);
    assert_pending!(resolver.poll_next());
    assert_eq!(harness.counters.subscribed(), 2);
    assert_eq!(harness.counters.cancelled(), 0);
}

#[test]
fn removed_id_is_cancelled_and_dropped_from_aggregate() {
    let (harness, resolver) = Harness::new();
    let mut resolver = task::spawn(resolver);
    harness.set_ids(&["a", "b"]);
    harness.resolve("a", "A");
    harness.resolve("b", "B");
    assert_eq!(next_aggregate(&mut resolver), vec!["A", "B"]);

    harness.set_ids(&["b"]);
    assert_eq!(next_aggregate(&mut resolver), vec!["B"]);
    assert_eq!(harness.counters.cancelled(), 1);
    assert_eq!(resolver.live_subscriptions(), 1);
    assert_eq!(resolver.tracked_ids(), vec!["b"]);
}

#[test]
fn re_added_id_subscribes_again_and_starts_pending() {
    let (harness, resolver) = Harness::new();
    let mut resolver = task::spawn(resolver);
    harness.set_ids(&["a"]);
    harness.resolve("a", "A");
    assert_eq!(next_aggregate(&mut resolver), vec!["A"]);

    harness.set_ids(&[]);
    assert_eq!(next_aggregate(&mut resolver), Vec::<String>::new());

    harness.set_ids(&["a"]);
    assert_pending!(resolver.poll_next());
    assert_eq!(harness.counters.subscribed(), 2);
    assert_eq!(harness.counters.cancelled(), 1);

    harness.resolve("a", "A again");
    assert_eq!(next_aggregate(&mut resolver), vec!["A again"]);
}

#[test]
fn dropping_the_resolver_cancels_every_subscription() {
    let (harness, resolver) = Harness::new();
    let mut resolver = task::spawn(resolver);
    harness.set_ids(&["a", "b", "c"]);
    next_aggregate(&mut resolver);
    assert_eq!(harness.counters.subscribed(), 3);

    drop(resolver);
    assert_eq!(harness.counters.cancelled(), 3);
    assert!(harness.ids.is_closed());
}

#[test]
fn completed_subscription_keeps_its_entity() {
    let (harness, resolver) = Harness::new();
    let mut resolver = task::spawn(resolver);
    harness.set_ids(&["a", "b"]);
    harness.resolve("a", "A");
    assert_eq!(next_aggregate(&mut resolver), vec!["A"]);

    harness.complete("a");
    assert_pending!(resolver.poll_next());
    assert_eq!(resolver.live_subscriptions(), 1);
    assert_eq!(resolver.tracked_ids(), vec!["a", "b"]);

    harness.resolve("b", "B");
    assert_eq!(next_aggregate(&mut resolver), vec!["A", "B"]);
}

#[test]
fn ends_once_ids_end_and_subscriptions_complete() {
    let (harness, resolver) = Harness::new();
    let mut resolver = task::spawn(resolver);
    harness.set_ids(&["a"]);
    harness.resolve("a", "A");
    assert_eq!(next_aggregate(&mut resolver), vec!["A"]);

    harness.ids.close_channel();
    assert_pending!(resolver.poll_next());

    harness.complete("a");
    assert!(assert_ready!(resolver.poll_next()).is_none());
}

// ── Failures ────────────────────────────────────────────────────

#[test]
fn failing_id_is_isolated_and_reported() {
    let (harness, resolver) = Harness::new();
    let (sink_tx, mut sink_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut resolver = task::spawn(resolver.with_failure_sink(sink_tx));
    harness.set_ids(&["a", "b"]);
    harness.resolve("a", "A");
    harness.resolve("b", "B");
    assert_eq!(next_aggregate(&mut resolver), vec!["A", "B"]);

    harness.fail("a", "permission denied");
    assert_eq!(next_aggregate(&mut resolver), vec!["B"]);

    let failure = sink_rx.try_recv().unwrap();
    assert_eq!(failure.id, "a");
    assert_eq!(failure.error, "permission denied");
    assert_eq!(resolver.tracked_ids(), vec!["b"]);

    // Siblings keep updating.
    harness.resolve("b", "B2");
    assert_eq!(next_aggregate(&mut resolver), vec!["B2"]);
}

#[test]
fn failed_id_is_not_resubscribed() {
    let (harness, resolver) = Harness::new();
    let mut resolver = task::spawn(resolver.with_config(AggregationConfig {
        log_resolution_failures: false,
    }));
    harness.set_ids(&["a"]);
    next_aggregate(&mut resolver);

    harness.fail("a", "gone");
    assert_pending!(resolver.poll_next());

    harness.set_ids(&[]);
    harness.set_ids(&["a"]);
    assert_pending!(resolver.poll_next());
    assert_eq!(harness.counters.subscribed(), 1);
    assert_eq!(resolver.live_subscriptions(), 0);
}

#[test]
fn pending_id_failure_does_not_emit() {
    let (harness, resolver) = Harness::new();
    let mut resolver = task::spawn(resolver);
    harness.set_ids(&["a", "b"]);
    harness.resolve("b", "B");
    assert_eq!(next_aggregate(&mut resolver), vec!["B"]);

    harness.fail("a", "boom");
    assert_pending!(resolver.poll_next());
}

#[test]
fn id_set_error_cancels_everything_and_ends() {
    let (harness, resolver) = Harness::new();
    let mut resolver = task::spawn(resolver);
    harness.set_ids(&["a", "b"]);
    next_aggregate(&mut resolver);

    harness.ids.unbounded_send(Err("index unavailable".into())).unwrap();
    let err = assert_ready!(resolver.poll_next()).unwrap().unwrap_err();
    assert_eq!(err, "index unavailable");
    assert_eq!(harness.counters.cancelled(), 2);
    assert!(assert_ready!(resolver.poll_next()).is_none());
}

#[tokio::test]
async fn resolves_finite_streams_to_completion() {
    let ids = stream::iter(vec![Ok::<_, String>(IdSet::from_iter(["x", "y"]))]);
    let resolver = bonfire_sync::resolve(ids, |id: &&'static str| {
        stream::iter(vec![Ok(id.to_uppercase())]).boxed()
    });

    let emissions: Vec<_> = resolver.map(Result::unwrap).collect().await;
    assert_eq!(emissions.last(), Some(&vec!["X".to_string(), "Y".to_string()]));
}

// ── Property: no leaked subscriptions ───────────────────────────

proptest! {
    #[test]
    fn live_subscriptions_match_current_set(
        sets in proptest::collection::vec(proptest::collection::hash_set(0u8..6, 0..6), 1..30)
    ) {
        let counters = Counters::default();
        let (ids_tx, ids_rx) = unbounded::<Result<IdSet<u8>, String>>();
        let resolver = {
            let counters = counters.clone();
            LiveResolver::new(ids_rx, move |_: &u8| {
                counters.track(stream::pending::<Result<String, String>>().boxed())
            })
        };
        let mut resolver = task::spawn(resolver);

        for set in sets {
            ids_tx.unbounded_send(Ok(set.iter().copied().collect())).unwrap();
            while let Poll::Ready(Some(_)) = resolver.poll_next() {}

            let open = counters.subscribed() - counters.cancelled();
            prop_assert_eq!(open, set.len());
            prop_assert_eq!(resolver.live_subscriptions(), set.len());
            let mut tracked = resolver.tracked_ids();
            tracked.sort_unstable();
            let mut expected: Vec<u8> = set.into_iter().collect();
            expected.sort_unstable();
            prop_assert_eq!(tracked, expected);
        }

        drop(resolver);
        prop_assert_eq!(counters.subscribed(), counters.cancelled());
    }
}
