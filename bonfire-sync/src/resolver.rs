//! Live entity resolution.
//!
//! Turns a stream of identifier sets into a stream of resolved-entity
//! aggregates. The resolver keeps one subscription per tracked identifier
//! and reconciles that mapping against every new set:
//!
//! 1. Identifiers that entered the set get a fresh subscription, pending
//!    until it yields.
//! 2. Identifiers that left the set have their subscription dropped
//!    (cancelled) and their cached entity discarded.
//! 3. Identifiers already tracked are left alone.
//!
//! Every time a subscription yields, the aggregate is rebuilt from the cached
//! entities in identifier-set order. Pending identifiers are simply absent.

use crate::config::AggregationConfig;
use crate::tracker::IdSet;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Resolves one identifier to a live stream of its entity.
pub type ResolveOne<K, T, E> =
    Box<dyn FnMut(&K) -> BoxStream<'static, Result<T, E>> + Send + 'static>;

/// A per-identifier resolution failure, reported out of band.
#[derive(Debug)]
pub struct ResolutionFailure<K, E> {
    pub id: K,
    pub error: E,
}

/// One tracked identifier.
struct Slot<T, E> {
    /// `None` once the subscription has completed.
    subscription: Option<BoxStream<'static, Result<T, E>>>,
    /// Latest resolved entity. `None` while pending.
    entity: Option<T>,
}

/// Stream of resolved aggregates for a dynamic identifier set.
///
/// - At most one live subscription per tracked identifier, zero for
///   identifiers that left the set.
/// - An aggregate equal to the previous emission is not emitted again.
/// - A failing identifier is dropped from the aggregate and never
///   resubscribed for the lifetime of this resolver. The failure goes to the
///   optional sink instead of failing the stream.
/// - An error on the identifier-set stream is yielded once and ends the
///   stream.
/// - The stream ends once the identifier-set stream has ended and every
///   subscription has completed.
///
/// Dropping the resolver cancels every subscription it holds.
pub struct LiveResolver<K, T, E> {
    ids: Option<BoxStream<'static, Result<IdSet<K>, E>>>,
    resolve_one: ResolveOne<K, T, E>,
    order: Vec<K>,
    slots: HashMap<K, Slot<T, E>>,
    failed: HashSet<K>,
    failure_sink: Option<UnboundedSender<ResolutionFailure<K, E>>>,
    last_emitted: Option<Vec<T>>,
    config: AggregationConfig,
    terminated: bool,
}

// No field is ever pin-projected.
impl<K, T, E> Unpin for LiveResolver<K, T, E> {}

impl<K, T, E> LiveResolver<K, T, E>
where
    K: Clone + Eq + Hash + fmt::Display,
    T: Clone + PartialEq,
    E: fmt::Display,
{
    /// Resolves every identifier in `ids` with `resolve_one`.
    pub fn new<S, F>(ids: S, resolve_one: F) -> Self
    where
        S: Stream<Item = Result<IdSet<K>, E>> + Send + 'static,
        F: FnMut(&K) -> BoxStream<'static, Result<T, E>> + Send + 'static,
    {
        Self {
            ids: Some(ids.boxed()),
            resolve_one: Box::new(resolve_one),
            order: Vec::new(),
            slots: HashMap::new(),
            failed: HashSet::new(),
            failure_sink: None,
            last_emitted: None,
            config: AggregationConfig::default(),
            terminated: false,
        }
    }

    /// Sets the aggregation config.
    #[must_use]
    pub fn with_config(mut self, config: AggregationConfig) -> Self {
        self.config = config;
        self
    }

    /// Reports per-identifier failures to `sink`.
    #[must_use]
    pub fn with_failure_sink(mut self, sink: UnboundedSender<ResolutionFailure<K, E>>) -> Self {
        self.failure_sink = Some(sink);
        self
    }

    /// Number of subscriptions currently open.
    pub fn live_subscriptions(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.subscription.is_some())
            .count()
    }

    /// Identifiers currently tracked, in identifier-set order. Failed
    /// identifiers are not tracked.
    pub fn tracked_ids(&self) -> Vec<K> {
        self.order
            .iter()
            .filter(|id| self.slots.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Applies a new identifier set. Returns whether the visible aggregate may
    /// have changed.
    fn reconcile(&mut self, ids: IdSet<K>) -> bool {
        // The first set always produces an emission, even an empty one.
        let mut changed = self.last_emitted.is_none();

        self.slots.retain(|id, _| {
            let keep = ids.contains(id);
            if !keep {
                debug!("Cancelling subscription for {}", id);
                changed = true;
            }
            keep
        });

        for id in &ids {
            if self.slots.contains_key(id) || self.failed.contains(id) {
                continue;
            }
            debug!("Subscribing to {}", id);
            let subscription = (self.resolve_one)(id);
            self.slots.insert(
                id.clone(),
                Slot {
                    subscription: Some(subscription),
                    entity: None,
                },
            );
        }

        let order: Vec<K> = ids.into_iter().collect();
        if order != self.order {
            changed = true;
        }
        self.order = order;
        changed
    }

    /// Drains every ready subscription. Returns whether any entity changed.
    fn poll_subscriptions(&mut self, cx: &mut Context<'_>) -> bool {
        let mut changed = false;
        let mut failures = Vec::new();

        for (id, slot) in &mut self.slots {
            while let Some(subscription) = slot.subscription.as_mut() {
                match subscription.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(entity))) => {
                        slot.entity = Some(entity);
                        changed = true;
                    }
                    Poll::Ready(Some(Err(e))) => {
                        failures.push((id.clone(), e));
                        break;
                    }
                    Poll::Ready(None) => {
                        slot.subscription = None;
                    }
                    Poll::Pending => break,
                }
            }
        }

        for (id, error) in failures {
            if self.config.log_resolution_failures {
                warn!("Failed to resolve {}: {}", id, error);
            }
            if let Some(slot) = self.slots.remove(&id) {
                changed |= slot.entity.is_some();
            }
            self.failed.insert(id.clone());
            if let Some(sink) = &self.failure_sink {
                // A dropped receiver only means nobody is listening.
                let _ = sink.send(ResolutionFailure { id, error });
            }
        }
        changed
    }

    fn aggregate(&self) -> Vec<T> {
        self.order
            .iter()
            .filter_map(|id| self.slots.get(id).and_then(|slot| slot.entity.clone()))
            .collect()
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.ids = None;
        self.slots.clear();
    }
}

impl<K, T, E> Stream for LiveResolver<K, T, E>
where
    K: Clone + Eq + Hash + fmt::Display,
    T: Clone + PartialEq,
    E: fmt::Display,
{
    type Item = Result<Vec<T>, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }

        let mut dirty = false;
        while let Some(ids) = this.ids.as_mut() {
            match ids.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(set))) => dirty |= this.reconcile(set),
                Poll::Ready(Some(Err(e))) => {
                    warn!("ID-set stream failed, cancelling {} subscriptions", this.slots.len());
                    this.terminate();
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    debug!("ID-set stream ended");
                    this.ids = None;
                }
                Poll::Pending => break,
            }
        }

        // Polled after reconciling so new subscriptions register a waker.
        dirty |= this.poll_subscriptions(cx);

        if dirty {
            let aggregate = this.aggregate();
            if this.last_emitted.as_ref() != Some(&aggregate) {
                this.last_emitted = Some(aggregate.clone());
                return Poll::Ready(Some(Ok(aggregate)));
            }
        }

        if this.ids.is_none() && this.live_subscriptions() == 0 {
            this.terminate();
            return Poll::Ready(None);
        }
        Poll::Pending
    }
}

/// Resolves every identifier in `ids` with `resolve_one`. See [`LiveResolver`].
pub fn resolve<K, T, E, S, F>(ids: S, resolve_one: F) -> LiveResolver<K, T, E>
where
    K: Clone + Eq + Hash + fmt::Display,
    T: Clone + PartialEq,
    E: fmt::Display,
    S: Stream<Item = Result<IdSet<K>, E>> + Send + 'static,
    F: FnMut(&K) -> BoxStream<'static, Result<T, E>> + Send + 'static,
{
    LiveResolver::new(ids, resolve_one)
}
