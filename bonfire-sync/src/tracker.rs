//! Dynamic ID-set tracking.
//!
//! Folds several identifier-set sources into one live union. Each source
//! yields complete snapshots; the tracker keeps the latest snapshot per source
//! and emits the union whenever it changes.

use futures::stream::{BoxStream, Stream, StreamExt};
use indexmap::IndexSet;
use std::hash::Hash;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

/// A deduplicated identifier set.
///
/// Equality is set equality. Iteration order is deterministic: sources in
/// the order they were given, then each identifier's first occurrence.
pub type IdSet<K> = IndexSet<K>;

struct Source<K, E> {
    stream: Option<BoxStream<'static, Result<Vec<K>, E>>>,
    latest: Option<IdSet<K>>,
}

/// Live union of identifier-set sources.
///
/// - A source that has not reported yet counts as empty. The first union is
///   emitted as soon as any source reports.
/// - A union equal to the previously emitted one is not emitted again.
/// - Snapshots that are ready together are folded before one union is
///   computed.
/// - A source error is yielded once and ends the stream.
/// - The stream ends when every source has ended.
///
/// Dropping the tracker drops every source stream.
pub struct IdSetTracker<K, E> {
    sources: Vec<Source<K, E>>,
    last_emitted: Option<IdSet<K>>,
    terminated: bool,
}

// No field is ever pin-projected.
impl<K, E> Unpin for IdSetTracker<K, E> {}

impl<K, E> IdSetTracker<K, E>
where
    K: Clone + Eq + Hash,
{
    /// Tracks the union of `sources`.
    pub fn new(sources: Vec<BoxStream<'static, Result<Vec<K>, E>>>) -> Self {
        Self {
            sources: sources
                .into_iter()
                .map(|stream| Source {
                    stream: Some(stream),
                    latest: None,
                })
                .collect(),
            last_emitted: None,
            terminated: false,
        }
    }

    /// Tracks a single source. The union is the source deduplicated.
    pub fn single(source: BoxStream<'static, Result<Vec<K>, E>>) -> Self {
        Self::new(vec![source])
    }

    /// Number of sources still open.
    pub fn open_sources(&self) -> usize {
        self.sources.iter().filter(|s| s.stream.is_some()).count()
    }

    fn union(&self) -> IdSet<K> {
        self.sources
            .iter()
            .filter_map(|s| s.latest.as_ref())
            .flat_map(|set| set.iter().cloned())
            .collect()
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.sources.clear();
    }
}

impl<K, E> Stream for IdSetTracker<K, E>
where
    K: Clone + Eq + Hash,
{
    type Item = Result<IdSet<K>, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }

        let mut changed = false;
        for index in 0..this.sources.len() {
            while let Some(stream) = this.sources[index].stream.as_mut() {
                match stream.poll_next_unpin(cx) {
                    Poll::Ready(Some(Ok(ids))) => {
                        this.sources[index].latest = Some(ids.into_iter().collect());
                        changed = true;
                    }
                    Poll::Ready(Some(Err(e))) => {
                        warn!("ID-set source {} failed, stopping tracker", index);
                        this.terminate();
                        return Poll::Ready(Some(Err(e)));
                    }
                    Poll::Ready(None) => {
                        debug!("ID-set source {} ended", index);
                        this.sources[index].stream = None;
                    }
                    Poll::Pending => break,
                }
            }
        }

        if changed {
            let union = this.union();
            if this.last_emitted.as_ref() != Some(&union) {
                this.last_emitted = Some(union.clone());
                return Poll::Ready(Some(Ok(union)));
            }
        }

        if this.open_sources() == 0 {
            this.terminated = true;
            return Poll::Ready(None);
        }
        Poll::Pending
    }
}

/// Tracks the union of `sources`. See [`IdSetTracker`].
pub fn track<K, E>(sources: Vec<BoxStream<'static, Result<Vec<K>, E>>>) -> IdSetTracker<K, E>
where
    K: Clone + Eq + Hash,
{
    IdSetTracker::new(sources)
}
