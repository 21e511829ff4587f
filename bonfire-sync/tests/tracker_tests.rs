use bonfire_sync::{IdSet, IdSetTracker};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::stream::{self, StreamExt};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::HashSet;
use tokio_test::task;
use tokio_test::{assert_pending, assert_ready};

type Snapshot = Result<Vec<&'static str>, String>;

fn sources(n: usize) -> (Vec<UnboundedSender<Snapshot>>, IdSetTracker<&'static str, String>) {
    let mut senders = Vec::new();
    let mut streams = Vec::new();
    for _ in 0..n {
        let (tx, rx) = unbounded();
        senders.push(tx);
        streams.push(rx.boxed());
    }
    (senders, IdSetTracker::new(streams))
}

fn ordered(set: &IdSet<&'static str>) -> Vec<&'static str> {
    set.iter().copied().collect()
}

// ── Union ───────────────────────────────────────────────────────

#[test]
fn waits_for_first_report() {
    let (_senders, tracker) = sources(2);
    let mut tracker = task::spawn(tracker);
    assert_pending!(tracker.poll_next());
}

#[test]
fn first_report_emits_without_waiting_for_other_sources() {
    let (senders, tracker) = sources(2);
    let mut tracker = task::spawn(tracker);
    assert_pending!(tracker.poll_next());

    senders[1].unbounded_send(Ok(vec!["peek"])).unwrap();
    assert!(tracker.is_woken());
    let union = assert_ready!(tracker.poll_next()).unwrap().unwrap();
    assert_eq!(ordered(&union), vec!["peek"]);
}

#[test]
fn emits_union_of_latest_snapshots_in_source_order() {
    let (senders, tracker) = sources(2);
    let mut tracker = task::spawn(tracker);

    senders[0].unbounded_send(Ok(vec!["bomb"])).unwrap();
    let union = assert_ready!(tracker.poll_next()).unwrap().unwrap();
    assert_eq!(ordered(&union), vec!["bomb"]);

    senders[1].unbounded_send(Ok(vec!["peek", "bomb"])).unwrap();
    let union = assert_ready!(tracker.poll_next()).unwrap().unwrap();
    assert_eq!(ordered(&union), vec!["bomb", "peek"]);

    senders[0].unbounded_send(Ok(vec![])).unwrap();
    let union = assert_ready!(tracker.poll_next()).unwrap().unwrap();
    assert_eq!(ordered(&union), vec!["peek", "bomb"]);
}

#[test]
fn deduplicates_within_a_snapshot() {
    let (senders, tracker) = sources(1);
    let mut tracker = task::spawn(tracker);

    senders[0].unbounded_send(Ok(vec!["a", "b", "a"])).unwrap();
    let union = assert_ready!(tracker.poll_next()).unwrap().unwrap();
    assert_eq!(ordered(&union), vec!["a", "b"]);
}

#[test]
fn empty_first_snapshot_is_emitted() {
    let (senders, tracker) = sources(1);
    let mut tracker = task::spawn(tracker);

    senders[0].unbounded_send(Ok(vec![])).unwrap();
    let union = assert_ready!(tracker.poll_next()).unwrap().unwrap();
    assert!(union.is_empty());
}

#[test]
fn simultaneous_snapshots_fold_into_one_emission() {
    let (senders, tracker) = sources(2);
    let mut tracker = task::spawn(tracker);

    senders[0].unbounded_send(Ok(vec!["bomb"])).unwrap();
    senders[1].unbounded_send(Ok(vec!["peek"])).unwrap();
    senders[0].unbounded_send(Ok(vec!["bomb", "fire"])).unwrap();

    let union = assert_ready!(tracker.poll_next()).unwrap().unwrap();
    assert_eq!(ordered(&union), vec!["bomb", "fire", "peek"]);
    assert_pending!(tracker.poll_next());
}

// ── Idempotence ─────────────────────────────────────────────────

#[test]
fn identical_snapshot_is_not_re_emitted() {
    let (senders, tracker) = sources(1);
    let mut tracker = task::spawn(tracker);

    senders[0].unbounded_send(Ok(vec!["a", "b"])).unwrap();
    assert_ready!(tracker.poll_next()).unwrap().unwrap();

    senders[0].unbounded_send(Ok(vec!["a", "b"])).unwrap();
    assert_pending!(tracker.poll_next());
}

#[test]
fn reordered_snapshot_is_not_re_emitted() {
    let (senders, tracker) = sources(1);
    let mut tracker = task::spawn(tracker);

    senders[0].unbounded_send(Ok(vec!["a", "b"])).unwrap();
    assert_ready!(tracker.poll_next()).unwrap().unwrap();

    senders[0].unbounded_send(Ok(vec!["b", "a"])).unwrap();
    assert_pending!(tracker.poll_next());
}

#[test]
fn overlap_between_sources_does_not_change_union() {
    let (senders, tracker) = sources(2);
    let mut tracker = task::spawn(tracker);

    senders[0].unbounded_send(Ok(vec!["a"])).unwrap();
    assert_ready!(tracker.poll_next()).unwrap().unwrap();

    senders[1].unbounded_send(Ok(vec!["a"])).unwrap();
    assert_pending!(tracker.poll_next());
}

// ── Termination ─────────────────────────────────────────────────

#[test]
fn source_error_is_reported_and_ends_tracking() {
    let (senders, tracker) = sources(2);
    let mut tracker = task::spawn(tracker);

    senders[0].unbounded_send(Ok(vec!["a"])).unwrap();
    assert_ready!(tracker.poll_next()).unwrap().unwrap();

    senders[1].unbounded_send(Err("listener cancelled".into())).unwrap();
    let err = assert_ready!(tracker.poll_next()).unwrap().unwrap_err();
    assert_eq!(err, "listener cancelled");
    assert!(assert_ready!(tracker.poll_next()).is_none());

    // Every source subscription was dropped.
    assert!(senders.iter().all(|tx| tx.is_closed()));
}

#[test]
fn ends_when_every_source_ends() {
    let (mut senders, tracker) = sources(2);
    let mut tracker = task::spawn(tracker);

    senders[0].unbounded_send(Ok(vec!["a"])).unwrap();
    assert_ready!(tracker.poll_next()).unwrap().unwrap();

    senders.remove(0);
    assert_pending!(tracker.poll_next());
    assert_eq!(tracker.open_sources(), 1);

    senders.clear();
    assert!(assert_ready!(tracker.poll_next()).is_none());
}

#[test]
fn ended_source_keeps_its_last_snapshot() {
    let (mut senders, tracker) = sources(2);
    let mut tracker = task::spawn(tracker);

    senders[0].unbounded_send(Ok(vec!["a"])).unwrap();
    assert_ready!(tracker.poll_next()).unwrap().unwrap();
    senders.remove(0);

    senders[0].unbounded_send(Ok(vec!["b"])).unwrap();
    let union = assert_ready!(tracker.poll_next()).unwrap().unwrap();
    assert_eq!(ordered(&union), vec!["a", "b"]);
}

#[tokio::test]
async fn collects_finite_sources() {
    let public = stream::iter(vec![Ok::<_, String>(vec!["bomb"])]).boxed();
    let private = stream::iter(vec![Ok(vec!["peek"])]).boxed();

    let unions: Vec<_> = IdSetTracker::new(vec![public, private]).collect().await;
    assert_eq!(unions.len(), 1);
    assert_eq!(ordered(unions[0].as_ref().unwrap()), vec!["bomb", "peek"]);
}

// ── Property: union of latest snapshots ─────────────────────────

proptest! {
    #[test]
    fn emits_exact_union_of_latest_snapshots(
        steps in proptest::collection::vec(
            (0usize..3, proptest::collection::hash_set(0u8..8, 0..5)),
            1..40,
        )
    ) {
        let mut senders = Vec::new();
        let mut streams = Vec::new();
        for _ in 0..3 {
            let (tx, rx) = unbounded::<Result<Vec<u8>, String>>();
            senders.push(tx);
            streams.push(rx.boxed());
        }
        let mut tracker = task::spawn(IdSetTracker::new(streams));
        let mut latest: Vec<Option<HashSet<u8>>> = vec![None; 3];
        let mut last: Option<HashSet<u8>> = None;

        for (source, snapshot) in steps {
            senders[source]
                .unbounded_send(Ok(snapshot.iter().copied().collect()))
                .unwrap();
            latest[source] = Some(snapshot);
            let expected: HashSet<u8> = latest.iter().flatten().flatten().copied().collect();

            match tracker.poll_next() {
                std::task::Poll::Ready(Some(Ok(union))) => {
                    prop_assert_ne!(last.as_ref(), Some(&expected));
                    let emitted: HashSet<u8> = union.iter().copied().collect();
                    prop_assert_eq!(emitted, expected.clone());
                    last = Some(expected);
                }
                std::task::Poll::Pending => prop_assert_eq!(last.as_ref(), Some(&expected)),
                other => prop_assert!(false, "unexpected poll result: {:?}", other),
            }
        }
    }
}
