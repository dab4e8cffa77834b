//! Change Stream Integration Tests
//!
//! Validates the changeset sequence observed by watchers: the initial
//! delivery, index lists per commit, cancellation and terminal errors.

mod common;

use common::*;
use cordon_core::{Error, StoreError};
use cordon_engine::{ChangesetKind, ResultsStreamExt, WatchState};
use futures_util::StreamExt;
use std::time::Duration;

/// Test: watching an empty set, then inserting two objects in one write
#[tokio::test]
async fn test_initial_then_insertions() {
    let controller = open("watch-empty");
    let mut stream = controller.objects::<Company>().watch(None);

    let initial = stream.next().await.unwrap().unwrap();
    assert_eq!(initial.kind, ChangesetKind::Initial);

    controller
        .add(vec![company(1, "A"), company(2, "B")])
        .await
        .unwrap();
    let update = stream.next().await.unwrap().unwrap();
    assert_eq!(update.kind, ChangesetKind::Update);
    assert_eq!(update.insertions, vec![0, 1]);
    assert!(update.deletions.is_empty());
}

/// Test: deletions arrive in descending order, relative to the previous state
#[tokio::test]
async fn test_deletions_descending() {
    let controller = seeded("watch-deletions").await;
    let mut stream = controller.objects::<Company>().watch(None);
    stream.next().await.unwrap().unwrap();

    controller
        .objects::<Company>()
        .remove(false, |q| q.field("id").ne(2))
        .await
        .unwrap();
    let update = stream.next().await.unwrap().unwrap();
    assert_eq!(update.deletions, vec![2, 0]);
    assert!(update.insertions.is_empty());
    assert_eq!(update.result.count().await.unwrap(), 1);
}

/// Test: writes to an unrelated type produce no changeset
#[tokio::test]
async fn test_unrelated_writes_are_silent() {
    let controller = seeded("watch-unrelated").await;
    let mut stream = controller.objects::<Company>().watch(None);
    stream.next().await.unwrap().unwrap();

    controller.add(vec![logo(99)]).await.unwrap();
    controller.add(vec![company(4, "D")]).await.unwrap();

    // the logo write is skipped; the next delivery is the company insert
    let update = stream.next().await.unwrap().unwrap();
    assert_eq!(update.insertions, vec![3]);
}

/// Test: no changesets are delivered after cancel
#[tokio::test]
async fn test_no_events_after_cancel() {
    let controller = seeded("watch-cancel").await;
    let mut stream = controller.objects::<Company>().watch(None);
    stream.next().await.unwrap().unwrap();

    stream.cancel();
    controller.add(vec![company(4, "D")]).await.unwrap();
    controller
        .objects::<Company>()
        .remove_all(false)
        .await
        .unwrap();

    assert_eq!(stream.state(), WatchState::Cancelled);
    assert!(stream.next().await.is_none());
    assert_eq!(controller.active_subscriptions(), 0);
}

/// Test: cancelling before the registration ran leaves no subscription behind
#[tokio::test]
async fn test_cancel_while_subscribing() {
    let controller = seeded("watch-early-cancel").await;
    let mut stream = controller.objects::<Company>().watch(None);
    stream.cancel();

    let remaining = controller
        .run(|store| Ok(store.subscription_count()))
        .await
        .unwrap();
    assert_eq!(remaining, 0);
    assert!(stream.next().await.is_none());
}

/// Test: shutdown ends every live watcher with one terminal error
#[tokio::test]
async fn test_shutdown_terminates_watchers() {
    let controller = seeded("watch-shutdown").await;
    let mut first = controller.objects::<Company>().watch(None);
    let mut second = controller.objects::<Logo>().watch_count(None);
    first.next().await.unwrap().unwrap();
    assert_eq!(second.next().await.unwrap().unwrap(), 3);
    assert_eq!(controller.active_subscriptions(), 2);

    controller.shutdown();

    assert!(matches!(
        first.next().await,
        Some(Err(Error::StoreFault(StoreError::ContextTornDown)))
    ));
    assert!(first.next().await.is_none());
    assert!(second.next().await.unwrap().is_err());
    assert!(second.next().await.is_none());
    assert_eq!(controller.active_subscriptions(), 0);
}

/// Test: a store fault is delivered as the final item
#[tokio::test]
async fn test_store_fault_is_terminal() {
    let controller = seeded("watch-fault").await;
    let mut stream = controller.objects::<Company>().watch(None);
    stream.next().await.unwrap().unwrap();

    controller
        .run(|store| {
            store.fail(StoreError::ConstraintViolation("duplicate index".into()));
            Ok(())
        })
        .await
        .unwrap();

    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        Error::StoreFault(StoreError::ConstraintViolation(_))
    ));
    assert_eq!(stream.state(), WatchState::Failed);
    assert!(stream.next().await.is_none());
}

/// Test: the watched result set can be re-filtered in the stream
#[tokio::test]
async fn test_changeset_results_feed_stream_operators() {
    let controller = seeded("watch-chain").await;
    let mut filtered = controller
        .objects::<Company>()
        .watch(None)
        .map(|changeset| changeset.map(|c| c.result))
        .filter_query(|q| q.field("name").ne("A"))
        .map_represented();

    let first = filtered.next().await.unwrap().unwrap();
    let names = first.map(|c| Ok(c.name)).await.unwrap();
    assert_eq!(names, vec!["B".to_string(), "C".to_string()]);

    controller.add(vec![company(4, "D")]).await.unwrap();
    let second = filtered.next().await.unwrap().unwrap();
    assert_eq!(second.count().await.unwrap(), 3);
}

/// Test: watchers on other tasks see the same sequence
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watch_from_spawned_task() {
    let controller = open("watch-task");
    let mut counts = controller.objects::<Company>().watch_count(None);
    assert_eq!(counts.next().await.unwrap().unwrap(), 0);

    let watcher = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(Ok(count)) = counts.next().await {
            seen.push(count);
            if count == 3 {
                break;
            }
        }
        seen
    });

    for id in 1..=3 {
        controller.add(vec![company(id, "X")]).await.unwrap();
    }
    let seen = tokio::time::timeout(Duration::from_secs(5), watcher)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen, vec![1, 2, 3]);
}
