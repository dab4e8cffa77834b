//! Changeset watcher
//!
//! Turns store notification callbacks into a typed, cancellable stream.
//!
//! ## Lifecycle
//!
//! ```text
//! Subscribing ──first event──▶ Active
//!      │                         │
//!      ├──── cancel / drop ──────┼──▶ Cancelled
//!      └──── store fault ────────┴──▶ Failed
//! ```
//!
//! The subscription itself is registered by a body on the home context, and
//! the store callback (which lives there too) forwards every notification
//! through an unbounded channel. The first item is always the `Initial`
//! changeset. A store fault is delivered as one terminal `Err` item; after
//! `Cancelled` or `Failed` the stream yields nothing more, even if the home
//! context already queued further notifications.

use crate::controller::Controller;
use crate::handle::RawResultHandle;
use cordon_core::{
    CollectionChange, Error, NotificationCallback, NotificationToken, Object, Result, Store,
    SubscribeOptions,
};
use futures_util::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

/// Kind of a delivered changeset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangesetKind {
    /// First delivery after subscribing; index lists are empty
    Initial,
    /// One committed write that changed the watched collection
    Update,
}

/// One delivered notification.
///
/// Index lists are relative to the previously delivered state:
/// `deletions` descending, `insertions` and `modifications` ascending.
/// Modifications use indices of the previous state.
#[derive(Debug, Clone)]
pub struct Changeset<W> {
    /// Initial or update
    pub kind: ChangesetKind,
    /// Removed positions
    pub deletions: Vec<usize>,
    /// Added positions
    pub insertions: Vec<usize>,
    /// Positions whose watched properties changed
    pub modifications: Vec<usize>,
    /// The watched result set; reads on it observe the state at or after delivery
    pub result: W,
}

impl<W> Changeset<W> {
    fn from_change(change: CollectionChange, result: W) -> Self {
        match change {
            CollectionChange::Initial { .. } => Self {
                kind: ChangesetKind::Initial,
                deletions: Vec::new(),
                insertions: Vec::new(),
                modifications: Vec::new(),
                result,
            },
            CollectionChange::Update {
                deletions,
                insertions,
                modifications,
                ..
            } => Self {
                kind: ChangesetKind::Update,
                deletions,
                insertions,
                modifications,
                result,
            },
        }
    }
}

/// State of one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// Registration queued on the home context
    Subscribing,
    /// At least one changeset delivered
    Active,
    /// Cancelled by the subscriber
    Cancelled,
    /// Ended by a store fault or context teardown
    Failed,
}

impl WatchState {
    /// Whether no further changesets will be delivered
    pub fn is_terminal(&self) -> bool {
        matches!(self, WatchState::Cancelled | WatchState::Failed)
    }
}

enum Event {
    Change(CollectionChange),
    Failed(Error),
}

struct Shared {
    state: Mutex<WatchState>,
    token: Mutex<Option<NotificationToken>>,
    released: AtomicBool,
    active: Arc<AtomicUsize>,
}

impl Shared {
    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.active.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

type Unsubscriber = Box<dyn FnOnce(NotificationToken) + Send>;

/// Channel end plus lifecycle of one store subscription.
struct Subscription {
    rx: Option<mpsc::UnboundedReceiver<Event>>,
    shared: Arc<Shared>,
    pending: Option<Error>,
    unsubscribe: Option<Unsubscriber>,
}

impl Subscription {
    fn open<E: Object, S: Store>(
        controller: &Controller<S>,
        handle: &RawResultHandle,
        key_paths: Option<&[&str]>,
        count_only: bool,
    ) -> Self {
        let active = controller.subscription_counter();
        active.fetch_add(1, Ordering::AcqRel);
        let shared = Arc::new(Shared {
            state: Mutex::new(WatchState::Subscribing),
            token: Mutex::new(None),
            released: AtomicBool::new(false),
            active,
        });

        let spec = match handle {
            RawResultHandle::Live(spec) => spec.clone(),
            RawResultHandle::Frozen(_) => {
                return Self::failed(
                    shared,
                    Error::invalid_operation(format!(
                        "watch on a frozen result set of {}",
                        E::TYPE_NAME
                    )),
                );
            }
        };
        let options = SubscribeOptions {
            key_paths: key_paths.map(|paths| paths.iter().map(|p| p.to_string()).collect()),
            count_only,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let registration = Arc::clone(&shared);
        let submitted = controller.bridge().submit(move |store: &mut S| {
            let sink = tx.clone();
            let callback: NotificationCallback = Box::new(move |change| {
                let event = match change {
                    Ok(change) => Event::Change(change),
                    Err(e) => Event::Failed(e.into()),
                };
                let _ = sink.send(event);
            });
            match store.subscribe::<E>(spec, options, callback) {
                Ok(token) => {
                    let mut slot = registration.token.lock();
                    if *registration.state.lock() == WatchState::Cancelled {
                        store.unsubscribe(token);
                        debug!(target: "cordon::watch", token = token.0, "Cancelled before registration finished");
                    } else {
                        *slot = Some(token);
                        debug!(target: "cordon::watch", token = token.0, type_name = E::TYPE_NAME, "Watch registered");
                    }
                }
                Err(e) => {
                    let _ = tx.send(Event::Failed(e.into()));
                }
            }
        });
        if let Err(e) = submitted {
            return Self::failed(shared, e);
        }

        let controller = controller.clone();
        Self {
            rx: Some(rx),
            shared,
            pending: None,
            unsubscribe: Some(Box::new(move |token: NotificationToken| {
                let _ = controller
                    .bridge()
                    .submit(move |store: &mut S| store.unsubscribe(token));
            })),
        }
    }

    fn failed(shared: Arc<Shared>, error: Error) -> Self {
        *shared.state.lock() = WatchState::Failed;
        shared.release();
        Self {
            rx: None,
            shared,
            pending: Some(error),
            unsubscribe: None,
        }
    }

    fn state(&self) -> WatchState {
        *self.shared.state.lock()
    }

    fn set_state(&self, next: WatchState) {
        *self.shared.state.lock() = next;
        if next.is_terminal() {
            self.shared.release();
        }
    }

    fn poll_change(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<CollectionChange>>> {
        if let Some(error) = self.pending.take() {
            return Poll::Ready(Some(Err(error)));
        }
        if self.state().is_terminal() {
            return Poll::Ready(None);
        }
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(None);
        };
        match rx.poll_recv(cx) {
            Poll::Ready(Some(Event::Change(change))) => {
                self.set_state(WatchState::Active);
                Poll::Ready(Some(Ok(change)))
            }
            Poll::Ready(Some(Event::Failed(error))) => {
                self.set_state(WatchState::Failed);
                Poll::Ready(Some(Err(error)))
            }
            Poll::Ready(None) => {
                // Registration body dropped unrun at shutdown
                self.set_state(WatchState::Failed);
                Poll::Ready(Some(Err(Error::ContextUnavailable)))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn cancel(&mut self) {
        {
            let mut state = self.shared.state.lock();
            if state.is_terminal() {
                return;
            }
            *state = WatchState::Cancelled;
        }
        self.shared.release();
        self.rx = None;

        let token = self.shared.token.lock().take();
        if let (Some(token), Some(unsubscribe)) = (token, self.unsubscribe.take()) {
            debug!(target: "cordon::watch", token = token.0, "Unsubscribing");
            unsubscribe(token);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Stream of [`Changeset`]s for one watched result set.
///
/// Dropping the stream cancels the subscription.
pub struct ChangesetStream<W> {
    subscription: Subscription,
    result: W,
}

impl<W> ChangesetStream<W> {
    pub(crate) fn open<E: Object, S: Store>(
        controller: &Controller<S>,
        handle: &RawResultHandle,
        key_paths: Option<&[&str]>,
        result: W,
    ) -> Self {
        Self {
            subscription: Subscription::open::<E, S>(controller, handle, key_paths, false),
            result,
        }
    }

    /// Current subscription state
    pub fn state(&self) -> WatchState {
        self.subscription.state()
    }

    /// Stop delivery.
    ///
    /// Takes effect immediately for this stream; the store-side
    /// unsubscription is queued on the home context.
    pub fn cancel(&mut self) {
        self.subscription.cancel();
    }

    /// The watched result set
    pub fn result(&self) -> &W {
        &self.result
    }
}

impl<W: Clone + Unpin> Stream for ChangesetStream<W> {
    type Item = Result<Changeset<W>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let result = &this.result;
        this.subscription
            .poll_change(cx)
            .map(|item| item.map(|change| change.map(|c| Changeset::from_change(c, result.clone()))))
    }
}

/// Stream of element counts.
///
/// Registered as a count-only subscription: commits that leave the count
/// unchanged deliver nothing.
pub struct CountStream {
    subscription: Subscription,
}

impl CountStream {
    pub(crate) fn open<E: Object, S: Store>(
        controller: &Controller<S>,
        handle: &RawResultHandle,
        key_paths: Option<&[&str]>,
    ) -> Self {
        Self {
            subscription: Subscription::open::<E, S>(controller, handle, key_paths, true),
        }
    }

    /// Current subscription state
    pub fn state(&self) -> WatchState {
        self.subscription.state()
    }

    /// Stop delivery
    pub fn cancel(&mut self) {
        self.subscription.cancel();
    }
}

impl Stream for CountStream {
    type Item = Result<usize>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut()
            .subscription
            .poll_change(cx)
            .map(|item| item.map(|change| change.map(|c| c.count())))
    }
}
