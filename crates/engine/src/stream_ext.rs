//! Stream extensions over result sets
//!
//! Lets a stream of result sets (for example [`Results::into_stream`] or the
//! `result` of each changeset) be transformed without leaving the stream.
//! Errors pass through untouched; each operator runs once per item. The
//! write operators (`for_each_object`, `remove`, `remove_all`) run one
//! write transaction per item.

use crate::controller::Controller;
use crate::represented::{ManageableSource, RepresentedResults};
use crate::results::Results;
use cordon_core::{Object, Predicate, Query, Result, SortDescriptor, Store};
use futures_util::stream::{BoxStream, Stream, StreamExt};

/// Operators for any `Stream<Item = Result<Results<E, S>>>`
pub trait ResultsStreamExt<E, S>:
    Stream<Item = Result<Results<E, S>>> + Sized + Send + 'static
where
    E: Object,
    S: Store,
{
    /// Narrow every result set by `predicate`.
    fn filter_by(self, predicate: Predicate) -> BoxStream<'static, Result<Results<E, S>>> {
        self.then(move |item| {
            let predicate = predicate.clone();
            async move { item?.filter(predicate).await }
        })
        .boxed()
    }

    /// Narrow every result set by a typed predicate.
    ///
    /// The predicate is built once, when the operator is attached.
    fn filter_query<F>(self, build: F) -> BoxStream<'static, Result<Results<E, S>>>
    where
        F: FnOnce(Query<E>) -> Predicate,
    {
        self.filter_by(build(Query::new()))
    }

    /// Sort every result set, replacing any earlier sort order.
    fn sorted_by(self, descriptors: Vec<SortDescriptor>) -> BoxStream<'static, Result<Results<E, S>>> {
        self.then(move |item| {
            let descriptors = descriptors.clone();
            async move { item?.sorted(descriptors).await }
        })
        .boxed()
    }

    /// Turn empty result sets into `EmptyResult` errors.
    fn throw_if_empty(self) -> BoxStream<'static, Result<Results<E, S>>> {
        self.then(|item| async move { item?.throw_if_empty().await })
            .boxed()
    }

    /// Mutate the elements of every result set, one write per item.
    fn for_each_object<F>(self, body: F) -> BoxStream<'static, Result<Results<E, S>>>
    where
        E: Clone,
        F: FnMut(&mut E) -> Result<()> + Clone + Send + 'static,
    {
        self.then(move |item| {
            let body = body.clone();
            async move { item?.for_each(body).await }
        })
        .boxed()
    }

    /// Delete the elements of every result set that match a typed predicate.
    ///
    /// The predicate is built once, when the operator is attached.
    fn remove<F>(self, cascading: bool, build: F) -> BoxStream<'static, Result<Results<E, S>>>
    where
        F: FnOnce(Query<E>) -> Predicate,
    {
        let predicate = build(Query::new());
        self.then(move |item| {
            let predicate = predicate.clone();
            async move { item?.remove(cascading, move |_| predicate).await }
        })
        .boxed()
    }

    /// Delete every element of every result set, yielding the controller.
    fn remove_all(self, cascading: bool) -> BoxStream<'static, Result<Controller<S>>> {
        self.then(move |item| async move { item?.remove_all(cascading).await })
            .boxed()
    }

    /// View every result set as plain values.
    fn map_represented(self) -> BoxStream<'static, Result<RepresentedResults<E::Represented, S>>>
    where
        E: ManageableSource,
    {
        self.map(|item| item.map(Results::map_represented)).boxed()
    }
}

impl<T, E, S> ResultsStreamExt<E, S> for T
where
    T: Stream<Item = Result<Results<E, S>>> + Send + 'static,
    E: Object,
    S: Store,
{
}
