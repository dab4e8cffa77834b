//! Representation mapper
//!
//! Pairs a store-native type with a plain value type. The pairing is
//! declared through two traits whose associated types point at each other,
//! so a source type has exactly one represented type and vice versa; a
//! mismatched pairing does not compile.
//!
//! [`RepresentedResults`] wraps a [`Results`] over the source type and
//! converts each element to its plain value only when it is read. Writes
//! (`for_each`, `remove`, `remove_all`) always operate on the source side.

use crate::controller::Controller;
use crate::results::Results;
use crate::watch::{ChangesetStream, CountStream};
use cordon_core::{Predicate, Query, QuerySpec, Result, SortDescriptor, Store};
use futures_util::future::{self, Ready};
use futures_util::stream::{self, Once};
use std::fmt;

/// Store-native side of a pairing.
pub trait ManageableSource: cordon_core::Object + Sized {
    /// The plain value type this source converts to
    type Represented: ManageableRepresented<Source = Self>;

    /// Build a store-native object holding the same data as `value`.
    fn from_represented(value: &Self::Represented) -> Self;
}

/// Plain value side of a pairing.
///
/// Values are detached copies: building one reads the source's fields and
/// keeps no reference to store state.
pub trait ManageableRepresented: Clone + Send + 'static {
    /// The store-native type this value is copied from
    type Source: ManageableSource<Represented = Self>;

    /// Copy a plain value out of `source`.
    fn from_source(source: &Self::Source) -> Self;
}

/// Result set whose elements are read as plain values of `R`
pub struct RepresentedResults<R: ManageableRepresented, S: Store> {
    inner: Results<R::Source, S>,
}

impl<R: ManageableRepresented, S: Store> Clone for RepresentedResults<R, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R: ManageableRepresented, S: Store> fmt::Debug for RepresentedResults<R, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepresentedResults")
            .field("represented", &std::any::type_name::<R>())
            .field("inner", &self.inner)
            .finish()
    }
}

impl<E, S> Results<E, S>
where
    E: ManageableSource,
    S: Store,
{
    /// View the same result set as plain values.
    ///
    /// Shares this wrapper's handle and controller; nothing is converted
    /// until an element is read.
    pub fn map_represented(self) -> RepresentedResults<E::Represented, S> {
        RepresentedResults { inner: self }
    }
}

impl<R: ManageableRepresented, S: Store> RepresentedResults<R, S> {
    fn wrap(inner: Results<R::Source, S>) -> Self {
        Self { inner }
    }

    /// The underlying store-native result set
    pub fn results(&self) -> &Results<R::Source, S> {
        &self.inner
    }

    /// Unwrap into the store-native result set
    pub fn into_results(self) -> Results<R::Source, S> {
        self.inner
    }

    /// Controller this result set belongs to
    pub fn controller(&self) -> &Controller<S> {
        self.inner.controller()
    }

    /// Query describing this result set
    pub fn query(&self) -> &QuerySpec {
        self.inner.query()
    }

    /// Whether this is a frozen snapshot
    pub fn is_frozen(&self) -> bool {
        self.inner.is_frozen()
    }

    /// Number of elements
    pub async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }

    /// Whether there are no elements
    pub async fn is_empty(&self) -> Result<bool> {
        self.inner.is_empty().await
    }

    /// Human-readable summary
    pub async fn description(&self) -> Result<String> {
        self.inner.description().await
    }

    /// Return `self` unchanged, or `EmptyResult` if there are no elements.
    pub async fn throw_if_empty(self) -> Result<Self> {
        Ok(Self::wrap(self.inner.throw_if_empty().await?))
    }

    /// Plain value at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range at evaluation time.
    pub async fn get(&self, index: usize) -> Result<R> {
        self.inner
            .read(move |objects| {
                let source = crate::handle::element_at(objects, index, std::any::type_name::<R>());
                Ok(R::from_source(source))
            })
            .await
    }

    /// Every element as a plain value
    pub async fn to_vec(&self) -> Result<Vec<R>> {
        self.inner
            .read(|objects| Ok(objects.iter().map(|&o| R::from_source(o)).collect()))
            .await
    }

    /// First element, if any
    pub async fn first(&self) -> Result<Option<R>> {
        self.inner
            .read(|objects| Ok(objects.first().map(|&o| R::from_source(o))))
            .await
    }

    /// Last element, if any
    pub async fn last(&self) -> Result<Option<R>> {
        self.inner
            .read(|objects| Ok(objects.last().map(|&o| R::from_source(o))))
            .await
    }

    /// Apply `transform` to each element's plain value, in order.
    pub async fn map<T, F>(&self, mut transform: F) -> Result<Vec<T>>
    where
        F: FnMut(R) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner
            .read(move |objects| {
                objects
                    .iter()
                    .map(|&o| transform(R::from_source(o)))
                    .collect()
            })
            .await
    }

    /// Eagerly collect the plain values for which `include` returns true.
    pub async fn filter_with<F>(&self, mut include: F) -> Result<Vec<R>>
    where
        F: FnMut(&R) -> Result<bool> + Send + 'static,
    {
        self.inner
            .read(move |objects| {
                let mut out = Vec::new();
                for &object in objects {
                    let value = R::from_source(object);
                    if include(&value)? {
                        out.push(value);
                    }
                }
                Ok(out)
            })
            .await
    }

    /// Narrow by `predicate` over the source type's properties.
    pub async fn filter(&self, predicate: Predicate) -> Result<Self> {
        Ok(Self::wrap(self.inner.filter(predicate).await?))
    }

    /// Narrow by a typed predicate over the source type.
    pub async fn filter_query<F>(&self, build: F) -> Result<Self>
    where
        F: FnOnce(Query<R::Source>) -> Predicate,
    {
        Ok(Self::wrap(self.inner.filter_query(build).await?))
    }

    /// Sort by `descriptors`, replacing any earlier sort order.
    pub async fn sorted(&self, descriptors: Vec<SortDescriptor>) -> Result<Self> {
        Ok(Self::wrap(self.inner.sorted(descriptors).await?))
    }

    /// Mutate every source object inside one write transaction.
    pub async fn for_each<F>(self, body: F) -> Result<Self>
    where
        R::Source: Clone,
        F: FnMut(&mut R::Source) -> Result<()> + Send + 'static,
    {
        Ok(Self::wrap(self.inner.for_each(body).await?))
    }

    /// Delete the source objects matching `predicate` in one write.
    pub async fn remove<F>(self, cascading: bool, predicate: F) -> Result<Self>
    where
        F: FnOnce(Query<R::Source>) -> Predicate,
    {
        Ok(Self::wrap(self.inner.remove(cascading, predicate).await?))
    }

    /// Delete every element in one write and hand back the controller.
    pub async fn remove_all(self, cascading: bool) -> Result<Controller<S>> {
        self.inner.remove_all(cascading).await
    }

    /// Re-attach a frozen result set to its live context.
    pub fn thaw(&self) -> Result<Self> {
        Ok(Self::wrap(self.inner.thaw()?))
    }

    /// Watch for changes; each changeset carries this represented wrapper.
    pub fn watch(&self, key_paths: Option<&[&str]>) -> ChangesetStream<Self> {
        ChangesetStream::open::<R::Source, S>(
            self.inner.controller(),
            self.inner.handle(),
            key_paths,
            self.clone(),
        )
    }

    /// Watch only the element count.
    pub fn watch_count(&self, key_paths: Option<&[&str]>) -> CountStream {
        self.inner.watch_count(key_paths)
    }

    /// One-item stream yielding this result set.
    pub fn into_stream(self) -> Once<Ready<Result<Self>>> {
        stream::once(future::ready(Ok(self)))
    }
}

impl<R, S> RepresentedResults<R, S>
where
    R: ManageableRepresented,
    R::Source: Clone + Send + Sync,
    S: Store,
{
    /// Take an immutable snapshot; see [`Results::freeze`].
    pub async fn freeze(&self) -> Result<Self> {
        Ok(Self::wrap(self.inner.freeze().await?))
    }
}
