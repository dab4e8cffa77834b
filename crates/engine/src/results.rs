//! Result wrapper
//!
//! [`Results`] is the public face of a query: a raw result handle paired with
//! the controller whose home context it belongs to. Every operation on a live
//! result set runs as one body on the home context; operations on a frozen
//! result set run directly on the calling context.
//!
//! Transformations (`filter`, `filter_query`, `sorted`) return a new wrapper
//! over the same controller and are lazy: the query is only evaluated when a
//! later operation reads elements.
//!
//! Element-returning operations hand back detached clones, so they require
//! `E: Clone + Send`. Closures passed to eager operations run on the home
//! context (or the calling context for frozen sets) and must be `Send`.

use crate::controller::Controller;
use crate::handle::{element_at, RawResultHandle};
use crate::snapshot::{self, FrozenSet};
use crate::watch::{ChangesetStream, CountStream};
use cordon_core::{Error, Object, Predicate, Query, QuerySpec, Result, SortDescriptor, Store};
use futures_util::future::{self, Ready};
use futures_util::stream::{self, Once};
use std::fmt;
use std::marker::PhantomData;
use tracing::debug;

/// Lazy, thread-confinement-safe result set of `E` objects
pub struct Results<E, S: Store> {
    handle: RawResultHandle,
    controller: Controller<S>,
    _marker: PhantomData<fn() -> E>,
}

impl<E, S: Store> Clone for Results<E, S> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            controller: self.controller.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E: Object, S: Store> fmt::Debug for Results<E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Results")
            .field("query", &self.handle.spec().to_string())
            .field("frozen", &self.handle.is_frozen())
            .finish()
    }
}

impl<E: Object, S: Store> Results<E, S> {
    pub(crate) fn all(controller: Controller<S>) -> Self {
        Self::with_handle(RawResultHandle::Live(QuerySpec::of::<E>()), controller)
    }

    pub(crate) fn with_handle(handle: RawResultHandle, controller: Controller<S>) -> Self {
        Self {
            handle,
            controller,
            _marker: PhantomData,
        }
    }

    fn derive(&self, handle: RawResultHandle) -> Self {
        Self::with_handle(handle, self.controller.clone())
    }

    /// Controller this result set belongs to
    pub fn controller(&self) -> &Controller<S> {
        &self.controller
    }

    /// Query describing this result set
    pub fn query(&self) -> &QuerySpec {
        self.handle.spec()
    }

    /// Underlying handle
    pub fn handle(&self) -> &RawResultHandle {
        &self.handle
    }

    /// Whether this is a frozen snapshot
    pub fn is_frozen(&self) -> bool {
        self.handle.is_frozen()
    }

    fn live_spec(&self, operation: &str) -> Result<&QuerySpec> {
        match &self.handle {
            RawResultHandle::Live(spec) => Ok(spec),
            RawResultHandle::Frozen(_) => Err(Error::invalid_operation(format!(
                "{} on a frozen result set of {}",
                operation,
                E::TYPE_NAME
            ))),
        }
    }

    /// Run `reader` over the current elements in result order.
    ///
    /// Live sets evaluate the query inside one home-context body; frozen sets
    /// read their copies on the calling context.
    pub(crate) async fn read<T, F>(&self, reader: F) -> Result<T>
    where
        F: FnOnce(&[&E]) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match &self.handle {
            RawResultHandle::Frozen(set) => read_frozen(set, reader),
            RawResultHandle::Live(spec) => {
                let spec = spec.clone();
                self.controller
                    .bridge()
                    .run(move |store: &mut S| {
                        let objects = store.query::<E>(&spec)?;
                        reader(&objects)
                    })
                    .await
            }
        }
    }

    /// Number of elements
    pub async fn count(&self) -> Result<usize> {
        match &self.handle {
            RawResultHandle::Frozen(set) => Ok(set.len()),
            RawResultHandle::Live(_) => self.read(|objects| Ok(objects.len())).await,
        }
    }

    /// Whether there are no elements
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.count().await? == 0)
    }

    /// Human-readable summary: element type, query, count and freeze state
    pub async fn description(&self) -> Result<String> {
        let count = self.count().await?;
        Ok(format!(
            "Results<{}>({}) count={}{}",
            E::TYPE_NAME,
            self.handle.spec(),
            count,
            if self.is_frozen() { " frozen" } else { "" }
        ))
    }

    /// Return `self` unchanged, or `EmptyResult` if there are no elements.
    pub async fn throw_if_empty(self) -> Result<Self> {
        if self.is_empty().await? {
            return Err(Error::EmptyResult);
        }
        Ok(self)
    }

    /// Narrow by `predicate`.
    ///
    /// # Errors
    ///
    /// Returns `StoreFault(InvalidKeyPath)` if the predicate names an
    /// unknown property.
    pub async fn filter(&self, predicate: Predicate) -> Result<Self> {
        match &self.handle {
            RawResultHandle::Frozen(set) => {
                Ok(self.derive(RawResultHandle::Frozen(set.narrowed::<E>(predicate)?)))
            }
            RawResultHandle::Live(spec) => {
                let next = spec.filtered(predicate);
                self.validated(next).await
            }
        }
    }

    /// Narrow by a predicate built with the typed [`Query`] builder.
    pub async fn filter_query<F>(&self, build: F) -> Result<Self>
    where
        F: FnOnce(Query<E>) -> Predicate,
    {
        self.filter(build(Query::new())).await
    }

    /// Sort by `descriptors`, replacing any earlier sort order.
    pub async fn sorted(&self, descriptors: Vec<SortDescriptor>) -> Result<Self> {
        match &self.handle {
            RawResultHandle::Frozen(set) => {
                Ok(self.derive(RawResultHandle::Frozen(set.reordered::<E>(descriptors)?)))
            }
            RawResultHandle::Live(spec) => {
                let next = spec.sorted(descriptors);
                self.validated(next).await
            }
        }
    }

    async fn validated(&self, next: QuerySpec) -> Result<Self> {
        let checked = next.clone();
        self.controller
            .bridge()
            .run(move |_: &mut S| Ok(checked.validate::<E>()?))
            .await?;
        Ok(self.derive(RawResultHandle::Live(next)))
    }

    /// Apply `transform` to every element, in order.
    ///
    /// An error from `transform` aborts the iteration and is returned.
    pub async fn map<T, F>(&self, mut transform: F) -> Result<Vec<T>>
    where
        F: FnMut(&E) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.read(move |objects| objects.iter().map(|&o| transform(o)).collect())
            .await
    }

    /// Apply `transform` to every element and keep the `Some` results.
    pub async fn filter_map<T, F>(&self, mut transform: F) -> Result<Vec<T>>
    where
        F: FnMut(&E) -> Result<Option<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.read(move |objects| {
            objects
                .iter()
                .filter_map(|&o| transform(o).transpose())
                .collect()
        })
        .await
    }

    /// Mutate every element inside one write transaction.
    ///
    /// An error from `body` stops the iteration, rolls back the whole write
    /// (including changes already made to earlier elements) and is returned.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` on a frozen result set.
    pub async fn for_each<F>(self, mut body: F) -> Result<Self>
    where
        E: Clone,
        F: FnMut(&mut E) -> Result<()> + Send + 'static,
    {
        let spec = self.live_spec("for_each")?.clone();
        self.controller
            .bridge()
            .run(move |store: &mut S| {
                store.write(|s| -> Result<()> {
                    let keys: Vec<_> = s
                        .query::<E>(&spec)?
                        .into_iter()
                        .map(|o| o.primary_key())
                        .collect();
                    for key in keys {
                        if let Some(object) = s.object_mut::<E>(&key)? {
                            body(object)?;
                        }
                    }
                    Ok(())
                })
            })
            .await?;
        Ok(self)
    }

    /// Delete the elements matching `predicate` in one write.
    ///
    /// With `cascading`, objects owned by the deleted ones are deleted too.
    /// Returns `self`, which reflects the post-deletion state on its next read.
    pub async fn remove<F>(self, cascading: bool, predicate: F) -> Result<Self>
    where
        F: FnOnce(Query<E>) -> Predicate,
    {
        let spec = self.live_spec("remove")?.filtered(predicate(Query::new()));
        spec.validate::<E>()?;
        self.delete_matching(spec, cascading).await?;
        Ok(self)
    }

    /// Delete every element in one write and hand back the controller.
    pub async fn remove_all(self, cascading: bool) -> Result<Controller<S>> {
        let spec = self.live_spec("remove_all")?.clone();
        self.delete_matching(spec, cascading).await?;
        Ok(self.controller)
    }

    async fn delete_matching(&self, spec: QuerySpec, cascading: bool) -> Result<usize> {
        let query = spec.to_string();
        let removed = self
            .controller
            .bridge()
            .run(move |store: &mut S| {
                Ok(store.write(|s| {
                    let targets: Vec<_> = s
                        .query::<E>(&spec)?
                        .into_iter()
                        .map(|o| o.object_ref())
                        .collect();
                    s.delete(targets, cascading)
                })?)
            })
            .await?;
        debug!(target: "cordon::results", query = %query, cascading, removed, "Removed objects");
        Ok(removed)
    }

    /// Re-attach a frozen result set to its live context.
    ///
    /// The thawed set is pinned to the frozen elements, in frozen order:
    /// objects inserted after the freeze never join it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidatedSnapshot` if the originating controller was shut
    /// down, or `InvalidOperation` if this result set is already live.
    pub fn thaw(&self) -> Result<Self> {
        match &self.handle {
            RawResultHandle::Frozen(set) => {
                let spec = set.thaw::<E>(self.controller.store_id(), self.controller.is_open())?;
                Ok(self.derive(RawResultHandle::Live(spec)))
            }
            RawResultHandle::Live(_) => Err(Error::invalid_operation(format!(
                "thaw on a live result set of {}",
                E::TYPE_NAME
            ))),
        }
    }

    /// Watch for changes.
    ///
    /// With `key_paths`, only modifications to those properties are
    /// reported. Watching a frozen result set yields one `InvalidOperation`
    /// error.
    pub fn watch(&self, key_paths: Option<&[&str]>) -> ChangesetStream<Self> {
        ChangesetStream::open::<E, S>(&self.controller, &self.handle, key_paths, self.clone())
    }

    /// Watch only the element count.
    pub fn watch_count(&self, key_paths: Option<&[&str]>) -> CountStream {
        CountStream::open::<E, S>(&self.controller, &self.handle, key_paths)
    }

    /// One-item stream yielding this result set, for chaining with
    /// [`ResultsStreamExt`](crate::stream_ext::ResultsStreamExt).
    pub fn into_stream(self) -> Once<Ready<Result<Self>>> {
        stream::once(future::ready(Ok(self)))
    }
}

impl<E, S> Results<E, S>
where
    E: Object + Clone + Send,
    S: Store,
{
    /// Element at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range at evaluation time. Only call with
    /// an index below a count observed in the same turn.
    pub async fn get(&self, index: usize) -> Result<E> {
        self.read(move |objects| Ok((*element_at(objects, index, E::TYPE_NAME)).clone()))
            .await
    }

    /// Every element, detached.
    pub async fn to_vec(&self) -> Result<Vec<E>> {
        self.read(|objects| Ok(objects.iter().map(|&o| o.clone()).collect()))
            .await
    }

    /// First element, if any
    pub async fn first(&self) -> Result<Option<E>> {
        self.read(|objects| Ok(objects.first().map(|&o| o.clone())))
            .await
    }

    /// Last element, if any
    pub async fn last(&self) -> Result<Option<E>> {
        self.read(|objects| Ok(objects.last().map(|&o| o.clone())))
            .await
    }

    /// Eagerly collect the elements for which `include` returns true.
    pub async fn filter_with<F>(&self, mut include: F) -> Result<Vec<E>>
    where
        F: FnMut(&E) -> Result<bool> + Send + 'static,
    {
        self.read(move |objects| {
            let mut out = Vec::new();
            for &object in objects {
                if include(object)? {
                    out.push(object.clone());
                }
            }
            Ok(out)
        })
        .await
    }

    /// First element for which `predicate` returns true
    pub async fn first_where<F>(&self, mut predicate: F) -> Result<Option<E>>
    where
        F: FnMut(&E) -> Result<bool> + Send + 'static,
    {
        self.read(move |objects| {
            for &object in objects {
                if predicate(object)? {
                    return Ok(Some(object.clone()));
                }
            }
            Ok(None)
        })
        .await
    }

    /// Last element for which `predicate` returns true
    pub async fn last_where<F>(&self, mut predicate: F) -> Result<Option<E>>
    where
        F: FnMut(&E) -> Result<bool> + Send + 'static,
    {
        self.read(move |objects| {
            for &object in objects.iter().rev() {
                if predicate(object)? {
                    return Ok(Some(object.clone()));
                }
            }
            Ok(None)
        })
        .await
    }
}

impl<E, S> Results<E, S>
where
    E: Object + Clone + Send + Sync,
    S: Store,
{
    /// Take an immutable snapshot of the current elements.
    ///
    /// The snapshot is readable from any context, never reflects later
    /// writes and stays readable after the controller shuts down. Freezing
    /// a frozen set returns an equivalent set without copying.
    pub async fn freeze(&self) -> Result<Self> {
        match &self.handle {
            RawResultHandle::Frozen(_) => Ok(self.clone()),
            RawResultHandle::Live(spec) => {
                let spec = spec.clone();
                let origin = self.controller.liveness();
                let set = self
                    .controller
                    .bridge()
                    .run(move |store: &mut S| snapshot::freeze::<E, S>(store, spec, origin))
                    .await?;
                Ok(self.derive(RawResultHandle::Frozen(set)))
            }
        }
    }
}

fn read_frozen<E, T, F>(set: &FrozenSet, reader: F) -> Result<T>
where
    E: 'static,
    F: FnOnce(&[&E]) -> Result<T>,
{
    let view = set.view::<E>()?;
    reader(&view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use cordon_core::{StoreError, Value};
    use cordon_store::MemoryStore;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: i64,
        name: String,
        qty: i64,
    }

    impl Object for Item {
        const TYPE_NAME: &'static str = "Item";
        const PRIMARY_KEY: &'static str = "id";
        const PROPERTIES: &'static [&'static str] = &["id", "name", "qty"];

        fn primary_key(&self) -> Value {
            Value::Int(self.id)
        }

        fn field(&self, path: &str) -> Option<Value> {
            match path {
                "id" => Some(Value::Int(self.id)),
                "name" => Some(Value::from(self.name.as_str())),
                "qty" => Some(Value::Int(self.qty)),
                _ => None,
            }
        }
    }

    fn item(id: i64, name: &str, qty: i64) -> Item {
        Item {
            id,
            name: name.to_string(),
            qty,
        }
    }

    async fn seeded() -> Controller<MemoryStore> {
        let controller =
            Controller::open(ControllerConfig::named("items"), || Ok(MemoryStore::open()))
                .unwrap();
        controller
            .add(vec![item(1, "bolt", 5), item(2, "nut", 0), item(3, "gear", 2)])
            .await
            .unwrap();
        controller
    }

    fn names(items: &[Item]) -> Vec<&str> {
        items.iter().map(|i| i.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_filter_keeps_native_order() {
        let controller = seeded().await;
        let results = controller
            .objects::<Item>()
            .filter_query(|q| q.field("qty").gt(0))
            .await
            .unwrap();
        assert_eq!(names(&results.to_vec().await.unwrap()), vec!["bolt", "gear"]);
    }

    #[tokio::test]
    async fn test_filter_unknown_path_is_store_fault() {
        let controller = seeded().await;
        let err = controller
            .objects::<Item>()
            .filter(Predicate::IsNull("weight".into()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::StoreFault(StoreError::InvalidKeyPath { .. })
        ));
    }

    #[tokio::test]
    async fn test_sorted_last_call_wins() {
        let controller = seeded().await;
        let results = controller
            .objects::<Item>()
            .sorted(vec![SortDescriptor::asc("name")])
            .await
            .unwrap()
            .sorted(vec![SortDescriptor::desc("qty")])
            .await
            .unwrap();
        assert_eq!(
            names(&results.to_vec().await.unwrap()),
            vec!["bolt", "gear", "nut"]
        );
    }

    #[tokio::test]
    async fn test_eager_operations() {
        let controller = seeded().await;
        let results = controller.objects::<Item>();

        let doubled = results.map(|i| Ok(i.qty * 2)).await.unwrap();
        assert_eq!(doubled, vec![10, 0, 4]);

        let stocked = results
            .filter_map(|i| Ok((i.qty > 0).then(|| i.id)))
            .await
            .unwrap();
        assert_eq!(stocked, vec![1, 3]);

        let small = results.filter_with(|i| Ok(i.qty < 3)).await.unwrap();
        assert_eq!(names(&small), vec!["nut", "gear"]);

        let first = results.first_where(|i| Ok(i.qty < 3)).await.unwrap();
        assert_eq!(first.map(|i| i.id), Some(2));
        let last = results.last_where(|i| Ok(i.qty > 2)).await.unwrap();
        assert_eq!(last.map(|i| i.id), Some(1));

        assert_eq!(results.first().await.unwrap().map(|i| i.id), Some(1));
        assert_eq!(results.last().await.unwrap().map(|i| i.id), Some(3));
    }

    #[tokio::test]
    async fn test_eager_error_aborts() {
        let controller = seeded().await;
        let err = controller
            .objects::<Item>()
            .map(|i| {
                if i.id == 2 {
                    Err(Error::callback("bad row"))
                } else {
                    Ok(i.id)
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Callback(_)));
    }

    #[tokio::test]
    async fn test_for_each_mutates_in_one_write() {
        let controller = seeded().await;
        let results = controller
            .objects::<Item>()
            .for_each(|i| {
                i.qty += 1;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(results.map(|i| Ok(i.qty)).await.unwrap(), vec![6, 1, 3]);
        let version = controller.run(|s| Ok(s.version())).await.unwrap();
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn test_for_each_error_rolls_back_write() {
        let controller = seeded().await;
        let version = controller.run(|s| Ok(s.version())).await.unwrap();
        let err = controller
            .objects::<Item>()
            .for_each(|i| {
                if i.id == 2 {
                    return Err(Error::callback("stop"));
                }
                i.qty = 100;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Callback(_)));
        let qty = controller
            .objects::<Item>()
            .map(|i| Ok(i.qty))
            .await
            .unwrap();
        assert_eq!(qty, vec![5, 0, 2]);
        let after = controller.run(|s| Ok(s.version())).await.unwrap();
        assert_eq!(after, version);
    }

    #[tokio::test]
    async fn test_remove_matching() {
        let controller = seeded().await;
        let results = controller
            .objects::<Item>()
            .remove(false, |q| q.field("qty").eq(0))
            .await
            .unwrap();
        assert_eq!(results.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_remove_all_returns_controller() {
        let controller = seeded().await;
        let returned = controller
            .objects::<Item>()
            .filter_query(|q| q.field("id").ge(2))
            .await
            .unwrap()
            .remove_all(false)
            .await
            .unwrap();
        assert!(returned.same_context(&controller));
        assert_eq!(controller.objects::<Item>().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_throw_if_empty() {
        let controller = seeded().await;
        let empty = controller
            .objects::<Item>()
            .filter_query(|q| q.field("qty").gt(100))
            .await
            .unwrap();
        assert!(matches!(
            empty.throw_if_empty().await,
            Err(Error::EmptyResult)
        ));
        assert!(controller.objects::<Item>().throw_if_empty().await.is_ok());
    }

    #[tokio::test]
    async fn test_description() {
        let controller = seeded().await;
        let results = controller
            .objects::<Item>()
            .filter_query(|q| q.field("qty").gt(0))
            .await
            .unwrap();
        let text = results.description().await.unwrap();
        assert_eq!(text, "Results<Item>(Item WHERE (qty > 0)) count=2");
    }

    #[tokio::test]
    async fn test_frozen_reads_are_stable() {
        let controller = seeded().await;
        let frozen = controller.objects::<Item>().freeze().await.unwrap();
        controller.add(vec![item(4, "cog", 1)]).await.unwrap();

        assert!(frozen.is_frozen());
        assert_eq!(frozen.count().await.unwrap(), 3);
        assert_eq!(controller.objects::<Item>().count().await.unwrap(), 4);
        assert!(frozen.description().await.unwrap().ends_with("frozen"));
    }

    #[tokio::test]
    async fn test_frozen_rejects_mutation() {
        let controller = seeded().await;
        let frozen = controller.objects::<Item>().freeze().await.unwrap();
        let err = frozen.clone().remove_all(true).await.unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        let err = frozen.for_each(|_| Ok(())).await.unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_thaw_live_is_invalid() {
        let controller = seeded().await;
        assert!(matches!(
            controller.objects::<Item>().thaw(),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_operations_after_shutdown() {
        let controller = seeded().await;
        let results = controller.objects::<Item>();
        controller.shutdown();
        assert!(matches!(
            results.count().await,
            Err(Error::ContextUnavailable)
        ));
    }
}
