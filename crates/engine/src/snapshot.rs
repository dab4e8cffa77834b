//! Freeze/thaw snapshots
//!
//! Freezing copies the matched objects out of the store on the home context
//! and wraps them in a [`FrozenSet`]. The copies are shared behind an `Arc`,
//! so cloning a frozen set (or narrowing and reordering it) never copies
//! objects again: derived sets keep the same base and only change which
//! positions they select.
//!
//! A frozen set remembers the query it came from and a liveness token of the
//! controller that produced it. Thawing pins the frozen primary keys, in
//! frozen order, as a live query on that context, so objects inserted since
//! the freeze never join. Once the context is gone, thawing fails with
//! `InvalidatedSnapshot`.

use cordon_core::{Error, Object, Predicate, QuerySpec, Result, SortDescriptor, Store, StoreId};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Immutable, context-independent copy of a result set.
#[derive(Clone)]
pub struct FrozenSet {
    /// `Vec<E>` of the frozen element type
    base: Arc<dyn Any + Send + Sync>,
    /// Positions into `base`, in result order
    selection: Arc<[usize]>,
    spec: QuerySpec,
    store_id: StoreId,
    version: u64,
    origin: Arc<AtomicBool>,
}

impl FrozenSet {
    /// Number of frozen elements.
    pub fn len(&self) -> usize {
        self.selection.len()
    }

    /// Whether the snapshot holds no elements.
    pub fn is_empty(&self) -> bool {
        self.selection.is_empty()
    }

    /// Query the snapshot was taken with, including later frozen filters and sorts.
    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Store the snapshot was taken from.
    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    /// Store version (commit count) at freeze time.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether the originating context still exists.
    pub fn is_origin_alive(&self) -> bool {
        self.origin.load(Ordering::Acquire)
    }

    /// Borrow the frozen elements in result order.
    pub(crate) fn view<E: 'static>(&self) -> Result<Vec<&E>> {
        let base = self.base_of::<E>()?;
        Ok(self
            .selection
            .iter()
            .filter_map(|&position| base.get(position))
            .collect())
    }

    /// Keep only the elements matching `predicate`, preserving order.
    pub(crate) fn narrowed<E: Object>(&self, predicate: Predicate) -> Result<Self> {
        predicate.validate::<E>()?;
        let selection = {
            let base = self.base_of::<E>()?;
            self.selection
                .iter()
                .copied()
                .filter(|&position| {
                    base.get(position)
                        .map(|object| predicate.evaluate(object))
                        .unwrap_or(false)
                })
                .collect::<Vec<_>>()
        };
        Ok(self.derive(selection, self.spec.filtered(predicate)))
    }

    /// Reorder by `descriptors`, replacing any earlier sort.
    ///
    /// The sort is stable over the current order.
    pub(crate) fn reordered<E: Object>(&self, descriptors: Vec<SortDescriptor>) -> Result<Self> {
        let spec = self.spec.sorted(descriptors);
        spec.validate::<E>()?;
        let selection = {
            let base = self.base_of::<E>()?;
            let mut selection: Vec<usize> = self.selection.to_vec();
            selection.sort_by(|&a, &b| match (base.get(a), base.get(b)) {
                (Some(left), Some(right)) => spec.compare(left, right),
                _ => a.cmp(&b),
            });
            selection
        };
        Ok(self.derive(selection, spec))
    }

    /// Live query over exactly the frozen elements, in frozen order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidatedSnapshot` if the originating context is gone or
    /// `target` is a different store.
    pub(crate) fn thaw<E: Object>(&self, target: StoreId, target_open: bool) -> Result<QuerySpec> {
        if !self.is_origin_alive() || !target_open || target != self.store_id {
            return Err(Error::InvalidatedSnapshot);
        }
        let keys = self.view::<E>()?.iter().map(|o| o.primary_key()).collect();
        Ok(QuerySpec::of_keys(self.spec.type_name, keys))
    }

    fn base_of<E: 'static>(&self) -> Result<&Vec<E>> {
        self.base.downcast_ref::<Vec<E>>().ok_or_else(|| {
            Error::invalid_operation(format!(
                "frozen set of {} read as {}",
                self.spec.type_name,
                std::any::type_name::<E>()
            ))
        })
    }

    fn derive(&self, selection: Vec<usize>, spec: QuerySpec) -> Self {
        Self {
            base: Arc::clone(&self.base),
            selection: selection.into(),
            spec,
            store_id: self.store_id,
            version: self.version,
            origin: Arc::clone(&self.origin),
        }
    }
}

impl fmt::Debug for FrozenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrozenSet")
            .field("spec", &self.spec.to_string())
            .field("len", &self.len())
            .field("store_id", &self.store_id)
            .field("version", &self.version)
            .finish()
    }
}

/// Copy the objects matched by `spec` out of the store.
///
/// Runs on the home context.
pub(crate) fn freeze<E, S>(store: &S, spec: QuerySpec, origin: Arc<AtomicBool>) -> Result<FrozenSet>
where
    E: Object + Clone + Send + Sync,
    S: Store,
{
    let elements: Vec<E> = store.query::<E>(&spec)?.into_iter().cloned().collect();
    debug!(
        target: "cordon::snapshot",
        query = %spec,
        count = elements.len(),
        version = store.version(),
        "Froze result set"
    );
    let selection: Vec<usize> = (0..elements.len()).collect();
    Ok(FrozenSet {
        base: Arc::new(elements),
        selection: selection.into(),
        spec,
        store_id: store.id(),
        version: store.version(),
        origin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cordon_core::{Query, Value};

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: i64,
        name: &'static str,
    }

    impl Object for Row {
        const TYPE_NAME: &'static str = "Row";
        const PRIMARY_KEY: &'static str = "id";
        const PROPERTIES: &'static [&'static str] = &["id", "name"];

        fn primary_key(&self) -> Value {
            Value::Int(self.id)
        }

        fn field(&self, path: &str) -> Option<Value> {
            match path {
                "id" => Some(Value::Int(self.id)),
                "name" => Some(Value::from(self.name)),
                _ => None,
            }
        }
    }

    fn frozen(rows: Vec<Row>) -> (FrozenSet, Arc<AtomicBool>) {
        let origin = Arc::new(AtomicBool::new(true));
        let selection: Vec<usize> = (0..rows.len()).collect();
        let set = FrozenSet {
            base: Arc::new(rows),
            selection: selection.into(),
            spec: QuerySpec::of::<Row>(),
            store_id: StoreId::new(),
            version: 3,
            origin: Arc::clone(&origin),
        };
        (set, origin)
    }

    fn rows() -> Vec<Row> {
        vec![
            Row { id: 1, name: "A" },
            Row { id: 2, name: "B" },
            Row { id: 3, name: "C" },
        ]
    }

    fn ids(set: &FrozenSet) -> Vec<i64> {
        set.view::<Row>().unwrap().iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_narrow_then_reorder() {
        let (set, _) = frozen(rows());
        let narrowed = set
            .narrowed::<Row>(Query::<Row>::new().field("id").gt(1))
            .unwrap();
        let sorted = narrowed
            .reordered::<Row>(vec![SortDescriptor::desc("name")])
            .unwrap();
        assert_eq!(ids(&sorted), vec![3, 2]);
        // the source snapshot is untouched
        assert_eq!(ids(&set), vec![1, 2, 3]);
    }

    #[test]
    fn test_derived_sets_share_base() {
        let (set, _) = frozen(rows());
        let narrowed = set
            .narrowed::<Row>(Query::<Row>::new().field("id").ne(2))
            .unwrap();
        assert!(Arc::ptr_eq(&set.base, &narrowed.base));
        assert_eq!(narrowed.len(), 2);
    }

    #[test]
    fn test_reorder_replaces_sort() {
        let (set, _) = frozen(rows());
        let sorted = set
            .reordered::<Row>(vec![SortDescriptor::desc("id")])
            .unwrap()
            .reordered::<Row>(vec![SortDescriptor::asc("name")])
            .unwrap();
        assert_eq!(ids(&sorted), vec![1, 2, 3]);
        assert_eq!(sorted.spec().sort, vec![SortDescriptor::asc("name")]);
    }

    #[test]
    fn test_invalid_key_path_is_store_fault() {
        let (set, _) = frozen(rows());
        let err = set
            .reordered::<Row>(vec![SortDescriptor::asc("missing")])
            .unwrap_err();
        assert!(matches!(err, Error::StoreFault(_)));
    }

    #[test]
    fn test_view_with_wrong_type_fails() {
        let (set, _) = frozen(rows());
        assert!(matches!(
            set.view::<String>(),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_thaw_requires_live_origin() {
        let (set, origin) = frozen(rows());
        let id = set.store_id();
        let narrowed = set
            .reordered::<Row>(vec![SortDescriptor::desc("id")])
            .unwrap()
            .narrowed::<Row>(Query::<Row>::new().field("id").ne(2))
            .unwrap();
        assert_eq!(
            narrowed.thaw::<Row>(id, true).unwrap(),
            QuerySpec::of_keys(Row::TYPE_NAME, vec![Value::Int(3), Value::Int(1)])
        );
        assert!(matches!(
            set.thaw::<Row>(StoreId::new(), true),
            Err(Error::InvalidatedSnapshot)
        ));

        origin.store(false, Ordering::Release);
        assert!(!set.is_origin_alive());
        assert!(matches!(
            set.thaw::<Row>(id, true),
            Err(Error::InvalidatedSnapshot)
        ));
    }
}
