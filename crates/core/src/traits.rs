//! Core traits for the store collaborator
//!
//! This module defines the two seams between the result-set layer and the
//! storage engine underneath it:
//!
//! - [`Object`]: a store-native model type (declared by the schema layer)
//! - [`Store`]: the capability surface of one opened store instance
//!
//! A `Store` lives on exactly one thread, its home context. Implementations
//! are not required to be `Send`; the engine creates them on the home thread
//! and only ever touches them there.

use crate::error::{StoreError, StoreResult};
use crate::query::QuerySpec;
use crate::types::{NotificationToken, ObjectRef, StoreId};
use crate::value::Value;

/// A store-native object type
///
/// Objects are identity-addressed by their primary key, which must be unique
/// within the type and never change after the object is added.
pub trait Object: 'static {
    /// Name of the table this type is stored in
    const TYPE_NAME: &'static str;

    /// Name of the primary key property
    const PRIMARY_KEY: &'static str;

    /// Every queryable property, primary key included
    const PROPERTIES: &'static [&'static str];

    /// Primary key of this object
    fn primary_key(&self) -> Value;

    /// Read one property by key path
    ///
    /// Returns `None` if the path is not a property of this type.
    fn field(&self, path: &str) -> Option<Value>;

    /// Objects owned by this one, deleted along with it by a cascading delete
    fn owned(&self) -> Vec<ObjectRef> {
        Vec::new()
    }

    /// All properties as `(name, value)` pairs, in declaration order
    fn fields(&self) -> Vec<(&'static str, Value)> {
        Self::PROPERTIES
            .iter()
            .filter_map(|path| self.field(path).map(|v| (*path, v)))
            .collect()
    }

    /// Type-erased address of this object
    fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(Self::TYPE_NAME, self.primary_key())
    }
}

/// One notification delivered to a subscription callback
///
/// Index lists are computed against the previously delivered state:
/// - `deletions`: indices in the previous state, descending
/// - `insertions`: indices in the new state, ascending
/// - `modifications`: indices in the previous state, ascending
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionChange {
    /// Delivered once on subscription with the current cardinality
    Initial {
        /// Number of matched objects
        count: usize,
    },
    /// Delivered once per commit that changed the watched collection
    Update {
        /// Number of matched objects after the commit
        count: usize,
        /// Removed positions
        deletions: Vec<usize>,
        /// Added positions
        insertions: Vec<usize>,
        /// Positions whose tracked fields changed
        modifications: Vec<usize>,
    },
}

impl CollectionChange {
    /// Number of matched objects at delivery time
    pub fn count(&self) -> usize {
        match self {
            CollectionChange::Initial { count } | CollectionChange::Update { count, .. } => *count,
        }
    }
}

/// What a subscription registered through [`Store::subscribe`] reports
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Only modifications of these properties are reported; `None` tracks all
    pub key_paths: Option<Vec<String>>,
    /// Deliver counts only: no index diff is computed, and a commit is
    /// delivered (with empty index lists) only when it changes the count
    pub count_only: bool,
}

impl SubscribeOptions {
    /// Report modifications of `paths` only
    pub fn tracking(paths: Vec<String>) -> Self {
        Self {
            key_paths: Some(paths),
            count_only: false,
        }
    }

    /// Deliver counts only
    pub fn counting(mut self) -> Self {
        self.count_only = true;
        self
    }
}

/// Callback registered through [`Store::subscribe`]
///
/// Invoked on the home context. An `Err` is terminal: the store delivers
/// nothing further for that token.
pub type NotificationCallback = Box<dyn FnMut(StoreResult<CollectionChange>)>;

/// Capability surface of one opened store instance
///
/// All methods run on the store's home context. Mutating methods
/// (`add`, `object_mut`, `delete`) are only valid inside [`Store::write`].
pub trait Store: 'static {
    /// Identity of this store instance
    fn id(&self) -> StoreId;

    /// Commit counter, incremented by every successful write
    fn version(&self) -> u64;

    /// Evaluate a query and borrow the matched objects in result order
    ///
    /// # Errors
    ///
    /// Returns `InvalidKeyPath` if the query names an unknown property, or
    /// `ContextTornDown` if the store was closed.
    fn query<E: Object>(&self, spec: &QuerySpec) -> StoreResult<Vec<&E>>;

    /// Run `f` inside one write transaction and commit it
    ///
    /// Subscriptions are notified after the commit. If `f` fails, every
    /// object it touched is restored, the version is unchanged and nothing
    /// is notified. `f` may fail with any error a `StoreError` converts into.
    fn write<T, X, F>(&mut self, f: F) -> Result<T, X>
    where
        F: FnOnce(&mut Self) -> Result<T, X>,
        X: From<StoreError>;

    /// Insert an object, replacing any existing object with the same key
    fn add<E: Object>(&mut self, object: E) -> StoreResult<()>;

    /// Borrow a live object mutably by primary key
    ///
    /// The object is copied the first time a write touches it, so the
    /// write can be rolled back. Returns `Ok(None)` for a key that does not
    /// exist and `InvalidatedObject` for one deleted earlier in this write.
    fn object_mut<E: Object + Clone>(&mut self, key: &Value) -> StoreResult<Option<&mut E>>;

    /// Delete objects, following `Object::owned` links when `cascading`
    ///
    /// Returns the number of objects removed.
    fn delete(&mut self, objects: Vec<ObjectRef>, cascading: bool) -> StoreResult<usize>;

    /// Register a change subscription for the collection described by `spec`
    ///
    /// The callback receives `Initial` before this returns.
    ///
    /// With `options.key_paths`, modifications to other properties are not
    /// reported and commits that only touch them deliver nothing.
    fn subscribe<E: Object>(
        &mut self,
        spec: QuerySpec,
        options: SubscribeOptions,
        callback: NotificationCallback,
    ) -> StoreResult<NotificationToken>;

    /// Remove a subscription; unknown tokens are ignored
    fn unsubscribe(&mut self, token: NotificationToken);

    /// Tear the context down
    ///
    /// Every live subscription receives `ContextTornDown` as its terminal
    /// notification.
    fn close(&mut self);
}
