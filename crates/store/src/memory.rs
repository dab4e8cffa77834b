//! In-memory object store
//!
//! `MemoryStore` keeps one table per object type, each a `BTreeMap` from
//! primary key to the boxed object, so native order is primary-key order.
//!
//! # Change tracking
//!
//! A write transaction keeps, for every object it touches, the object as it
//! was when the transaction first touched it (`None` if it did not exist).
//! On commit the record is compared with the current state to derive
//! insertions, deletions and per-field modifications, and every subscription
//! whose type was touched re-evaluates its query and receives an index diff
//! against the keys it was last sent.
//!
//! A failed write puts every recorded object back. The version is not
//! bumped and no subscription hears about it.
//!
//! # Confinement
//!
//! Objects are stored as `Box<dyn Any>` and callbacks as `Box<dyn FnMut>`,
//! neither of which is `Send`, so a `MemoryStore` cannot leave the thread
//! that created it.

use crate::diff::diff;
use cordon_core::{
    CollectionChange, NotificationCallback, NotificationToken, Object, ObjectRef, QuerySpec,
    Store, StoreError, StoreId, StoreResult, SubscribeOptions, Value,
};
use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

type FieldValues = Vec<(&'static str, Value)>;

/// Type-erased view of a stored object
trait StoredObject: Any {
    fn owned(&self) -> Vec<ObjectRef>;
    fn fields(&self) -> FieldValues;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<E: Object> StoredObject for E {
    fn owned(&self) -> Vec<ObjectRef> {
        Object::owned(self)
    }

    fn fields(&self) -> FieldValues {
        Object::fields(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Default)]
struct Tables {
    tables: HashMap<&'static str, BTreeMap<Value, Box<dyn StoredObject>>>,
}

impl Tables {
    fn query<E: Object>(&self, spec: &QuerySpec) -> StoreResult<Vec<&E>> {
        spec.validate::<E>()?;
        let Some(table) = self.tables.get(E::TYPE_NAME) else {
            return Ok(Vec::new());
        };
        let mut objects = Vec::with_capacity(table.len());
        for stored in table.values() {
            let object = stored
                .as_any()
                .downcast_ref::<E>()
                .ok_or_else(|| type_mismatch::<E>())?;
            objects.push(object);
        }
        Ok(spec.apply(objects))
    }

    fn fields_of(&self, object: &ObjectRef) -> Option<FieldValues> {
        self.tables
            .get(object.type_name)
            .and_then(|t| t.get(&object.key))
            .map(|o| o.fields())
    }
}

fn type_mismatch<E: Object>() -> StoreError {
    StoreError::TypeMismatch {
        expected: std::any::type_name::<E>().to_string(),
        found: format!("another type stored as {}", E::TYPE_NAME),
    }
}

type Evaluator = Box<dyn Fn(&Tables) -> StoreResult<Vec<Value>>>;

struct Subscription {
    type_name: &'static str,
    key_paths: Option<Vec<String>>,
    count_only: bool,
    evaluate: Evaluator,
    last_keys: Vec<Value>,
    callback: NotificationCallback,
}

impl Subscription {
    fn tracks(&self, field: &str) -> bool {
        match &self.key_paths {
            Some(paths) => paths.iter().any(|p| p == field),
            None => true,
        }
    }
}

/// Touched objects of the write in progress, as they were before it
#[derive(Default)]
struct WriteLog {
    before: BTreeMap<ObjectRef, Option<Box<dyn StoredObject>>>,
}

/// In-memory implementation of the store collaborator
pub struct MemoryStore {
    id: StoreId,
    version: u64,
    tables: Tables,
    write: Option<WriteLog>,
    subscriptions: BTreeMap<NotificationToken, Subscription>,
    next_token: u64,
    closed: bool,
    fault: Option<StoreError>,
}

impl MemoryStore {
    /// Open an empty store with a fresh id
    pub fn open() -> Self {
        Self {
            id: StoreId::new(),
            version: 0,
            tables: Tables::default(),
            write: None,
            subscriptions: BTreeMap::new(),
            next_token: 0,
            closed: false,
            fault: None,
        }
    }

    /// Number of live subscriptions
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Mark the store as faulted
    ///
    /// Every subscription receives `error` as its terminal notification and
    /// all later calls fail with it. Used when an integrity check on the
    /// underlying data fails.
    pub fn fail(&mut self, error: StoreError) {
        warn!(target: "cordon::store", store = %self.id, error = %error, "Store faulted");
        self.fault = Some(error.clone());
        self.fail_subscriptions(error);
    }

    fn fail_subscriptions(&mut self, error: StoreError) {
        for (_, mut sub) in std::mem::take(&mut self.subscriptions) {
            (sub.callback)(Err(error.clone()));
        }
    }

    fn check_usable(&self) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::ContextTornDown);
        }
        match &self.fault {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn log_mut(&mut self) -> StoreResult<&mut WriteLog> {
        self.check_usable()?;
        self.write.as_mut().ok_or(StoreError::NotInWrite)
    }

    /// Keep `prior` as `object`'s pre-transaction state unless the write
    /// already touched it
    fn record(&mut self, object: ObjectRef, prior: Option<Box<dyn StoredObject>>) {
        if let Some(log) = self.write.as_mut() {
            log.before.entry(object).or_insert(prior);
        }
    }

    fn rollback(&mut self, log: WriteLog) {
        let restored = log.before.len();
        for (object, prior) in log.before {
            let table = self.tables.tables.entry(object.type_name).or_default();
            table.remove(&object.key);
            if let Some(prior) = prior {
                table.insert(object.key, prior);
            }
        }
        debug!(target: "cordon::store", version = self.version, restored, "Write rolled back");
    }

    fn commit(&mut self, log: WriteLog) {
        self.version += 1;
        if log.before.is_empty() {
            return;
        }

        let mut touched_types: HashSet<&'static str> = HashSet::new();
        let mut modified: HashMap<ObjectRef, Vec<&'static str>> = HashMap::new();
        for (object, before) in log.before {
            touched_types.insert(object.type_name);
            let before = before.map(|o| o.fields());
            let after = self.tables.fields_of(&object);
            if let (Some(before), Some(after)) = (before, after) {
                let changed: Vec<&'static str> = after
                    .iter()
                    .filter(|(name, value)| {
                        before.iter().find(|(n, _)| n == name).map(|(_, v)| v) != Some(value)
                    })
                    .map(|(name, _)| *name)
                    .collect();
                if !changed.is_empty() {
                    modified.insert(object, changed);
                }
            }
        }

        debug!(
            target: "cordon::store",
            version = self.version,
            types = touched_types.len(),
            modified = modified.len(),
            "Write committed"
        );

        let Self {
            tables,
            subscriptions,
            ..
        } = self;
        let tables: &Tables = tables;
        let mut failed = Vec::new();
        for (token, sub) in subscriptions.iter_mut() {
            if !touched_types.contains(sub.type_name) {
                continue;
            }
            let new_keys = match (sub.evaluate)(tables) {
                Ok(keys) => keys,
                Err(err) => {
                    (sub.callback)(Err(err));
                    failed.push(*token);
                    continue;
                }
            };
            if sub.count_only {
                let changed = new_keys.len() != sub.last_keys.len();
                sub.last_keys = new_keys;
                if changed {
                    (sub.callback)(Ok(CollectionChange::Update {
                        count: sub.last_keys.len(),
                        deletions: Vec::new(),
                        insertions: Vec::new(),
                        modifications: Vec::new(),
                    }));
                }
                continue;
            }
            let type_name = sub.type_name;
            let change = diff(&sub.last_keys, &new_keys, |key| {
                let object = ObjectRef::new(type_name, key.clone());
                modified
                    .get(&object)
                    .map(|fields| fields.iter().any(|f| sub.tracks(f)))
                    .unwrap_or(false)
            });
            if change.is_empty() {
                continue;
            }
            sub.last_keys = new_keys;
            (sub.callback)(Ok(CollectionChange::Update {
                count: sub.last_keys.len(),
                deletions: change.deletions,
                insertions: change.insertions,
                modifications: change.modifications,
            }));
        }
        for token in failed {
            subscriptions.remove(&token);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::open()
    }
}

impl Store for MemoryStore {
    fn id(&self) -> StoreId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn query<E: Object>(&self, spec: &QuerySpec) -> StoreResult<Vec<&E>> {
        self.check_usable()?;
        self.tables.query(spec)
    }

    fn write<T, X, F>(&mut self, f: F) -> Result<T, X>
    where
        F: FnOnce(&mut Self) -> Result<T, X>,
        X: From<StoreError>,
    {
        self.check_usable()?;
        if self.write.is_some() {
            return Err(StoreError::AlreadyInWrite.into());
        }
        self.write = Some(WriteLog::default());
        let result = f(self);
        // close() inside `f` already dropped the log and the tables
        if let Some(log) = self.write.take() {
            if result.is_ok() && self.fault.is_none() {
                self.commit(log);
            } else {
                self.rollback(log);
            }
        }
        result
    }

    fn add<E: Object>(&mut self, object: E) -> StoreResult<()> {
        let key = object.primary_key();
        if key.is_null() {
            return Err(StoreError::ConstraintViolation(format!(
                "primary key '{}' of {} must not be null",
                E::PRIMARY_KEY,
                E::TYPE_NAME
            )));
        }
        self.log_mut()?;
        let object_ref = ObjectRef::new(E::TYPE_NAME, key.clone());
        let previous = self
            .tables
            .tables
            .entry(E::TYPE_NAME)
            .or_default()
            .insert(key, Box::new(object));
        self.record(object_ref, previous);
        Ok(())
    }

    fn object_mut<E: Object + Clone>(&mut self, key: &Value) -> StoreResult<Option<&mut E>> {
        let object = ObjectRef::new(E::TYPE_NAME, key.clone());
        let recorded = self.log_mut()?.before.contains_key(&object);
        if !recorded {
            let prior = match self.tables.tables.get(E::TYPE_NAME).and_then(|t| t.get(key)) {
                Some(stored) => stored
                    .as_any()
                    .downcast_ref::<E>()
                    .ok_or_else(type_mismatch::<E>)?
                    .clone(),
                None => return Ok(None),
            };
            self.record(object, Some(Box::new(prior)));
        }
        let stored = self
            .tables
            .tables
            .get_mut(E::TYPE_NAME)
            .and_then(|t| t.get_mut(key));
        match stored {
            Some(stored) => stored
                .as_any_mut()
                .downcast_mut::<E>()
                .map(Some)
                .ok_or_else(type_mismatch::<E>),
            // recorded by this write, then deleted by it
            None => Err(StoreError::InvalidatedObject),
        }
    }

    fn delete(&mut self, objects: Vec<ObjectRef>, cascading: bool) -> StoreResult<usize> {
        self.log_mut()?;
        let mut pending = objects;
        let mut visited: HashSet<ObjectRef> = HashSet::new();
        let mut removed = 0;
        while let Some(object) = pending.pop() {
            if !visited.insert(object.clone()) {
                continue;
            }
            let taken = self
                .tables
                .tables
                .get_mut(object.type_name)
                .and_then(|t| t.remove(&object.key));
            if let Some(stored) = &taken {
                removed += 1;
                if cascading {
                    pending.extend(stored.owned());
                }
            }
            self.record(object, taken);
        }
        Ok(removed)
    }

    fn subscribe<E: Object>(
        &mut self,
        spec: QuerySpec,
        options: SubscribeOptions,
        mut callback: NotificationCallback,
    ) -> StoreResult<NotificationToken> {
        self.check_usable()?;
        let SubscribeOptions {
            key_paths,
            count_only,
        } = options;
        if let Some(paths) = &key_paths {
            for path in paths {
                if !E::PROPERTIES.contains(&path.as_str()) {
                    return Err(StoreError::InvalidKeyPath {
                        type_name: E::TYPE_NAME,
                        path: path.clone(),
                    });
                }
            }
        }

        let evaluate: Evaluator = Box::new(move |tables: &Tables| {
            Ok(tables
                .query::<E>(&spec)?
                .into_iter()
                .map(|o| o.primary_key())
                .collect())
        });
        let last_keys = evaluate(&self.tables)?;

        let token = NotificationToken(self.next_token);
        self.next_token += 1;

        callback(Ok(CollectionChange::Initial {
            count: last_keys.len(),
        }));
        self.subscriptions.insert(
            token,
            Subscription {
                type_name: E::TYPE_NAME,
                key_paths,
                count_only,
                evaluate,
                last_keys,
                callback,
            },
        );
        debug!(target: "cordon::store", token = token.0, type_name = E::TYPE_NAME, count_only, "Subscribed");
        Ok(token)
    }

    fn unsubscribe(&mut self, token: NotificationToken) {
        if self.subscriptions.remove(&token).is_some() {
            debug!(target: "cordon::store", token = token.0, "Unsubscribed");
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.fail_subscriptions(StoreError::ContextTornDown);
        self.tables = Tables::default();
        self.write = None;
        self.closed = true;
        debug!(target: "cordon::store", store = %self.id, "Store closed");
    }
}
