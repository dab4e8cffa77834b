//! Controller: lifecycle handle of one opened store
//!
//! A controller owns the home context of a store (through its bridge) and is
//! shared by every result set and watcher derived from it. Cloning is cheap;
//! the home context shuts down when [`Controller::shutdown`] is called or the
//! last clone is dropped.

use crate::bridge::Bridge;
use crate::config::ControllerConfig;
use crate::represented::{ManageableRepresented, ManageableSource};
use crate::results::Results;
use cordon_core::{Object, Result, Store, StoreId, StoreResult};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

struct ControllerInner<S: Store> {
    bridge: Bridge<S>,
    config: ControllerConfig,
    store_id: StoreId,
    /// Cleared at shutdown; frozen sets hold a clone to detect a dead origin
    alive: Arc<AtomicBool>,
    /// Watchers that have not reached a terminal state
    subscriptions: Arc<AtomicUsize>,
}

impl<S: Store> ControllerInner<S> {
    fn shutdown(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            info!(target: "cordon::controller", name = %self.config.name, store = %self.store_id, "Controller shutting down");
        }
        self.bridge.shutdown();
    }
}

impl<S: Store> Drop for ControllerInner<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to one store instance and its home context.
pub struct Controller<S: Store> {
    inner: Arc<ControllerInner<S>>,
}

impl<S: Store> Clone for Controller<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Store> fmt::Debug for Controller<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.inner.config.name)
            .field("store_id", &self.inner.store_id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl<S: Store> Controller<S> {
    /// Open a store on a new home context.
    ///
    /// `factory` runs on the home thread and builds the store there, so `S`
    /// does not need to be `Send`. Blocks until the factory returns.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid config, or the factory's error.
    pub fn open<F>(config: ControllerConfig, factory: F) -> Result<Self>
    where
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        config.validate()?;
        let (bridge, store_id) = Bridge::start(
            &config.name,
            config.queue_capacity,
            config.drain_on_shutdown,
            factory,
        )?;
        info!(
            target: "cordon::controller",
            name = %config.name,
            store = %store_id,
            queue_capacity = config.queue_capacity,
            "Controller opened"
        );
        Ok(Self {
            inner: Arc::new(ControllerInner {
                bridge,
                config,
                store_id,
                alive: Arc::new(AtomicBool::new(true)),
                subscriptions: Arc::new(AtomicUsize::new(0)),
            }),
        })
    }

    /// Every object of type `E`, in native order.
    ///
    /// Lazy: nothing is read until an operation on the result set runs.
    pub fn objects<E: Object>(&self) -> Results<E, S> {
        Results::all(self.clone())
    }

    /// Run `body` on the home context.
    pub async fn run<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&mut S) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.bridge.run(body).await
    }

    /// Run `body` inside one write transaction on the home context.
    pub async fn write<T, F>(&self, body: F) -> Result<T>
    where
        F: FnOnce(&mut S) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner
            .bridge
            .run(move |store: &mut S| Ok(store.write(body)?))
            .await
    }

    /// Insert (or replace by primary key) objects in one write.
    pub async fn add<E>(&self, objects: Vec<E>) -> Result<()>
    where
        E: Object + Send,
    {
        self.write(move |store: &mut S| {
            for object in objects {
                store.add(object)?;
            }
            Ok(())
        })
        .await
    }

    /// Insert plain values by converting each to its store-native type on
    /// the home context.
    pub async fn add_represented<R>(&self, values: Vec<R>) -> Result<()>
    where
        R: ManageableRepresented,
    {
        self.write(move |store: &mut S| {
            for value in &values {
                store.add(<R::Source as ManageableSource>::from_represented(value))?;
            }
            Ok(())
        })
        .await
    }

    /// Whether the home context is still running.
    pub fn is_open(&self) -> bool {
        self.inner.alive.load(Ordering::Acquire)
    }

    /// Identity of the opened store.
    pub fn store_id(&self) -> StoreId {
        self.inner.store_id
    }

    /// Configuration this controller was opened with.
    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// Number of change watchers that have not been cancelled or failed.
    pub fn active_subscriptions(&self) -> usize {
        self.inner.subscriptions.load(Ordering::Acquire)
    }

    /// Whether two controllers share the same home context.
    pub fn same_context(&self, other: &Controller<S>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Shut the home context down.
    ///
    /// Queued bodies run first when `drain_on_shutdown` is set, then the
    /// store is closed; every live watcher receives a terminal error. Later
    /// operations on live result sets fail with `ContextUnavailable`, while
    /// frozen result sets stay readable. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub(crate) fn bridge(&self) -> &Bridge<S> {
        &self.inner.bridge
    }

    pub(crate) fn liveness(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.inner.alive)
    }

    pub(crate) fn subscription_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.inner.subscriptions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cordon_core::{Error, Value};
    use cordon_store::MemoryStore;

    #[derive(Debug, Clone, PartialEq)]
    struct Tag {
        id: i64,
        label: String,
    }

    impl Object for Tag {
        const TYPE_NAME: &'static str = "Tag";
        const PRIMARY_KEY: &'static str = "id";
        const PROPERTIES: &'static [&'static str] = &["id", "label"];

        fn primary_key(&self) -> Value {
            Value::Int(self.id)
        }

        fn field(&self, path: &str) -> Option<Value> {
            match path {
                "id" => Some(Value::Int(self.id)),
                "label" => Some(Value::from(self.label.as_str())),
                _ => None,
            }
        }
    }

    fn open() -> Controller<MemoryStore> {
        Controller::open(ControllerConfig::named("tags"), || Ok(MemoryStore::open())).unwrap()
    }

    #[tokio::test]
    async fn test_add_and_count() {
        let controller = open();
        controller
            .add(vec![
                Tag {
                    id: 1,
                    label: "red".into(),
                },
                Tag {
                    id: 2,
                    label: "blue".into(),
                },
            ])
            .await
            .unwrap();
        assert_eq!(controller.objects::<Tag>().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_run_reads_store_version() {
        let controller = open();
        controller
            .add(vec![Tag {
                id: 1,
                label: "red".into(),
            }])
            .await
            .unwrap();
        let version = controller.run(|store| Ok(store.version())).await.unwrap();
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn test_write_surfaces_store_fault() {
        let controller = open();
        let err = controller
            .write(|store: &mut MemoryStore| store.write(|_| Ok(())))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::StoreFault(cordon_core::StoreError::AlreadyInWrite)
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Controller::open(ControllerConfig::default().with_queue_capacity(0), || {
            Ok(MemoryStore::open())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_shutdown_marks_closed() {
        let controller = open();
        let clone = controller.clone();
        assert!(clone.same_context(&controller));
        controller.shutdown();
        assert!(!clone.is_open());
        assert!(matches!(
            clone.run(|_| Ok(())).await,
            Err(Error::ContextUnavailable)
        ));
    }

    #[test]
    fn test_debug_names_controller() {
        let controller = open();
        let text = format!("{:?}", controller);
        assert!(text.contains("tags"));
        assert!(text.contains("open: true"));
    }
}
