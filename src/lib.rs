//! Cordon - thread-confined, asynchronous result sets
//!
//! Cordon wraps an embedded object store whose objects may only be touched
//! on the thread that created them. Every store access is marshalled onto
//! that home thread, and callers on any task get lazy, composable,
//! observable result sets back.
//!
//! # Quick Start
//!
//! ```ignore
//! use cordon::{Controller, ControllerConfig, MemoryStore, SortDescriptor};
//!
//! let controller = Controller::open(ControllerConfig::named("app"), || Ok(MemoryStore::open()))?;
//! controller.add(vec![company]).await?;
//!
//! let results = controller
//!     .objects::<Company>()
//!     .filter_query(|q| q.field("id").gt(1))
//!     .await?
//!     .sorted(vec![SortDescriptor::desc("name")])
//!     .await?;
//! let frozen = results.freeze().await?;
//! let mut changes = results.watch(None);
//! ```
//!
//! # Architecture
//!
//! - [`cordon_core`]: values, errors, the `Object` and `Store` traits, queries
//! - [`cordon_store`]: `MemoryStore`, the in-memory store
//! - [`cordon_engine`]: bridge, controller, result sets, snapshots, watchers

pub use cordon_core::{
    CollectionChange, CompareOp, Error, NotificationToken, Object, ObjectRef, Predicate, Query,
    QuerySpec, Result, SortDescriptor, Store, StoreError, StoreId, StoreResult, SubscribeOptions,
    Value,
};
pub use cordon_engine::{
    Changeset, ChangesetKind, ChangesetStream, Controller, ControllerConfig, CountStream,
    FrozenSet, ManageableRepresented, ManageableSource, RawResultHandle, RepresentedResults,
    Results, ResultsStreamExt, WatchState,
};
pub use cordon_store::MemoryStore;
