//! Core types and traits for Cordon
//!
//! This crate defines the vocabulary shared by the store collaborator and the
//! result-set engine:
//! - Value: Scalar field value (primary keys, predicate operands, sort keys)
//! - Error / StoreError: Error type hierarchy
//! - StoreId, ObjectRef, NotificationToken: Identifiers
//! - Object, Store: The store capability surface
//! - Predicate, SortDescriptor, QuerySpec, Query: Lazy query descriptions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod query;
pub mod traits;
pub mod types;
pub mod value;

pub use error::{Error, Result, StoreError, StoreResult};
pub use query::{CompareOp, Field, Predicate, Query, QuerySpec, SortDescriptor};
pub use traits::{CollectionChange, NotificationCallback, Object, Store, SubscribeOptions};
pub use types::{NotificationToken, ObjectRef, StoreId};
pub use value::Value;
