//! In-memory store collaborator for Cordon
//!
//! This crate implements the `Store` capability surface:
//! - MemoryStore: Typed tables keyed by primary key, write transactions,
//!   cascading deletes and per-query change subscriptions
//! - diff: Index-level diff between two deliveries of a collection

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod diff;
pub mod memory;

pub use diff::IndexDiff;
pub use memory::MemoryStore;
