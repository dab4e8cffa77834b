//! Result-set engine for cordon
//!
//! This crate keeps a thread-confined store usable from any task:
//! - Bridge: one home thread per store, FIFO body queue
//! - Controller: store lifecycle and the entry point for queries
//! - Results: lazy, composable result sets over a raw handle
//! - Snapshots: frozen copies readable on any context
//! - Watcher: changesets as a cancellable `Stream`
//! - Representation mapper: plain value views over store-native types
//!
//! No store object ever leaves the home thread. Everything that crosses a
//! context boundary is either a query, a detached clone or a frozen copy.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod config;
pub mod controller;
pub mod handle;
pub mod represented;
pub mod results;
pub mod snapshot;
pub mod stream_ext;
pub mod watch;

pub use bridge::{Bridge, BridgeStats};
pub use config::{ControllerConfig, CONFIG_FILE_NAME, DEFAULT_QUEUE_CAPACITY};
pub use controller::Controller;
pub use handle::RawResultHandle;
pub use represented::{ManageableRepresented, ManageableSource, RepresentedResults};
pub use results::Results;
pub use snapshot::FrozenSet;
pub use stream_ext::ResultsStreamExt;
pub use watch::{Changeset, ChangesetKind, ChangesetStream, CountStream, WatchState};

#[cfg(test)]
mod tests {
    use super::*;
    use cordon_store::MemoryStore;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Controller<MemoryStore>: Send, Sync, Clone);
    assert_impl_all!(RawResultHandle: Send, Sync);
    assert_impl_all!(FrozenSet: Send, Sync);
    assert_impl_all!(ChangesetStream<u8>: Send, Unpin);
    assert_impl_all!(CountStream: Send, Unpin);
}
