//! Raw result handle
//!
//! A handle is either live or frozen:
//!
//! - `Live` holds only the query. It is resolved against the store inside a
//!   bridge body each time it is read, so it always reflects the latest
//!   committed state and never escapes the home context.
//! - `Frozen` holds a [`FrozenSet`]: detached copies readable anywhere.

use crate::snapshot::FrozenSet;
use cordon_core::QuerySpec;

/// Ordered view over the objects matched by a query
#[derive(Debug, Clone)]
pub enum RawResultHandle {
    /// Resolved on the home context at read time
    Live(QuerySpec),
    /// Point-in-time copy, independent of any context
    Frozen(FrozenSet),
}

impl RawResultHandle {
    /// Query that produced (or produces) this handle's objects
    pub fn spec(&self) -> &QuerySpec {
        match self {
            RawResultHandle::Live(spec) => spec,
            RawResultHandle::Frozen(set) => set.spec(),
        }
    }

    /// Whether this handle is a frozen snapshot
    pub fn is_frozen(&self) -> bool {
        matches!(self, RawResultHandle::Frozen(_))
    }
}

/// Bounds-checked element access.
///
/// # Panics
///
/// Panics if `index >= items.len()`. Reading past the end is a caller
/// contract violation, not a recoverable error.
pub(crate) fn element_at<'a, T>(items: &'a [T], index: usize, type_name: &str) -> &'a T {
    match items.get(index) {
        Some(item) => item,
        None => panic!(
            "index {} out of range for results of {} with {} elements",
            index,
            type_name,
            items.len()
        ),
    }
}
