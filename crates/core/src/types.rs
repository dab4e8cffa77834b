//! Core identifier types
//!
//! This module defines:
//! - StoreId: Identity of one opened store instance
//! - ObjectRef: Type-erased address of a store-native object
//! - NotificationToken: Handle to a registered change subscription

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an opened store
///
/// A new id is minted every time a store is opened, so a snapshot taken
/// from one store instance can never be mistaken for one taken from a
/// later instance at the same location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreId(Uuid);

impl StoreId {
    /// Create a new random StoreId using UUID v4
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the raw bytes of this StoreId
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for StoreId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a store-native object: its type name plus primary key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectRef {
    /// `Object::TYPE_NAME` of the referenced object
    pub type_name: &'static str,
    /// Primary key value
    pub key: Value,
}

impl ObjectRef {
    /// Create a new object reference
    pub fn new(type_name: &'static str, key: impl Into<Value>) -> Self {
        Self {
            type_name,
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name, self.key)
    }
}

/// Handle to a change subscription registered with a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NotificationToken(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_id_unique() {
        assert_ne!(StoreId::new(), StoreId::new());
    }

    #[test]
    fn test_object_ref_display() {
        let r = ObjectRef::new("Company", 3i64);
        assert_eq!(r.to_string(), "Company(3)");
    }
}
