//! Stored objects: the application-level items a node stores.

use serde::{Deserialize, Serialize};

use crate::key::{derive_key, OverlayKey};

/// An object with a name and a declared size. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ObjectFields")]
pub struct StoredObject {
    name: String,
    size: u64,
}

/// Unchecked form of `StoredObject` as it appears in JSON bodies.
#[derive(Deserialize)]
struct ObjectFields {
    name: String,
    size: u64,
}

impl TryFrom<ObjectFields> for StoredObject {
    type Error = ObjectError;

    fn try_from(fields: ObjectFields) -> Result<Self, ObjectError> {
        StoredObject::new(fields.name, fields.size)
    }
}

impl StoredObject {
    /// Create an object. The name must be non-empty.
    pub fn new(name: impl Into<String>, size: u64) -> Result<Self, ObjectError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ObjectError::EmptyName);
        }
        Ok(Self { name, size })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// The overlay key this object is stored under.
    pub fn key(&self) -> OverlayKey {
        derive_key(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectError {
    #[error("object name must not be empty")]
    EmptyName,
}
