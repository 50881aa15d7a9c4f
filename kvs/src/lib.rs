#![deny(missing_docs)]
//! Record storage for the key-value service
//!
//! Keys and values are both stored as `String`. Every key maps to exactly one
//! [`Record`]; records are created by the first upsert of their key and are
//! overwritten in place by every later upsert.

pub use kvstore::KvStore;
pub use memstore::MemStore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod kvstore;
mod memstore;

/// Longest key, in characters, that a store will accept
pub const MAX_KEY_LEN: usize = 255;

/// A single `key` / `value` pair held by a store
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// unique identifier of the record
    pub key: String,
    /// text value, may be empty
    pub value: String,
}

impl Record {
    /// Build a record from anything string-like
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Outcome of an atomic upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// no record existed for the key before this write
    Created,
    /// a record existed and its value was replaced (possibly by the same value)
    Updated,
}

impl Upsert {
    /// Returns `true` for [`Upsert::Created`]
    pub fn is_created(&self) -> bool {
        matches!(self, Upsert::Created)
    }
}

/// Defines shared behavior for interacting with a record store
///
/// Note, that all the methods receive shared references to the underlying type.
/// This allows sharing the state of the store across threads. Implementors
/// should employ synchronization primitives such as `Mutex` in order to acquire
/// interior mutability across threads.
pub trait RecordStore: Send + Sync + 'static {
    /// get the record stored under `key`, if any
    fn get(&self, key: &str) -> Result<Option<Record>>;
    /// every record currently in the store, ordered by key
    fn list(&self) -> Result<Vec<Record>>;
    /// set `key` to `value`, inserting the record when it is absent
    ///
    /// Must be atomic: of several concurrent upserts to a fresh key exactly one
    /// observes [`Upsert::Created`], and the last committed write determines
    /// the stored value.
    fn upsert(&self, key: String, value: String) -> Result<(Record, Upsert)>;
}

/// Keys are addressed as a single URL path segment and may not contain it
pub const KEY_SEPARATOR: char = '/';

/// Check the storage-level key constraint: 1 to [`MAX_KEY_LEN`] characters,
/// none of them [`KEY_SEPARATOR`]
pub fn check_key(key: &str) -> Result<()> {
    let len = key.chars().count();
    if len == 0 || len > MAX_KEY_LEN || key.contains(KEY_SEPARATOR) {
        return Err(KvsError::InvalidKey {
            key: key.to_owned(),
        });
    }
    Ok(())
}

/// KvStore error type
#[derive(Debug, Error)]
pub enum KvsError {
    /// Could not read or write the data files
    #[error("data store io failed")]
    Io(#[from] std::io::Error),
    /// Failed to encode or decode a log entry
    #[error("could not encode or decode log entry")]
    Encoding(#[from] serde_json::Error),
    /// The key is empty, longer than [`MAX_KEY_LEN`] characters or holds a
    /// [`KEY_SEPARATOR`]
    #[error("invalid key {key:?}")]
    InvalidKey {
        /// the rejected key
        key: String,
    },
    /// A concurrent write raced this one at the uniqueness constraint
    #[error("conflicting write for key {key:?}")]
    Conflict {
        /// the contended key
        key: String,
    },
    /// failed to acquire a `Mutex` lock
    #[error("Failed to acquire lock")]
    LockError,
}

/// Custom Result type for record stores
pub type Result<T> = std::result::Result<T, KvsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_keys_up_to_the_limit() {
        assert!(check_key("a").is_ok());
        assert!(check_key(&"k".repeat(MAX_KEY_LEN)).is_ok());
        // multi-byte characters count once
        assert!(check_key(&"é".repeat(MAX_KEY_LEN)).is_ok());
    }

    #[test]
    fn rejects_empty_and_oversized_keys() {
        assert!(matches!(check_key(""), Err(KvsError::InvalidKey { .. })));
        assert!(matches!(
            check_key(&"k".repeat(MAX_KEY_LEN + 1)),
            Err(KvsError::InvalidKey { .. })
        ));
    }

    #[test]
    fn rejects_path_separators() {
        assert!(matches!(check_key("a/b"), Err(KvsError::InvalidKey { .. })));
        assert!(matches!(check_key("/"), Err(KvsError::InvalidKey { .. })));
        assert!(check_key("a\\b").is_ok());
    }
}
