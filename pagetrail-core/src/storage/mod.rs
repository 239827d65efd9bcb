//! Key-value storage for pagetrail
//!
//! The pipeline treats storage as an opaque string blob store, the same way a
//! page treats `localStorage`. Two implementations are provided:
//! - [`SqliteStore`]: durable, one `kv` table, embedded migrations
//! - [`MemoryStore`]: in-process, with an optional byte quota

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use serde::de::DeserializeOwned;

/// String key-value store shared by unrelated subsystems under disjoint keys.
///
/// Each `set` replaces the whole value atomically.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// Read and parse a JSON value, treating unreadable or malformed data as absent.
pub fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(key, error = %e, "Failed to read from store");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, error = %e, "Ignoring malformed stored value");
            None
        }
    }
}
