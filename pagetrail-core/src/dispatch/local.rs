//! Sink that keeps a bounded log of batches in the key-value store

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::storage::{read_json, KeyValueStore};
use crate::types::Batch;

use super::sink::Sink;

/// Appends each batch to a JSON array under one key, dropping the oldest
/// entries past `limit`
pub struct LocalLogSink {
    store: Arc<dyn KeyValueStore>,
    key: String,
    limit: usize,
}

impl LocalLogSink {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>, limit: usize) -> Self {
        Self {
            store,
            key: key.into(),
            limit: limit.max(1),
        }
    }

    /// Stored batches, oldest first; malformed data reads as empty
    pub fn entries(&self) -> Vec<Batch> {
        read_entries(self.store.as_ref(), &self.key)
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(&self.key)
    }
}

/// Read a batch log written by [`LocalLogSink`]
pub fn read_entries(store: &dyn KeyValueStore, key: &str) -> Vec<Batch> {
    read_json(store, key).unwrap_or_default()
}

#[async_trait]
impl Sink for LocalLogSink {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn deliver(&self, batch: &Batch) -> Result<()> {
        let mut entries = self.entries();
        entries.push(batch.clone());
        if entries.len() > self.limit {
            let excess = entries.len() - self.limit;
            entries.drain(..excess);
        }

        let serialized = serde_json::to_string(&entries)?;
        self.store
            .set(&self.key, &serialized)
            .map_err(|e| Error::Sink(format!("failed to write batch log: {}", e)))?;

        tracing::debug!(
            key = %self.key,
            events = batch.events.len(),
            conversions = batch.conversions.len(),
            logged = entries.len(),
            "Batch logged locally"
        );
        Ok(())
    }
}
