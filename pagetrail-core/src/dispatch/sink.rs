//! Sink abstraction and construction from configuration

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{SinkConfig, SinkKind};
use crate::error::Result;
use crate::storage::KeyValueStore;
use crate::types::Batch;

use super::http::HttpSink;
use super::local::LocalLogSink;

/// Destination for flushed batches.
///
/// A returned error means the batch was not accepted. The dispatcher has
/// already removed the batch from its buffer by then and does not redeliver.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short label for logs
    fn name(&self) -> &'static str;

    async fn deliver(&self, batch: &Batch) -> Result<()>;
}

/// Build the sink selected by `config`
pub fn build_sink(config: &SinkConfig, store: Arc<dyn KeyValueStore>) -> Result<Arc<dyn Sink>> {
    config.validate()?;
    let sink: Arc<dyn Sink> = match config.kind {
        SinkKind::Local => Arc::new(LocalLogSink::new(
            store,
            config.log_key.clone(),
            config.log_limit,
        )),
        SinkKind::Http => Arc::new(HttpSink::new(config.clone())?),
    };
    Ok(sink)
}
