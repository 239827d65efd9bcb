//! Buffered dispatch of events and conversions
//!
//! The dispatcher owns the pending sequences. Every append rewrites a bounded
//! snapshot in the key-value store; a flush drains a batch and hands it to a
//! [`Sink`].
//!
//! ## Delivery semantics
//!
//! A flush removes its batch from the buffer *before* the sink is called, so a
//! slow or failing sink never causes the same events to be drained twice.
//! The flip side is that a failed delivery loses that batch. There is no
//! retry queue; hosts that need durability must put one in front of the sink.

mod http;
mod local;
mod sink;

pub use http::HttpSink;
pub use local::{read_entries, LocalLogSink};
pub use sink::{build_sink, Sink};

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::error::Result;
use crate::storage::{read_json, KeyValueStore};
use crate::types::{Batch, Conversion, Event, SessionIds, Snapshot};

/// Counters for reporting
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events appended since construction
    pub events_recorded: usize,
    /// Conversions appended since construction
    pub conversions_recorded: usize,
    /// Snapshot writes that failed
    pub snapshot_failures: usize,
    /// Sink calls made
    pub batches_sent: usize,
    /// Events in batches the sink accepted
    pub events_delivered: usize,
    /// Conversions in batches the sink accepted
    pub conversions_delivered: usize,
    /// Batches lost to sink failures
    pub batches_dropped: usize,
    /// Events lost to sink failures
    pub events_dropped: usize,
    /// Sink failures reported as delivered under `optimistic_ack`
    pub masked_failures: usize,
}

/// Result of a flush attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Below threshold and not forced; nothing removed, sink not called
    Skipped { pending: usize },
    /// Sink accepted the batch
    Delivered { events: usize, conversions: usize },
    /// Sink failed; the batch is gone
    Dropped {
        events: usize,
        conversions: usize,
        error: String,
    },
}

impl FlushOutcome {
    /// Whether a sink call happened
    pub fn attempted(&self) -> bool {
        !matches!(self, FlushOutcome::Skipped { .. })
    }
}

/// Owner of the pending event and conversion sequences
pub struct BufferedDispatcher {
    store: Arc<dyn KeyValueStore>,
    ids: SessionIds,
    storage_key: String,
    snapshot_limit: usize,
    batch_size: usize,
    events: VecDeque<Event>,
    conversions: Vec<Conversion>,
    stats: DispatchStats,
}

impl BufferedDispatcher {
    pub fn new(store: Arc<dyn KeyValueStore>, ids: SessionIds, config: &DispatchConfig) -> Self {
        Self {
            store,
            ids,
            storage_key: config.storage_key.clone(),
            snapshot_limit: config.snapshot_limit.max(1),
            batch_size: config.batch_size.max(1),
            events: VecDeque::new(),
            conversions: Vec::new(),
            stats: DispatchStats::default(),
        }
    }

    /// Append an event and persist the snapshot
    pub fn append(&mut self, event: Event) {
        self.events.push_back(event);
        self.stats.events_recorded += 1;
        self.persist_snapshot();
    }

    /// Append a conversion and persist the snapshot
    pub fn append_conversion(&mut self, conversion: Conversion) {
        self.conversions.push(conversion);
        self.stats.conversions_recorded += 1;
        self.persist_snapshot();
    }

    /// Best-effort write of the bounded snapshot; failures are logged only
    pub fn persist_snapshot(&mut self) {
        if let Err(e) = self.try_persist_snapshot() {
            self.stats.snapshot_failures += 1;
            tracing::warn!(
                key = %self.storage_key,
                error = %e,
                "Failed to save analytics snapshot"
            );
        }
    }

    fn try_persist_snapshot(&self) -> Result<()> {
        let skip = self.events.len().saturating_sub(self.snapshot_limit);
        let snapshot = Snapshot {
            events: self.events.iter().skip(skip).cloned().collect(),
            conversions: self.conversions.clone(),
            session_id: self.ids.session_id.clone(),
            user_id: self.ids.user_id.clone(),
            last_updated: Utc::now().timestamp_millis(),
        };
        let serialized = serde_json::to_string(&snapshot)?;
        self.store.set(&self.storage_key, &serialized)
    }

    /// Remove the next batch, or None when below threshold and not forced.
    ///
    /// Takes up to `batch_size` events from the front and every pending
    /// conversion. Items appended after this returns are never part of it.
    pub fn take_batch(&mut self, force: bool, url: String, now: DateTime<Utc>) -> Option<Batch> {
        if !force && self.events.len() < self.batch_size {
            return None;
        }

        let count = self.batch_size.min(self.events.len());
        let events: Vec<Event> = self.events.drain(..count).collect();
        let conversions = std::mem::take(&mut self.conversions);
        self.persist_snapshot();

        Some(Batch {
            session_id: self.ids.session_id.clone(),
            user_id: self.ids.user_id.clone(),
            events,
            conversions,
            timestamp: now.timestamp_millis(),
            url,
        })
    }

    /// Account for a delivery attempt and turn it into an outcome
    pub fn record_delivery(
        &mut self,
        batch: &Batch,
        result: Result<()>,
        optimistic_ack: bool,
    ) -> FlushOutcome {
        let events = batch.events.len();
        let conversions = batch.conversions.len();
        self.stats.batches_sent += 1;

        match result {
            Ok(()) => {
                self.stats.events_delivered += events;
                self.stats.conversions_delivered += conversions;
                tracing::debug!(events, conversions, "Batch delivered");
                FlushOutcome::Delivered {
                    events,
                    conversions,
                }
            }
            Err(e) => {
                self.stats.batches_dropped += 1;
                self.stats.events_dropped += events;
                tracing::warn!(
                    events,
                    conversions,
                    error = %e,
                    "Failed to deliver batch, dropping it"
                );
                if optimistic_ack {
                    self.stats.masked_failures += 1;
                    FlushOutcome::Delivered {
                        events,
                        conversions,
                    }
                } else {
                    FlushOutcome::Dropped {
                        events,
                        conversions,
                        error: e.to_string(),
                    }
                }
            }
        }
    }

    /// Take a batch and deliver it in one step
    pub async fn flush(
        &mut self,
        sink: &dyn Sink,
        force: bool,
        url: String,
        now: DateTime<Utc>,
        optimistic_ack: bool,
    ) -> FlushOutcome {
        let Some(batch) = self.take_batch(force, url, now) else {
            return FlushOutcome::Skipped {
                pending: self.events.len(),
            };
        };
        let result = sink.deliver(&batch).await;
        self.record_delivery(&batch, result, optimistic_ack)
    }

    /// Drop pending data and the stored snapshot
    pub fn clear(&mut self) -> Result<()> {
        self.events.clear();
        self.conversions.clear();
        self.store.remove(&self.storage_key)
    }

    pub fn pending_events(&self) -> impl ExactSizeIterator<Item = &Event> {
        self.events.iter()
    }

    pub fn pending_conversions(&self) -> &[Conversion] {
        &self.conversions
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.events.is_empty() || !self.conversions.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }
}

/// Read a persisted snapshot; malformed or missing data reads as None
pub fn load_snapshot(store: &dyn KeyValueStore, key: &str) -> Option<Snapshot> {
    read_json(store, key)
}
