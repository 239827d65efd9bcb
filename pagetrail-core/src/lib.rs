//! # pagetrail-core
//!
//! Core library for pagetrail - a client-side page analytics pipeline.
//!
//! This library provides:
//! - Event capture from page signals (clicks, scroll depth, forms, visibility)
//! - Conversion classification
//! - A buffered dispatcher with a bounded persisted snapshot
//! - Pluggable sinks (local batch log, HTTP endpoint)
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through four stages:
//! - **Capture:** [`capture::EventCollector`] turns signals into events
//! - **Classify:** [`conversion::ConversionClassifier`] derives conversions
//! - **Buffer:** [`dispatch::BufferedDispatcher`] keeps pending data and its snapshot
//! - **Deliver:** a [`dispatch::Sink`] receives flushed batches
//!
//! [`Analytics`] wires the stages together for one page session and
//! [`AnalyticsHandle`] runs it with background timers.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pagetrail_core::{build_sink, Analytics, Config, PageEnvironment, SqliteStore};
//! use pagetrail_core::storage::KeyValueStore;
//!
//! # async fn run() -> pagetrail_core::Result<()> {
//! let config = Config::load()?;
//! let store = SqliteStore::open(&Config::store_path())?;
//! store.migrate()?;
//! let store: Arc<dyn KeyValueStore> = Arc::new(store);
//! let sink = build_sink(&config.sink, store.clone())?;
//!
//! let mut analytics = Analytics::new(config, store, Arc::new(PageEnvironment::default()), sink)?;
//! analytics.record("download_cv", Default::default())?;
//! analytics.end_session().await?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use capture::{EventCollector, Signal};
pub use config::Config;
pub use conversion::ConversionClassifier;
pub use dispatch::{build_sink, BufferedDispatcher, FlushOutcome, Sink};
pub use environment::{Environment, PageEnvironment};
pub use error::{Error, Result};
pub use runtime::AnalyticsHandle;
pub use session::SessionClock;
pub use storage::{MemoryStore, SqliteStore};
pub use tracker::{Analytics, AnalyticsData, DebugInfo, SignalOutcome, TickReport};
pub use types::*;

// Public modules
pub mod capture;
pub mod config;
pub mod conversion;
pub mod dispatch;
pub mod environment;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod tracker;
pub mod types;
