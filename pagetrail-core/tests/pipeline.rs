//! End-to-end tests for the analytics pipeline
//!
//! These drive [`Analytics`] through its public API with an in-memory or
//! SQLite store and a recording sink.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use pagetrail_core::capture::{ClickTarget, ElementInfo, ScrollSample};
use pagetrail_core::dispatch::load_snapshot;
use pagetrail_core::storage::KeyValueStore;
use pagetrail_core::{
    Analytics, Batch, Config, Error, FlushOutcome, MemoryStore, PageEnvironment, Properties,
    Sink, SqliteStore,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Sink that keeps every batch, optionally failing instead
#[derive(Default)]
struct RecordingSink {
    batches: Mutex<Vec<Batch>>,
    fail: bool,
}

impl RecordingSink {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    fn batch(&self, index: usize) -> Batch {
        self.batches.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn deliver(&self, batch: &Batch) -> pagetrail_core::Result<()> {
        self.batches.lock().unwrap().push(batch.clone());
        if self.fail {
            return Err(Error::Sink("server unavailable".to_string()));
        }
        Ok(())
    }
}

fn page() -> Arc<PageEnvironment> {
    let mut env = PageEnvironment::default();
    env.url = "https://portfolio.example.com/".to_string();
    env.title = "Portfolio".to_string();
    env.freeze_at(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap());
    Arc::new(env)
}

fn start(
    config: Config,
    store: Arc<dyn KeyValueStore>,
    sink: Arc<RecordingSink>,
) -> Analytics {
    Analytics::new(config, store, page(), sink).expect("analytics should start")
}

fn pending_names(analytics: &Analytics) -> Vec<String> {
    analytics
        .dispatcher()
        .pending_events()
        .map(|e| e.name.clone())
        .collect()
}

fn props(key: &str, value: serde_json::Value) -> Properties {
    let mut properties = Properties::new();
    properties.insert(key.to_string(), value);
    properties
}

// ============================================
// Recording
// ============================================

#[test]
fn test_plain_records_append_one_event_each_in_order() {
    pagetrail_core::logging::init_test();
    let store = Arc::new(MemoryStore::new());
    let mut analytics = start(Config::default(), store, Arc::new(RecordingSink::default()));

    for name in ["download_cv", "theme_toggle", "download_cv"] {
        analytics.record(name, Properties::new()).unwrap();
    }

    assert_eq!(
        pending_names(&analytics),
        vec![
            "page_view",
            "session_start",
            "download_cv",
            "theme_toggle",
            "download_cv"
        ]
    );
    assert!(analytics.dispatcher().pending_conversions().is_empty());
}

#[test]
fn test_record_keeps_extra_properties_in_order() {
    let store = Arc::new(MemoryStore::new());
    let mut analytics = start(Config::default(), store, Arc::new(RecordingSink::default()));

    let mut extra = props("zeta", json!(1));
    extra.insert("alpha".to_string(), json!("two"));
    let event = analytics.record("custom", extra).unwrap();

    let keys: Vec<&str> = event.properties.keys().map(String::as_str).collect();
    assert_eq!(&keys[..2], ["timestamp", "sessionId"]);
    assert_eq!(&keys[keys.len() - 2..], ["zeta", "alpha"]);
    assert_eq!(event.properties["sessionId"], analytics.session().session_id());
    assert_eq!(event.property("zeta"), Some(&json!(1)));
}

#[test]
fn test_scroll_from_10_to_80_fires_three_milestones_once() {
    let store = Arc::new(MemoryStore::new());
    let mut analytics = start(Config::default(), store, Arc::new(RecordingSink::default()));

    // scrollable range is 1000px
    let sample = |top: f64| ScrollSample {
        scroll_top: top,
        scroll_height: 1800.0,
        viewport_height: 800.0,
    };

    assert!(analytics.track_scroll(&sample(100.0)).unwrap().is_empty());
    let fired = analytics.track_scroll(&sample(800.0)).unwrap();
    let percentages: Vec<i64> = fired
        .iter()
        .map(|e| e.properties["percentage"].as_i64().unwrap())
        .collect();
    assert_eq!(percentages, vec![25, 50, 75]);
    assert!(fired.iter().all(|e| e.properties["max_depth"] == 80));

    assert!(analytics.track_scroll(&sample(800.0)).unwrap().is_empty());
    assert!(analytics.track_scroll(&sample(300.0)).unwrap().is_empty());
}

#[test]
fn test_contact_action_produces_conversion_then_conversion_event() {
    let store = Arc::new(MemoryStore::new());
    let mut analytics = start(Config::default(), store, Arc::new(RecordingSink::default()));

    let target = ClickTarget {
        element: ElementInfo {
            tag: "a".to_string(),
            ..Default::default()
        },
        text: "Email me".to_string(),
        href: Some("mailto:me@example.com".to_string()),
        ancestors: vec![ElementInfo {
            tag: "section".to_string(),
            id: "contact".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    };
    let trigger = analytics.track_click(&target).unwrap().unwrap();
    assert_eq!(trigger.name, "contact_action");

    let events: Vec<_> = analytics.dispatcher().pending_events().cloned().collect();
    let position = events.iter().position(|e| e.id == trigger.id).unwrap();
    assert_eq!(events[position + 1].name, "conversion");
    assert_eq!(events.len(), position + 2);

    let conversions = analytics.dispatcher().pending_conversions();
    assert_eq!(conversions.len(), 1);
    assert_eq!(conversions[0].conversion_type, "contact_intent");
    assert_eq!(conversions[0].session_id, analytics.session().session_id());
    assert_eq!(conversions[0].properties["element_text"], "Email me");
}

#[test]
fn test_unmapped_events_produce_no_conversion() {
    let store = Arc::new(MemoryStore::new());
    let mut analytics = start(Config::default(), store, Arc::new(RecordingSink::default()));

    analytics.record("link_click", Properties::new()).unwrap();
    analytics.record("navigation_click", Properties::new()).unwrap();
    assert!(analytics.dispatcher().pending_conversions().is_empty());
}

// ============================================
// Flushing
// ============================================

#[tokio::test]
async fn test_twelve_events_flush_ten_and_keep_two() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let mut analytics = start(Config::default(), store, sink.clone());

    // page_view and session_start make two
    for i in 0..10 {
        analytics.record("item", props("n", json!(i))).unwrap();
    }
    assert_eq!(analytics.dispatcher().pending_count(), 12);

    let outcome = analytics.flush(false).await;
    assert_eq!(
        outcome,
        FlushOutcome::Delivered {
            events: 10,
            conversions: 0
        }
    );
    assert_eq!(analytics.dispatcher().pending_count(), 2);
    assert_eq!(sink.batch(0).events[0].name, "page_view");

    let outcome = analytics.flush(false).await;
    assert_eq!(outcome, FlushOutcome::Skipped { pending: 2 });
    assert_eq!(sink.calls(), 1);
    let remaining: Vec<_> = analytics
        .dispatcher()
        .pending_events()
        .map(|e| e.properties["n"].clone())
        .collect();
    assert_eq!(remaining, vec![json!(8), json!(9)]);
}

#[tokio::test]
async fn test_flush_below_threshold_is_noop_and_forced_flush_drains_conversions() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let mut analytics = start(Config::default(), store, sink.clone());

    analytics
        .track_conversion("newsletter_signup", props("list", json!("weekly")))
        .unwrap();
    let before = analytics.dispatcher().pending_count();

    assert!(!analytics.flush(false).await.attempted());
    assert_eq!(analytics.dispatcher().pending_count(), before);
    assert_eq!(sink.calls(), 0);

    let outcome = analytics.flush(true).await;
    assert_eq!(
        outcome,
        FlushOutcome::Delivered {
            events: before,
            conversions: 1
        }
    );
    assert!(!analytics.dispatcher().has_pending());

    let batch = sink.batch(0);
    assert_eq!(batch.session_id, analytics.session().session_id());
    assert_eq!(batch.url, "https://portfolio.example.com/");
    assert_eq!(batch.conversions[0].conversion_type, "newsletter_signup");
}

#[tokio::test]
async fn test_failed_delivery_drops_batch_unless_acknowledged_optimistically() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::failing());
    let mut analytics = start(Config::default(), store.clone(), sink.clone());

    let outcome = analytics.flush(true).await;
    assert!(matches!(outcome, FlushOutcome::Dropped { events: 2, .. }));
    assert!(!analytics.dispatcher().has_pending());
    assert_eq!(analytics.stats().batches_dropped, 1);

    let mut config = Config::default();
    config.dispatch.optimistic_ack = true;
    let mut analytics = start(config, store, sink);
    let outcome = analytics.flush(true).await;
    assert!(matches!(outcome, FlushOutcome::Delivered { events: 2, .. }));
    assert_eq!(analytics.stats().masked_failures, 1);
}

// ============================================
// Persistence
// ============================================

#[test]
fn test_snapshot_keeps_last_hundred_events_in_order() {
    let store = Arc::new(MemoryStore::new());
    let mut analytics = start(
        Config::default(),
        store.clone(),
        Arc::new(RecordingSink::default()),
    );

    for i in 0..130 {
        analytics.record("item", props("n", json!(i))).unwrap();
    }

    let snapshot = load_snapshot(store.as_ref(), "portfolio_analytics").unwrap();
    assert_eq!(snapshot.events.len(), 100);
    let ns: Vec<i64> = snapshot
        .events
        .iter()
        .map(|e| e.properties["n"].as_i64().unwrap())
        .collect();
    assert_eq!(ns, (30..130).collect::<Vec<i64>>());
    assert_eq!(snapshot.session_id, analytics.session().session_id());
    assert_eq!(snapshot.user_id, analytics.session().user_id());
}

#[test]
fn test_short_snapshot_keeps_every_event() {
    let store = Arc::new(MemoryStore::new());
    let analytics = start(
        Config::default(),
        store.clone(),
        Arc::new(RecordingSink::default()),
    );

    let snapshot = load_snapshot(store.as_ref(), "portfolio_analytics").unwrap();
    let names: Vec<&str> = snapshot.events.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, pending_names(&analytics));
}

#[test]
fn test_malformed_snapshot_does_not_break_construction() {
    let store = Arc::new(MemoryStore::new());
    store.set("portfolio_analytics", "{not json").unwrap();
    store.set("portfolio_user_id", "user_1700000000000_abcdefghi").unwrap();

    let analytics = start(
        Config::default(),
        store.clone(),
        Arc::new(RecordingSink::default()),
    );
    assert_eq!(analytics.session().user_id(), "user_1700000000000_abcdefghi");

    // the first append overwrote the garbage
    assert!(load_snapshot(store.as_ref(), "portfolio_analytics").is_some());
}

#[test]
fn test_missing_user_id_is_generated_and_persisted() {
    let store = Arc::new(MemoryStore::new());
    let analytics = start(
        Config::default(),
        store.clone(),
        Arc::new(RecordingSink::default()),
    );

    let user_id = analytics.session().user_id().to_string();
    assert!(user_id.starts_with("user_"));
    assert_eq!(
        store.get("portfolio_user_id").unwrap().as_deref(),
        Some(user_id.as_str())
    );
}

#[test]
fn test_storage_quota_does_not_block_recording() {
    let store = Arc::new(MemoryStore::with_quota(512));
    let mut analytics = start(
        Config::default(),
        store,
        Arc::new(RecordingSink::default()),
    );

    for _ in 0..20 {
        analytics.record("item", Properties::new()).unwrap();
    }
    assert_eq!(analytics.dispatcher().pending_count(), 22);
    assert!(analytics.stats().snapshot_failures > 0);
}

#[tokio::test]
async fn test_sqlite_store_keeps_user_across_page_loads() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("store.db");

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    store.migrate().unwrap();
    let mut first = start(
        Config::default(),
        store.clone(),
        Arc::new(RecordingSink::default()),
    );
    first.end_session().await.unwrap();
    let first_user = first.session().user_id().to_string();
    drop(first);
    drop(store);

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    store.migrate().unwrap();
    let second = start(Config::default(), store, Arc::new(RecordingSink::default()));

    assert_eq!(second.session().user_id(), first_user);
}

// ============================================
// Session lifecycle
// ============================================

#[tokio::test]
async fn test_session_end_is_last_event_delivered() {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let mut analytics = start(Config::default(), store, sink.clone());

    analytics.record("download_cv", Properties::new()).unwrap();
    analytics.end_session().await.unwrap();

    let batch = sink.batch(0);
    let end = batch.events.last().unwrap();
    assert_eq!(end.name, "session_end");
    assert_eq!(end.properties["total_events"], 3);

    assert!(matches!(
        analytics.record("late", Properties::new()),
        Err(Error::SessionEnded(_))
    ));
    assert!(matches!(
        analytics.track_conversion("late", Properties::new()),
        Err(Error::SessionEnded(_))
    ));
}
