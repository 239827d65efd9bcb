//! Shared handle with background timers
//!
//! [`AnalyticsHandle`] puts an [`Analytics`] behind a lock so page hooks and
//! timer tasks can record concurrently. Recording is synchronous and never
//! waits on the network. A flush drains the batch under the lock, releases
//! it, and only then awaits the sink, so events recorded during delivery land
//! in the next batch. A separate async gate keeps flushes from overlapping.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::dispatch::FlushOutcome;
use crate::error::Result;
use crate::tracker::Analytics;
use crate::types::{Event, Properties};

struct Shared {
    analytics: Mutex<Analytics>,
    flush_gate: tokio::sync::Mutex<()>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Analytics> {
        self.analytics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn flush(&self, force: bool) -> FlushOutcome {
        let _gate = self.flush_gate.lock().await;

        let (batch, sink) = {
            let mut analytics = self.lock();
            match analytics.prepare_flush(force) {
                Some(batch) => (batch, analytics.sink()),
                None => {
                    return FlushOutcome::Skipped {
                        pending: analytics.dispatcher().pending_count(),
                    }
                }
            }
        };

        let result = sink.deliver(&batch).await;
        self.lock().complete_flush(&batch, result)
    }
}

#[derive(Debug, Clone, Copy)]
enum TimerJob {
    Flush,
    TimeOnPage,
}

/// Cloneable handle to a running analytics session
#[derive(Clone)]
pub struct AnalyticsHandle {
    shared: Arc<Shared>,
    shutdown: Arc<watch::Sender<bool>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl AnalyticsHandle {
    pub fn new(analytics: Analytics) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                analytics: Mutex::new(analytics),
                flush_gate: tokio::sync::Mutex::new(()),
            }),
            shutdown: Arc::new(shutdown),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Run `f` with exclusive access to the session
    pub fn with<R>(&self, f: impl FnOnce(&mut Analytics) -> R) -> R {
        f(&mut self.shared.lock())
    }

    pub fn record(&self, name: &str, properties: Properties) -> Result<Event> {
        self.with(|analytics| analytics.record(name, properties))
    }

    /// Flush without holding the session lock across delivery
    pub async fn flush(&self, force: bool) -> FlushOutcome {
        self.shared.flush(force).await
    }

    /// Spawn the flush and `time_on_page` timers from the session's config.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start_timers(&self) {
        let (send_interval, time_on_page) = self.with(|analytics| {
            let tracking = analytics.tracking();
            let time_on_page = tracking
                .time_on_page
                .then(|| tracking.time_on_page_interval());
            (analytics.config().dispatch.send_interval(), time_on_page)
        });
        self.start_timers_with(send_interval, time_on_page);
    }

    /// Spawn timers with explicit periods; `None` disables `time_on_page`
    pub fn start_timers_with(&self, send_interval: Duration, time_on_page: Option<Duration>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(self.spawn_timer(TimerJob::Flush, send_interval));
        if let Some(period) = time_on_page {
            tasks.push(self.spawn_timer(TimerJob::TimeOnPage, period));
        }
        tracing::debug!(timers = tasks.len(), "Analytics timers started");
    }

    fn spawn_timer(&self, job: TimerJob, period: Duration) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let mut shutdown = self.shutdown.subscribe();
        let period = period.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => run_job(&shared, job).await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::trace!(?job, "Timer stopped");
        })
    }

    /// Stop the timers, record `session_end` and force a final flush.
    ///
    /// Fails with `SessionEnded` if the session was already ended.
    pub async fn shutdown(&self) -> Result<FlushOutcome> {
        let _ = self.shutdown.send(true);

        let tasks: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            tasks.drain(..).collect()
        };
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Timer task failed");
            }
        }

        self.with(|analytics| analytics.begin_ending())?;
        Ok(self.shared.flush(true).await)
    }
}

async fn run_job(shared: &Shared, job: TimerJob) {
    match job {
        TimerJob::Flush => {
            let outcome = shared.flush(false).await;
            tracing::trace!(?outcome, "Timer flush");
        }
        TimerJob::TimeOnPage => {
            if let Err(e) = shared.lock().track_time_on_page() {
                tracing::debug!(error = %e, "Skipped time_on_page");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dispatch::LocalLogSink;
    use crate::environment::PageEnvironment;
    use crate::storage::MemoryStore;
    use crate::types::SessionPhase;

    fn handle(config: Config) -> (AnalyticsHandle, Arc<LocalLogSink>) {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(LocalLogSink::new(store.clone(), "analytics_log", 50));
        let analytics = Analytics::new(
            config,
            store,
            Arc::new(PageEnvironment::default()),
            sink.clone(),
        )
        .unwrap();
        (AnalyticsHandle::new(analytics), sink)
    }

    #[tokio::test]
    async fn test_shutdown_ends_session_and_flushes_everything() {
        let (handle, sink) = handle(Config::default());
        handle.record("download_cv", Properties::new()).unwrap();

        let outcome = handle.shutdown().await.unwrap();
        assert!(matches!(outcome, FlushOutcome::Delivered { events: 4, .. }));
        assert_eq!(handle.with(|a| a.phase()), SessionPhase::Ending);

        let names: Vec<String> = sink.entries()[0]
            .events
            .iter()
            .map(|e| e.name.clone())
            .collect();
        assert_eq!(
            names,
            vec!["page_view", "session_start", "download_cv", "session_end"]
        );

        assert!(handle.record("late", Properties::new()).is_err());
        assert!(handle.shutdown().await.is_err());
    }

    #[tokio::test]
    async fn test_timer_flushes_once_threshold_reached() {
        let mut config = Config::default();
        config.dispatch.batch_size = 3;
        let (handle, sink) = handle(config);
        handle.start_timers_with(Duration::from_millis(20), None);

        handle.record("one", Properties::new()).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(sink.entries().len(), 1);
        assert_eq!(sink.entries()[0].events.len(), 3);
        assert!(!handle.with(|a| a.dispatcher().has_pending()));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_time_on_page_timer_records_events() {
        let (handle, _sink) = handle(Config::default());
        handle.start_timers_with(Duration::from_secs(3600), Some(Duration::from_millis(20)));

        tokio::time::sleep(Duration::from_millis(150)).await;
        let recorded = handle.with(|a| {
            a.dispatcher()
                .pending_events()
                .filter(|e| e.name == "time_on_page")
                .count()
        });
        assert!(recorded >= 1);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_recording_during_flush_keeps_order() {
        let mut config = Config::default();
        config.dispatch.batch_size = 2;
        let (handle, sink) = handle(config);

        let recorder = {
            let handle = handle.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    handle.record(&format!("e{}", i), Properties::new()).unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        for _ in 0..10 {
            handle.flush(false).await;
            tokio::task::yield_now().await;
        }
        recorder.await.unwrap();
        handle.shutdown().await.unwrap();

        let delivered: Vec<String> = sink
            .entries()
            .iter()
            .flat_map(|b| b.events.iter().map(|e| e.name.clone()))
            .filter(|name| name.starts_with('e'))
            .collect();
        let expected: Vec<String> = (0..20).map(|i| format!("e{}", i)).collect();
        assert_eq!(delivered, expected);
    }
}
