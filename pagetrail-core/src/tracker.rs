//! The analytics component for one page load
//!
//! [`Analytics`] wires the pieces together: the [`EventCollector`] builds
//! events, the [`BufferedDispatcher`] buffers and flushes them, the
//! [`ConversionClassifier`] derives conversions, and the [`SessionClock`]
//! supplies identity and elapsed time.
//!
//! Lifecycle: construction records `page_view` and `session_start` and moves
//! the session to [`SessionPhase::Active`]. [`Analytics::end_session`] records
//! `session_end`, forces a final flush and makes the session terminal; any
//! later recording fails with [`Error::SessionEnded`].

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::capture::{
    visibility_event, ClickTarget, EventCollector, FormField, FormSubmission, ScrollSample,
    Signal,
};
use crate::config::{Config, TrackingConfig};
use crate::conversion::{
    conversion_event_properties, new_conversion, ConversionClassifier, CONVERSION_EVENT,
};
use crate::dispatch::{read_entries, BufferedDispatcher, DispatchStats, FlushOutcome, Sink};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::session::SessionClock;
use crate::storage::KeyValueStore;
use crate::types::{Batch, Conversion, Event, Properties, SessionPhase};

/// Conversion type recorded for submitted forms
const FORM_SUBMISSION_CONVERSION: &str = "form_submission";

/// Periodic work found due by [`Analytics::tick`]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TickReport {
    /// `time_on_page` event recorded by this tick
    pub time_on_page: Option<Event>,
    /// The send interval elapsed; the caller should `flush(false)`
    pub flush_due: bool,
}

/// What applying one signal did
#[derive(Debug, Clone, PartialEq)]
pub struct SignalOutcome {
    /// Events appended, synthetic conversion events included
    pub events: usize,
    pub flush: Option<FlushOutcome>,
}

/// Snapshot of internal state for troubleshooting
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub session_id: String,
    pub user_id: String,
    pub phase: String,
    pub events_count: usize,
    pub conversions_count: usize,
    pub session_duration_ms: i64,
    pub max_scroll_depth: u32,
    pub batch_size: usize,
    pub send_interval_secs: u64,
    pub sink: &'static str,
    pub debug: bool,
    pub events_recorded: usize,
    pub conversions_recorded: usize,
    pub batches_sent: usize,
    pub batches_dropped: usize,
}

/// Pending data plus identity, as exposed to the page
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsData {
    pub events: Vec<Event>,
    pub conversions: Vec<Conversion>,
    pub session_id: String,
    pub user_id: String,
    pub session_duration_ms: i64,
}

/// Analytics pipeline for one page session
pub struct Analytics {
    config: Config,
    collector: EventCollector,
    classifier: ConversionClassifier,
    dispatcher: BufferedDispatcher,
    session: SessionClock,
    store: Arc<dyn KeyValueStore>,
    sink: Arc<dyn Sink>,
    phase: SessionPhase,
    next_flush_at: DateTime<Utc>,
    next_time_on_page_at: DateTime<Utc>,
}

impl Analytics {
    /// Start a session: build identifiers, then record the opening events.
    pub fn new(
        config: Config,
        store: Arc<dyn KeyValueStore>,
        env: Arc<dyn Environment>,
        sink: Arc<dyn Sink>,
    ) -> Result<Self> {
        config.tracking.validate()?;
        config.dispatch.validate()?;

        let now = env.now();
        let session = SessionClock::start(store.as_ref(), &config.dispatch.user_id_key, now);
        let dispatcher = BufferedDispatcher::new(store.clone(), session.ids().clone(), &config.dispatch);

        let mut analytics = Self {
            next_flush_at: first_deadline(now, config.dispatch.send_interval_secs),
            next_time_on_page_at: first_deadline(now, config.tracking.time_on_page_interval_secs),
            config,
            collector: EventCollector::new(env),
            classifier: ConversionClassifier,
            dispatcher,
            session,
            store,
            sink,
            phase: SessionPhase::Starting,
        };

        analytics.record_opening_events()?;
        analytics.phase = SessionPhase::Active;

        tracing::info!(
            session_id = %analytics.session.session_id(),
            user_id = %analytics.session.user_id(),
            sink = analytics.sink.name(),
            "Analytics initialized"
        );

        Ok(analytics)
    }

    fn record_opening_events(&mut self) -> Result<()> {
        let page_view = self.collector.page_view_properties();
        self.record("page_view", page_view)?;

        let session_start = self.collector.session_start_properties();
        self.record("session_start", session_start)?;

        if let Some(performance) = self.collector.page_performance_properties() {
            self.record("page_performance", performance)?;
        }
        Ok(())
    }

    // ============================================
    // Recording
    // ============================================

    /// Record an event and any conversion it implies.
    ///
    /// When the name maps to a conversion, the conversion is buffered and a
    /// `conversion` event is appended right after the returned event.
    pub fn record(&mut self, name: &str, properties: Properties) -> Result<Event> {
        let event = self.append_event(name, properties)?;

        let now = self.collector.now();
        if let Some(conversion) = self.classifier.classify(&event, self.session.ids(), now) {
            self.push_conversion(conversion)?;
        }

        Ok(event)
    }

    /// Record a conversion directly, plus its `conversion` event
    pub fn track_conversion(
        &mut self,
        conversion_type: &str,
        properties: Properties,
    ) -> Result<Conversion> {
        self.ensure_accepting()?;
        if conversion_type.trim().is_empty() {
            return Err(Error::InvalidEvent(
                "conversion type must not be empty".to_string(),
            ));
        }

        let conversion = new_conversion(
            conversion_type,
            properties,
            self.session.ids(),
            self.collector.now(),
        );
        self.push_conversion(conversion.clone())?;
        Ok(conversion)
    }

    fn push_conversion(&mut self, conversion: Conversion) -> Result<()> {
        let properties = conversion_event_properties(&conversion);
        self.log_record("Conversion tracked", &conversion.conversion_type, &conversion.id);
        self.dispatcher.append_conversion(conversion);
        self.append_event(CONVERSION_EVENT, properties)?;
        Ok(())
    }

    fn append_event(&mut self, name: &str, properties: Properties) -> Result<Event> {
        self.ensure_accepting()?;
        let event = self.collector.build(name, properties, self.session.ids())?;
        self.log_record("Event tracked", &event.name, &event.id);
        self.dispatcher.append(event.clone());
        Ok(event)
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.phase == SessionPhase::Ending {
            return Err(Error::SessionEnded(self.session.session_id().to_string()));
        }
        Ok(())
    }

    fn log_record(&self, message: &'static str, name: &str, id: &str) {
        if self.config.dispatch.debug {
            tracing::info!(
                event = %name,
                id = %id,
                pending = self.dispatcher.pending_count(),
                "{}",
                message
            );
        } else {
            tracing::trace!(event = %name, id = %id, "{}", message);
        }
    }

    // ============================================
    // Signal capture
    // ============================================

    /// Record a click; None when click tracking is off
    pub fn track_click(&mut self, target: &ClickTarget) -> Result<Option<Event>> {
        if !self.config.tracking.clicks {
            return Ok(None);
        }
        let (name, properties) = self
            .collector
            .click(target, self.config.tracking.external_links);
        self.record(name, properties).map(Some)
    }

    /// Record scroll milestones newly crossed by `sample`
    pub fn track_scroll(&mut self, sample: &ScrollSample) -> Result<Vec<Event>> {
        if !self.config.tracking.scroll_depth {
            return Ok(Vec::new());
        }
        self.ensure_accepting()?;
        self.collector
            .scroll(sample)
            .into_iter()
            .map(|properties| self.record("scroll_depth", properties))
            .collect()
    }

    /// Record `page_hidden` or `page_visible`
    pub fn track_visibility(&mut self, hidden: bool) -> Result<Event> {
        self.record(visibility_event(hidden), Properties::new())
    }

    /// Record a hash navigation to `to`
    pub fn track_navigation(&mut self, to: &str) -> Result<Event> {
        self.ensure_accepting()?;
        let properties = self.collector.navigation(to);
        self.record("navigation", properties)
    }

    /// Record focus on a form control; None for non-form elements or when
    /// form tracking is off
    pub fn track_form_focus(&mut self, field: &FormField) -> Result<Option<Event>> {
        if !self.config.tracking.form_submissions || !field.is_trackable() {
            return Ok(None);
        }
        self.record("form_field_focus", field.properties()).map(Some)
    }

    /// Record a form submission and its `form_submission` conversion
    pub fn track_form_submission(&mut self, form: &FormSubmission) -> Result<Option<Event>> {
        if !self.config.tracking.form_submissions {
            return Ok(None);
        }
        let event = self.record("form_submission", form.properties())?;
        self.track_conversion(FORM_SUBMISSION_CONVERSION, form.conversion_properties())?;
        Ok(Some(event))
    }

    /// Record elapsed time since the session started
    pub fn track_time_on_page(&mut self) -> Result<Event> {
        let properties = self.session.time_on_page_properties(self.collector.now());
        self.record("time_on_page", properties)
    }

    /// Run periodic work that is due by the page clock.
    ///
    /// Missed periods are skipped rather than replayed.
    pub fn tick(&mut self) -> Result<TickReport> {
        self.ensure_accepting()?;
        let now = self.collector.now();
        let mut report = TickReport::default();

        if now >= self.next_time_on_page_at {
            self.next_time_on_page_at = next_after(
                self.next_time_on_page_at,
                now,
                self.config.tracking.time_on_page_interval_secs,
            );
            if self.config.tracking.time_on_page {
                report.time_on_page = Some(self.track_time_on_page()?);
            }
        }

        if now >= self.next_flush_at {
            self.next_flush_at =
                next_after(self.next_flush_at, now, self.config.dispatch.send_interval_secs);
            report.flush_due = true;
        }

        Ok(report)
    }

    /// Apply one signal. Tick signals run due periodic work; the caller is
    /// responsible for moving its clock first.
    pub async fn apply(&mut self, signal: &Signal) -> Result<SignalOutcome> {
        let before = self.dispatcher.stats().events_recorded;
        let mut flush = None;

        match signal {
            Signal::Click(target) => {
                self.track_click(target)?;
            }
            Signal::Scroll(sample) => {
                self.track_scroll(sample)?;
            }
            Signal::Visibility { hidden } => {
                self.track_visibility(*hidden)?;
            }
            Signal::Navigation { to } => {
                self.track_navigation(to)?;
            }
            Signal::FormFocus(field) => {
                self.track_form_focus(field)?;
            }
            Signal::FormSubmit(form) => {
                self.track_form_submission(form)?;
            }
            Signal::Custom { name, properties } => {
                self.record(name, properties.clone())?;
            }
            Signal::Conversion {
                conversion_type,
                properties,
            } => {
                self.track_conversion(conversion_type, properties.clone())?;
            }
            Signal::Tick { .. } => {
                if self.tick()?.flush_due {
                    flush = Some(self.flush(false).await);
                }
            }
            Signal::Flush { force } => {
                flush = Some(self.flush(*force).await);
            }
        }

        Ok(SignalOutcome {
            events: self.dispatcher.stats().events_recorded - before,
            flush,
        })
    }

    // ============================================
    // Flushing and teardown
    // ============================================

    /// Drain the next batch if one is due (or `force`)
    pub fn prepare_flush(&mut self, force: bool) -> Option<Batch> {
        let url = self.collector.environment().url();
        let now = self.collector.now();
        self.dispatcher.take_batch(force, url, now)
    }

    /// Account for the delivery of a batch from [`Analytics::prepare_flush`]
    pub fn complete_flush(&mut self, batch: &Batch, result: Result<()>) -> FlushOutcome {
        self.dispatcher
            .record_delivery(batch, result, self.config.dispatch.optimistic_ack)
    }

    /// Flush to the sink: below threshold without `force` this is a no-op
    pub async fn flush(&mut self, force: bool) -> FlushOutcome {
        let Some(batch) = self.prepare_flush(force) else {
            return FlushOutcome::Skipped {
                pending: self.dispatcher.pending_count(),
            };
        };
        let result = self.sink.deliver(&batch).await;
        self.complete_flush(&batch, result)
    }

    /// Record `session_end` and make the session terminal, without flushing
    pub fn begin_ending(&mut self) -> Result<Event> {
        let stats = self.dispatcher.stats();
        let properties = self.session.session_end_properties(
            self.collector.now(),
            stats.events_recorded,
            stats.conversions_recorded,
        );
        let event = self.record("session_end", properties)?;
        self.phase = SessionPhase::Ending;

        tracing::info!(
            session_id = %self.session.session_id(),
            pending = self.dispatcher.pending_count(),
            "Session ending"
        );
        Ok(event)
    }

    /// Record `session_end` and force a final flush
    pub async fn end_session(&mut self) -> Result<FlushOutcome> {
        self.begin_ending()?;
        Ok(self.flush(true).await)
    }

    // ============================================
    // Introspection
    // ============================================

    pub fn debug_info(&self) -> DebugInfo {
        let stats = self.dispatcher.stats();
        DebugInfo {
            session_id: self.session.session_id().to_string(),
            user_id: self.session.user_id().to_string(),
            phase: self.phase.to_string(),
            events_count: self.dispatcher.pending_count(),
            conversions_count: self.dispatcher.pending_conversions().len(),
            session_duration_ms: self.session.elapsed_ms(self.collector.now()),
            max_scroll_depth: self.collector.scroll_tracker().max_depth(),
            batch_size: self.dispatcher.batch_size(),
            send_interval_secs: self.config.dispatch.send_interval_secs,
            sink: self.sink.name(),
            debug: self.config.dispatch.debug,
            events_recorded: stats.events_recorded,
            conversions_recorded: stats.conversions_recorded,
            batches_sent: stats.batches_sent,
            batches_dropped: stats.batches_dropped,
        }
    }

    pub fn analytics_data(&self) -> AnalyticsData {
        AnalyticsData {
            events: self.dispatcher.pending_events().cloned().collect(),
            conversions: self.dispatcher.pending_conversions().to_vec(),
            session_id: self.session.session_id().to_string(),
            user_id: self.session.user_id().to_string(),
            session_duration_ms: self.session.elapsed_ms(self.collector.now()),
        }
    }

    /// Batches written by the local sink, oldest first
    pub fn stored_log(&self) -> Vec<Batch> {
        read_entries(self.store.as_ref(), &self.config.sink.log_key)
    }

    /// Drop pending data, the snapshot and the local batch log; the user id
    /// is kept
    pub fn clear(&mut self) -> Result<()> {
        self.dispatcher.clear()?;
        self.store.remove(&self.config.sink.log_key)
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.config.dispatch.debug = debug;
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session(&self) -> &SessionClock {
        &self.session
    }

    pub fn dispatcher(&self) -> &BufferedDispatcher {
        &self.dispatcher
    }

    pub fn stats(&self) -> &DispatchStats {
        self.dispatcher.stats()
    }

    pub fn sink(&self) -> Arc<dyn Sink> {
        self.sink.clone()
    }

    pub fn tracking(&self) -> &TrackingConfig {
        &self.config.tracking
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Timer period in milliseconds, `None` when it cannot be represented
fn period_millis(secs: u64) -> Option<i64> {
    i64::try_from(secs.max(1)).ok()?.checked_mul(1000)
}

/// Add `millis` to `at`; a deadline past the end of time never comes due
fn deadline_at(at: DateTime<Utc>, millis: Option<i64>) -> DateTime<Utc> {
    millis
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|step| at.checked_add_signed(step))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn first_deadline(now: DateTime<Utc>, period_secs: u64) -> DateTime<Utc> {
    deadline_at(now, period_millis(period_secs))
}

/// First deadline strictly after `now`, stepping from `deadline`
fn next_after(deadline: DateTime<Utc>, now: DateTime<Utc>, period_secs: u64) -> DateTime<Utc> {
    let step = period_millis(period_secs).and_then(|period| {
        let missed = (now - deadline).num_milliseconds() / period;
        missed.checked_add(1)?.checked_mul(period)
    });
    deadline_at(deadline, step)
}
