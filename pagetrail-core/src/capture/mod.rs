//! Event capture
//!
//! Turns page signals into [`Event`]s. The collector stamps every event with
//! the same ambient snapshot (time, identity, URL, user agent, screen and
//! viewport sizes, language) and lets caller-supplied properties override it.
//!
//! ## Signals
//!
//! A [`Signal`] is a serializable description of something that happened on
//! the page. Replay files are JSON lines of signals, e.g.
//!
//! ```json
//! {"type": "click", "tag": "a", "href": "https://github.com/me", "ancestors": [{"classes": ["social-links"]}]}
//! {"type": "scroll", "scroll_top": 900, "scroll_height": 1800, "viewport_height": 800}
//! ```

mod click;
mod form;
mod scroll;

pub use click::{classify_click, social_platform, ClickClassification, ClickKind, ClickTarget, ElementInfo};
pub use form::{FormField, FormSubmission};
pub use scroll::{ScrollSample, ScrollTracker, SCROLL_MILESTONES};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::environment::{self, Environment};
use crate::error::{Error, Result};
use crate::session::generate_id;
use crate::types::{Event, Properties, SessionIds};

/// Raw page interaction fed to the pipeline
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    Click(ClickTarget),
    Scroll(ScrollSample),
    Visibility {
        hidden: bool,
    },
    /// Hash change to `to`
    Navigation {
        to: String,
    },
    FormFocus(FormField),
    FormSubmit(FormSubmission),
    Custom {
        name: String,
        #[serde(default)]
        properties: Properties,
    },
    Conversion {
        conversion_type: String,
        #[serde(default)]
        properties: Properties,
    },
    /// Advance the page clock and run any due periodic work
    Tick {
        #[serde(default)]
        advance_secs: u64,
    },
    Flush {
        #[serde(default)]
        force: bool,
    },
}

/// Builds events from signals for one page load
pub struct EventCollector {
    env: Arc<dyn Environment>,
    scroll: ScrollTracker,
    previous_hash: String,
}

impl EventCollector {
    pub fn new(env: Arc<dyn Environment>) -> Self {
        Self {
            env,
            scroll: ScrollTracker::new(),
            previous_hash: String::new(),
        }
    }

    pub fn environment(&self) -> &Arc<dyn Environment> {
        &self.env
    }

    /// Current page time
    pub fn now(&self) -> DateTime<Utc> {
        self.env.now()
    }

    /// Build an event, merging `extra` over the ambient properties
    pub fn build(&self, name: &str, extra: Properties, ids: &SessionIds) -> Result<Event> {
        if name.trim().is_empty() {
            return Err(Error::InvalidEvent("event name must not be empty".to_string()));
        }

        let now = self.env.now();
        let mut properties = self.ambient_properties(ids, now);
        properties.extend(extra);

        Ok(Event {
            id: generate_id("event", now),
            name: name.to_string(),
            properties,
        })
    }

    fn ambient_properties(&self, ids: &SessionIds, now: DateTime<Utc>) -> Properties {
        let mut properties = Properties::new();
        properties.insert("timestamp".to_string(), json!(now.timestamp_millis()));
        properties.insert("sessionId".to_string(), json!(ids.session_id));
        properties.insert("userId".to_string(), json!(ids.user_id));
        properties.insert("url".to_string(), json!(self.env.url()));
        properties.insert("referrer".to_string(), json!(self.env.referrer()));
        properties.insert("userAgent".to_string(), json!(self.env.user_agent()));
        properties.insert(
            "screenResolution".to_string(),
            json!(self.env.screen().to_string()),
        );
        properties.insert(
            "viewportSize".to_string(),
            json!(self.env.viewport().to_string()),
        );
        properties.insert("language".to_string(), json!(self.env.language()));
        properties
    }

    /// `session_start` properties: device, browser, OS, connection, timezone
    pub fn session_start_properties(&self) -> Properties {
        let user_agent = self.env.user_agent();
        let mut properties = Properties::new();
        properties.insert(
            "device_type".to_string(),
            json!(environment::device_type(self.env.viewport())),
        );
        properties.insert("browser".to_string(), json!(environment::browser(&user_agent)));
        properties.insert("os".to_string(), json!(environment::os(&user_agent)));
        properties.insert(
            "connection_type".to_string(),
            json!(self.env.connection_type()),
        );
        properties.insert("timezone".to_string(), json!(self.env.timezone()));
        properties.insert("local_time".to_string(), json!(self.env.now().to_rfc3339()));
        properties
    }

    /// `page_view` properties
    pub fn page_view_properties(&self) -> Properties {
        let mut properties = Properties::new();
        properties.insert("page_title".to_string(), json!(self.env.title()));
        properties.insert("page_url".to_string(), json!(self.env.url()));
        properties
    }

    /// `page_performance` properties, when the host exposes load timings
    pub fn page_performance_properties(&self) -> Option<Properties> {
        let timings = self.env.load_timings()?;
        let mut properties = Properties::new();
        properties.insert("load_time_ms".to_string(), json!(timings.load_time_ms()));
        properties.insert(
            "dom_ready_time_ms".to_string(),
            json!(timings.dom_ready_time_ms()),
        );
        properties.insert(
            "first_paint_time_ms".to_string(),
            json!(timings.first_paint_time_ms()),
        );
        Some(properties)
    }

    /// Classify a click into an event name and context properties
    pub fn click(&self, target: &ClickTarget, track_external: bool) -> (&'static str, Properties) {
        let host = self.env.host();
        let classification = classify_click(target, host.as_deref(), track_external);
        (classification.kind.as_str(), classification.properties)
    }

    /// `scroll_depth` properties for each newly crossed milestone
    pub fn scroll(&mut self, sample: &ScrollSample) -> Vec<Properties> {
        self.scroll.observe(sample)
    }

    pub fn scroll_tracker(&self) -> &ScrollTracker {
        &self.scroll
    }

    /// `navigation` properties for a hash change; remembers `to`
    pub fn navigation(&mut self, to: &str) -> Properties {
        let mut properties = Properties::new();
        properties.insert("from".to_string(), json!(self.previous_hash));
        properties.insert("to".to_string(), json!(to));
        properties.insert("type".to_string(), json!("hash_change"));
        self.previous_hash = to.to_string();
        properties
    }
}

/// Event name for a visibility change
pub fn visibility_event(hidden: bool) -> &'static str {
    if hidden {
        "page_hidden"
    } else {
        "page_visible"
    }
}
