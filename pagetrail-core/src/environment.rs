//! Read-only view of the hosting page
//!
//! The collector never talks to a browser directly. Everything it stamps on
//! an event (URL, user agent, viewport, clock) comes through [`Environment`],
//! so the pipeline runs the same under a replay tool, a test, or a real host.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::{Error, Result};

/// Width/height pair in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Navigation timing marks, epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LoadTimings {
    pub navigation_start: i64,
    pub response_start: i64,
    pub dom_content_loaded_end: i64,
    pub load_event_end: i64,
}

impl LoadTimings {
    pub fn load_time_ms(&self) -> i64 {
        self.load_event_end - self.navigation_start
    }

    pub fn dom_ready_time_ms(&self) -> i64 {
        self.dom_content_loaded_end - self.navigation_start
    }

    pub fn first_paint_time_ms(&self) -> i64 {
        self.response_start - self.navigation_start
    }
}

/// Snapshot provider for ambient page properties.
pub trait Environment: Send + Sync {
    fn url(&self) -> String;
    fn referrer(&self) -> String;
    fn title(&self) -> String;
    fn user_agent(&self) -> String;
    fn language(&self) -> String;
    fn timezone(&self) -> String;
    fn connection_type(&self) -> String;
    fn screen(&self) -> Dimensions;
    fn viewport(&self) -> Dimensions;

    /// Page load timings, when the host exposes them
    fn load_timings(&self) -> Option<LoadTimings> {
        None
    }

    fn now(&self) -> DateTime<Utc>;

    /// Host part of the current URL
    fn host(&self) -> Option<String> {
        reqwest::Url::parse(&self.url())
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }
}

/// Static page description with a controllable clock.
///
/// Deserializable so replay tooling can load it from JSON. The clock runs on
/// wall time until [`PageEnvironment::freeze_at`] pins it.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PageEnvironment {
    pub url: String,
    pub referrer: String,
    pub title: String,
    pub user_agent: String,
    pub language: String,
    pub timezone: String,
    pub connection_type: String,
    pub screen: Dimensions,
    pub viewport: Dimensions,
    pub load_timings: Option<LoadTimings>,
    #[serde(skip)]
    frozen_at: Mutex<Option<DateTime<Utc>>>,
}

impl Default for PageEnvironment {
    fn default() -> Self {
        Self {
            url: "http://localhost/".to_string(),
            referrer: String::new(),
            title: String::new(),
            user_agent: "pagetrail".to_string(),
            language: "en-US".to_string(),
            timezone: "UTC".to_string(),
            connection_type: "unknown".to_string(),
            screen: Dimensions::new(1920, 1080),
            viewport: Dimensions::new(1280, 720),
            load_timings: None,
            frozen_at: Mutex::new(None),
        }
    }
}

impl PageEnvironment {
    /// Pin the clock to `at`
    pub fn freeze_at(&self, at: DateTime<Utc>) {
        *self.frozen_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    /// Move a frozen clock forward; freezes at wall time first if needed
    ///
    /// A step that would carry the clock past the representable range is
    /// refused and leaves the clock where it was.
    pub fn advance(&self, by: Duration) -> Result<()> {
        let mut frozen = self.frozen_at.lock().unwrap_or_else(PoisonError::into_inner);
        let base = frozen.unwrap_or_else(Utc::now);
        let next = TimeDelta::from_std(by)
            .ok()
            .and_then(|step| base.checked_add_signed(step))
            .ok_or_else(|| {
                Error::InvalidEvent(format!("clock cannot advance by {}s", by.as_secs()))
            })?;
        *frozen = Some(next);
        Ok(())
    }
}

impl Environment for PageEnvironment {
    fn url(&self) -> String {
        self.url.clone()
    }

    fn referrer(&self) -> String {
        self.referrer.clone()
    }

    fn title(&self) -> String {
        self.title.clone()
    }

    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }

    fn language(&self) -> String {
        self.language.clone()
    }

    fn timezone(&self) -> String {
        self.timezone.clone()
    }

    fn connection_type(&self) -> String {
        self.connection_type.clone()
    }

    fn screen(&self) -> Dimensions {
        self.screen
    }

    fn viewport(&self) -> Dimensions {
        self.viewport
    }

    fn load_timings(&self) -> Option<LoadTimings> {
        self.load_timings
    }

    fn now(&self) -> DateTime<Utc> {
        self.frozen_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or_else(Utc::now)
    }
}

/// Coarse device class from viewport width
pub fn device_type(viewport: Dimensions) -> &'static str {
    if viewport.width < 768 {
        "mobile"
    } else if viewport.width < 1024 {
        "tablet"
    } else {
        "desktop"
    }
}

/// Browser family by user-agent substring, first match wins
pub fn browser(user_agent: &str) -> &'static str {
    const BROWSERS: &[(&str, &str)] = &[
        ("Chrome", "Chrome"),
        ("Firefox", "Firefox"),
        ("Safari", "Safari"),
        ("Edge", "Edge"),
    ];
    first_match(user_agent, BROWSERS)
}

/// Operating system by user-agent substring, first match wins
pub fn os(user_agent: &str) -> &'static str {
    const SYSTEMS: &[(&str, &str)] = &[
        ("Windows", "Windows"),
        ("Mac", "macOS"),
        ("Linux", "Linux"),
        ("Android", "Android"),
        ("iOS", "iOS"),
    ];
    first_match(user_agent, SYSTEMS)
}

fn first_match(haystack: &str, table: &[(&str, &'static str)]) -> &'static str {
    table
        .iter()
        .find(|(needle, _)| haystack.contains(needle))
        .map(|(_, label)| *label)
        .unwrap_or("Other")
}
