//! Scroll-depth milestones
//!
//! Each milestone fires at most once per page load. Samples are expected to
//! be debounced by the host before they reach the tracker.

use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;

use crate::types::Properties;

/// Percentages reported as `scroll_depth` events
pub const SCROLL_MILESTONES: [u32; 5] = [25, 50, 75, 90, 100];

/// One settled scroll position
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScrollSample {
    /// Pixels scrolled from the top
    pub scroll_top: f64,
    /// Full document height
    pub scroll_height: f64,
    /// Visible viewport height
    pub viewport_height: f64,
}

impl ScrollSample {
    /// Rounded scroll percentage, or None when the page cannot scroll
    pub fn percentage(&self) -> Option<u32> {
        let range = self.scroll_height - self.viewport_height;
        if range.is_nan() || range <= 0.0 || !self.scroll_top.is_finite() {
            return None;
        }
        let percentage = (self.scroll_top / range * 100.0).round();
        Some(percentage.clamp(0.0, 100.0) as u32)
    }
}

/// Tracks maximum depth and fired milestones for one page load
#[derive(Debug, Default, Clone)]
pub struct ScrollTracker {
    max_depth: u32,
    fired: BTreeSet<u32>,
}

impl ScrollTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a sample; returns properties for each newly crossed milestone,
    /// ascending.
    pub fn observe(&mut self, sample: &ScrollSample) -> Vec<Properties> {
        let Some(percentage) = sample.percentage() else {
            return Vec::new();
        };

        self.max_depth = self.max_depth.max(percentage);

        let mut crossed = Vec::new();
        for milestone in SCROLL_MILESTONES {
            if milestone <= percentage && self.fired.insert(milestone) {
                let mut properties = Properties::new();
                properties.insert("percentage".to_string(), json!(milestone));
                properties.insert("max_depth".to_string(), json!(self.max_depth));
                crossed.push(properties);
            }
        }
        crossed
    }

    /// Deepest percentage seen so far
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Milestones already reported, ascending
    pub fn fired(&self) -> impl Iterator<Item = u32> + '_ {
        self.fired.iter().copied()
    }
}
