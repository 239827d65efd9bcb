//! Conversion classification
//!
//! A fixed table maps a handful of event names to conversion labels. Anything
//! else produces nothing.

use chrono::{DateTime, Utc};

use crate::session::generate_id;
use crate::types::{Conversion, Event, Properties, SessionIds};

/// Event name of the synthetic event recorded after every conversion
pub const CONVERSION_EVENT: &str = "conversion";

/// Event name → conversion type
const CONVERSION_EVENTS: &[(&str, &str)] = &[
    ("contact_action", "contact_intent"),
    ("external_link_click", "external_engagement"),
    ("social_click", "social_engagement"),
    ("portfolio_click", "portfolio_engagement"),
    ("button_click", "cta_engagement"),
];

/// Conversion label for an event name, if it converts
pub fn conversion_type_for(event_name: &str) -> Option<&'static str> {
    CONVERSION_EVENTS
        .iter()
        .find(|(name, _)| *name == event_name)
        .map(|(_, conversion_type)| *conversion_type)
}

/// Stateless classifier from events to conversions
#[derive(Debug, Default, Clone, Copy)]
pub struct ConversionClassifier;

impl ConversionClassifier {
    /// Derive the conversion for `event`, copying its properties
    pub fn classify(&self, event: &Event, ids: &SessionIds, now: DateTime<Utc>) -> Option<Conversion> {
        let conversion_type = conversion_type_for(&event.name)?;
        Some(new_conversion(
            conversion_type,
            event.properties.clone(),
            ids,
            now,
        ))
    }
}

/// Build a conversion record
pub fn new_conversion(
    conversion_type: &str,
    properties: Properties,
    ids: &SessionIds,
    now: DateTime<Utc>,
) -> Conversion {
    Conversion {
        id: generate_id("event", now),
        conversion_type: conversion_type.to_string(),
        timestamp: now.timestamp_millis(),
        session_id: ids.session_id.clone(),
        user_id: ids.user_id.clone(),
        properties,
    }
}

/// Properties of the synthetic `conversion` event: the type first, then the
/// conversion's own properties
pub fn conversion_event_properties(conversion: &Conversion) -> Properties {
    let mut properties = Properties::new();
    properties.insert(
        "conversion_type".to_string(),
        serde_json::Value::String(conversion.conversion_type.clone()),
    );
    properties.extend(conversion.properties.clone());
    properties
}
