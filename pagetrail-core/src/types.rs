//! Core domain types for pagetrail
//!
//! Everything here is serialized with camelCase keys because the persisted
//! snapshot and the sink payload share one JSON shape with the page scripts
//! that read them back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered property bag attached to events and conversions.
///
/// Keys keep insertion order. Unknown keys are passed through untouched.
pub type Properties = serde_json::Map<String, Value>;

/// A single recorded occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// `event_<epoch-ms>_<random>`
    pub id: String,
    /// Semantic tag (e.g., `page_view`, `social_click`)
    pub name: String,
    /// Ambient properties merged with caller-supplied ones
    pub properties: Properties,
}

impl Event {
    /// Look up a property by key
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Epoch milliseconds stamped at record time
    pub fn timestamp(&self) -> Option<i64> {
        self.properties.get("timestamp").and_then(Value::as_i64)
    }
}

/// A business-meaningful action derived from an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversion {
    pub id: String,
    /// Conversion label (e.g., `contact_intent`)
    #[serde(rename = "type")]
    pub conversion_type: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub session_id: String,
    pub user_id: String,
    /// Copy of the triggering event's properties
    pub properties: Properties,
}

/// Identity pair stamped on every event, snapshot and batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIds {
    pub session_id: String,
    pub user_id: String,
}

/// Payload handed to a sink on flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub session_id: String,
    pub user_id: String,
    pub events: Vec<Event>,
    pub conversions: Vec<Conversion>,
    /// Epoch milliseconds when the batch was drained
    pub timestamp: i64,
    /// Page URL at flush time
    pub url: String,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.conversions.is_empty()
    }
}

/// Bounded view of pending state persisted to the key-value store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub events: Vec<Event>,
    pub conversions: Vec<Conversion>,
    pub session_id: String,
    pub user_id: String,
    /// Epoch milliseconds of the last write
    pub last_updated: i64,
}

/// Lifecycle phase of one page session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Identifiers built, opening events not yet recorded
    Starting,
    /// Accepting events; timers may fire
    Active,
    /// `session_end` recorded and final flush issued; terminal
    Ending,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Starting => "starting",
            SessionPhase::Active => "active",
            SessionPhase::Ending => "ending",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conversion_serializes_camel_case() {
        let conversion = Conversion {
            id: "event_1_abc".to_string(),
            conversion_type: "contact_intent".to_string(),
            timestamp: 1,
            session_id: "session_1".to_string(),
            user_id: "user_1".to_string(),
            properties: Properties::new(),
        };

        let value = serde_json::to_value(&conversion).unwrap();
        assert_eq!(value["type"], "contact_intent");
        assert_eq!(value["sessionId"], "session_1");
        assert_eq!(value["userId"], "user_1");
    }

    #[test]
    fn test_event_properties_keep_insertion_order() {
        let mut properties = Properties::new();
        properties.insert("zeta".to_string(), json!(1));
        properties.insert("alpha".to_string(), json!(2));
        properties.insert("timestamp".to_string(), json!(42));
        let event = Event {
            id: "event_1_abc".to_string(),
            name: "custom".to_string(),
            properties,
        };

        let text = serde_json::to_string(&event).unwrap();
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
        assert_eq!(event.timestamp(), Some(42));
    }
}
