//! Session identity and elapsed-time bookkeeping
//!
//! A session lasts one page load. Its id is never persisted; the user id is
//! read from the store and only generated (and written back) when missing.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::storage::KeyValueStore;
use crate::types::{Properties, SessionIds};

/// Owns the identifiers and start time of one page session
#[derive(Debug, Clone)]
pub struct SessionClock {
    ids: SessionIds,
    started_at: DateTime<Utc>,
}

impl SessionClock {
    /// Build identifiers for a fresh page load.
    ///
    /// Never fails: an unreadable or blank stored user id is replaced, and a
    /// failed write-back only costs stability across loads.
    pub fn start(store: &dyn KeyValueStore, user_id_key: &str, now: DateTime<Utc>) -> Self {
        let session_id = generate_id("session", now);
        let user_id = load_or_create_user_id(store, user_id_key, now);

        tracing::debug!(%session_id, %user_id, "Session started");

        Self {
            ids: SessionIds {
                session_id,
                user_id,
            },
            started_at: now,
        }
    }

    pub fn ids(&self) -> &SessionIds {
        &self.ids
    }

    pub fn session_id(&self) -> &str {
        &self.ids.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.ids.user_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Milliseconds since the session started, never negative
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_milliseconds().max(0)
    }

    /// Properties for a periodic `time_on_page` event
    pub fn time_on_page_properties(&self, now: DateTime<Utc>) -> Properties {
        let duration_ms = self.elapsed_ms(now);
        let mut properties = Properties::new();
        properties.insert("duration_ms".to_string(), json!(duration_ms));
        properties.insert("duration_minutes".to_string(), json!(round_minutes(duration_ms)));
        properties
    }

    /// Properties for the terminal `session_end` event
    pub fn session_end_properties(
        &self,
        now: DateTime<Utc>,
        total_events: usize,
        total_conversions: usize,
    ) -> Properties {
        let duration_ms = self.elapsed_ms(now);
        let mut properties = Properties::new();
        properties.insert("session_duration_ms".to_string(), json!(duration_ms));
        properties.insert(
            "session_duration_minutes".to_string(),
            json!(round_minutes(duration_ms)),
        );
        properties.insert("total_events".to_string(), json!(total_events));
        properties.insert("total_conversions".to_string(), json!(total_conversions));
        properties
    }
}

/// `<prefix>_<epoch-ms>_<9 random chars>`
pub fn generate_id(prefix: &str, now: DateTime<Utc>) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", prefix, now.timestamp_millis(), &random[..9])
}

fn load_or_create_user_id(store: &dyn KeyValueStore, key: &str, now: DateTime<Utc>) -> String {
    match store.get(key) {
        Ok(Some(existing)) if !existing.trim().is_empty() => return existing.trim().to_string(),
        Ok(_) => {}
        Err(e) => tracing::warn!(key, error = %e, "Failed to read user id, generating a new one"),
    }

    let user_id = generate_id("user", now);
    if let Err(e) = store.set(key, &user_id) {
        tracing::warn!(key, error = %e, "Failed to persist user id");
    }
    user_id
}

fn round_minutes(ms: i64) -> i64 {
    (ms as f64 / 60_000.0).round() as i64
}
