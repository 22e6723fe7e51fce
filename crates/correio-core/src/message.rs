use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::StatusName;

/// Reserved header names. Headers are the sole channel for routing and
/// identity metadata; all keys are plain strings so the contract is stable
/// across brokers and languages.
pub mod headers {
    pub const MESSAGE_ID: &str = "correio-msg-id";
    pub const MESSAGE_NAME: &str = "correio-msg-name";
    pub const GROUP: &str = "correio-group";
    pub const TYPE: &str = "correio-msg-type";
    pub const CORRELATION_ID: &str = "correio-corr-id";
    pub const CORRELATION_SEQUENCE: &str = "correio-corr-seq";
    pub const CALLBACK_NAME: &str = "correio-callback-name";
    pub const SENT_TIME: &str = "correio-senttime";
    pub const EXCEPTION: &str = "correio-exception";
}

/// Which logical table an envelope lives in. Published and received envelopes
/// share the same shape but are stored separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageDirection {
    Publish,
    Subscribe,
}

/// Application-facing message: a header map plus an opaque JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
}

impl Message {
    pub fn new(headers: HashMap<String, String>, body: serde_json::Value) -> Self {
        Self { headers, body }
    }

    /// Generate a new UUIDv7 message ID. Time-ordered, so envelopes created
    /// before reaching storage still sort by creation time.
    pub fn new_id() -> String {
        Uuid::now_v7().to_string()
    }

    pub fn id(&self) -> Option<&str> {
        self.headers.get(headers::MESSAGE_ID).map(String::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.headers.get(headers::MESSAGE_NAME).map(String::as_str)
    }

    pub fn group(&self) -> Option<&str> {
        self.headers.get(headers::GROUP).map(String::as_str)
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.headers
            .get(headers::CORRELATION_ID)
            .map(String::as_str)
    }

    pub fn callback_name(&self) -> Option<&str> {
        self.headers
            .get(headers::CALLBACK_NAME)
            .map(String::as_str)
    }

    /// Record an exception summary on the message. Overwrites any previous
    /// value — re-adding never duplicates.
    pub fn set_exception(&mut self, summary: impl Into<String>) {
        self.headers
            .insert(headers::EXCEPTION.to_string(), summary.into());
    }

    /// Remove the exception header. No-op if absent.
    pub fn remove_exception(&mut self) {
        self.headers.remove(headers::EXCEPTION);
    }

    pub fn has_exception(&self) -> bool {
        self.headers.contains_key(headers::EXCEPTION)
    }
}

/// The persisted unit: a message plus delivery/status metadata. Rows are
/// created by the outbox/inbox write paths, mutated only through the state
/// machine, and deleted only by the sweeper's expiry purge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediumMessage {
    /// Globally unique, time-sortable (UUIDv7) — generated before the row
    /// reaches storage, never an auto-increment column.
    pub id: String,
    pub origin: Message,
    /// Serialized form of `origin`, cached at creation so retries never
    /// re-serialize.
    pub content: String,
    pub added: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub retries: u32,
    pub status: StatusName,
}

impl MediumMessage {
    /// Wrap a message into a fresh `Scheduled` envelope. The envelope id is
    /// the message-id header when present, so storage keys and wire ids agree.
    pub fn new(origin: Message, content: String) -> Self {
        let id = origin
            .id()
            .map(str::to_string)
            .unwrap_or_else(Message::new_id);
        Self {
            id,
            origin,
            content,
            added: Utc::now(),
            expires_at: None,
            retries: 0,
            status: StatusName::Scheduled,
        }
    }
}
