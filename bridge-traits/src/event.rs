//! Inbound Event Transport
//!
//! Hosts push events into the core through an [`EventSink`]. Payloads stay
//! untyped JSON at this layer; the core decodes them once on arrival.
//!
//! ## Payload envelope
//!
//! ```text
//! {
//!   "appName":    "[DEFAULT]",        optional, scopes the event to an app
//!   "databaseId": "https://db-1",     optional, scopes the event to a database
//!   "key":        "$/users${...}",    present on query events
//!   "data":       { ... },            snapshot body for query events
//!   "error":      { "code", "message" }  present when the host cancelled a query
//! }
//! ```
//!
//! Anything that does not match this shape is passed through as opaque data.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Event type used for every realtime query snapshot or cancellation.
pub const QUERY_SYNC_EVENT: &str = "query_sync_event";

/// Event as produced by the host, before decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RawEvent {
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }
}

/// Write side of the core's event channel, handed to the host.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    /// Queue an event, waiting for buffer space if needed.
    async fn send(&self, event: RawEvent) -> Result<()>;

    /// Queue an event without waiting. Fails when the buffer is full or the
    /// core has shut down.
    fn try_send(&self, event: RawEvent) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_event_missing_payload_defaults_to_null() {
        let event: RawEvent = serde_json::from_value(json!({ "eventType": "ping" })).unwrap();
        assert_eq!(event.event_type, "ping");
        assert!(event.payload.is_null());
    }
}
