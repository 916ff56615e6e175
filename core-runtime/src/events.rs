//! # Native Events
//!
//! Decoded form of host events plus the shared broadcast bus that feature
//! modules listen on.
//!
//! ## Overview
//!
//! Hosts push [`RawEvent`]s with an untyped JSON payload. The event channel
//! decodes each one exactly once into a [`NativeEvent`] whose [`EventBody`]
//! says whether it is a query snapshot, a query cancellation, or opaque data.
//! Nothing downstream re-parses the payload.
//!
//! ```text
//! RawEvent ──decode──> NativeEvent ──> ListenerRegistry ──> callbacks
//!                                                │
//!                          module wiring ────────┘
//!                                │
//!                                v
//!                         SharedEventBus ──> EventStream (per façade)
//! ```
//!
//! ## Scope keys
//!
//! Events may carry `appName` and `databaseId`. [`NativeEvent::scope_key`]
//! joins them with the event type (`app-db-type`, `app-type`, or just
//! `type`) so façades belonging to different apps can tell their events apart
//! on the shared bus.

use bridge_traits::{RawEvent, QUERY_SYNC_EVENT};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::SendError, Receiver};

/// Default buffer size of the shared bus.
pub const DEFAULT_BUS_CAPACITY: usize = 100;

/// Error details the host attaches to a cancelled query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeErrorInfo {
    #[serde(default = "NativeErrorInfo::unknown_code")]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl NativeErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    fn unknown_code() -> String {
        "unknown".to_string()
    }

    fn from_value(value: Value) -> Self {
        match value {
            Value::String(message) => Self::new(Self::unknown_code(), message),
            other => serde_json::from_value(other.clone())
                .unwrap_or_else(|_| Self::new(Self::unknown_code(), other.to_string())),
        }
    }
}

impl fmt::Display for NativeErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EventBody {
    /// New data for a realtime query
    QuerySnapshot { key: String, data: Value },
    /// Host stopped a realtime query; no further snapshots follow
    QueryCancelled { key: String, error: NativeErrorInfo },
    /// Any other payload, passed through untouched
    Data(Value),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    app_name: Option<String>,
    database_id: Option<String>,
    key: Option<String>,
    error: Option<Value>,
    data: Option<Value>,
}

/// Host event after decoding. Immutable once created; shared as `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NativeEvent {
    pub event_type: String,
    pub app_name: Option<String>,
    pub database_id: Option<String>,
    pub body: EventBody,
    /// Arrival position within the channel that decoded it
    pub sequence: u64,
    pub received_at: DateTime<Utc>,
}

impl NativeEvent {
    /// Decodes a host event. Never fails: unrecognised payloads become
    /// [`EventBody::Data`]. Only `query_sync_event` payloads are read as
    /// query envelopes; other types keep their payload whole even when it
    /// happens to carry `key`, `data` or `error` fields.
    pub fn decode(raw: RawEvent, sequence: u64) -> Self {
        let RawEvent {
            event_type,
            payload,
        } = raw;

        let envelope = Envelope::deserialize(&payload).ok();
        let (app_name, database_id) = envelope
            .as_ref()
            .map(|env| (env.app_name.clone(), env.database_id.clone()))
            .unwrap_or((None, None));

        let envelope = envelope.filter(|_| event_type == QUERY_SYNC_EVENT);
        let body = match envelope {
            Some(Envelope {
                key: Some(key),
                error: Some(error),
                ..
            }) => EventBody::QueryCancelled {
                key,
                error: NativeErrorInfo::from_value(error),
            },
            Some(Envelope {
                key: Some(key),
                data,
                ..
            }) => EventBody::QuerySnapshot {
                key,
                data: data.unwrap_or(Value::Null),
            },
            _ => EventBody::Data(payload),
        };

        Self {
            event_type,
            app_name,
            database_id,
            body,
            sequence,
            received_at: Utc::now(),
        }
    }

    /// Key the event is re-emitted under on the shared bus.
    pub fn scope_key(&self) -> String {
        match (&self.app_name, &self.database_id) {
            (Some(app), Some(db)) => format!("{}-{}-{}", app, db, self.event_type),
            (Some(app), None) => format!("{}-{}", app, self.event_type),
            _ => self.event_type.clone(),
        }
    }

    /// Routing key of a query event.
    pub fn query_key(&self) -> Option<&str> {
        match &self.body {
            EventBody::QuerySnapshot { key, .. } | EventBody::QueryCancelled { key, .. } => {
                Some(key)
            }
            EventBody::Data(_) => None,
        }
    }

    /// True when the event is addressed to `app`, or carries no app at all.
    pub fn is_for_app(&self, app: &str) -> bool {
        self.app_name.as_deref().map_or(true, |name| name == app)
    }
}

// ============================================================================
// Shared Event Bus
// ============================================================================

/// Broadcast bus feature modules listen on.
///
/// Module wiring subscribes once per native event type and re-emits every
/// event here, so any number of façades can observe it without adding native
/// listeners.
#[derive(Clone)]
pub struct SharedEventBus {
    sender: broadcast::Sender<Arc<NativeEvent>>,
}

impl SharedEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes to current subscribers. Errors only when nobody listens.
    pub fn emit(
        &self,
        event: Arc<NativeEvent>,
    ) -> std::result::Result<usize, SendError<Arc<NativeEvent>>> {
        self.sender.send(event)
    }

    /// New stream of future events. Past events are not replayed.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.sender.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SharedEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

impl fmt::Debug for SharedEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&NativeEvent) -> bool + Send + Sync>;

/// Receiver for the shared bus with an optional filter.
///
/// ```ignore
/// let mut stream = bus
///     .subscribe()
///     .filter(|event| event.event_type == "messaging_token_refresh");
/// while let Ok(event) = stream.recv().await {
///     println!("{}", event.scope_key());
/// }
/// ```
pub struct EventStream {
    receiver: Receiver<Arc<NativeEvent>>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<Arc<NativeEvent>>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned. Replaces any earlier
    /// filter.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&NativeEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &NativeEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Next matching event.
    ///
    /// # Errors
    ///
    /// `RecvError::Lagged(n)` when this stream fell `n` events behind,
    /// `RecvError::Closed` once the bus is gone.
    pub async fn recv(&mut self) -> std::result::Result<Arc<NativeEvent>, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Next matching event without waiting, or `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<std::result::Result<Arc<NativeEvent>, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Some(Err(RecvError::Closed))
                }
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
