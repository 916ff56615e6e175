//! Host Subscription Contract
//!
//! The native side owns the actual listeners (socket feeds, push channels,
//! lifecycle hooks). The core only asks it to start or stop producing events
//! for a target, and tells it once when the managed side is ready to receive.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

/// Opaque token the host returns for an active native subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NativeHandle(pub u64);

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "native#{}", self.0)
    }
}

/// Description of a query subscription handed to the host.
///
/// `key` is what inbound snapshots are routed by; the host must echo it back
/// in every event it produces for this subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    /// Routing key: scope, path and canonical identity
    pub key: String,
    /// Target path the query reads from
    pub path: String,
    /// Canonical identity of the modifier set
    pub identity: String,
    /// Modifiers in application order
    pub modifiers: serde_json::Value,
}

/// What a native subscription is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SubscriptionTarget {
    /// Plain event type such as `messaging_message_received`
    #[serde(rename_all = "camelCase")]
    EventType { event_type: String },
    /// Realtime query feed
    Query(QueryDescriptor),
}

impl SubscriptionTarget {
    pub fn event_type(event_type: impl Into<String>) -> Self {
        Self::EventType {
            event_type: event_type.into(),
        }
    }

    /// Key the core deduplicates this target by.
    pub fn key(&self) -> &str {
        match self {
            Self::EventType { event_type } => event_type,
            Self::Query(descriptor) => &descriptor.key,
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self, Self::Query(_))
    }
}

/// Native side of the bridge.
///
/// # Contract
///
/// - `request_subscription` is called at most once per key while that key has
///   live listeners. Returning an error means nothing was registered natively.
/// - `release_subscription` is called exactly once per handle returned.
/// - `notify_ready` is called once, after the managed side can accept events.
///   Hosts that buffered events on their side may flush them now.
///
/// Events flow the other way through an [`EventSink`](crate::event::EventSink)
/// the host receives from the core.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::host::{HostBridge, NativeHandle, SubscriptionTarget};
///
/// async fn listen(host: &dyn HostBridge) -> bridge_traits::Result<NativeHandle> {
///     host.request_subscription(&SubscriptionTarget::event_type("app_state")).await
/// }
/// ```
#[async_trait::async_trait]
pub trait HostBridge: Send + Sync {
    /// Tell the host the managed side is ready to receive events.
    async fn notify_ready(&self) -> Result<()>;

    /// Start producing events for `target`.
    async fn request_subscription(&self, target: &SubscriptionTarget) -> Result<NativeHandle>;

    /// Stop producing events for a handle previously returned.
    async fn release_subscription(&self, handle: NativeHandle) -> Result<()>;
}
