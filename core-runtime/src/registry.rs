//! # Listener Reference Registry
//!
//! Maps event types to callbacks and keeps exactly one native subscription
//! per event type alive while at least one callback is attached.
//!
//! ```text
//!  subscribe("app_state", cb1) ──> request_subscription   (1 native)
//!  subscribe("app_state", cb2) ──> refCount 2              (no host call)
//!  unsubscribe(h1)             ──> refCount 1
//!  unsubscribe(h2)             ──> release_subscription   (0 native)
//! ```
//!
//! The registry is also the [`EventDispatcher`] behind the readiness gate:
//! released events are fanned out to the callbacks of their type.

use bridge_traits::{HostBridge, SubscriptionTarget};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

use crate::channel::EventDispatcher;
use crate::error::{Error, Result};
use crate::events::NativeEvent;
use crate::subscriptions::{Listener, SubscriptionHandle, SubscriptionTable, Unsubscribed};

pub struct ListenerRegistry {
    host: Arc<dyn HostBridge>,
    table: SubscriptionTable<NativeEvent>,
}

impl ListenerRegistry {
    pub fn new(host: Arc<dyn HostBridge>) -> Self {
        Self {
            host,
            table: SubscriptionTable::new("event"),
        }
    }

    /// Attaches `callback` to `event_type`.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an empty event type
    /// - `BridgeUnavailable` when the host refuses the native subscription;
    ///   nothing stays registered in that case
    pub async fn subscribe<F>(&self, event_type: &str, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&NativeEvent) + Send + Sync + 'static,
    {
        if event_type.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "event type must not be empty".to_string(),
            ));
        }

        let listener: Listener<NativeEvent> = Arc::new(callback);
        let target = SubscriptionTarget::event_type(event_type);
        self.table
            .subscribe(self.host.as_ref(), &target, listener)
            .await
            .map_err(|err| Error::from_bridge(event_type, err))
    }

    /// Removes one callback. Stale or repeated handles are a no-op.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Unsubscribed {
        self.table.unsubscribe(self.host.as_ref(), handle).await
    }

    /// Removes every callback of `event_type`; returns how many were removed.
    pub async fn unsubscribe_all(&self, event_type: &str) -> usize {
        self.table.unsubscribe_all(self.host.as_ref(), event_type).await
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.table.listener_count(event_type)
    }

    pub fn is_subscribed(&self, event_type: &str) -> bool {
        self.table.contains(event_type)
    }

    /// Event types with a live native subscription, sorted.
    pub fn event_types(&self) -> Vec<String> {
        self.table.keys()
    }
}

impl EventDispatcher for ListenerRegistry {
    fn dispatch(&self, event: Arc<NativeEvent>) {
        let delivered = self.table.dispatch(&event.event_type, &event);
        if delivered == 0 {
            trace!(event_type = %event.event_type, "No listeners, event discarded");
        }
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}
