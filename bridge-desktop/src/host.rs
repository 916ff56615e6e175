//! In-process host
//!
//! A [`HostBridge`] that lives in the same process as the core. Desktop
//! embedders drive it directly from their own event sources; tests use it as
//! a host that behaves like a real one (handles, refusals, latency, event
//! envelopes) without any platform code.

use async_trait::async_trait;
use bridge_traits::{
    BridgeError, EventSink, HostBridge, NativeHandle, RawEvent, Result, SubscriptionTarget,
    QUERY_SYNC_EVENT,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Call counters, for embedders that surface them and for tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub requests: usize,
    pub releases: usize,
    pub ready_calls: usize,
    /// Native subscriptions currently granted
    pub active: usize,
}

#[derive(Default)]
struct HostState {
    active: HashMap<NativeHandle, SubscriptionTarget>,
    rejected: HashSet<String>,
    unavailable: HashSet<String>,
    ready: bool,
    stats: HostStats,
}

pub struct InProcessHost {
    sink: RwLock<Option<Arc<dyn EventSink>>>,
    state: Mutex<HostState>,
    latency: Option<Duration>,
    next_handle: AtomicU64,
}

impl InProcessHost {
    pub fn new() -> Self {
        Self {
            sink: RwLock::new(None),
            state: Mutex::new(HostState::default()),
            latency: None,
            next_handle: AtomicU64::new(1),
        }
    }

    /// Delays every subscription request and release by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Connects the host to the core's event channel.
    pub fn attach_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);
        info!("In-process host attached to event sink");
    }

    /// Refuses future queries whose key or path equals `pattern`.
    pub fn reject(&self, pattern: impl Into<String>) {
        self.state().rejected.insert(pattern.into());
    }

    /// Refuses future subscriptions to `event_type`.
    pub fn mark_unavailable(&self, event_type: impl Into<String>) {
        self.state().unavailable.insert(event_type.into());
    }

    pub fn stats(&self) -> HostStats {
        self.state().stats
    }

    /// True while a granted subscription for `key` has not been released.
    pub fn is_subscribed(&self, key: &str) -> bool {
        self.state().active.values().any(|target| target.key() == key)
    }

    /// Keys of every granted subscription, sorted.
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .state()
            .active
            .values()
            .map(|target| target.key().to_string())
            .collect();
        keys.sort();
        keys
    }

    pub fn is_ready(&self) -> bool {
        self.state().ready
    }

    /// Emits a raw event to the core.
    ///
    /// # Errors
    ///
    /// `NotAvailable` before a sink is attached; otherwise whatever the sink
    /// reports (`ChannelClosed` after shutdown).
    pub async fn emit(&self, event_type: &str, payload: Value) -> Result<()> {
        let sink = self
            .sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| BridgeError::NotAvailable("no event sink attached".to_string()))?;
        sink.send(RawEvent::new(event_type, payload)).await
    }

    /// Emits `payload` scoped to `app_name`.
    pub async fn emit_for_app(&self, event_type: &str, app_name: &str, payload: Value) -> Result<()> {
        let scoped = match payload {
            Value::Object(mut fields) => {
                fields.insert("appName".to_string(), Value::from(app_name));
                Value::Object(fields)
            }
            other => json!({ "appName": app_name, "data": other }),
        };
        self.emit(event_type, scoped).await
    }

    /// Pushes a new result set for the query subscribed under `key`.
    pub async fn push_query_snapshot(&self, key: &str, data: Value) -> Result<()> {
        self.emit(QUERY_SYNC_EVENT, json!({ "key": key, "data": data }))
            .await
    }

    /// Stops the query subscribed under `key` and tells the core why.
    pub async fn cancel_query(&self, key: &str, code: &str, message: &str) -> Result<()> {
        self.emit(
            QUERY_SYNC_EVENT,
            json!({ "key": key, "error": { "code": code, "message": message } }),
        )
        .await
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_allowed(&self, target: &SubscriptionTarget) -> Result<()> {
        let state = self.state();
        match target {
            SubscriptionTarget::EventType { event_type } => {
                if state.unavailable.contains(event_type) {
                    return Err(BridgeError::NotAvailable(format!(
                        "event type '{}' is not supported by this host",
                        event_type
                    )));
                }
            }
            SubscriptionTarget::Query(descriptor) => {
                if state.rejected.contains(&descriptor.key)
                    || state.rejected.contains(&descriptor.path)
                {
                    return Err(BridgeError::InvalidQuery(format!(
                        "query on '{}' rejected",
                        descriptor.path
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for InProcessHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostBridge for InProcessHost {
    async fn notify_ready(&self) -> Result<()> {
        let mut state = self.state();
        state.ready = true;
        state.stats.ready_calls += 1;
        debug!("Core signalled ready");
        Ok(())
    }

    async fn request_subscription(&self, target: &SubscriptionTarget) -> Result<NativeHandle> {
        self.simulate_latency().await;
        self.state().stats.requests += 1;
        self.check_allowed(target)?;

        let handle = NativeHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state();
        state.active.insert(handle, target.clone());
        state.stats.active = state.active.len();
        debug!(key = target.key(), %handle, "Subscription granted");
        Ok(handle)
    }

    async fn release_subscription(&self, handle: NativeHandle) -> Result<()> {
        self.simulate_latency().await;
        let mut state = self.state();
        state.stats.releases += 1;
        match state.active.remove(&handle) {
            Some(target) => debug!(key = target.key(), %handle, "Subscription released"),
            None => warn!(%handle, "Release of unknown handle ignored"),
        }
        state.stats.active = state.active.len();
        Ok(())
    }
}
