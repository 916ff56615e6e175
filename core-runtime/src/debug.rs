//! Host decorator that logs every native call.
//!
//! Enabled through `BridgeConfig::trace_native_calls`. Wraps the real host, so
//! neither the registry nor the multiplexer knows it is there.

use async_trait::async_trait;
use bridge_traits::{HostBridge, NativeHandle, Result, SubscriptionTarget};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::logging::redact_payload;

pub struct TracingHostBridge {
    inner: Arc<dyn HostBridge>,
}

impl TracingHostBridge {
    pub fn new(inner: Arc<dyn HostBridge>) -> Self {
        Self { inner }
    }

    pub fn wrap(inner: Arc<dyn HostBridge>) -> Arc<dyn HostBridge> {
        Arc::new(Self::new(inner))
    }
}

fn describe(target: &SubscriptionTarget) -> (&'static str, String) {
    match target {
        SubscriptionTarget::EventType { event_type } => ("event", event_type.clone()),
        SubscriptionTarget::Query(descriptor) => (
            "query",
            format!(
                "{} {}",
                descriptor.key,
                redact_payload(&descriptor.modifiers)
            ),
        ),
    }
}

#[async_trait]
impl HostBridge for TracingHostBridge {
    async fn notify_ready(&self) -> Result<()> {
        debug!("native call: notify_ready");
        let result = self.inner.notify_ready().await;
        if let Err(err) = &result {
            warn!(error = %err, "native call failed: notify_ready");
        }
        result
    }

    async fn request_subscription(&self, target: &SubscriptionTarget) -> Result<NativeHandle> {
        let (kind, detail) = describe(target);
        debug!(kind, target = %detail, "native call: request_subscription");

        let result = self.inner.request_subscription(target).await;
        match &result {
            Ok(handle) => debug!(kind, %handle, "native subscription granted"),
            Err(err) => warn!(kind, target = %detail, error = %err, "native call failed: request_subscription"),
        }
        result
    }

    async fn release_subscription(&self, handle: NativeHandle) -> Result<()> {
        debug!(%handle, "native call: release_subscription");
        let result = self.inner.release_subscription(handle).await;
        if let Err(err) = &result {
            warn!(%handle, error = %err, "native call failed: release_subscription");
        }
        result
    }
}
