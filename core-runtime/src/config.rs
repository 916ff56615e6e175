//! # Bridge Configuration
//!
//! Builder-style configuration for a [`BridgeRuntime`](crate::runtime::BridgeRuntime).
//!
//! ## Required Dependencies
//!
//! - `HostBridge` - the native side that owns real subscriptions
//!
//! ## Settings
//!
//! - `event_buffer_size` - capacity of the inbound event channel (default 100)
//! - `readiness` - when the readiness gate opens (default: first listener)
//! - `trace_native_calls` - wrap the host in a tracing decorator and log
//!   every inbound event
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{BridgeConfig, ReadinessMode};
//! use std::sync::Arc;
//!
//! let config = BridgeConfig::builder()
//!     .host(Arc::new(MyHost::new()))
//!     .readiness(ReadinessMode::Explicit)
//!     .trace_native_calls(true)
//!     .build()?;
//! ```
//!
//! A missing host is reported as `Error::CapabilityMissing` so embedders see
//! what to inject instead of a generic failure.

use crate::error::{Error, Result};
use bridge_traits::HostBridge;
use std::fmt;
use std::sync::Arc;

/// Default capacity of the inbound event channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

/// Upper bound accepted for the inbound event channel.
pub const MAX_EVENT_BUFFER_SIZE: usize = 100_000;

/// When the readiness gate opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadinessMode {
    /// Open as soon as the first listener has been registered.
    #[default]
    OnFirstListener,
    /// Stay closed until `signal_ready` is called.
    Explicit,
}

#[derive(Clone)]
pub struct BridgeConfig {
    pub host: Arc<dyn HostBridge>,
    pub event_buffer_size: usize,
    pub readiness: ReadinessMode,
    pub trace_native_calls: bool,
}

impl BridgeConfig {
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::default()
    }

    /// Checks that the buffer size is within `1..=MAX_EVENT_BUFFER_SIZE`.
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size > MAX_EVENT_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "Event buffer size exceeds maximum of {} events",
                MAX_EVENT_BUFFER_SIZE
            )));
        }

        Ok(())
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("host", &"<HostBridge>")
            .field("event_buffer_size", &self.event_buffer_size)
            .field("readiness", &self.readiness)
            .field("trace_native_calls", &self.trace_native_calls)
            .finish()
    }
}

#[derive(Default)]
pub struct BridgeConfigBuilder {
    host: Option<Arc<dyn HostBridge>>,
    event_buffer_size: Option<usize>,
    readiness: ReadinessMode,
    trace_native_calls: bool,
}

impl BridgeConfigBuilder {
    pub fn host(mut self, host: Arc<dyn HostBridge>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn readiness(mut self, mode: ReadinessMode) -> Self {
        self.readiness = mode;
        self
    }

    pub fn trace_native_calls(mut self, enabled: bool) -> Self {
        self.trace_native_calls = enabled;
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// - `CapabilityMissing` when no host was provided
    /// - `Config` when the buffer size is out of range
    pub fn build(self) -> Result<BridgeConfig> {
        let host = self.host.ok_or_else(|| Error::CapabilityMissing {
            capability: "HostBridge".to_string(),
            message: "No host bridge provided. \
                      Desktop: enable the `desktop-shims` feature and use the in-process host. \
                      Mobile: inject the platform-native adapter with `.host()`."
                .to_string(),
        })?;

        let config = BridgeConfig {
            host,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            readiness: self.readiness,
            trace_native_calls: self.trace_native_calls,
        };

        config.validate()?;
        Ok(config)
    }
}
