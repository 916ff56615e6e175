//! # Bridge Runtime
//!
//! Owns one event channel, one listener registry and the host they talk to.
//!
//! ## Wiring
//!
//! ```text
//!             event_sender()                      subscribe()/unsubscribe()
//!  host ────────────────────> pump ──> EventChannel ──> ListenerRegistry
//!    ^                                     │                   │
//!    │        notify_ready (once)          │ signal_ready()    │ request/release
//!    └─────────────────────────────────────┴───────────────────┘
//! ```
//!
//! With [`ReadinessMode::OnFirstListener`] the gate opens right after the
//! first successful `subscribe`, so the very first listener also receives
//! whatever the host emitted before it existed.
//!
//! ## Usage
//!
//! ```ignore
//! let runtime = Arc::new(BridgeRuntime::new(config));
//! host.attach_sink(Arc::new(runtime.event_sender()));
//! runtime.start()?;
//!
//! let handle = runtime.subscribe("app_state", |event| println!("{event:?}")).await?;
//! ```

use bridge_traits::{HostBridge, RawEvent};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{transport, EventChannel, EventDispatcher, EventSender};
use crate::config::{BridgeConfig, ReadinessMode};
use crate::debug::TracingHostBridge;
use crate::error::{Error, Result};
use crate::events::NativeEvent;
use crate::registry::ListenerRegistry;
use crate::subscriptions::{SubscriptionHandle, Unsubscribed};

pub struct BridgeRuntime {
    host: Arc<dyn HostBridge>,
    readiness: ReadinessMode,
    registry: Arc<ListenerRegistry>,
    channel: Arc<EventChannel>,
    sender: EventSender,
    receiver: Mutex<Option<mpsc::Receiver<RawEvent>>>,
    shutdown: CancellationToken,
}

impl BridgeRuntime {
    pub fn new(config: BridgeConfig) -> Self {
        let host = if config.trace_native_calls {
            TracingHostBridge::wrap(config.host)
        } else {
            config.host
        };

        let registry = Arc::new(ListenerRegistry::new(Arc::clone(&host)));
        let dispatcher: Arc<dyn EventDispatcher> = registry.clone();
        let channel = Arc::new(EventChannel::new(dispatcher, config.trace_native_calls));
        let (sender, receiver) = transport(config.event_buffer_size);

        Self {
            host,
            readiness: config.readiness,
            registry,
            channel,
            sender,
            receiver: Mutex::new(Some(receiver)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Sink the host pushes events into.
    pub fn event_sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Spawns the pump that moves events from the sender into the channel.
    ///
    /// # Errors
    ///
    /// `Internal` when called a second time.
    pub fn start(&self) -> Result<JoinHandle<()>> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::Internal("bridge runtime already started".to_string()))?;

        info!("Starting bridge event pump");
        let channel = Arc::clone(&self.channel);
        Ok(tokio::spawn(channel.run(receiver, self.shutdown.clone())))
    }

    /// Stops the pump. Events still in the transport are dropped. This is
    /// the only way to end a started pump short of dropping the runtime.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Hands one event to the channel directly, bypassing the transport.
    pub fn deliver(&self, event: RawEvent) {
        self.channel.deliver(event);
    }

    /// Opens the readiness gate, flushes queued events and tells the host.
    ///
    /// Returns `true` for the call that opened the gate; later calls do
    /// nothing and return `false`.
    pub async fn signal_ready(&self) -> Result<bool> {
        if !self.channel.signal_ready() {
            return Ok(false);
        }

        self.host
            .notify_ready()
            .await
            .map_err(|err| Error::from_bridge("notify_ready", err))?;
        Ok(true)
    }

    pub fn is_ready(&self) -> bool {
        self.channel.is_ready()
    }

    pub fn pending_events(&self) -> usize {
        self.channel.pending_len()
    }

    /// Attaches `callback` to `event_type`. See [`ListenerRegistry::subscribe`].
    ///
    /// # Errors
    ///
    /// Registry errors, or the host's `notify_ready` failure when this call
    /// opened the gate. The callback is detached again in both cases; the
    /// gate stays open.
    pub async fn subscribe<F>(&self, event_type: &str, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&NativeEvent) + Send + Sync + 'static,
    {
        let handle = self.registry.subscribe(event_type, callback).await?;
        if self.readiness == ReadinessMode::OnFirstListener && !self.is_ready() {
            debug!(event_type, "First listener attached, opening readiness gate");
            if let Err(err) = self.signal_ready().await {
                warn!(event_type, error = %err, "Host rejected readiness, detaching listener");
                self.registry.unsubscribe(&handle).await;
                return Err(err);
            }
        }
        Ok(handle)
    }

    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Unsubscribed {
        self.registry.unsubscribe(handle).await
    }

    pub async fn unsubscribe_all(&self, event_type: &str) -> usize {
        self.registry.unsubscribe_all(event_type).await
    }

    /// Host as seen by the registry, including the tracing decorator when
    /// enabled.
    pub fn host(&self) -> Arc<dyn HostBridge> {
        Arc::clone(&self.host)
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }
}

impl Drop for BridgeRuntime {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for BridgeRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeRuntime")
            .field("readiness", &self.readiness)
            .field("channel", &self.channel)
            .field("registry", &self.registry)
            .finish()
    }
}
