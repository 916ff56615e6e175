//! # Desktop Bridge Implementations
//!
//! Host side of the bridge for desktop platforms (macOS, Windows, Linux),
//! where the "native" code runs in the same process as the core.
//!
//! ## Overview
//!
//! [`InProcessHost`] implements [`bridge_traits::HostBridge`]: it grants
//! subscription handles, refuses what it is told to refuse and pushes events
//! into the core through the attached [`bridge_traits::EventSink`].
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::InProcessHost;
//! use core_runtime::{BridgeConfig, BridgeRuntime};
//!
//! let host = Arc::new(InProcessHost::new());
//! let runtime = Arc::new(BridgeRuntime::new(
//!     BridgeConfig::builder().host(host.clone()).build()?,
//! ));
//! host.attach_sink(Arc::new(runtime.event_sender()));
//! runtime.start()?;
//!
//! host.emit("app_state", json!({ "state": "active" })).await?;
//! ```

mod host;

pub use host::{HostStats, InProcessHost};
