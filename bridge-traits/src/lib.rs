//! # Host Bridge Traits
//!
//! Contract between the managed core and a native host platform.
//!
//! ## Overview
//!
//! The host owns the real services (realtime databases, push delivery,
//! lifecycle hooks). The core never talks to those services directly; it asks
//! the host to start or stop native subscriptions and receives events back
//! through a sink.
//!
//! ```text
//! ┌──────────────────┐  request/release   ┌──────────────────┐
//! │                  ├───────────────────>│                  │
//! │   core-runtime   │    notify_ready    │   host platform  │
//! │                  ├───────────────────>│  (HostBridge)    │
//! │                  │                    │                  │
//! │   EventChannel   │<───────────────────┤  EventSink::send │
//! └──────────────────┘     RawEvent       └──────────────────┘
//! ```
//!
//! ## Traits
//!
//! - [`HostBridge`](host::HostBridge) - native subscription lifecycle
//! - [`EventSink`](event::EventSink) - inbound event transport
//! - [`LoggerSink`](logger::LoggerSink) - forward structured logs to the host
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ In-process host |
//! | iOS      | TBD                 | 📋 Planned |
//! | Android  | TBD                 | 📋 Planned |
//!
//! ## Error Handling
//!
//! Every trait reports failures as [`BridgeError`](error::BridgeError). Hosts
//! should map platform errors to the closest variant and keep messages
//! actionable:
//!
//! - `NotAvailable` when the capability does not exist on this platform
//! - `InvalidQuery` when a query description is malformed for the host
//! - `OperationFailed` for anything else
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`; the core calls them from arbitrary tokio
//! tasks.

pub mod error;
pub mod event;
pub mod host;
pub mod logger;

pub use error::{BridgeError, Result};
pub use event::{EventSink, RawEvent, QUERY_SYNC_EVENT};
pub use host::{HostBridge, NativeHandle, QueryDescriptor, SubscriptionTarget};
pub use logger::{ConsoleLogger, LogEntry, LogLevel, LoggerSink};
