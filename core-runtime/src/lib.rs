//! # Core Runtime
//!
//! Runtime half of the native event bridge:
//! - decoded event model and the shared broadcast bus ([`events`])
//! - event channel with the readiness gate ([`channel`])
//! - reference-counted native subscriptions ([`subscriptions`], [`registry`])
//! - [`BridgeRuntime`](runtime::BridgeRuntime), which wires them to a host
//! - configuration, logging and the tracing host decorator
//!
//! ## Overview
//!
//! Hosts emit events whenever they like, possibly before anything in the
//! managed runtime listens. The channel holds those events until readiness is
//! signalled and then releases them in arrival order. The registry makes sure
//! each event type is subscribed natively once, however many callbacks are
//! attached, and released once the last callback leaves.

pub mod channel;
pub mod config;
pub mod debug;
pub mod error;
pub mod events;
pub mod logging;
pub mod registry;
pub mod runtime;
pub mod subscriptions;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{BridgeConfig, ReadinessMode};
pub use error::{Error, Result};
pub use events::{EventBody, EventStream, NativeErrorInfo, NativeEvent, SharedEventBus};
pub use registry::ListenerRegistry;
pub use runtime::BridgeRuntime;
pub use subscriptions::{Listener, ListenerId, SubscriptionHandle, SubscriptionTable, Unsubscribed};
