//! Workspace facade crate.
//!
//! Re-exports the service layer so embedders can depend on `native-bridge`
//! and pick features here instead of wiring `core-service`, `core-runtime`
//! and `core-query` one by one.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
