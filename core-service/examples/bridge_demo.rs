//! Native bridge walkthrough against the in-process desktop host.
//!
//! Run with:
//! ```bash
//! # Pretty format (default)
//! cargo run -p core-service --example bridge_demo
//!
//! # JSON format, with every native call traced
//! cargo run -p core-service --example bridge_demo -- json
//! ```

use anyhow::Context;
use bridge_traits::LogLevel;
use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
use core_service::{bootstrap_desktop, QueryUpdate};
use serde_json::json;
use std::env;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let format = match env::args().nth(1).as_deref() {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        _ => LogFormat::Pretty,
    };
    init_logging(
        LoggingConfig::default()
            .with_format(format)
            .with_level(LogLevel::Debug),
    )
    .context("failed to initialize logging")?;

    let (core, host) = bootstrap_desktop(|builder| builder.trace_native_calls(true))?;
    info!("=== Native Bridge Demo ===");

    // Messaging: events reach the façade through the shared bus.
    let messaging = core.messaging().await?;
    let mut messages = messaging.on_message();
    host.emit_for_app(
        "messaging_message_received",
        "[DEFAULT]",
        json!({ "notification": { "title": "Hello" }, "fcmToken": "abc123" }),
    )
    .await?;
    let message = tokio::time::timeout(Duration::from_secs(1), messages.recv())
        .await
        .context("no message arrived")??;
    info!(sequence = message.sequence, "Message received");

    // Database: two equivalent queries, one host subscription.
    let db = core.database(&core.default_app(), None).await?;
    let by_age = db.query("users").order_by("age")?.limit_to_first(2)?;
    let same = db.query("users").limit_to_first(2)?.order_by("age")?;
    info!(key = %by_age.key(), "Query key");

    let first = db
        .on(&by_age, |update| match update {
            QueryUpdate::Snapshot(data) => info!(%data, "observer 1: snapshot"),
            QueryUpdate::Cancelled(error) => info!(%error, "observer 1: cancelled"),
        })
        .await?;
    let second = db
        .on(&same, |update| info!(?update, "observer 2"))
        .await?;

    host.push_query_snapshot(&by_age.key(), json!([{ "name": "ann", "age": 31 }]))
        .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;

    db.off(&first).await;
    db.off(&second).await;
    info!(stats = ?host.stats(), "Host statistics");

    core.shutdown();
    Ok(())
}
