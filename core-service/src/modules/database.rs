//! Realtime database façade.
//!
//! Supports multiple apps and a custom database URL per app. Queries are
//! scoped by both, so the same path on two databases never shares a host
//! subscription. Observers go through the shared multiplexer.

use bridge_traits::QUERY_SYNC_EVENT;
use core_query::{Query, QueryTarget, QueryUpdate, SubscriptionMultiplexer};
use core_runtime::{EventStream, SharedEventBus, SubscriptionHandle, Unsubscribed};
use serde_json::Value;
use std::sync::Arc;

use crate::app::AppInstance;
use crate::error::Result;
use crate::namespace::{Module, ModuleContext, NamespaceConfig};

pub struct DatabaseModule {
    app: AppInstance,
    url: Option<String>,
    multiplexer: Arc<SubscriptionMultiplexer>,
    bus: SharedEventBus,
}

impl DatabaseModule {
    pub fn app(&self) -> &AppInstance {
        &self.app
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Scope every query of this façade is keyed under.
    pub fn scope(&self) -> String {
        match &self.url {
            Some(url) => format!("{}|{}", self.app.name(), url),
            None => self.app.name().to_string(),
        }
    }

    /// Unmodified query on `path`. Refine it with the `Query` builders.
    pub fn query(&self, path: &str) -> Query {
        Query::at(QueryTarget::scoped(self.scope(), path))
    }

    pub async fn on<F>(&self, query: &Query, observer: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&QueryUpdate) + Send + Sync + 'static,
    {
        Ok(self.multiplexer.attach(query, observer).await?)
    }

    pub async fn off(&self, handle: &SubscriptionHandle) -> Unsubscribed {
        self.multiplexer.detach(handle).await
    }

    pub async fn off_all(&self, query: &Query) -> usize {
        self.multiplexer.detach_all(query).await
    }

    pub async fn once(&self, query: &Query) -> Result<Value> {
        Ok(self.multiplexer.once(query).await?)
    }

    /// Raw sync events addressed to this app, as re-emitted on the bus.
    pub fn sync_events(&self) -> EventStream {
        let app = self.app.name().to_string();
        self.bus
            .subscribe()
            .filter(move |event| event.event_type == QUERY_SYNC_EVENT && event.is_for_app(&app))
    }
}

impl Module for DatabaseModule {
    const CONFIG: NamespaceConfig = NamespaceConfig {
        namespace: "database",
        native_events: &[QUERY_SYNC_EVENT],
        has_multi_app_support: true,
        has_custom_url_or_region_support: true,
    };

    fn create(context: ModuleContext) -> Self {
        Self {
            app: context.app,
            url: context.custom_url_or_region,
            multiplexer: context.multiplexer,
            bus: context.bus,
        }
    }
}
