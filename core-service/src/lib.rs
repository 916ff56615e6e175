//! Core service façade and bootstrap helpers.
//!
//! This crate wires a host bridge into the shared core: one
//! [`BridgeRuntime`], one [`SubscriptionMultiplexer`] and the
//! [`ModuleNamespaceRegistry`] that hands out feature façades per app.
//! Desktop apps typically enable the `desktop-shims` feature (which depends
//! on `bridge-desktop`) and bootstrap with [`bootstrap_desktop`].

pub mod app;
pub mod error;
pub mod modules;
pub mod namespace;

pub use app::{AppInstance, DEFAULT_APP_NAME};
pub use error::{CoreError, Result};
pub use modules::{DatabaseModule, MessagingModule};
pub use namespace::{Module, ModuleContext, ModuleNamespaceRegistry, NamespaceConfig};

pub use core_query::{Query, QueryTarget, QueryUpdate, SubscriptionMultiplexer};
pub use core_runtime::{BridgeConfig, BridgeRuntime, ReadinessMode, SharedEventBus};

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tracing::info;

#[cfg(feature = "desktop-shims")]
pub use bridge_desktop::InProcessHost;

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    runtime: Arc<BridgeRuntime>,
    multiplexer: Arc<SubscriptionMultiplexer>,
    namespaces: Arc<ModuleNamespaceRegistry>,
    apps: Arc<RwLock<BTreeMap<String, AppInstance>>>,
}

impl CoreService {
    /// Create a new service around the host in `config`. The default app is
    /// registered up front.
    pub fn new(config: BridgeConfig) -> Self {
        let runtime = Arc::new(BridgeRuntime::new(config));
        let multiplexer = Arc::new(SubscriptionMultiplexer::new(Arc::clone(&runtime)));
        let namespaces = Arc::new(ModuleNamespaceRegistry::new(
            Arc::clone(&runtime),
            Arc::clone(&multiplexer),
            SharedEventBus::default(),
        ));

        let mut apps = BTreeMap::new();
        apps.insert(DEFAULT_APP_NAME.to_string(), AppInstance::default_app());

        Self {
            runtime,
            multiplexer,
            namespaces,
            apps: Arc::new(RwLock::new(apps)),
        }
    }

    /// Starts the event pump. Call once, after the host has its sink.
    pub fn start(&self) -> Result<JoinHandle<()>> {
        Ok(self.runtime.start()?)
    }

    pub fn shutdown(&self) {
        self.runtime.shutdown();
    }

    /// Registers `name`, or returns the app already registered under it.
    pub fn initialize_app(&self, name: &str) -> Result<AppInstance> {
        if name.trim().is_empty() {
            return Err(CoreError::InitializationFailed(
                "app name must not be empty".to_string(),
            ));
        }
        let mut apps = self.apps.write().unwrap_or_else(PoisonError::into_inner);
        let app = apps
            .entry(name.to_string())
            .or_insert_with(|| {
                info!(app = name, "App initialized");
                AppInstance::new(name)
            })
            .clone();
        Ok(app)
    }

    pub fn app(&self, name: &str) -> Result<AppInstance> {
        self.apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::AppNotFound(name.to_string()))
    }

    pub fn default_app(&self) -> AppInstance {
        AppInstance::default_app()
    }

    pub fn apps(&self) -> Vec<AppInstance> {
        self.apps
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Forgets `name` and drops its cached façades.
    pub fn destroy_app(&self, name: &str) -> Result<()> {
        let app = self
            .apps
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| CoreError::AppNotFound(name.to_string()))?;
        self.namespaces.destroy_app(&app);
        info!(app = name, "App destroyed");
        Ok(())
    }

    /// Messaging façade of the default app.
    pub async fn messaging(&self) -> Result<Arc<MessagingModule>> {
        self.namespaces.for_app(&self.default_app()).await
    }

    /// Database façade of `app`, optionally bound to a custom URL.
    pub async fn database(&self, app: &AppInstance, url: Option<&str>) -> Result<Arc<DatabaseModule>> {
        self.app(app.name())?;
        self.namespaces.for_app_with(app, url).await
    }

    pub fn runtime(&self) -> &Arc<BridgeRuntime> {
        &self.runtime
    }

    pub fn multiplexer(&self) -> &Arc<SubscriptionMultiplexer> {
        &self.multiplexer
    }

    pub fn namespaces(&self) -> &Arc<ModuleNamespaceRegistry> {
        &self.namespaces
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        self.namespaces.event_bus()
    }
}

/// Convenience bootstrapper for desktop hosts.
///
/// Builds an [`InProcessHost`], connects it to a new service and starts the
/// event pump. Must be called inside a tokio runtime.
///
/// ```
/// # #[cfg(feature = "desktop-shims")]
/// # async fn example() -> core_service::Result<()> {
/// use core_service::bootstrap_desktop;
///
/// let (core, host) = bootstrap_desktop(|builder| builder)?;
/// let database = core.database(&core.default_app(), None).await?;
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "desktop-shims")]
pub fn bootstrap_desktop<F>(configure: F) -> Result<(CoreService, Arc<InProcessHost>)>
where
    F: FnOnce(core_runtime::config::BridgeConfigBuilder) -> core_runtime::config::BridgeConfigBuilder,
{
    let host = Arc::new(InProcessHost::new());
    let config = configure(BridgeConfig::builder().host(host.clone()))
        .build()
        .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;

    let core = CoreService::new(config);
    host.attach_sink(Arc::new(core.runtime().event_sender()));
    core.start()?;
    Ok((core, host))
}
