//! # Module Namespace Registry
//!
//! Hands out one façade per `(app, namespace, custom url or region)` and
//! wires the native events each namespace declares.
//!
//! ```text
//!  for_app::<DatabaseModule>(app)
//!     │
//!     ├─ multi-app / custom-url checks (fail fast)
//!     ├─ cached?  ──yes──> Arc<DatabaseModule>
//!     │
//!     ├─ wire native events (once per event type, for the registry's life)
//!     │     runtime.subscribe("query_sync_event", re-emit on SharedEventBus)
//!     └─ M::create(ctx), cache, return
//! ```
//!
//! Façades never subscribe to native event types themselves. They read the
//! shared bus through app-scoped [`EventStream`](core_runtime::EventStream)s,
//! so a second façade or a second app costs no extra native listener.

use core_query::SubscriptionMultiplexer;
use core_runtime::{BridgeRuntime, NativeEvent, SharedEventBus, SubscriptionHandle};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, trace};

use crate::app::AppInstance;
use crate::error::{CoreError, Result};

/// Static description of a feature namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceConfig {
    pub namespace: &'static str,
    /// Native event types the namespace listens to
    pub native_events: &'static [&'static str],
    pub has_multi_app_support: bool,
    pub has_custom_url_or_region_support: bool,
}

/// Everything a façade needs at construction.
#[derive(Clone)]
pub struct ModuleContext {
    pub app: AppInstance,
    pub custom_url_or_region: Option<String>,
    pub runtime: Arc<BridgeRuntime>,
    pub multiplexer: Arc<SubscriptionMultiplexer>,
    pub bus: SharedEventBus,
}

/// A feature façade managed by the registry.
pub trait Module: Send + Sync + 'static {
    const CONFIG: NamespaceConfig;

    fn create(context: ModuleContext) -> Self;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InstanceKey {
    app: String,
    namespace: &'static str,
    custom_url_or_region: Option<String>,
}

type Instance = Arc<dyn Any + Send + Sync>;

pub struct ModuleNamespaceRegistry {
    runtime: Arc<BridgeRuntime>,
    multiplexer: Arc<SubscriptionMultiplexer>,
    bus: SharedEventBus,
    instances: Mutex<HashMap<InstanceKey, Instance>>,
    wired: tokio::sync::Mutex<HashMap<String, SubscriptionHandle>>,
}

impl ModuleNamespaceRegistry {
    pub fn new(
        runtime: Arc<BridgeRuntime>,
        multiplexer: Arc<SubscriptionMultiplexer>,
        bus: SharedEventBus,
    ) -> Self {
        Self {
            runtime,
            multiplexer,
            bus,
            instances: Mutex::new(HashMap::new()),
            wired: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Façade of `M` for `app`.
    pub async fn for_app<M: Module>(&self, app: &AppInstance) -> Result<Arc<M>> {
        self.for_app_with(app, None).await
    }

    /// Façade of `M` for `app`, bound to a custom URL or region.
    ///
    /// # Errors
    ///
    /// - `UnsupportedMultiApp` for a non-default app on a default-only module
    /// - `CustomUrlOrRegionUnsupported` when `custom` is given to a module
    ///   that takes none
    /// - `Runtime` when the host refuses one of the module's event types
    pub async fn for_app_with<M: Module>(
        &self,
        app: &AppInstance,
        custom: Option<&str>,
    ) -> Result<Arc<M>> {
        let config = M::CONFIG;
        if !config.has_multi_app_support && !app.is_default() {
            return Err(CoreError::UnsupportedMultiApp {
                namespace: config.namespace.to_string(),
                app: app.name().to_string(),
            });
        }
        if custom.is_some() && !config.has_custom_url_or_region_support {
            return Err(CoreError::CustomUrlOrRegionUnsupported {
                namespace: config.namespace.to_string(),
            });
        }

        let key = InstanceKey {
            app: app.name().to_string(),
            namespace: config.namespace,
            custom_url_or_region: custom.map(str::to_string),
        };
        if let Some(existing) = self.cached::<M>(&key) {
            return Ok(existing);
        }

        self.wire_events(config.native_events).await?;

        let module: Instance = Arc::new(M::create(ModuleContext {
            app: app.clone(),
            custom_url_or_region: key.custom_url_or_region.clone(),
            runtime: Arc::clone(&self.runtime),
            multiplexer: Arc::clone(&self.multiplexer),
            bus: self.bus.clone(),
        }));

        let instance = Arc::clone(
            self.lock_instances()
                .entry(key)
                .or_insert(module),
        );
        info!(namespace = config.namespace, app = %app, "Module created");
        downcast::<M>(instance)
    }

    fn cached<M: Module>(&self, key: &InstanceKey) -> Option<Arc<M>> {
        let instance = self.lock_instances().get(key).cloned()?;
        downcast::<M>(instance).ok()
    }

    /// Subscribes to each event type not wired yet and re-emits its events
    /// on the shared bus.
    async fn wire_events(&self, event_types: &[&str]) -> Result<()> {
        let mut wired = self.wired.lock().await;
        for &event_type in event_types {
            if wired.contains_key(event_type) {
                continue;
            }

            let bus = self.bus.clone();
            let handle = self
                .runtime
                .subscribe(event_type, move |event: &NativeEvent| {
                    if bus.emit(Arc::new(event.clone())).is_err() {
                        trace!(event_type = %event.event_type, "No bus subscribers");
                    }
                })
                .await?;
            debug!(event_type, "Native event wired to shared bus");
            wired.insert(event_type.to_string(), handle);
        }
        Ok(())
    }

    /// Drops every cached façade of `app`; returns how many were dropped.
    ///
    /// Event wiring stays in place: it is shared by all apps.
    pub fn destroy_app(&self, app: &AppInstance) -> usize {
        let mut instances = self.lock_instances();
        let before = instances.len();
        instances.retain(|key, _| key.app != app.name());
        let removed = before - instances.len();
        debug!(app = %app, removed, "App modules destroyed");
        removed
    }

    pub fn instance_count(&self) -> usize {
        self.lock_instances().len()
    }

    /// Event types wired so far, sorted.
    pub async fn wired_event_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.wired.lock().await.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.bus
    }

    fn lock_instances(&self) -> std::sync::MutexGuard<'_, HashMap<InstanceKey, Instance>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn downcast<M: Module>(instance: Instance) -> Result<Arc<M>> {
    instance.downcast::<M>().map_err(|_| {
        CoreError::InitializationFailed(format!(
            "cached module for '{}' has an unexpected type",
            M::CONFIG.namespace
        ))
    })
}

impl fmt::Debug for ModuleNamespaceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleNamespaceRegistry")
            .field("instances", &self.instance_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{HostBridge, NativeHandle, Result as BridgeResult, SubscriptionTarget};
    use core_runtime::BridgeConfig;
    use mockall::mock;

    mock! {
        pub Host {}

        #[async_trait]
        impl HostBridge for Host {
            async fn notify_ready(&self) -> BridgeResult<()>;
            async fn request_subscription(&self, target: &SubscriptionTarget) -> BridgeResult<NativeHandle>;
            async fn release_subscription(&self, handle: NativeHandle) -> BridgeResult<()>;
        }
    }

    struct Sample {
        context: ModuleContext,
    }

    impl Module for Sample {
        const CONFIG: NamespaceConfig = NamespaceConfig {
            namespace: "sample",
            native_events: &["sample_a", "sample_b"],
            has_multi_app_support: true,
            has_custom_url_or_region_support: true,
        };

        fn create(context: ModuleContext) -> Self {
            Self { context }
        }
    }

    struct DefaultOnly;

    impl Module for DefaultOnly {
        const CONFIG: NamespaceConfig = NamespaceConfig {
            namespace: "default_only",
            native_events: &["sample_a"],
            has_multi_app_support: false,
            has_custom_url_or_region_support: false,
        };

        fn create(_: ModuleContext) -> Self {
            Self
        }
    }

    fn registry(host: MockHost) -> ModuleNamespaceRegistry {
        let runtime = Arc::new(BridgeRuntime::new(
            BridgeConfig::builder().host(Arc::new(host)).build().unwrap(),
        ));
        let multiplexer = Arc::new(SubscriptionMultiplexer::new(runtime.clone()));
        ModuleNamespaceRegistry::new(runtime, multiplexer, SharedEventBus::default())
    }

    fn permissive_host(expected_requests: usize) -> MockHost {
        let mut host = MockHost::new();
        host.expect_notify_ready().returning(|| Ok(()));
        host.expect_request_subscription()
            .times(expected_requests)
            .returning(|target| Ok(NativeHandle(target.key().len() as u64)));
        host
    }

    #[tokio::test]
    async fn test_module_is_memoized_and_events_wired_once() {
        let registry = registry(permissive_host(2));
        let app = AppInstance::default();

        let first = registry.for_app::<Sample>(&app).await.unwrap();
        let second = registry.for_app::<Sample>(&app).await.unwrap();
        let other_app = registry.for_app::<Sample>(&AppInstance::new("b")).await.unwrap();
        let _ = registry.for_app::<DefaultOnly>(&app).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other_app));
        assert_eq!(other_app.context.app.name(), "b");
        assert_eq!(registry.instance_count(), 3);
        assert_eq!(
            registry.wired_event_types().await,
            vec!["sample_a".to_string(), "sample_b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_custom_url_gets_its_own_instance() {
        let registry = registry(permissive_host(2));
        let app = AppInstance::default();

        let plain = registry.for_app::<Sample>(&app).await.unwrap();
        let custom = registry
            .for_app_with::<Sample>(&app, Some("https://eu.example"))
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&plain, &custom));
        assert_eq!(
            custom.context.custom_url_or_region.as_deref(),
            Some("https://eu.example")
        );
    }

    #[tokio::test]
    async fn test_default_only_module_refuses_other_apps() {
        let registry = registry(permissive_host(0));

        assert!(matches!(
            registry.for_app::<DefaultOnly>(&AppInstance::new("secondary")).await,
            Err(CoreError::UnsupportedMultiApp { .. })
        ));
        assert!(matches!(
            registry
                .for_app_with::<DefaultOnly>(&AppInstance::default(), Some("eu"))
                .await,
            Err(CoreError::CustomUrlOrRegionUnsupported { .. })
        ));
        assert_eq!(registry.instance_count(), 0);
    }

    #[tokio::test]
    async fn test_destroy_app_drops_only_that_app() {
        let registry = registry(permissive_host(2));
        let secondary = AppInstance::new("secondary");

        let before = registry.for_app::<Sample>(&secondary).await.unwrap();
        registry.for_app::<Sample>(&AppInstance::default()).await.unwrap();

        assert_eq!(registry.destroy_app(&secondary), 1);
        assert_eq!(registry.instance_count(), 1);

        let after = registry.for_app::<Sample>(&secondary).await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
