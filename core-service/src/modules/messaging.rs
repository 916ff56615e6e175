//! Messaging façade.
//!
//! Default app only. Reads incoming messages and token refreshes from the
//! shared bus; the registry has already wired both native event types.

use core_runtime::{EventStream, SharedEventBus};

use crate::app::AppInstance;
use crate::namespace::{Module, ModuleContext, NamespaceConfig};

pub const MESSAGE_RECEIVED_EVENT: &str = "messaging_message_received";
pub const TOKEN_REFRESH_EVENT: &str = "messaging_token_refresh";

pub struct MessagingModule {
    app: AppInstance,
    bus: SharedEventBus,
}

impl MessagingModule {
    pub fn app(&self) -> &AppInstance {
        &self.app
    }

    /// Future incoming messages for this app.
    pub fn on_message(&self) -> EventStream {
        self.stream(MESSAGE_RECEIVED_EVENT)
    }

    /// Future push token refreshes for this app.
    pub fn on_token_refresh(&self) -> EventStream {
        self.stream(TOKEN_REFRESH_EVENT)
    }

    fn stream(&self, event_type: &'static str) -> EventStream {
        let app = self.app.name().to_string();
        self.bus
            .subscribe()
            .filter(move |event| event.event_type == event_type && event.is_for_app(&app))
    }
}

impl Module for MessagingModule {
    const CONFIG: NamespaceConfig = NamespaceConfig {
        namespace: "messaging",
        native_events: &[MESSAGE_RECEIVED_EVENT, TOKEN_REFRESH_EVENT],
        has_multi_app_support: false,
        has_custom_url_or_region_support: false,
    };

    fn create(context: ModuleContext) -> Self {
        Self {
            app: context.app,
            bus: context.bus,
        }
    }
}
