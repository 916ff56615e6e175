use async_trait::async_trait;
use bridge_traits::{BridgeError, HostBridge, NativeHandle, Result, SubscriptionTarget};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct State {
    next_handle: u64,
    active: HashMap<NativeHandle, String>,
    refused: HashSet<String>,
    ready_fails: bool,
    log: Vec<String>,
    requests: usize,
    releases: usize,
    ready_calls: usize,
}

/// Host double that records every call in order.
#[derive(Default)]
pub(crate) struct RecordingHost {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl RecordingHost {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every request and release sleeps this long after being logged.
    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub(crate) fn refuse(&self, key: &str) {
        self.state.lock().unwrap().refused.insert(key.to_string());
    }

    /// Makes every later `notify_ready` fail.
    pub(crate) fn fail_ready(&self) {
        self.state.lock().unwrap().ready_fails = true;
    }

    pub(crate) fn allow(&self, key: &str) {
        self.state.lock().unwrap().refused.remove(key);
    }

    pub(crate) fn requests(&self) -> usize {
        self.state.lock().unwrap().requests
    }

    pub(crate) fn releases(&self) -> usize {
        self.state.lock().unwrap().releases
    }

    pub(crate) fn ready_calls(&self) -> usize {
        self.state.lock().unwrap().ready_calls
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl HostBridge for RecordingHost {
    async fn notify_ready(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.ready_calls += 1;
        state.log.push("ready".to_string());
        if state.ready_fails {
            return Err(BridgeError::OperationFailed("host not listening".to_string()));
        }
        Ok(())
    }

    async fn request_subscription(&self, target: &SubscriptionTarget) -> Result<NativeHandle> {
        let key = target.key().to_string();
        let refused = {
            let mut state = self.state.lock().unwrap();
            state.requests += 1;
            state.log.push(format!("request {key}"));
            state.refused.contains(&key)
        };
        self.pause().await;

        if refused {
            return Err(match target {
                SubscriptionTarget::Query(_) => BridgeError::InvalidQuery(key),
                SubscriptionTarget::EventType { .. } => BridgeError::NotAvailable(key),
            });
        }

        let mut state = self.state.lock().unwrap();
        state.next_handle += 1;
        let handle = NativeHandle(state.next_handle);
        state.active.insert(handle, key);
        Ok(handle)
    }

    async fn release_subscription(&self, handle: NativeHandle) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.releases += 1;
            let key = state.active.remove(&handle).unwrap_or_default();
            state.log.push(format!("release {key}"));
        }
        self.pause().await;
        Ok(())
    }
}
