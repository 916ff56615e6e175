//! End-to-end tests of the runtime through its public surface: a host that
//! emits through the event sender on its own task, the pump, the readiness
//! gate and the listener registry.

use async_trait::async_trait;
use bridge_traits::{
    BridgeError, EventSink, HostBridge, NativeHandle, RawEvent, Result as BridgeResult,
    SubscriptionTarget,
};
use core_runtime::{
    BridgeConfig, BridgeRuntime, EventBody, ReadinessMode, Unsubscribed,
};
use serde_json::json;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct CountingHost {
    next: AtomicU64,
    requests: AtomicUsize,
    releases: AtomicUsize,
    ready: AtomicUsize,
}

#[async_trait]
impl HostBridge for CountingHost {
    async fn notify_ready(&self) -> BridgeResult<()> {
        self.ready.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn request_subscription(&self, target: &SubscriptionTarget) -> BridgeResult<NativeHandle> {
        if target.key() == "unsupported" {
            return Err(BridgeError::NotAvailable("unsupported".into()));
        }
        self.requests.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(NativeHandle(self.next.fetch_add(1, Ordering::SeqCst)))
    }

    async fn release_subscription(&self, _handle: NativeHandle) -> BridgeResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn build(host: Arc<CountingHost>, readiness: ReadinessMode) -> Arc<BridgeRuntime> {
    let config = BridgeConfig::builder()
        .host(host)
        .readiness(readiness)
        .event_buffer_size(16)
        .trace_native_calls(true)
        .build()
        .expect("valid config");
    Arc::new(BridgeRuntime::new(config))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_emitted_before_first_listener_arrive_in_order() {
    let host = Arc::new(CountingHost::default());
    let runtime = build(host.clone(), ReadinessMode::OnFirstListener);
    let pump = runtime.start().unwrap();

    let sender = runtime.event_sender();
    for n in 1..=2 {
        sender.send(RawEvent::new("E", json!(n))).await.unwrap();
    }
    while runtime.pending_events() < 2 {
        tokio::task::yield_now().await;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    runtime
        .subscribe("E", move |event| {
            if let EventBody::Data(value) = &event.body {
                let _ = tx.send(value.clone());
            }
        })
        .await
        .unwrap();
    sender.send(RawEvent::new("E", json!(3))).await.unwrap();

    for expected in 1..=3 {
        assert_eq!(rx.recv().await, Some(json!(expected)));
    }
    assert_eq!(host.ready.load(Ordering::SeqCst), 1);

    runtime.shutdown();
    pump.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_subscribers_share_one_native_subscription() {
    let host = Arc::new(CountingHost::default());
    let runtime = build(host.clone(), ReadinessMode::Explicit);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.subscribe("E", |_| {}).await })
        })
        .collect();
    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap().unwrap());
    }
    assert_eq!(host.requests.load(Ordering::SeqCst), 1);

    let mut released = 0;
    for handle in &handles {
        if runtime.unsubscribe(handle).await == Unsubscribed::Released {
            released += 1;
        }
    }
    assert_eq!(released, 1);
    assert_eq!(host.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_callbacks_of_other_types_are_untouched_by_refusal() {
    let host = Arc::new(CountingHost::default());
    let runtime = build(host.clone(), ReadinessMode::Explicit);
    let seen = Arc::new(Mutex::new(0));

    let counter = seen.clone();
    runtime
        .subscribe("E", move |_| *counter.lock().unwrap() += 1)
        .await
        .unwrap();
    assert!(runtime.subscribe("unsupported", |_| {}).await.is_err());

    runtime.signal_ready().await.unwrap();
    runtime.deliver(RawEvent::new("E", json!(null)));
    runtime.deliver(RawEvent::new("unsupported", json!(null)));

    assert_eq!(*seen.lock().unwrap(), 1);
    assert!(!runtime.registry().is_subscribed("unsupported"));
}
