//! # Query Subscription Multiplexer
//!
//! Lets any number of observers watch the same realtime query while the host
//! runs it once.
//!
//! ```text
//!  attach(q1) ─┐                          ┌─> request_subscription(Query{key})
//!  attach(q2) ─┼─ same key ─> SubscriptionTable
//!  attach(q3) ─┘                          └─> (no further host calls)
//!
//!  query_sync_event {key, data}   ──> Snapshot  ──> every listener of key
//!  query_sync_event {key, error}  ──> seal key ──> Cancelled ──> every listener, then teardown
//! ```
//!
//! Two queries share a subscription when their keys match, which happens
//! exactly when they target the same scope and path and carry the same
//! modifier set in any order.
//!
//! Inbound query events arrive on the single `query_sync_event` type. The
//! multiplexer subscribes to it through the runtime the first time a query is
//! attached and keeps that routing subscription for its own lifetime.

use bridge_traits::{SubscriptionTarget, QUERY_SYNC_EVENT};
use core_runtime::{
    BridgeRuntime, Error, EventBody, Listener, NativeErrorInfo, NativeEvent, SubscriptionHandle,
    SubscriptionTable, Unsubscribed,
};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::query::Query;

/// What an attached observer receives.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryUpdate {
    /// Latest result set of the query
    Snapshot(Value),
    /// Host stopped the query; this is the last update the observer gets
    Cancelled(NativeErrorInfo),
}

pub struct SubscriptionMultiplexer {
    runtime: Arc<BridgeRuntime>,
    table: Arc<SubscriptionTable<QueryUpdate>>,
    routing: Mutex<Option<SubscriptionHandle>>,
}

impl SubscriptionMultiplexer {
    pub fn new(runtime: Arc<BridgeRuntime>) -> Self {
        Self {
            runtime,
            table: Arc::new(SubscriptionTable::new("query")),
            routing: Mutex::new(None),
        }
    }

    /// Subscribes to `query_sync_event` once and routes its events by key.
    async fn ensure_routing(&self) -> Result<()> {
        let mut routing = self.routing.lock().await;
        if routing.is_some() {
            return Ok(());
        }

        let table = Arc::clone(&self.table);
        let host = self.runtime.host();
        let handle = self
            .runtime
            .subscribe(QUERY_SYNC_EVENT, move |event: &NativeEvent| {
                route(&table, &host, event);
            })
            .await?;

        debug!("Query routing attached to {}", QUERY_SYNC_EVENT);
        *routing = Some(handle);
        Ok(())
    }

    /// Attaches `observer` to `query`.
    ///
    /// The first observer of a key makes the host start the query; later
    /// observers of an equivalent query just join. Observers attached while
    /// the first request is still in flight wait for it and share its outcome.
    ///
    /// # Errors
    ///
    /// `Runtime(InvalidQuery)` or `Runtime(BridgeUnavailable)` when the host
    /// refuses the query. Nothing stays attached in that case.
    pub async fn attach<F>(&self, query: &Query, observer: F) -> Result<SubscriptionHandle>
    where
        F: Fn(&QueryUpdate) + Send + Sync + 'static,
    {
        self.ensure_routing().await?;

        let key = query.key();
        let listener: Listener<QueryUpdate> = Arc::new(observer);
        let target = SubscriptionTarget::Query(query.descriptor());
        let host = self.runtime.host();

        let handle = self
            .table
            .subscribe(host.as_ref(), &target, listener)
            .await
            .map_err(|err| Error::from_bridge(&key, err))?;
        Ok(handle)
    }

    /// Detaches one observer. The host query stops with the last one.
    pub async fn detach(&self, handle: &SubscriptionHandle) -> Unsubscribed {
        let host = self.runtime.host();
        self.table.unsubscribe(host.as_ref(), handle).await
    }

    /// Detaches every observer of `query` and its equivalents.
    pub async fn detach_all(&self, query: &Query) -> usize {
        let host = self.runtime.host();
        self.table.unsubscribe_all(host.as_ref(), &query.key()).await
    }

    /// Waits for the next snapshot of `query` and detaches.
    ///
    /// # Errors
    ///
    /// `Runtime(QueryCancelled)` when the host cancels the query first.
    pub async fn once(&self, query: &Query) -> Result<Value> {
        let (tx, rx) = oneshot::channel();
        let slot = StdMutex::new(Some(tx));

        let handle = self
            .attach(query, move |update| {
                let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(sender) = sender {
                    let _ = sender.send(update.clone());
                }
            })
            .await?;

        let update = rx.await;
        self.detach(&handle).await;

        match update {
            Ok(QueryUpdate::Snapshot(data)) => Ok(data),
            Ok(QueryUpdate::Cancelled(error)) => Err(Error::QueryCancelled {
                key: query.key(),
                code: error.code,
                message: error.message,
            }
            .into()),
            Err(_) => Err(Error::Internal(format!(
                "query '{}' torn down before its first snapshot",
                query.key()
            ))
            .into()),
        }
    }

    pub fn subscriber_count(&self, query: &Query) -> usize {
        self.table.listener_count(&query.key())
    }

    pub fn is_attached(&self, query: &Query) -> bool {
        self.table.contains(&query.key())
    }

    /// Keys of queries the host is currently running for this multiplexer.
    pub fn active_keys(&self) -> Vec<String> {
        self.table.keys()
    }
}

fn route(
    table: &Arc<SubscriptionTable<QueryUpdate>>,
    host: &Arc<dyn bridge_traits::HostBridge>,
    event: &NativeEvent,
) {
    match &event.body {
        EventBody::QuerySnapshot { key, data } => {
            let delivered = table.dispatch(key, &QueryUpdate::Snapshot(data.clone()));
            if delivered == 0 {
                trace!(key, "Snapshot for unknown query discarded");
            }
        }
        EventBody::QueryCancelled { key, error } => {
            warn!(key, code = %error.code, "Query cancelled by host");
            // Seal before fan-out: every observer either gets the
            // cancellation or ends up on a fresh host query.
            if !table.seal(key) {
                trace!(key, "Cancellation for unknown query discarded");
                return;
            }
            table.dispatch(key, &QueryUpdate::Cancelled(error.clone()));

            let Ok(rt) = tokio::runtime::Handle::try_current() else {
                warn!(key, "No async runtime, cancelled query released on next attach");
                return;
            };
            let table = Arc::clone(table);
            let host = Arc::clone(host);
            let key = key.clone();
            rt.spawn(async move {
                let removed = table.unsubscribe_sealed(host.as_ref(), &key).await;
                debug!(key, removed, "Cancelled query torn down");
            });
        }
        EventBody::Data(_) => {
            trace!("Non-query payload on {} ignored", QUERY_SYNC_EVENT);
        }
    }
}

impl fmt::Debug for SubscriptionMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionMultiplexer")
            .field("active_keys", &self.active_keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{BridgeError, HostBridge, NativeHandle, RawEvent};
    use core_runtime::{BridgeConfig, ReadinessMode};
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct QueryHost {
        next: AtomicU64,
        calls: StdMutex<Vec<String>>,
        rejected: StdMutex<Vec<String>>,
    }

    impl QueryHost {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn reject_path(&self, path: &str) {
            self.rejected.lock().unwrap().push(path.to_string());
        }
    }

    #[async_trait]
    impl HostBridge for QueryHost {
        async fn notify_ready(&self) -> bridge_traits::Result<()> {
            Ok(())
        }

        async fn request_subscription(
            &self,
            target: &SubscriptionTarget,
        ) -> bridge_traits::Result<NativeHandle> {
            if let SubscriptionTarget::Query(descriptor) = target {
                if self.rejected.lock().unwrap().contains(&descriptor.path) {
                    return Err(BridgeError::InvalidQuery("index required".into()));
                }
            }
            self.calls.lock().unwrap().push(format!("request {}", target.key()));
            Ok(NativeHandle(self.next.fetch_add(1, Ordering::SeqCst)))
        }

        async fn release_subscription(&self, handle: NativeHandle) -> bridge_traits::Result<()> {
            self.calls.lock().unwrap().push(format!("release {}", handle.0));
            Ok(())
        }
    }

    fn multiplexer(host: Arc<QueryHost>) -> (Arc<BridgeRuntime>, SubscriptionMultiplexer) {
        let config = BridgeConfig::builder()
            .host(host)
            .readiness(ReadinessMode::OnFirstListener)
            .build()
            .unwrap();
        let runtime = Arc::new(BridgeRuntime::new(config));
        (runtime.clone(), SubscriptionMultiplexer::new(runtime))
    }

    fn snapshot(key: &str, data: Value) -> RawEvent {
        RawEvent::new(QUERY_SYNC_EVENT, json!({ "key": key, "data": data }))
    }

    #[tokio::test]
    async fn test_equivalent_queries_share_one_host_query() {
        let host = Arc::new(QueryHost::default());
        let (runtime, mux) = multiplexer(host.clone());

        let q1 = Query::new("users").order_by("age").unwrap().limit_to_first(10).unwrap();
        let q2 = Query::new("users").limit_to_first(10).unwrap().order_by("age").unwrap();

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let (s1, s2) = (seen.clone(), seen.clone());
        let h1 = mux
            .attach(&q1, move |u| s1.lock().unwrap().push(("a", u.clone())))
            .await
            .unwrap();
        let h2 = mux
            .attach(&q2, move |u| s2.lock().unwrap().push(("b", u.clone())))
            .await
            .unwrap();

        let query_requests = host
            .calls()
            .iter()
            .filter(|c| c.starts_with("request") && c.contains('$'))
            .count();
        assert_eq!(query_requests, 1);
        assert_eq!(mux.subscriber_count(&q1), 2);

        runtime.deliver(snapshot(&q1.key(), json!([1, 2])));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("a", QueryUpdate::Snapshot(json!([1, 2]))),
                ("b", QueryUpdate::Snapshot(json!([1, 2]))),
            ]
        );

        assert_eq!(mux.detach(&h1).await, Unsubscribed::Remaining(1));
        assert_eq!(mux.detach(&h2).await, Unsubscribed::Released);
        assert!(!mux.is_attached(&q1));
    }

    #[tokio::test]
    async fn test_rejection_attaches_nothing() {
        let host = Arc::new(QueryHost::default());
        host.reject_path("secret");
        let (_runtime, mux) = multiplexer(host);

        let query = Query::new("secret");
        let err = mux.attach(&query, |_| {}).await.unwrap_err();

        assert!(matches!(
            err,
            crate::QueryError::Runtime(Error::InvalidQuery { ref key, .. }) if *key == query.key()
        ));
        assert!(!mux.is_attached(&query));
    }

    #[tokio::test]
    async fn test_cancellation_reaches_every_observer_and_tears_down() {
        let host = Arc::new(QueryHost::default());
        let (runtime, mux) = multiplexer(host.clone());
        let query = Query::new("rooms");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for name in ["a", "b"] {
            let tx = tx.clone();
            mux.attach(&query, move |u| {
                let _ = tx.send((name, u.clone()));
            })
            .await
            .unwrap();
        }

        runtime.deliver(RawEvent::new(
            QUERY_SYNC_EVENT,
            json!({ "key": query.key(), "error": { "code": "permission-denied", "message": "no" } }),
        ));

        for _ in 0..2 {
            let (_, update) = rx.recv().await.unwrap();
            assert_eq!(
                update,
                QueryUpdate::Cancelled(NativeErrorInfo::new("permission-denied", "no"))
            );
        }

        while mux.is_attached(&query) {
            tokio::task::yield_now().await;
        }
        assert_eq!(mux.subscriber_count(&query), 0);
    }

    #[tokio::test]
    async fn test_once_resolves_with_first_snapshot() {
        let host = Arc::new(QueryHost::default());
        let (runtime, mux) = multiplexer(host);
        let mux = Arc::new(mux);
        let query = Query::new("scores").limit_to_last(1).unwrap();

        let waiter = {
            let mux = mux.clone();
            let query = query.clone();
            tokio::spawn(async move { mux.once(&query).await })
        };
        while !mux.is_attached(&query) {
            tokio::task::yield_now().await;
        }

        runtime.deliver(snapshot(&query.key(), json!({ "top": 99 })));
        assert_eq!(waiter.await.unwrap().unwrap(), json!({ "top": 99 }));
        assert!(!mux.is_attached(&query));
    }

    #[tokio::test]
    async fn test_attach_right_after_cancellation_gets_fresh_query() {
        let host = Arc::new(QueryHost::default());
        let (runtime, mux) = multiplexer(host.clone());
        let query = Query::new("rooms");

        mux.attach(&query, |_| {}).await.unwrap();
        runtime.deliver(RawEvent::new(
            QUERY_SYNC_EVENT,
            json!({ "key": query.key(), "error": "revoked" }),
        ));

        let late = Arc::new(StdMutex::new(Vec::new()));
        let sink = late.clone();
        mux.attach(&query, move |u| sink.lock().unwrap().push(u.clone()))
            .await
            .unwrap();
        assert_eq!(mux.subscriber_count(&query), 1);

        // Let the deferred teardown run; it must leave the fresh query alone.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(mux.is_attached(&query));

        runtime.deliver(snapshot(&query.key(), json!(["lobby"])));
        assert_eq!(*late.lock().unwrap(), vec![QueryUpdate::Snapshot(json!(["lobby"]))]);

        let key = query.key();
        let query_calls: Vec<_> = host
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("release") || c.ends_with(&key))
            .collect();
        assert_eq!(query_calls.len(), 3);
        assert_eq!(query_calls[0], format!("request {key}"));
        assert!(query_calls[1].starts_with("release"));
        assert_eq!(query_calls[2], format!("request {key}"));
    }
}
