//! # Event Channel & Readiness Gate
//!
//! Single entry point for host events.
//!
//! ## Overview
//!
//! The host can emit before the managed side has attached a single listener.
//! The gate holds those events in arrival order and releases them, in one
//! FIFO flush, when readiness is signalled. After that it forwards events as
//! they come. It never closes again.
//!
//! ```text
//!   host ──try_send/send──> mpsc ──pump──> deliver()
//!                                             │
//!                              ┌──────────────┴──────────────┐
//!                          not ready                       ready
//!                              │                             │
//!                         pending queue ──signal_ready()──> dispatcher
//! ```
//!
//! ## Ordering
//!
//! Exactly one caller drains at a time and no lock is held while the
//! dispatcher runs. An event admitted while a drain is in progress (from
//! another thread, or from a callback re-entering `deliver`) is appended to
//! the queue and picked up by the active drainer, so delivery order always
//! equals admission order.

use bridge_traits::{BridgeError, EventSink, RawEvent, Result as BridgeResult};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::events::NativeEvent;
use crate::logging::redact_payload;

/// Consumer of events released by the gate.
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, event: Arc<NativeEvent>);
}

#[derive(Default)]
struct GateState {
    ready: bool,
    draining: bool,
    next_sequence: u64,
    pending: VecDeque<Arc<NativeEvent>>,
}

/// Holds events until the managed side is ready, then releases them in order.
#[derive(Default)]
pub struct ReadinessGate {
    state: Mutex<GateState>,
    ready: AtomicBool,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Number of events waiting to be released.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Stamps the arrival sequence and either hands the event back for
    /// immediate dispatch (the caller becomes the drainer) or queues it.
    fn admit(&self, mut event: NativeEvent) -> Option<Arc<NativeEvent>> {
        let mut state = self.lock();
        event.sequence = state.next_sequence;
        state.next_sequence += 1;
        let event = Arc::new(event);

        if !state.ready || state.draining || !state.pending.is_empty() {
            state.pending.push_back(event);
            return None;
        }

        state.draining = true;
        Some(event)
    }

    /// Opens the gate. Returns `None` when it was already open, otherwise the
    /// first queued event if the caller must start draining.
    fn open(&self) -> Option<Option<Arc<NativeEvent>>> {
        let mut state = self.lock();
        if state.ready {
            return None;
        }
        state.ready = true;
        self.ready.store(true, Ordering::Release);

        if state.draining {
            return Some(None);
        }
        let first = state.pending.pop_front();
        if first.is_some() {
            state.draining = true;
        }
        Some(first)
    }

    /// Next event for the active drainer, or `None` after releasing the
    /// drain role.
    fn next(&self) -> Option<Arc<NativeEvent>> {
        let mut state = self.lock();
        let next = state.pending.pop_front();
        if next.is_none() {
            state.draining = false;
        }
        next
    }
}

impl fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("ready", &self.is_ready())
            .field("pending", &self.pending_len())
            .finish()
    }
}

/// Decodes host events and pushes them through the readiness gate.
pub struct EventChannel {
    gate: ReadinessGate,
    dispatcher: Arc<dyn EventDispatcher>,
    trace_events: bool,
}

impl EventChannel {
    pub fn new(dispatcher: Arc<dyn EventDispatcher>, trace_events: bool) -> Self {
        Self {
            gate: ReadinessGate::new(),
            dispatcher,
            trace_events,
        }
    }

    /// Accepts one host event. Forwards it now if the gate is open, queues it
    /// otherwise. Never drops or reorders.
    pub fn deliver(&self, raw: RawEvent) {
        if self.trace_events {
            debug!(
                event_type = %raw.event_type,
                payload = %redact_payload(&raw.payload),
                "Inbound native event"
            );
        }

        let event = NativeEvent::decode(raw, 0);
        if let Some(first) = self.gate.admit(event) {
            self.drain(first);
        }
    }

    /// Opens the gate and flushes queued events in arrival order.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn signal_ready(&self) -> bool {
        let Some(first) = self.gate.open() else {
            return false;
        };

        debug!(pending = self.gate.pending_len(), "Readiness gate opened");
        if let Some(first) = first {
            self.drain(first);
        }
        true
    }

    fn drain(&self, first: Arc<NativeEvent>) {
        let mut event = first;
        loop {
            trace!(
                event_type = %event.event_type,
                sequence = event.sequence,
                "Dispatching native event"
            );
            self.dispatcher.dispatch(event);
            match self.gate.next() {
                Some(next) => event = next,
                None => break,
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    pub fn pending_len(&self) -> usize {
        self.gate.pending_len()
    }

    /// Pumps the transport into `deliver` until `shutdown` fires.
    ///
    /// The pump also ends when the transport closes, but a [`BridgeRuntime`]
    /// keeps a sender for its whole life, so under a runtime only the token
    /// (or dropping the runtime, which cancels it) stops the loop.
    ///
    /// [`BridgeRuntime`]: crate::BridgeRuntime
    pub async fn run(
        self: Arc<Self>,
        mut receiver: mpsc::Receiver<RawEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Event pump cancelled");
                    break;
                }
                next = receiver.recv() => match next {
                    Some(raw) => self.deliver(raw),
                    None => {
                        debug!("Event pump closed: all senders dropped");
                        break;
                    }
                }
            }
        }
    }
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("gate", &self.gate)
            .field("trace_events", &self.trace_events)
            .finish()
    }
}

/// Host-facing write half of the transport.
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<RawEvent>,
}

/// Creates the bounded transport between host and pump.
pub fn transport(capacity: usize) -> (EventSender, mpsc::Receiver<RawEvent>) {
    let (sender, receiver) = mpsc::channel(capacity);
    (EventSender { sender }, receiver)
}

#[async_trait::async_trait]
impl EventSink for EventSender {
    async fn send(&self, event: RawEvent) -> BridgeResult<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }

    fn try_send(&self, event: RawEvent) -> BridgeResult<()> {
        self.sender.try_send(event).map_err(|err| match err {
            TrySendError::Full(event) => BridgeError::OperationFailed(format!(
                "event buffer full, dropped '{}'",
                event.event_type
            )),
            TrySendError::Closed(_) => BridgeError::ChannelClosed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Arc<NativeEvent>>>,
    }

    impl Recorder {
        fn payloads(&self) -> Vec<Value> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|event| match &event.body {
                    crate::events::EventBody::Data(value) => value.clone(),
                    other => panic!("unexpected body {other:?}"),
                })
                .collect()
        }
    }

    impl EventDispatcher for Recorder {
        fn dispatch(&self, event: Arc<NativeEvent>) {
            self.seen.lock().unwrap().push(event);
        }
    }

    fn raw(n: i64) -> RawEvent {
        RawEvent::new("tick", json!(n))
    }

    #[test]
    fn test_events_before_ready_flush_in_order() {
        let recorder = Arc::new(Recorder::default());
        let channel = EventChannel::new(recorder.clone(), false);

        channel.deliver(raw(1));
        channel.deliver(raw(2));
        assert!(recorder.payloads().is_empty());
        assert_eq!(channel.pending_len(), 2);

        assert!(channel.signal_ready());
        channel.deliver(raw(3));

        assert_eq!(recorder.payloads(), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(channel.pending_len(), 0);
    }

    #[test]
    fn test_signal_ready_is_idempotent() {
        let recorder = Arc::new(Recorder::default());
        let channel = EventChannel::new(recorder.clone(), false);

        channel.deliver(raw(1));
        assert!(channel.signal_ready());
        assert!(!channel.signal_ready());
        assert!(channel.is_ready());
        assert_eq!(recorder.payloads(), vec![json!(1)]);
    }

    #[test]
    fn test_sequence_follows_admission_order() {
        let recorder = Arc::new(Recorder::default());
        let channel = EventChannel::new(recorder.clone(), true);
        channel.deliver(raw(1));
        channel.signal_ready();
        channel.deliver(raw(2));

        let sequences: Vec<u64> = recorder
            .seen
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(sequences, vec![0, 1]);
    }

    /// Dispatcher that re-enters the channel on the first event.
    struct Reentrant {
        channel: Mutex<Option<Arc<EventChannel>>>,
        seen: Mutex<Vec<Value>>,
    }

    impl EventDispatcher for Reentrant {
        fn dispatch(&self, event: Arc<NativeEvent>) {
            if let crate::events::EventBody::Data(value) = &event.body {
                self.seen.lock().unwrap().push(value.clone());
                if value == &json!(1) {
                    let channel = self.channel.lock().unwrap().clone().unwrap();
                    channel.deliver(raw(99));
                }
            }
        }
    }

    #[test]
    fn test_reentrant_delivery_keeps_fifo() {
        let dispatcher = Arc::new(Reentrant {
            channel: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        });
        let channel = Arc::new(EventChannel::new(dispatcher.clone(), false));
        *dispatcher.channel.lock().unwrap() = Some(channel.clone());

        channel.deliver(raw(1));
        channel.deliver(raw(2));
        channel.signal_ready();

        assert_eq!(
            *dispatcher.seen.lock().unwrap(),
            vec![json!(1), json!(2), json!(99)]
        );
    }

    #[tokio::test]
    async fn test_pump_delivers_until_senders_drop() {
        let recorder = Arc::new(Recorder::default());
        let channel = Arc::new(EventChannel::new(recorder.clone(), false));
        channel.signal_ready();

        let (sender, receiver) = transport(4);
        let pump = tokio::spawn(channel.clone().run(receiver, CancellationToken::new()));

        sender.send(raw(1)).await.unwrap();
        sender.try_send(raw(2)).unwrap();
        drop(sender);
        pump.await.unwrap();

        assert_eq!(recorder.payloads(), vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_pump_stops_on_cancel() {
        let recorder = Arc::new(Recorder::default());
        let channel = Arc::new(EventChannel::new(recorder, false));
        let (sender, receiver) = transport(1);
        let token = CancellationToken::new();

        let pump = tokio::spawn(channel.run(receiver, token.clone()));
        token.cancel();
        pump.await.unwrap();

        assert_eq!(sender.send(raw(1)).await, Err(BridgeError::ChannelClosed));
    }

    #[test]
    fn test_try_send_reports_full_buffer() {
        let (sender, _receiver) = transport(1);
        sender.try_send(raw(1)).unwrap();
        assert!(matches!(
            sender.try_send(raw(2)),
            Err(BridgeError::OperationFailed(_))
        ));
    }
}
