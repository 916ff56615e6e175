//! # Reference-Counted Subscriptions
//!
//! Bookkeeping shared by the listener registry (keyed by event type) and the
//! query multiplexer (keyed by canonical query key).
//!
//! ## Overview
//!
//! Each key owns one native subscription no matter how many callbacks are
//! attached to it. The first callback requests it from the host, the last
//! removal releases it.
//!
//! ```text
//!              subscribe            last unsubscribe
//!   Vacant ──────────────> Active ──────────────────> Retired (removed)
//!     │   host refused
//!     └──────────────────> Failed (removed, error shared with waiters)
//! ```
//!
//! ## Per-key ordering
//!
//! Every key has an async phase lock held across the host round trip.
//! Callers that queue behind a request see its outcome: they join an
//! `Active` entry, inherit the error of a `Failed` one, or retry on a fresh
//! entry once a `Retired` one is gone. A teardown therefore always completes
//! before the next create for the same key starts. Unrelated keys never
//! contend.
//!
//! Dropping a `subscribe` or `unsubscribe` future while it waits on the host
//! still leaves the table consistent: the half-created or half-retired entry
//! is unlinked and the next caller starts over.
//!
//! ## Host cancellation
//!
//! A key the host cancelled is [sealed](SubscriptionTable::seal)
//! synchronously from the dispatch path. Sealed entries accept no new
//! listeners, so a caller arriving before the asynchronous teardown runs
//! gets a fresh native subscription rather than joining a dead one.
//!
//! ## Fan-out
//!
//! [`SubscriptionTable::dispatch`] clones the callback list before invoking
//! anything, so callbacks added during fan-out do not see the payload and
//! callbacks removed during fan-out do not break iteration. A panicking
//! callback is logged and skipped.

use bridge_traits::{BridgeError, HostBridge, NativeHandle, SubscriptionTarget};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Callback attached to a key.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Unique id of one attached callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Returned by `subscribe`; pass it back to remove the callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    key: String,
    id: ListenerId,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }
}

/// What an unsubscribe did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsubscribed {
    /// Callback removed; this many remain on the key
    Remaining(usize),
    /// Callback removed and the native subscription released
    Released,
    /// Nothing to remove: the callback or its entry was already gone
    AlreadyTornDown,
}

enum Phase {
    Vacant,
    Active(NativeHandle),
    Failed(BridgeError),
    Retired,
}

struct Slot<T> {
    phase: Mutex<Phase>,
    listeners: RwLock<Listeners<T>>,
}

struct Listeners<T> {
    entries: Vec<(ListenerId, Listener<T>)>,
    /// Set when the host cancelled the key; nothing may join afterwards.
    sealed: bool,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Vacant),
            listeners: RwLock::new(Listeners {
                entries: Vec::new(),
                sealed: false,
            }),
        }
    }

    /// Appends `listener`, unless the slot is sealed.
    fn add(&self, id: ListenerId, listener: Listener<T>) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        if listeners.sealed {
            return false;
        }
        listeners.entries.push((id, listener));
        true
    }

    /// Removes `id` and returns how many listeners remain, or `None` when the
    /// id was not attached.
    fn remove(&self, id: ListenerId) -> Option<usize> {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.entries.len();
        listeners.entries.retain(|(existing, _)| *existing != id);
        let after = listeners.entries.len();
        (after != before).then_some(after)
    }

    fn clear(&self) -> usize {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let removed = listeners.entries.len();
        listeners.entries.clear();
        removed
    }

    fn seal(&self) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .sealed = true;
    }

    fn is_sealed(&self) -> bool {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .sealed
    }

    fn snapshot(&self) -> Vec<Listener<T>> {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }

    fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}

/// Rolls back a first subscribe whose future is dropped while the host
/// request is in flight: the listener goes, the entry is retired and
/// unlinked, and queued callers restart on a fresh entry.
struct PendingCreate<'a, T> {
    table: &'a SubscriptionTable<T>,
    key: &'a str,
    slot: &'a Arc<Slot<T>>,
    id: ListenerId,
    phase: &'a mut Phase,
    armed: bool,
}

impl<T> PendingCreate<'_, T> {
    fn settle(mut self) {
        self.armed = false;
    }
}

impl<T> Drop for PendingCreate<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.slot.remove(self.id);
        *self.phase = Phase::Retired;
        self.table.remove_slot(self.key, self.slot);
        warn!(table = self.table.label, key = self.key, "Subscribe abandoned during native request");
    }
}

/// Unlinks a retiring entry once its release finishes or is abandoned.
struct SlotRemoval<'a, T> {
    table: &'a SubscriptionTable<T>,
    key: &'a str,
    slot: &'a Arc<Slot<T>>,
}

impl<T> Drop for SlotRemoval<'_, T> {
    fn drop(&mut self) {
        self.table.remove_slot(self.key, self.slot);
    }
}

/// Per-key reference counts over native subscriptions.
pub struct SubscriptionTable<T> {
    label: &'static str,
    slots: RwLock<HashMap<String, Arc<Slot<T>>>>,
}

impl<T> SubscriptionTable<T> {
    /// `label` names the table in log output ("event", "query").
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            slots: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &str) -> Option<Arc<Slot<T>>> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn slot_or_insert(&self, key: &str) -> Arc<Slot<T>> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Slot::new())),
        )
    }

    /// Drops the map entry, but only if it still points at `slot`.
    fn remove_slot(&self, key: &str, slot: &Arc<Slot<T>>) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(key);
        }
    }

    /// Attaches `listener` to the target's key, requesting the native
    /// subscription if this is the first listener.
    ///
    /// The listener is in place before the host is asked, so no event that
    /// the host emits in response can be missed. If the host refuses, the
    /// listener is removed again, the entry is discarded, and every caller
    /// queued on the same key receives the same error. Dropping the returned
    /// future mid-request has the same effect minus the shared error.
    pub async fn subscribe(
        &self,
        host: &dyn HostBridge,
        target: &SubscriptionTarget,
        listener: Listener<T>,
    ) -> Result<SubscriptionHandle, BridgeError> {
        let key = target.key();
        let id = ListenerId::next();

        loop {
            let slot = self.slot_or_insert(key);
            let mut phase = slot.phase.lock().await;

            match &*phase {
                Phase::Retired => {
                    self.remove_slot(key, &slot);
                    continue;
                }
                Phase::Failed(err) => return Err(err.clone()),
                Phase::Active(_) => {
                    if slot.add(id, Arc::clone(&listener)) {
                        debug!(table = self.label, key, listeners = slot.len(), "Listener added");
                        return Ok(SubscriptionHandle {
                            key: key.to_string(),
                            id,
                        });
                    }
                    // Cancelled by the host: finish its teardown first.
                    slot.clear();
                    self.retire(host, key, &slot, &mut phase).await;
                    continue;
                }
                Phase::Vacant => {
                    if !slot.add(id, Arc::clone(&listener)) {
                        *phase = Phase::Retired;
                        self.remove_slot(key, &slot);
                        continue;
                    }
                }
            }

            let pending = PendingCreate {
                table: self,
                key,
                slot: &slot,
                id,
                phase: &mut *phase,
                armed: true,
            };
            let outcome = host.request_subscription(target).await;
            pending.settle();

            match outcome {
                Ok(handle) => {
                    *phase = Phase::Active(handle);
                    debug!(table = self.label, key, %handle, "Native subscription created");
                    return Ok(SubscriptionHandle {
                        key: key.to_string(),
                        id,
                    });
                }
                Err(err) => {
                    slot.remove(id);
                    warn!(table = self.label, key, error = %err, "Native subscription refused");
                    *phase = Phase::Failed(err.clone());
                    self.remove_slot(key, &slot);
                    return Err(err);
                }
            }
        }
    }

    /// Removes one listener. Releases the native subscription when it was
    /// the last one. Unknown or stale handles are a no-op.
    pub async fn unsubscribe(
        &self,
        host: &dyn HostBridge,
        handle: &SubscriptionHandle,
    ) -> Unsubscribed {
        let Some(slot) = self.slot(&handle.key) else {
            return Unsubscribed::AlreadyTornDown;
        };
        let mut phase = slot.phase.lock().await;
        if !matches!(*phase, Phase::Active(_)) {
            return Unsubscribed::AlreadyTornDown;
        }

        match slot.remove(handle.id) {
            None => Unsubscribed::AlreadyTornDown,
            Some(remaining) if remaining > 0 => {
                debug!(table = self.label, key = %handle.key, remaining, "Listener removed");
                Unsubscribed::Remaining(remaining)
            }
            Some(_) => {
                self.retire(host, &handle.key, &slot, &mut phase).await;
                Unsubscribed::Released
            }
        }
    }

    /// Removes every listener on `key` and releases its native subscription.
    /// Returns how many listeners were removed.
    pub async fn unsubscribe_all(&self, host: &dyn HostBridge, key: &str) -> usize {
        let Some(slot) = self.slot(key) else {
            return 0;
        };
        self.clear_and_retire(host, key, &slot).await
    }

    /// Closes `key` to new listeners without waiting on its phase lock.
    ///
    /// Listeners already attached keep receiving dispatches. The next
    /// `subscribe` on the key tears the sealed entry down and requests a
    /// fresh native subscription instead of joining it. Returns `false` when
    /// the key has no entry.
    pub fn seal(&self, key: &str) -> bool {
        match self.slot(key) {
            Some(slot) => {
                slot.seal();
                true
            }
            None => false,
        }
    }

    /// Tears down `key` only if its current entry is sealed, so a fresh entry
    /// created after the seal is left alone. Returns how many listeners were
    /// removed.
    pub async fn unsubscribe_sealed(&self, host: &dyn HostBridge, key: &str) -> usize {
        let Some(slot) = self.slot(key).filter(|slot| slot.is_sealed()) else {
            return 0;
        };
        self.clear_and_retire(host, key, &slot).await
    }

    async fn clear_and_retire(&self, host: &dyn HostBridge, key: &str, slot: &Arc<Slot<T>>) -> usize {
        let mut phase = slot.phase.lock().await;
        if !matches!(*phase, Phase::Active(_)) {
            return 0;
        }

        let removed = slot.clear();
        self.retire(host, key, slot, &mut phase).await;
        removed
    }

    /// Releases the native handle and then removes the entry, both while the
    /// phase lock is held, so queued callers restart on a fresh entry. The
    /// entry is removed even if this future is dropped mid-release.
    async fn retire(&self, host: &dyn HostBridge, key: &str, slot: &Arc<Slot<T>>, phase: &mut Phase) {
        debug_assert_eq!(slot.len(), 0, "retiring a key that still has listeners");
        let _removal = SlotRemoval {
            table: self,
            key,
            slot,
        };

        if let Phase::Active(handle) = std::mem::replace(phase, Phase::Retired) {
            match host.release_subscription(handle).await {
                Ok(()) => debug!(table = self.label, key, %handle, "Native subscription released"),
                Err(err) => {
                    warn!(table = self.label, key, %handle, error = %err, "Native release failed")
                }
            }
        }
    }

    /// Invokes every listener on `key` with `payload`, in registration order.
    /// Returns the number of listeners invoked.
    pub fn dispatch(&self, key: &str, payload: &T) -> usize {
        let Some(slot) = self.slot(key) else {
            return 0;
        };

        let listeners = slot.snapshot();
        for listener in &listeners {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(payload)));
            if outcome.is_err() {
                error!(table = self.label, key, "Listener panicked during dispatch");
            }
        }
        listeners.len()
    }

    pub fn listener_count(&self, key: &str) -> usize {
        self.slot(key).map_or(0, |slot| slot.len())
    }

    /// Whether `key` currently has an entry (active, or being created).
    pub fn contains(&self, key: &str) -> bool {
        self.slot(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl<T> fmt::Debug for SubscriptionTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionTable")
            .field("label", &self.label)
            .field("keys", &self.keys())
            .finish()
    }
}
