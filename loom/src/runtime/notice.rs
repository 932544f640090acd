//! Notice/Completion rendezvous (component I).
//!
//! A single-shot, pre-signal-safe synchronizer keyed by an opaque id (a
//! long-running tool call's id, in the common case). Unlike
//! [`crate::channels::named_barrier::NamedBarrierValue`], which waits for a
//! *set* of names to all arrive before releasing a value, a notice is a single
//! key that may be signaled before, during, or after anyone waits on it —
//! signaling never blocks, and a signal delivered early is not lost.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;

enum Slot {
    /// No one has signaled this key yet; `waiters` are notified on signal.
    Pending { waiters: Vec<oneshot::Sender<Value>> },
    /// Signaled before (or without) any waiter; the payload is held until read.
    Signaled { payload: Value },
}

/// Registry of outstanding notices for one invocation. Dropping the registry
/// releases every outstanding waiter with `Value::Null` so a waiting task
/// never hangs past the invocation's lifetime.
#[derive(Default)]
pub struct NoticeRegistry {
    slots: Mutex<HashMap<String, Slot>>,
}

/// A future-yielding waiter for one key's signal.
pub struct NoticeHandle {
    receiver: Option<oneshot::Receiver<Value>>,
    immediate: Option<Value>,
}

impl NoticeHandle {
    pub async fn wait(mut self) -> Value {
        if let Some(value) = self.immediate.take() {
            return value;
        }
        match self.receiver.take() {
            Some(rx) => rx.await.unwrap_or(Value::Null),
            None => Value::Null,
        }
    }
}

impl NoticeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `key` and returns a handle to await its signal.
    /// Safe to call after `signal` has already fired for this key: the handle
    /// resolves immediately with the stored payload.
    pub fn wait(&self, key: impl Into<String>) -> NoticeHandle {
        let key = key.into();
        let mut slots = self.slots.lock().expect("notice registry mutex poisoned");
        match slots.remove(&key) {
            None => {
                let (tx, rx) = oneshot::channel();
                slots.insert(key, Slot::Pending { waiters: vec![tx] });
                NoticeHandle {
                    receiver: Some(rx),
                    immediate: None,
                }
            }
            Some(Slot::Pending { mut waiters }) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                slots.insert(key, Slot::Pending { waiters });
                NoticeHandle {
                    receiver: Some(rx),
                    immediate: None,
                }
            }
            Some(Slot::Signaled { payload }) => {
                // Re-insert so a second waiter after this one still sees it.
                slots.insert(key, Slot::Signaled { payload: payload.clone() });
                NoticeHandle {
                    receiver: None,
                    immediate: Some(payload),
                }
            }
        }
    }

    /// Signals `key` with `payload`. Idempotent: a repeated signal for an
    /// already-signaled key overwrites the stored payload for any waiter that
    /// registers afterward, but does not re-notify waiters already woken.
    pub fn signal(&self, key: impl Into<String>, payload: Value) {
        let key = key.into();
        let mut slots = self.slots.lock().expect("notice registry mutex poisoned");
        match slots.remove(&key) {
            None => {
                slots.insert(key, Slot::Signaled { payload });
            }
            Some(Slot::Pending { waiters }) => {
                for tx in waiters {
                    let _ = tx.send(payload.clone());
                }
                slots.insert(key, Slot::Signaled { payload });
            }
            Some(Slot::Signaled { .. }) => {
                slots.insert(key, Slot::Signaled { payload });
            }
        }
    }

    /// Drops `key` entirely, releasing any waiter with `Value::Null`. Used
    /// when a long-running tool call is abandoned (invocation cancelled).
    pub fn cancel(&self, key: &str) {
        let mut slots = self.slots.lock().expect("notice registry mutex poisoned");
        if let Some(Slot::Pending { waiters }) = slots.remove(key) {
            for tx in waiters {
                let _ = tx.send(Value::Null);
            }
        }
    }

    /// Drains every outstanding key, releasing any pending waiter with
    /// `Value::Null`. Called when the event stream terminates (§4.C
    /// `CleanupNotice`); idempotent, and safe to call repeatedly.
    pub fn cleanup(&self) {
        let mut slots = self.slots.lock().expect("notice registry mutex poisoned");
        for (_, slot) in slots.drain() {
            if let Slot::Pending { waiters } = slot {
                for tx in waiters {
                    let _ = tx.send(Value::Null);
                }
            }
        }
    }
}

impl Drop for NoticeRegistry {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signal_before_wait_is_not_lost() {
        let registry = NoticeRegistry::new();
        registry.signal("call-1", Value::from("done"));
        let handle = registry.wait("call-1");
        assert_eq!(handle.wait().await, Value::from("done"));
    }

    #[tokio::test]
    async fn wait_before_signal_resolves_once_signaled() {
        let registry = NoticeRegistry::new();
        let handle = registry.wait("call-1");
        registry.signal("call-1", Value::from(42));
        assert_eq!(handle.wait().await, Value::from(42));
    }

    #[tokio::test]
    async fn multiple_waiters_all_see_the_signal() {
        let registry = NoticeRegistry::new();
        let a = registry.wait("call-1");
        let b = registry.wait("call-1");
        registry.signal("call-1", Value::from("x"));
        assert_eq!(a.wait().await, Value::from("x"));
        assert_eq!(b.wait().await, Value::from("x"));
    }

    #[tokio::test]
    async fn dropping_registry_releases_pending_waiters() {
        let registry = NoticeRegistry::new();
        let handle = registry.wait("call-1");
        drop(registry);
        assert_eq!(handle.wait().await, Value::Null);
    }

    #[tokio::test]
    async fn cancel_releases_only_that_key() {
        let registry = NoticeRegistry::new();
        let handle = registry.wait("call-1");
        registry.cancel("call-1");
        assert_eq!(handle.wait().await, Value::Null);
    }
}
