//! WorkGate - collapses concurrent identical computations into one execution.
//!
//! Unlike a cache, nothing is kept once the work finishes: the slot is
//! removed before the result is published, so a later call always starts
//! fresh work, and a failure is never served twice.

use std::future::Future;
use std::hash::Hash;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::trace;

use crate::error::Result;

type Slot<V> = watch::Receiver<Option<Result<V>>>;

pub struct WorkGate<K, V> {
    enabled: bool,
    slots: DashMap<K, Slot<V>>,
}

enum Role<V> {
    Leader(watch::Sender<Option<Result<V>>>),
    Waiter(Slot<V>),
}

/// Frees the leader's slot even when its future is dropped mid-flight.
struct SlotGuard<'a, K: Eq + Hash, V> {
    slots: &'a DashMap<K, Slot<V>>,
    key: &'a K,
}

impl<K: Eq + Hash, V> Drop for SlotGuard<'_, K, V> {
    fn drop(&mut self) {
        self.slots.remove(self.key);
    }
}

impl<K, V> WorkGate<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync,
    V: Clone + Send + Sync,
{
    /// A disabled gate runs every call's work directly.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            slots: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of keys with work currently in flight.
    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Run `work` for `key`, or join the execution already in flight for it.
    pub async fn produce<F, Fut>(&self, key: K, work: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if !self.enabled {
            return work().await;
        }

        let sender = loop {
            let role = match self.slots.entry(key.clone()) {
                Entry::Occupied(slot) => Role::Waiter(slot.get().clone()),
                Entry::Vacant(vacant) => {
                    let (sender, receiver) = watch::channel(None);
                    vacant.insert(receiver);
                    Role::Leader(sender)
                }
            };

            match role {
                Role::Leader(sender) => break sender,
                Role::Waiter(mut slot) => {
                    trace!(?key, "joining in-flight work");
                    loop {
                        let published = slot.borrow_and_update().clone();
                        if let Some(result) = published {
                            return result;
                        }
                        if slot.changed().await.is_err() {
                            // Leader dropped without a result; start over.
                            break;
                        }
                    }
                }
            }
        };

        let guard = SlotGuard {
            slots: &self.slots,
            key: &key,
        };
        let result = work().await;
        drop(guard);
        sender.send_replace(Some(result.clone()));
        result
    }
}
