//! Resource slot registry.
//!
//! One [`Slot`] per resource key, created lazily on first reference by a call
//! or an incoming event. Slots are never removed except by [`Registry::purge`].

mod process;
mod queue;
mod slot;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::runtime::Handle;

pub use process::ProcessQueue;
pub use queue::EventQueue;
pub use slot::{Cycle, Slot};

use crate::resource::ResourceKey;

pub struct Registry {
    slots: DashMap<ResourceKey, Arc<Slot>>,
    runtime: Handle,
}

impl Registry {
    /// Event queue workers are spawned on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self {
            slots: DashMap::new(),
            runtime,
        }
    }

    /// Idempotent. The map shard lock is held only for the insert step.
    pub fn get_or_create(&self, key: &ResourceKey) -> Arc<Slot> {
        if let Some(slot) = self.slots.get(key) {
            return Arc::clone(slot.value());
        }

        let slot = self
            .slots
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!(%key, "Creating slot");
                Arc::new(Slot::new(key.clone(), &self.runtime))
            });
        Arc::clone(slot.value())
    }

    pub fn get(&self, key: &ResourceKey) -> Option<Arc<Slot>> {
        self.slots.get(key).map(|slot| Arc::clone(slot.value()))
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Remove every slot whose key matches, closing its queue and releasing
    /// its waiters without a result. Returns the number of purged slots.
    pub fn purge(&self, predicate: impl Fn(&ResourceKey) -> bool) -> usize {
        let keys: Vec<ResourceKey> = self
            .slots
            .iter()
            .filter(|entry| predicate(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut purged = 0;
        for key in keys {
            if let Some((_, slot)) = self.slots.remove(&key) {
                slot.close();
                purged += 1;
            }
        }

        if purged > 0 {
            tracing::info!(purged, remaining = self.slots.len(), "Purged slots");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }
}
