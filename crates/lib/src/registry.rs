//! Weakly-referencing registry of live instances.
//!
//! Factories record every instance they hand out so attribute changes can be
//! broadcast later. The registry never keeps an instance alive: entries hold
//! a [`Weak`] and disappear from [`LiveInstanceRegistry::snapshot`] once the
//! last strong owner drops the instance.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::id::InstanceId;

/// Number of tracked entries above which `track` opportunistically prunes.
const PRUNE_THRESHOLD: usize = 64;

pub struct LiveInstanceRegistry<T: ?Sized> {
  entries: Mutex<Entries<T>>,
}

struct Entries<T: ?Sized> {
  map: BTreeMap<InstanceId, Weak<T>>,
  prune_at: usize,
}

impl<T: ?Sized> LiveInstanceRegistry<T> {
  pub fn new() -> Self {
    Self {
      entries: Mutex::new(Entries {
        map: BTreeMap::new(),
        prune_at: PRUNE_THRESHOLD,
      }),
    }
  }

  /// Record an instance. Safe to call concurrently with `snapshot`.
  pub fn track(&self, id: InstanceId, instance: &Arc<T>) {
    let mut entries = self.entries.lock();
    entries.map.insert(id, Arc::downgrade(instance));

    if entries.map.len() >= entries.prune_at {
      entries.map.retain(|_, weak| weak.strong_count() > 0);
      entries.prune_at = (entries.map.len() * 2).max(PRUNE_THRESHOLD);
      trace!(live = entries.map.len(), "pruned dead registry entries");
    }
  }

  /// Forget an instance explicitly. Returns whether it was tracked.
  pub fn untrack(&self, id: InstanceId) -> bool {
    self.entries.lock().map.remove(&id).is_some()
  }

  /// Strong references to every instance that is still alive, in creation
  /// order. Dead entries are pruned as a side effect.
  pub fn snapshot(&self) -> Vec<Arc<T>> {
    let mut entries = self.entries.lock();
    let mut live = Vec::with_capacity(entries.map.len());
    entries.map.retain(|_, weak| match weak.upgrade() {
      Some(instance) => {
        live.push(instance);
        true
      }
      None => false,
    });
    live
  }

  /// Number of entries that are still alive.
  pub fn len(&self) -> usize {
    self
      .entries
      .lock()
      .map
      .values()
      .filter(|weak| weak.strong_count() > 0)
      .count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<T: ?Sized> Default for LiveInstanceRegistry<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: ?Sized> std::fmt::Debug for LiveInstanceRegistry<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LiveInstanceRegistry").field("live", &self.len()).finish()
  }
}
