//! Ordered reconciliation of named sub-resources.
//!
//! Servlet handlers hold ordered arrays (holders, mappings). When the
//! declaration changes, the array is rebuilt in the new order; entries whose
//! key was present before keep the very same object so in-flight work bound
//! to it is not disturbed.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

use tracing::debug;

use crate::clause::Attributes;

/// One declared entry of an ordered array.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMappingEntry<K> {
  pub key: K,
  /// Ordinal position in the declaration.
  pub position: usize,
  pub attributes: Attributes,
}

impl<K> OrderedMappingEntry<K> {
  pub fn new(key: K, position: usize, attributes: Attributes) -> Self {
    Self {
      key,
      position,
      attributes,
    }
  }

  /// Number a sequence of `(key, attributes)` pairs in order.
  pub fn sequence(entries: impl IntoIterator<Item = (K, Attributes)>) -> Vec<Self> {
    entries
      .into_iter()
      .enumerate()
      .map(|(position, (key, attributes))| Self::new(key, position, attributes))
      .collect()
  }
}

/// Remembers which key produced each slot of the last generated array.
#[derive(Debug, Clone)]
pub struct MappingReconciler<K> {
  previous: Vec<K>,
}

impl<K> Default for MappingReconciler<K> {
  fn default() -> Self {
    Self { previous: Vec::new() }
  }
}

impl<K: Eq + Hash + Clone> MappingReconciler<K> {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record the keys that produced the `existing` array passed to the next
  /// [`generate_upgraded`](Self::generate_upgraded) call.
  pub fn update_previous_keys(&mut self, previous: &[OrderedMappingEntry<K>]) {
    self.previous = previous.iter().map(|entry| entry.key.clone()).collect();
  }

  pub fn previous_keys(&self) -> &[K] {
    &self.previous
  }

  /// Build the array for `declared`, reusing slots of `existing`.
  ///
  /// The Nth occurrence of a key reuses the Nth previous slot with that key;
  /// any occurrence without a matching slot is built with `create`. Previous
  /// slots whose key is no longer declared are dropped.
  pub fn generate_upgraded<R, F>(&self, declared: &[OrderedMappingEntry<K>], existing: &[R], mut create: F) -> Vec<R>
  where
    R: Clone,
    F: FnMut(&OrderedMappingEntry<K>) -> R,
  {
    if existing.len() != self.previous.len() {
      debug!(
        previous_keys = self.previous.len(),
        existing = existing.len(),
        "previous keys and existing array differ in length"
      );
    }

    let mut slots: HashMap<&K, VecDeque<&R>> = HashMap::with_capacity(self.previous.len());
    for (key, resource) in self.previous.iter().zip(existing) {
      slots.entry(key).or_default().push_back(resource);
    }

    declared
      .iter()
      .map(|entry| match slots.get_mut(&entry.key).and_then(VecDeque::pop_front) {
        Some(resource) => resource.clone(),
        None => create(entry),
      })
      .collect()
  }
}
