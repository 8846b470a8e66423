//! Set reconciliation of keyed resources.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Outcome of diffing a declaration against the previously realized set.
///
/// Every key of `previous ∪ declared` lands in exactly one of the three
/// partitions.
#[derive(Debug, Clone)]
pub struct Reconciliation<K, R, P> {
  /// Declared entries with no realized counterpart, in declaration order.
  pub to_create: Vec<(K, P)>,

  /// Realized resources that are no longer declared, ordered by key.
  pub to_remove: Vec<(K, R)>,

  /// Realized resources whose key is still declared. Never recreated.
  pub retained: HashMap<K, R>,
}

impl<K, R, P> Reconciliation<K, R, P> {
  /// Returns true if nothing has to be created or removed.
  pub fn is_empty(&self) -> bool {
    self.to_create.is_empty() && self.to_remove.is_empty()
  }

  /// Number of lifecycle operations the caller has to perform.
  pub fn change_count(&self) -> usize {
    self.to_create.len() + self.to_remove.len()
  }
}

/// Diff `declared` against `previous`.
///
/// Single pass over both inputs, comparing keys only. A key already placed in
/// `retained` or `to_create` is skipped when it is declared again. The
/// function is pure; the caller performs the create / start / stop calls.
pub fn reconcile<K, R, P>(mut previous: HashMap<K, R>, declared: Vec<(K, P)>) -> Reconciliation<K, R, P>
where
  K: Ord + Hash + Clone,
{
  let mut seen: HashSet<K> = HashSet::with_capacity(declared.len());
  let mut to_create = Vec::new();
  let mut retained = HashMap::with_capacity(previous.len());

  for (key, params) in declared {
    if !seen.insert(key.clone()) {
      continue;
    }
    match previous.remove(&key) {
      Some(resource) => {
        retained.insert(key, resource);
      }
      None => to_create.push((key, params)),
    }
  }

  let mut to_remove: Vec<(K, R)> = previous.into_iter().collect();
  to_remove.sort_by(|(a, _), (b, _)| a.cmp(b));

  Reconciliation {
    to_create,
    to_remove,
    retained,
  }
}
