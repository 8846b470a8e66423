//! Explicit identities for services and the instances they produce.
//!
//! Identity never relies on pointer addresses: every factory service gets a
//! [`ServiceId`] and every produced instance an [`InstanceId`], both taken
//! from process-wide counters that never hand out the same value twice.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_SERVICE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of a referenced service (a factory, a servlet, a filter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceId(pub u64);

impl ServiceId {
  /// Allocate a fresh identity.
  pub fn next() -> Self {
    ServiceId(NEXT_SERVICE_ID.fetch_add(1, Ordering::Relaxed))
  }
}

impl std::fmt::Display for ServiceId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "svc#{}", self.0)
  }
}

/// Identity of a live instance produced by a factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub u64);

impl InstanceId {
  /// Allocate a fresh identity.
  pub fn next() -> Self {
    InstanceId(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
  }
}

impl std::fmt::Display for InstanceId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "inst#{}", self.0)
  }
}
