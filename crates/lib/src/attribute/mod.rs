//! Dynamic attribute propagation.
//!
//! A factory stores its configuration once and hands out any number of live
//! instances built from it. When a configuration attribute changes, the
//! factory has to decide what happens to instances that already exist. Each
//! attribute belongs to exactly one [`AttributeClass`]:
//!
//! - **Hot**: pushed to live instances without disruption.
//! - **RequiresEndpointClose**: pushed to live instances, and the next
//!   [`AttributePropagator::update`] closes every endpoint they reference so
//!   clients reconnect with the new settings.
//! - **Deferred**: stored on the factory only; `update` pushes it to live
//!   instances whose value differs and forces a close for that sweep.
//! - **CreationOnly**: stored on the factory, seen by instances created
//!   afterwards.
//!
//! Setters may be called many times before one `update`. Flags are sticky
//! until `update` runs, so a burst of changes costs one disruption per
//! instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::id::InstanceId;
use crate::lifecycle::EndpointCloseable;
use crate::registry::LiveInstanceRegistry;

/// How a change of one attribute reaches existing instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeClass {
  Hot,
  RequiresEndpointClose,
  Deferred,
  CreationOnly,
}

/// What an `apply_attribute` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyEffect {
  HotApplied,
  RequiresEndpointClose,
  Deferred,
  CreationOnly,
}

impl From<AttributeClass> for ApplyEffect {
  fn from(class: AttributeClass) -> Self {
    match class {
      AttributeClass::Hot => ApplyEffect::HotApplied,
      AttributeClass::RequiresEndpointClose => ApplyEffect::RequiresEndpointClose,
      AttributeClass::Deferred => ApplyEffect::Deferred,
      AttributeClass::CreationOnly => ApplyEffect::CreationOnly,
    }
  }
}

impl std::fmt::Display for AttributeClass {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      AttributeClass::Hot => "hot",
      AttributeClass::RequiresEndpointClose => "requires endpoint close",
      AttributeClass::Deferred => "deferred",
      AttributeClass::CreationOnly => "creation only",
    };
    write!(f, "{}", s)
  }
}

impl std::fmt::Display for ApplyEffect {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      ApplyEffect::HotApplied => "applied live",
      ApplyEffect::RequiresEndpointClose => "closes endpoints on update",
      ApplyEffect::Deferred => "synced on update",
      ApplyEffect::CreationOnly => "new instances only",
    };
    write!(f, "{}", s)
  }
}

/// Per-factory state accumulated between `update` calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingUpdateFlags {
  /// Any attribute changed since the last update.
  pub changed: bool,
  /// Endpoints of live instances must be closed on the next update.
  pub close_endpoints: bool,
  /// Live instances must rebuild derived structures on the next update.
  pub regenerate: bool,
}

/// A live instance failed to take a configuration change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributeError {
  #[error("instance {instance} rejected attribute '{attribute}': {message}")]
  Rejected {
    instance: InstanceId,
    attribute: &'static str,
    message: String,
  },

  #[error("instance {instance} failed to regenerate: {message}")]
  Regenerate { instance: InstanceId, message: String },
}

/// One typed configuration attribute of a factory with configuration `C`.
pub trait DynamicAttribute<C>: Clone + Send {
  /// Stable attribute name, used in logs and plans.
  fn name(&self) -> &'static str;

  fn class(&self) -> AttributeClass;

  /// Write the value into `config`.
  fn apply_to(&self, config: &mut C);

  /// Whether `config` already holds this value.
  fn is_applied(&self, config: &C) -> bool;

  /// Whether changing this attribute requires live instances to regenerate
  /// derived structures on the next update.
  fn marks_regeneration(&self) -> bool {
    false
  }
}

/// An instance produced by a factory with configuration `C`.
pub trait LiveInstance<C>: EndpointCloseable + Send + Sync {
  fn instance_id(&self) -> InstanceId;

  /// Run `change` against the instance's live configuration. `change`
  /// returns whether it modified anything; that value is passed through.
  fn reconfigure(&self, change: &mut dyn FnMut(&mut C) -> bool) -> Result<bool, AttributeError>;

  /// Rebuild derived structures from the factory configuration. Returns
  /// whether anything was rebuilt; an instance already built from `config`
  /// returns `false`.
  fn regenerate(&self, _config: &C) -> Result<bool, AttributeError> {
    Ok(false)
  }
}

/// Result of one `apply_attribute` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
  pub attribute: &'static str,
  pub effect: ApplyEffect,
  /// Live instances whose configuration changed.
  pub updated: usize,
  pub failures: Vec<AttributeError>,
}

/// Result of one `update` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
  /// Live instances that received at least one deferred attribute.
  pub synced: usize,
  pub regenerated: usize,
  /// Live instances whose endpoints were closed.
  pub closed: usize,
  pub failures: Vec<AttributeError>,
}

impl UpdateReport {
  pub fn is_noop(&self) -> bool {
    self.synced == 0 && self.regenerated == 0 && self.closed == 0 && self.failures.is_empty()
  }
}

struct State<C, A> {
  config: C,
  flags: PendingUpdateFlags,
  deferred: BTreeMap<&'static str, A>,
  /// Most recent instance created from `config`.
  newest: Option<InstanceId>,
  /// Newest instance that predates the last endpoint-closing change.
  close_through: Option<InstanceId>,
}

/// Stores a factory configuration and propagates attribute changes to the
/// instances created from it.
pub struct AttributePropagator<C, A, I: ?Sized> {
  state: Mutex<State<C, A>>,
  registry: LiveInstanceRegistry<I>,
}

impl<C, A, I> AttributePropagator<C, A, I>
where
  A: DynamicAttribute<C>,
  I: LiveInstance<C> + ?Sized,
{
  pub fn new(config: C) -> Self {
    Self {
      state: Mutex::new(State {
        config,
        flags: PendingUpdateFlags::default(),
        deferred: BTreeMap::new(),
        newest: None,
        close_through: None,
      }),
      registry: LiveInstanceRegistry::new(),
    }
  }

  /// Copy of the stored configuration.
  pub fn config(&self) -> C
  where
    C: Clone,
  {
    self.state.lock().config.clone()
  }

  pub fn with_config<R>(&self, f: impl FnOnce(&C) -> R) -> R {
    f(&self.state.lock().config)
  }

  pub fn pending_flags(&self) -> PendingUpdateFlags {
    self.state.lock().flags
  }

  pub fn registry(&self) -> &LiveInstanceRegistry<I> {
    &self.registry
  }

  /// Build an instance from the stored configuration and track it.
  ///
  /// Runs under the component lock, so the instance observes the
  /// configuration either before or after a concurrent change, never half.
  pub fn create_instance<E>(&self, build: impl FnOnce(&C) -> Result<Arc<I>, E>) -> Result<Arc<I>, E> {
    let mut state = self.state.lock();
    let instance = build(&state.config)?;
    state.newest = Some(instance.instance_id());
    self.registry.track(instance.instance_id(), &instance);
    debug!(instance = %instance.instance_id(), "tracked live instance");
    Ok(instance)
  }

  /// Store `attribute` and propagate it according to its class.
  pub fn apply_attribute(&self, attribute: A) -> ApplyReport {
    let mut state = self.state.lock();
    let class = attribute.class();
    let name = attribute.name();

    attribute.apply_to(&mut state.config);
    state.flags.changed = true;
    if attribute.marks_regeneration() {
      state.flags.regenerate = true;
    }

    let mut report = ApplyReport {
      attribute: name,
      effect: class.into(),
      updated: 0,
      failures: Vec::new(),
    };

    match class {
      AttributeClass::Hot => {
        self.broadcast(&attribute, &mut report.updated, &mut report.failures);
      }
      AttributeClass::RequiresEndpointClose => {
        self.broadcast(&attribute, &mut report.updated, &mut report.failures);
        state.flags.close_endpoints = true;
        state.close_through = state.newest;
      }
      AttributeClass::Deferred => {
        state.deferred.insert(name, attribute);
      }
      AttributeClass::CreationOnly => {}
    }

    debug!(attribute = name, class = %class, updated = report.updated, "applied attribute");
    report
  }

  /// Sync deferred attributes, regenerate and sweep endpoints as flagged.
  ///
  /// A no-op when nothing is pending. Instances created after the last
  /// endpoint-closing change already carry it and are not swept, unless a
  /// deferred sync forces a close.
  ///
  /// Pending flags are cleared except for work that failed: deferred
  /// attributes rejected by some instance stay queued, and `regenerate` stays
  /// set after a failed regeneration. `close_endpoints` is cleared once the
  /// sweep ran.
  pub fn update(&self) -> UpdateReport {
    let mut state = self.state.lock();
    let mut report = UpdateReport::default();

    if !state.flags.changed && state.deferred.is_empty() {
      return report;
    }

    let instances = self.registry.snapshot();
    let deferred = std::mem::take(&mut state.deferred);
    let mut retry: BTreeMap<&'static str, A> = BTreeMap::new();
    let mut close_all = false;

    for instance in &instances {
      let mut synced = false;
      for (name, attribute) in &deferred {
        match push::<C, A, I>(instance, attribute) {
          Ok(true) => synced = true,
          Ok(false) => {}
          Err(err) => {
            warn!(instance = %instance.instance_id(), error = %err, "failed to sync deferred attribute");
            report.failures.push(err);
            retry.entry(*name).or_insert_with(|| attribute.clone());
          }
        }
      }
      if synced {
        report.synced += 1;
        close_all = true;
      }
    }

    let mut regenerate_failed = false;
    if state.flags.regenerate {
      for instance in &instances {
        match instance.regenerate(&state.config) {
          Ok(true) => report.regenerated += 1,
          Ok(false) => {}
          Err(err) => {
            warn!(instance = %instance.instance_id(), error = %err, "failed to regenerate instance");
            report.failures.push(err);
            regenerate_failed = true;
          }
        }
      }
    }

    let close_through = state.close_through.filter(|_| state.flags.close_endpoints);
    for instance in &instances {
      let predates = close_through.is_some_and(|last| instance.instance_id() <= last);
      if close_all || predates {
        instance.close_referenced_endpoints();
        report.closed += 1;
      }
    }

    state.deferred = retry;
    state.close_through = None;
    state.flags = PendingUpdateFlags {
      changed: regenerate_failed || !state.deferred.is_empty(),
      close_endpoints: false,
      regenerate: regenerate_failed,
    };

    info!(
      live = instances.len(),
      synced = report.synced,
      regenerated = report.regenerated,
      closed = report.closed,
      pending = state.deferred.len(),
      "attribute update complete"
    );
    report
  }

  fn broadcast(&self, attribute: &A, updated: &mut usize, failures: &mut Vec<AttributeError>) {
    for instance in self.registry.snapshot() {
      match push::<C, A, I>(&instance, attribute) {
        Ok(true) => *updated += 1,
        Ok(false) => {}
        Err(err) => {
          warn!(
            instance = %instance.instance_id(),
            attribute = attribute.name(),
            error = %err,
            "failed to apply attribute to live instance"
          );
          failures.push(err);
        }
      }
    }
  }
}

fn push<C, A, I>(instance: &I, attribute: &A) -> Result<bool, AttributeError>
where
  A: DynamicAttribute<C>,
  I: LiveInstance<C> + ?Sized,
{
  instance.reconfigure(&mut |config: &mut C| {
    if attribute.is_applied(config) {
      false
    } else {
      attribute.apply_to(config);
      true
    }
  })
}

impl<C, A, I: ?Sized> std::fmt::Debug for AttributePropagator<C, A, I> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let flags = self.state.lock().flags;
    f.debug_struct("AttributePropagator")
      .field("flags", &flags)
      .field("registry", &self.registry)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

  use tracing_test::traced_test;

  use super::*;

  #[derive(Debug, Clone, Default, PartialEq)]
  struct Config {
    header_size: u32,
    priority: i32,
    output_buffer: u32,
    h2c: bool,
    chain: Vec<String>,
  }

  #[derive(Debug, Clone)]
  enum Attr {
    HeaderSize(u32),
    Priority(i32),
    OutputBuffer(u32),
    H2c(bool),
    Chain(Vec<String>),
  }

  impl DynamicAttribute<Config> for Attr {
    fn name(&self) -> &'static str {
      match self {
        Attr::HeaderSize(_) => "headerSize",
        Attr::Priority(_) => "priority",
        Attr::OutputBuffer(_) => "outputBuffer",
        Attr::H2c(_) => "h2c",
        Attr::Chain(_) => "chain",
      }
    }

    fn class(&self) -> AttributeClass {
      match self {
        Attr::HeaderSize(_) | Attr::Chain(_) => AttributeClass::RequiresEndpointClose,
        Attr::Priority(_) => AttributeClass::Hot,
        Attr::OutputBuffer(_) => AttributeClass::Deferred,
        Attr::H2c(_) => AttributeClass::CreationOnly,
      }
    }

    fn apply_to(&self, config: &mut Config) {
      match self {
        Attr::HeaderSize(v) => config.header_size = *v,
        Attr::Priority(v) => config.priority = *v,
        Attr::OutputBuffer(v) => config.output_buffer = *v,
        Attr::H2c(v) => config.h2c = *v,
        Attr::Chain(v) => config.chain = v.clone(),
      }
    }

    fn is_applied(&self, config: &Config) -> bool {
      match self {
        Attr::HeaderSize(v) => config.header_size == *v,
        Attr::Priority(v) => config.priority == *v,
        Attr::OutputBuffer(v) => config.output_buffer == *v,
        Attr::H2c(v) => config.h2c == *v,
        Attr::Chain(v) => &config.chain == v,
      }
    }

    fn marks_regeneration(&self) -> bool {
      matches!(self, Attr::Chain(_))
    }
  }

  struct Instance {
    id: InstanceId,
    config: Mutex<Config>,
    closes: AtomicUsize,
    regenerations: AtomicUsize,
    /// Chain the instance was last built from.
    built: Mutex<Vec<String>>,
    reject: AtomicBool,
  }

  impl EndpointCloseable for Instance {
    fn close_referenced_endpoints(&self) {
      self.closes.fetch_add(1, Ordering::SeqCst);
    }
  }

  impl LiveInstance<Config> for Instance {
    fn instance_id(&self) -> InstanceId {
      self.id
    }

    fn reconfigure(&self, change: &mut dyn FnMut(&mut Config) -> bool) -> Result<bool, AttributeError> {
      if self.reject.load(Ordering::SeqCst) {
        return Err(AttributeError::Rejected {
          instance: self.id,
          attribute: "any",
          message: "read-only".to_string(),
        });
      }
      Ok(change(&mut self.config.lock()))
    }

    fn regenerate(&self, config: &Config) -> Result<bool, AttributeError> {
      if self.reject.load(Ordering::SeqCst) {
        return Err(AttributeError::Regenerate {
          instance: self.id,
          message: "read-only".to_string(),
        });
      }
      let mut built = self.built.lock();
      if *built == config.chain {
        return Ok(false);
      }
      *built = config.chain.clone();
      self.regenerations.fetch_add(1, Ordering::SeqCst);
      Ok(true)
    }
  }

  type Propagator = AttributePropagator<Config, Attr, Instance>;

  fn spawn(propagator: &Propagator, reject: bool) -> Arc<Instance> {
    propagator
      .create_instance(|config| {
        Ok::<_, AttributeError>(Arc::new(Instance {
          id: InstanceId::next(),
          config: Mutex::new(config.clone()),
          closes: AtomicUsize::new(0),
          regenerations: AtomicUsize::new(0),
          built: Mutex::new(config.chain.clone()),
          reject: AtomicBool::new(reject),
        }))
      })
      .unwrap()
  }

  #[test]
  fn burst_of_changes_closes_endpoints_once() {
    let propagator = Propagator::new(Config::default());
    let a = spawn(&propagator, false);
    let b = spawn(&propagator, false);

    for size in [1024, 2048, 4096] {
      let report = propagator.apply_attribute(Attr::HeaderSize(size));
      assert_eq!(report.effect, ApplyEffect::RequiresEndpointClose);
      assert_eq!(report.updated, 2);
    }
    assert_eq!(a.closes.load(Ordering::SeqCst), 0);

    let report = propagator.update();
    assert_eq!(report.closed, 2);
    assert_eq!(a.closes.load(Ordering::SeqCst), 1);
    assert_eq!(b.closes.load(Ordering::SeqCst), 1);
    assert_eq!(a.config.lock().header_size, 4096);

    assert!(propagator.update().is_noop());
    assert_eq!(a.closes.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn hot_attribute_does_not_disrupt() {
    let propagator = Propagator::new(Config::default());
    let a = spawn(&propagator, false);

    let report = propagator.apply_attribute(Attr::Priority(3));
    assert_eq!(report.effect, ApplyEffect::HotApplied);
    assert_eq!(a.config.lock().priority, 3);

    let report = propagator.update();
    assert_eq!(report.closed, 0);
    assert_eq!(a.closes.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn deferred_attribute_syncs_on_update_and_forces_close() {
    let propagator = Propagator::new(Config::default());
    let a = spawn(&propagator, false);

    let report = propagator.apply_attribute(Attr::OutputBuffer(65536));
    assert_eq!(report.effect, ApplyEffect::Deferred);
    assert_eq!(report.updated, 0);
    assert_eq!(a.config.lock().output_buffer, 0);
    assert_eq!(propagator.config().output_buffer, 65536);

    let report = propagator.update();
    assert_eq!(report.synced, 1);
    assert_eq!(report.closed, 1);
    assert_eq!(a.config.lock().output_buffer, 65536);
  }

  #[test]
  fn deferred_attribute_already_in_sync_does_not_close() {
    let propagator = Propagator::new(Config::default());
    let a = spawn(&propagator, false);

    propagator.apply_attribute(Attr::OutputBuffer(0));
    let report = propagator.update();
    assert_eq!(report.synced, 0);
    assert_eq!(report.closed, 0);
    assert_eq!(a.closes.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn creation_only_attribute_affects_new_instances() {
    let propagator = Propagator::new(Config::default());
    let old = spawn(&propagator, false);

    let report = propagator.apply_attribute(Attr::H2c(true));
    assert_eq!(report.effect, ApplyEffect::CreationOnly);
    let new = spawn(&propagator, false);

    assert!(!old.config.lock().h2c);
    assert!(new.config.lock().h2c);
    propagator.update();
    assert_eq!(old.closes.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn regeneration_precedes_sweep() {
    let propagator = Propagator::new(Config::default());
    let a = spawn(&propagator, false);

    propagator.apply_attribute(Attr::Chain(vec!["http/1.1".to_string()]));
    assert!(propagator.pending_flags().regenerate);

    let report = propagator.update();
    assert_eq!(report.regenerated, 1);
    assert_eq!(report.closed, 1);
    assert_eq!(a.regenerations.load(Ordering::SeqCst), 1);
    assert_eq!(propagator.pending_flags(), PendingUpdateFlags::default());
  }

  #[test]
  fn dropped_instances_are_not_touched() {
    let propagator = Propagator::new(Config::default());
    let a = spawn(&propagator, false);
    drop(spawn(&propagator, false));

    let report = propagator.apply_attribute(Attr::HeaderSize(10));
    assert_eq!(report.updated, 1);
    assert_eq!(propagator.update().closed, 1);
    assert_eq!(a.closes.load(Ordering::SeqCst), 1);
  }

  #[test]
  #[traced_test]
  fn failing_instance_does_not_stop_the_broadcast() {
    let propagator = Propagator::new(Config::default());
    let _bad = spawn(&propagator, true);
    let good = spawn(&propagator, false);

    let report = propagator.apply_attribute(Attr::HeaderSize(512));
    assert_eq!(report.updated, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(good.config.lock().header_size, 512);
    assert!(logs_contain("failed to apply attribute to live instance"));
  }

  #[test]
  fn rejected_deferred_attribute_is_retried_on_next_update() {
    let propagator = Propagator::new(Config::default());
    let a = spawn(&propagator, true);

    propagator.apply_attribute(Attr::OutputBuffer(4096));
    let report = propagator.update();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.synced, 0);
    assert!(propagator.pending_flags().changed);

    a.reject.store(false, Ordering::SeqCst);
    let report = propagator.update();
    assert_eq!(report.synced, 1);
    assert_eq!(report.closed, 1);
    assert!(report.failures.is_empty());
    assert_eq!(a.config.lock().output_buffer, 4096);

    assert!(propagator.update().is_noop());
    assert_eq!(propagator.pending_flags(), PendingUpdateFlags::default());
  }

  #[test]
  fn retry_only_resyncs_the_instance_that_missed_it() {
    let propagator = Propagator::new(Config::default());
    let bad = spawn(&propagator, true);
    let good = spawn(&propagator, false);

    propagator.apply_attribute(Attr::OutputBuffer(2048));
    let report = propagator.update();
    assert_eq!(report.synced, 1);
    assert_eq!(good.closes.load(Ordering::SeqCst), 1);

    bad.reject.store(false, Ordering::SeqCst);
    let report = propagator.update();
    assert_eq!(report.synced, 1);
    assert_eq!(bad.config.lock().output_buffer, 2048);
  }

  #[test]
  fn newer_value_replaces_a_pending_retry() {
    let propagator = Propagator::new(Config::default());
    let a = spawn(&propagator, true);

    propagator.apply_attribute(Attr::OutputBuffer(1024));
    propagator.update();
    propagator.apply_attribute(Attr::OutputBuffer(8192));

    a.reject.store(false, Ordering::SeqCst);
    propagator.update();
    assert_eq!(a.config.lock().output_buffer, 8192);
  }

  #[test]
  fn failed_regeneration_stays_pending() {
    let propagator = Propagator::new(Config::default());
    let a = spawn(&propagator, true);

    propagator.apply_attribute(Attr::Chain(vec!["h2c".to_string()]));
    let report = propagator.update();
    assert_eq!(report.regenerated, 0);
    assert_eq!(report.failures.len(), 1);
    assert!(propagator.pending_flags().regenerate);
    assert!(!propagator.pending_flags().close_endpoints);

    a.reject.store(false, Ordering::SeqCst);
    let report = propagator.update();
    assert_eq!(report.regenerated, 1);
    assert_eq!(a.regenerations.load(Ordering::SeqCst), 1);
    assert_eq!(propagator.pending_flags(), PendingUpdateFlags::default());
  }

  #[test]
  fn instances_created_after_a_close_change_keep_their_endpoints() {
    let propagator = Propagator::new(Config::default());
    let old = spawn(&propagator, false);
    propagator.apply_attribute(Attr::HeaderSize(2048));
    let fresh = spawn(&propagator, false);
    assert_eq!(fresh.config.lock().header_size, 2048);

    let report = propagator.update();
    assert_eq!(report.closed, 1);
    assert_eq!(old.closes.load(Ordering::SeqCst), 1);
    assert_eq!(fresh.closes.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn instance_built_from_the_new_chain_is_not_regenerated() {
    let propagator = Propagator::new(Config::default());
    let old = spawn(&propagator, false);
    propagator.apply_attribute(Attr::Chain(vec!["h2c".to_string()]));
    let fresh = spawn(&propagator, false);

    let report = propagator.update();
    assert_eq!(report.regenerated, 1);
    assert_eq!(old.regenerations.load(Ordering::SeqCst), 1);
    assert_eq!(fresh.regenerations.load(Ordering::SeqCst), 0);
  }
}
