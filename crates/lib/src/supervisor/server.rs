//! The server supervisor state machine.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::engine::{ServerEngine, ServiceRegistry};
use super::types::{
  ConnectorClause, ConnectorSpec, ContextClause, ContextSpec, ReconcileSummary, RegistrationId, SupervisorError,
  SupervisorState, resolve_connectors, resolve_contexts,
};
use crate::clause::Attributes;
use crate::key::ResourceKey;
use crate::lifecycle::LifecycleError;
use crate::reconcile::reconcile;

struct RealizedContext<H> {
  handler: H,
  context_path: String,
}

struct Inner<E: ServerEngine> {
  state: SupervisorState,
  make_engine: Box<dyn Fn() -> E + Send>,
  engine: Option<E>,
  registry: Box<dyn ServiceRegistry>,
  registration: Option<RegistrationId>,
  properties: Attributes,

  declared_connectors: Vec<(ResourceKey, ConnectorSpec<E::Connector>)>,
  declared_contexts: Vec<(ResourceKey, ContextSpec<E::Handler>)>,

  connectors: HashMap<ResourceKey, E::Connector>,
  contexts: HashMap<ResourceKey, RealizedContext<E::Handler>>,
  /// Context keys in published order.
  context_order: Vec<ResourceKey>,
}

/// Owns one server: its engine, listeners and context handlers.
///
/// All operations take one lock, so configuration deliveries for the two
/// slots and lifecycle calls never interleave.
pub struct ServerSupervisor<E: ServerEngine> {
  inner: Mutex<Inner<E>>,
}

impl<E: ServerEngine> ServerSupervisor<E> {
  /// `make_engine` is called on every activation.
  pub fn new(make_engine: impl Fn() -> E + Send + 'static, registry: impl ServiceRegistry + 'static) -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: SupervisorState::Inactive,
        make_engine: Box::new(make_engine),
        engine: None,
        registry: Box::new(registry),
        registration: None,
        properties: Attributes::new(),
        declared_connectors: Vec::new(),
        declared_contexts: Vec::new(),
        connectors: HashMap::new(),
        contexts: HashMap::new(),
        context_order: Vec::new(),
      }),
    }
  }

  /// Properties published with the external registration.
  pub fn with_properties(self, properties: Attributes) -> Self {
    self.inner.lock().properties = properties;
    self
  }

  pub fn state(&self) -> SupervisorState {
    self.inner.lock().state
  }

  pub fn connector_count(&self) -> usize {
    self.inner.lock().connectors.len()
  }

  pub fn context_count(&self) -> usize {
    self.inner.lock().contexts.len()
  }

  pub fn connectors(&self) -> Vec<E::Connector> {
    self.inner.lock().connectors.values().cloned().collect()
  }

  /// Realized context handlers in published order.
  pub fn handlers(&self) -> Vec<E::Handler> {
    let inner = self.inner.lock();
    inner.published_handlers()
  }

  pub fn is_registered(&self) -> bool {
    self.inner.lock().registration.is_some()
  }

  /// Inspect the current engine, if one exists.
  pub fn with_engine<R>(&self, f: impl FnOnce(&E) -> R) -> Option<R> {
    self.inner.lock().engine.as_ref().map(f)
  }

  /// Create the engine, realize declared resources, start, then register.
  ///
  /// Any failure unwinds synchronously and leaves the supervisor `Failed`.
  pub fn activate(&self) -> Result<(), SupervisorError> {
    let mut inner = self.inner.lock();
    if inner.state != SupervisorState::Inactive {
      return Err(SupervisorError::InvalidState {
        operation: "activate",
        state: inner.state,
      });
    }

    inner.state = SupervisorState::Starting;
    info!(
      connectors = inner.declared_connectors.len(),
      contexts = inner.declared_contexts.len(),
      "activating server"
    );

    let engine = (inner.make_engine)();
    inner.engine = Some(engine);

    match inner.start_all() {
      Ok(()) => {
        inner.state = SupervisorState::Running;
        info!(
          connectors = inner.connectors.len(),
          contexts = inner.contexts.len(),
          "server running"
        );
        Ok(())
      }
      Err(err) => {
        inner.fail(&err);
        Err(err.into())
      }
    }
  }

  /// Deliver the complete connector clause set.
  ///
  /// Clauses are resolved before anything is stored. While running, the
  /// change is reconciled immediately; otherwise it is kept for the next
  /// activation. Stale resources that fail to stop are detached anyway and
  /// returned in [`ReconcileSummary::failures`].
  pub fn set_connector_clauses(
    &self,
    clauses: &[ConnectorClause<E::Connector>],
  ) -> Result<ReconcileSummary, SupervisorError> {
    let declared = resolve_connectors(clauses)?;
    let mut inner = self.inner.lock();
    inner.declared_connectors = declared;

    if inner.state != SupervisorState::Running {
      debug!(state = %inner.state, count = clauses.len(), "stored connector clauses");
      return Ok(ReconcileSummary::default());
    }

    match inner.reconcile_connectors() {
      Ok(summary) => {
        info!(
          created = summary.created,
          removed = summary.removed,
          retained = summary.retained,
          failures = summary.failures.len(),
          "reconciled connectors"
        );
        Ok(summary)
      }
      Err(err) => {
        inner.fail(&err);
        Err(err.into())
      }
    }
  }

  /// Deliver the complete context clause set.
  pub fn set_context_clauses(&self, clauses: &[ContextClause<E::Handler>]) -> Result<ReconcileSummary, SupervisorError> {
    let declared = resolve_contexts(clauses)?;
    let mut inner = self.inner.lock();
    inner.declared_contexts = declared;

    if inner.state != SupervisorState::Running {
      debug!(state = %inner.state, count = clauses.len(), "stored context clauses");
      return Ok(ReconcileSummary::default());
    }

    match inner.reconcile_contexts() {
      Ok(summary) => {
        info!(
          created = summary.created,
          removed = summary.removed,
          retained = summary.retained,
          updated = summary.updated,
          failures = summary.failures.len(),
          "reconciled contexts"
        );
        Ok(summary)
      }
      Err(err) => {
        inner.fail(&err);
        Err(err.into())
      }
    }
  }

  /// Unregister, stop and release the server.
  ///
  /// Always ends `Inactive` (or stays `Failed`). Stop failures are returned
  /// as [`SupervisorError::UncleanStop`] after the teardown completed.
  pub fn deactivate(&self) -> Result<(), SupervisorError> {
    let mut inner = self.inner.lock();
    match inner.state {
      SupervisorState::Inactive | SupervisorState::Failed => return Ok(()),
      SupervisorState::Running => {}
      state => {
        return Err(SupervisorError::InvalidState {
          operation: "deactivate",
          state,
        });
      }
    }

    inner.state = SupervisorState::Stopping;
    info!("deactivating server");

    let failures = inner.teardown();
    inner.state = SupervisorState::Inactive;

    if failures.is_empty() {
      info!("server stopped");
      Ok(())
    } else {
      for failure in &failures {
        warn!(error = %failure, "server did not stop cleanly");
      }
      Err(SupervisorError::UncleanStop { failures })
    }
  }
}

impl<E: ServerEngine> std::fmt::Debug for ServerSupervisor<E> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let inner = self.inner.lock();
    f.debug_struct("ServerSupervisor")
      .field("state", &inner.state)
      .field("connectors", &inner.connectors.len())
      .field("contexts", &inner.contexts.len())
      .field("registered", &inner.registration.is_some())
      .finish()
  }
}

impl<E: ServerEngine> Inner<E> {
  fn engine(&mut self) -> Result<&mut E, LifecycleError> {
    self
      .engine
      .as_mut()
      .ok_or_else(|| LifecycleError::start("server", "no engine"))
  }

  fn published_handlers(&self) -> Vec<E::Handler> {
    self
      .context_order
      .iter()
      .filter_map(|key| self.contexts.get(key).map(|c| c.handler.clone()))
      .collect()
  }

  fn start_all(&mut self) -> Result<(), LifecycleError> {
    for (key, spec) in first_occurrences(&self.declared_contexts) {
      let handler = spec.factory.create_handler(&spec.context_path)?;
      debug!(context = %key, path = %spec.context_path, "realized context");
      self.context_order.push(key.clone());
      self.contexts.insert(
        key,
        RealizedContext {
          handler,
          context_path: spec.context_path,
        },
      );
    }
    let handlers = self.published_handlers();
    self.engine()?.set_handlers(&handlers);

    for (key, spec) in first_occurrences(&self.declared_connectors) {
      let connector = spec.factory.create_connector(spec.host.as_deref(), spec.port)?;
      self.engine()?.add_connector(&connector)?;
      debug!(connector = %key, "realized connector");
      self.connectors.insert(key, connector);
    }

    self.engine()?.start()?;

    let registration = self.registry.register(&self.properties)?;
    self.registration = Some(registration);
    Ok(())
  }

  fn reconcile_connectors(&mut self) -> Result<ReconcileSummary, LifecycleError> {
    let previous = std::mem::take(&mut self.connectors);
    let result = reconcile(previous, self.declared_connectors.clone());

    let mut summary = ReconcileSummary {
      created: result.to_create.len(),
      removed: result.to_remove.len(),
      retained: result.retained.len(),
      ..ReconcileSummary::default()
    };
    self.connectors = result.retained;

    for (key, connector) in result.to_remove {
      match self.engine()?.remove_connector(&connector) {
        Ok(()) => debug!(connector = %key, "removed connector"),
        Err(err) => {
          warn!(connector = %key, error = %err, "stale connector did not stop cleanly");
          summary.failures.push(err);
        }
      }
    }

    for (key, spec) in result.to_create {
      let connector = spec.factory.create_connector(spec.host.as_deref(), spec.port)?;
      self.engine()?.add_connector(&connector)?;
      // Tracked before starting so a start failure unwinds it too.
      self.connectors.insert(key.clone(), connector.clone());
      self.engine()?.start_connector(&connector)?;
      debug!(connector = %key, "started connector");
    }

    Ok(summary)
  }

  fn reconcile_contexts(&mut self) -> Result<ReconcileSummary, LifecycleError> {
    let previous = std::mem::take(&mut self.contexts);
    let result = reconcile(previous, self.declared_contexts.clone());

    let mut summary = ReconcileSummary {
      created: result.to_create.len(),
      removed: result.to_remove.len(),
      retained: result.retained.len(),
      ..ReconcileSummary::default()
    };
    self.contexts = result.retained;

    // Context path drift on retained entries.
    let declared = first_occurrences(&self.declared_contexts);
    for (key, spec) in &declared {
      let handler = match self.contexts.get_mut(key) {
        Some(realized) if realized.context_path != spec.context_path => {
          realized.context_path = spec.context_path.clone();
          realized.handler.clone()
        }
        _ => continue,
      };
      self.engine()?.set_context_path(&handler, &spec.context_path);
      summary.updated += 1;
      debug!(context = %key, path = %spec.context_path, "updated context path");
    }

    let mut created = Vec::with_capacity(result.to_create.len());
    for (key, spec) in result.to_create {
      let handler = spec.factory.create_handler(&spec.context_path)?;
      created.push(handler.clone());
      self.contexts.insert(
        key,
        RealizedContext {
          handler,
          context_path: spec.context_path,
        },
      );
    }

    // Stale handlers leave the published list before they are stopped.
    self.context_order = declared.into_iter().map(|(key, _)| key).collect();
    let handlers = self.published_handlers();
    self.engine()?.set_handlers(&handlers);

    for (key, realized) in result.to_remove {
      match self.engine()?.stop_handler(&realized.handler) {
        Ok(()) => debug!(context = %key, "stopped context"),
        Err(err) => {
          warn!(context = %key, error = %err, "stale context did not stop cleanly");
          summary.failures.push(err);
        }
      }
    }

    for handler in created {
      let engine = self.engine()?;
      if !engine.is_handler_started(&handler) {
        engine.start_handler(&handler)?;
      }
    }

    Ok(summary)
  }

  /// Unregister, stop, destroy and forget every realized resource.
  /// Returns the stop failures encountered on the way.
  fn teardown(&mut self) -> Vec<LifecycleError> {
    let mut failures = Vec::new();

    if let Some(registration) = self.registration.take() {
      self.registry.unregister(registration);
    }

    if let Some(mut engine) = self.engine.take() {
      if engine.is_started() {
        if let Err(err) = engine.stop() {
          failures.push(err);
        }
      }
      engine.destroy();
    }

    self.connectors.clear();
    self.contexts.clear();
    self.context_order.clear();
    failures
  }

  fn fail(&mut self, cause: &LifecycleError) {
    error!(error = %cause, state = %self.state, "server failed, unwinding");
    for failure in self.teardown() {
      warn!(error = %failure, "unwind did not stop cleanly");
    }
    self.state = SupervisorState::Failed;
  }
}

/// Declared entries with later duplicates of a key dropped.
fn first_occurrences<S: Clone>(declared: &[(ResourceKey, S)]) -> Vec<(ResourceKey, S)> {
  let mut seen = HashSet::with_capacity(declared.len());
  declared
    .iter()
    .filter(|(key, _)| seen.insert(key.clone()))
    .cloned()
    .collect()
}
