//! In-memory server engine and service registry.
//!
//! [`SimulatedEngine`] implements [`ServerEngine`] over the concrete
//! factories of this crate without opening sockets. Every lifecycle step is
//! appended to a shared [`EngineLog`], and a [`SimulatedHost`] can mark ports
//! as occupied or make stops fail so supervisors can be driven through their
//! failure paths.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::clause::Attributes;
use crate::factory::{ServerConnector, ServletContextHandler};
use crate::id::InstanceId;
use crate::lifecycle::LifecycleError;
use crate::supervisor::{RegistrationId, ServerEngine, ServiceRegistry};

/// One recorded engine step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
  ConnectorAdded {
    connector: InstanceId,
    host: Option<String>,
    port: u16,
  },
  ConnectorStarted {
    connector: InstanceId,
    port: u16,
  },
  ConnectorRemoved {
    connector: InstanceId,
  },
  HandlersPublished {
    handlers: Vec<InstanceId>,
  },
  HandlerStarted {
    handler: InstanceId,
  },
  HandlerStopped {
    handler: InstanceId,
  },
  ContextPathChanged {
    handler: InstanceId,
    context_path: String,
  },
  Started,
  Stopped,
  Destroyed,
}

/// Shared, append-only record of engine events.
#[derive(Debug, Clone, Default)]
pub struct EngineLog(Arc<Mutex<Vec<EngineEvent>>>);

impl EngineLog {
  pub fn events(&self) -> Vec<EngineEvent> {
    self.0.lock().clone()
  }

  pub fn clear(&self) {
    self.0.lock().clear();
  }

  pub fn count(&self, predicate: impl Fn(&EngineEvent) -> bool) -> usize {
    self.0.lock().iter().filter(|e| predicate(e)).count()
  }

  fn push(&self, event: EngineEvent) {
    debug!(?event, "engine event");
    self.0.lock().push(event);
  }
}

/// Environment shared by every engine a supervisor creates.
#[derive(Debug, Clone, Default)]
pub struct SimulatedHost {
  log: EngineLog,
  occupied: Arc<Mutex<BTreeSet<u16>>>,
  fail_stop: Arc<AtomicBool>,
}

impl SimulatedHost {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn log(&self) -> &EngineLog {
    &self.log
  }

  /// Ports that connectors fail to bind.
  pub fn occupy(&self, port: u16) {
    self.occupied.lock().insert(port);
  }

  pub fn release(&self, port: u16) {
    self.occupied.lock().remove(&port);
  }

  /// Make engine, connector and handler stops report a failure. The stop
  /// itself still takes effect.
  pub fn fail_stops(&self, fail: bool) {
    self.fail_stop.store(fail, Ordering::SeqCst);
  }

  pub fn engine(&self) -> SimulatedEngine {
    SimulatedEngine {
      host: self.clone(),
      started: false,
      connectors: Vec::new(),
      started_connectors: HashSet::new(),
      handlers: Vec::new(),
      started_handlers: HashSet::new(),
    }
  }

  /// Engine constructor for [`ServerSupervisor::new`](crate::supervisor::ServerSupervisor::new).
  pub fn engine_factory(&self) -> impl Fn() -> SimulatedEngine + Send + 'static {
    let host = self.clone();
    move || host.engine()
  }
}

pub struct SimulatedEngine {
  host: SimulatedHost,
  started: bool,
  connectors: Vec<Arc<ServerConnector>>,
  started_connectors: HashSet<InstanceId>,
  handlers: Vec<Arc<ServletContextHandler>>,
  started_handlers: HashSet<InstanceId>,
}

impl SimulatedEngine {
  pub fn connectors(&self) -> &[Arc<ServerConnector>] {
    &self.connectors
  }

  pub fn handlers(&self) -> &[Arc<ServletContextHandler>] {
    &self.handlers
  }

  pub fn is_connector_started(&self, connector: &ServerConnector) -> bool {
    self.started_connectors.contains(&connector.id())
  }

  /// Ports bound by started connectors.
  pub fn bound_ports(&self) -> Vec<u16> {
    let mut ports: Vec<u16> = self
      .connectors
      .iter()
      .filter(|c| self.started_connectors.contains(&c.id()))
      .map(|c| c.port())
      .collect();
    ports.sort_unstable();
    ports
  }

  fn bind(&mut self, connector: &ServerConnector) -> Result<(), LifecycleError> {
    let port = connector.port();
    if port != 0 {
      let taken_here = self
        .connectors
        .iter()
        .any(|c| c.id() != connector.id() && c.port() == port && self.started_connectors.contains(&c.id()));
      if taken_here || self.host.occupied.lock().contains(&port) {
        return Err(LifecycleError::start(
          format!("connector {}", connector.id()),
          format!("port {} already in use", port),
        ));
      }
    }
    self.started_connectors.insert(connector.id());
    self.host.log.push(EngineEvent::ConnectorStarted {
      connector: connector.id(),
      port,
    });
    Ok(())
  }

  fn stop_result(&self, resource: String) -> Result<(), LifecycleError> {
    if self.host.fail_stop.load(Ordering::SeqCst) {
      return Err(LifecycleError::stop(resource, "simulated stop failure"));
    }
    Ok(())
  }
}

impl std::fmt::Debug for SimulatedEngine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SimulatedEngine")
      .field("started", &self.started)
      .field("connectors", &self.connectors.len())
      .field("handlers", &self.handlers.len())
      .finish()
  }
}

impl ServerEngine for SimulatedEngine {
  type Connector = Arc<ServerConnector>;
  type Handler = Arc<ServletContextHandler>;

  fn add_connector(&mut self, connector: &Self::Connector) -> Result<(), LifecycleError> {
    self.connectors.push(Arc::clone(connector));
    self.host.log.push(EngineEvent::ConnectorAdded {
      connector: connector.id(),
      host: connector.host().map(str::to_string),
      port: connector.port(),
    });
    Ok(())
  }

  fn start_connector(&mut self, connector: &Self::Connector) -> Result<(), LifecycleError> {
    if self.started_connectors.contains(&connector.id()) {
      return Ok(());
    }
    self.bind(connector)
  }

  fn remove_connector(&mut self, connector: &Self::Connector) -> Result<(), LifecycleError> {
    self.started_connectors.remove(&connector.id());
    self.connectors.retain(|c| c.id() != connector.id());
    self.host.log.push(EngineEvent::ConnectorRemoved {
      connector: connector.id(),
    });
    self.stop_result(format!("connector {}", connector.id()))
  }

  fn set_handlers(&mut self, handlers: &[Self::Handler]) {
    self.handlers = handlers.to_vec();
    self.host.log.push(EngineEvent::HandlersPublished {
      handlers: handlers.iter().map(|h| h.id()).collect(),
    });
  }

  fn start_handler(&mut self, handler: &Self::Handler) -> Result<(), LifecycleError> {
    if self.started_handlers.insert(handler.id()) {
      self.host.log.push(EngineEvent::HandlerStarted { handler: handler.id() });
    }
    Ok(())
  }

  fn stop_handler(&mut self, handler: &Self::Handler) -> Result<(), LifecycleError> {
    if self.started_handlers.remove(&handler.id()) {
      self.host.log.push(EngineEvent::HandlerStopped { handler: handler.id() });
    }
    self.stop_result(format!("context {}", handler.id()))
  }

  fn is_handler_started(&self, handler: &Self::Handler) -> bool {
    self.started_handlers.contains(&handler.id())
  }

  fn set_context_path(&mut self, handler: &Self::Handler, context_path: &str) {
    handler.set_context_path(context_path);
    self.host.log.push(EngineEvent::ContextPathChanged {
      handler: handler.id(),
      context_path: context_path.to_string(),
    });
  }

  fn start(&mut self) -> Result<(), LifecycleError> {
    self.started = true;
    for handler in self.handlers.clone() {
      self.start_handler(&handler)?;
    }
    for connector in self.connectors.clone() {
      self.start_connector(&connector)?;
    }
    self.host.log.push(EngineEvent::Started);
    info!(connectors = self.connectors.len(), handlers = self.handlers.len(), "engine started");
    Ok(())
  }

  fn stop(&mut self) -> Result<(), LifecycleError> {
    self.started = false;
    self.started_connectors.clear();
    self.started_handlers.clear();
    self.host.log.push(EngineEvent::Stopped);
    self.stop_result("server".to_string())
  }

  fn destroy(&mut self) {
    self.connectors.clear();
    self.handlers.clear();
    self.host.log.push(EngineEvent::Destroyed);
  }

  fn is_started(&self) -> bool {
    self.started
  }
}

/// Service registry that keeps registrations in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryServiceRegistry {
  registrations: Arc<Mutex<BTreeMap<u64, Attributes>>>,
  next_id: Arc<AtomicU64>,
  fail_register: Arc<AtomicBool>,
}

impl InMemoryServiceRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.registrations.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn fail_registrations(&self, fail: bool) {
    self.fail_register.store(fail, Ordering::SeqCst);
  }
}

impl ServiceRegistry for InMemoryServiceRegistry {
  fn register(&mut self, properties: &Attributes) -> Result<RegistrationId, LifecycleError> {
    if self.fail_register.load(Ordering::SeqCst) {
      return Err(LifecycleError::Register {
        resource: "server".to_string(),
        message: "registry unavailable".to_string(),
      });
    }
    let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    self.registrations.lock().insert(id, properties.clone());
    Ok(RegistrationId(id))
  }

  fn unregister(&mut self, registration: RegistrationId) {
    self.registrations.lock().remove(&registration.0);
  }
}
