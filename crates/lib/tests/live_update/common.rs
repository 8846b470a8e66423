//! Shared helpers for live update tests.

use std::sync::Arc;

use keel_lib::clause::{Clause, ServiceClause};
use keel_lib::factory::{ServerConnector, ServerConnectorFactory, ServletContextHandler, ServletContextHandlerFactory};
use keel_lib::sim::{EngineEvent, InMemoryServiceRegistry, SimulatedEngine, SimulatedHost};
use keel_lib::supervisor::{ConnectorClause, ConnectorFactory, ContextClause, ContextFactory, ServerSupervisor};

/// A supervisor on the simulated engine with one connector factory and one
/// context factory.
pub struct Harness {
  pub host: SimulatedHost,
  pub registry: InMemoryServiceRegistry,
  pub supervisor: ServerSupervisor<SimulatedEngine>,
  pub connector_factory: Arc<ServerConnectorFactory>,
  pub context_factory: Arc<ServletContextHandlerFactory>,
}

impl Harness {
  pub fn new() -> Self {
    let host = SimulatedHost::new();
    let registry = InMemoryServiceRegistry::new();
    let supervisor = ServerSupervisor::new(host.engine_factory(), registry.clone());
    Self {
      host,
      registry,
      supervisor,
      connector_factory: Arc::new(ServerConnectorFactory::default()),
      context_factory: Arc::new(ServletContextHandlerFactory::default()),
    }
  }

  pub fn connector(&self, name: &str, port: u16) -> ConnectorClause<Arc<ServerConnector>> {
    let service: Arc<dyn ConnectorFactory<Arc<ServerConnector>>> = self.connector_factory.clone();
    ServiceClause::new(Clause::new(name, service.service_id()).with_attribute("port", port), service)
  }

  pub fn connector_on(&self, name: &str, host: &str, port: u16) -> ConnectorClause<Arc<ServerConnector>> {
    let mut clause = self.connector(name, port);
    clause.clause = clause.clause.with_attribute("host", host);
    clause
  }

  pub fn context(&self, name: &str, path: &str) -> ContextClause<Arc<ServletContextHandler>> {
    let service: Arc<dyn ContextFactory<Arc<ServletContextHandler>>> = self.context_factory.clone();
    ServiceClause::new(
      Clause::new(name, service.service_id()).with_attribute("contextPath", path),
      service,
    )
  }

  /// Ports of started connectors, or empty without an engine.
  pub fn bound_ports(&self) -> Vec<u16> {
    self.supervisor.with_engine(|e| e.bound_ports()).unwrap_or_default()
  }

  pub fn connector_on_port(&self, port: u16) -> Arc<ServerConnector> {
    self
      .supervisor
      .connectors()
      .into_iter()
      .find(|c| c.port() == port)
      .unwrap_or_else(|| panic!("no connector on port {}", port))
  }

  pub fn count_events(&self, predicate: impl Fn(&EngineEvent) -> bool) -> usize {
    self.host.log().count(predicate)
  }
}
