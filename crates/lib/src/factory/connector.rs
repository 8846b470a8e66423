//! Server connectors and the factory that produces them.
//!
//! A connector listens on one (host, port) pair and owns a protocol chain:
//! one [`ConnectionFactory`] per configured [`ConnectionFactoryFactory`],
//! built back to front so every element knows which protocol follows it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::http::{HttpConfig, HttpConnectionFactory};
use crate::attribute::{
  ApplyReport, AttributeClass, AttributeError, AttributePropagator, DynamicAttribute, LiveInstance, UpdateReport,
};
use crate::consts::{DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_INHERIT_CHANNEL, DEFAULT_REUSE_ADDRESS};
use crate::id::{InstanceId, ServiceId};
use crate::lifecycle::{EndpointCloseable, LifecycleError};
use crate::supervisor::ConnectorFactory;

/// One element of a connector's protocol chain.
pub trait ConnectionFactory: EndpointCloseable + Send + Sync {
  fn protocol(&self) -> &str;

  /// Protocol of the element that follows this one in the chain.
  fn next_protocol(&self) -> Option<&str>;
}

/// A service that produces protocol chain elements.
pub trait ConnectionFactoryFactory: Send + Sync {
  fn service_id(&self) -> ServiceId;

  fn create_connection_factory(&self, next_protocol: Option<&str>) -> Arc<dyn ConnectionFactory>;
}

/// Settings of a server connector factory.
#[derive(Clone)]
pub struct ConnectorSettings {
  pub acceptor_priority_delta: i32,
  pub accept_queue_size: u32,
  /// Protocol chain, front to back. Empty means a default HTTP/1.1 element.
  pub connection_factory_factories: Vec<Arc<dyn ConnectionFactoryFactory>>,
  pub idle_timeout: Duration,
  pub inherit_channel: bool,
  pub name: Option<String>,
  pub reuse_address: bool,
}

impl Default for ConnectorSettings {
  fn default() -> Self {
    Self {
      acceptor_priority_delta: 0,
      accept_queue_size: 0,
      connection_factory_factories: Vec::new(),
      idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
      inherit_channel: DEFAULT_INHERIT_CHANNEL,
      name: None,
      reuse_address: DEFAULT_REUSE_ADDRESS,
    }
  }
}

impl ConnectorSettings {
  pub fn chain_services(&self) -> Vec<ServiceId> {
    self.connection_factory_factories.iter().map(|f| f.service_id()).collect()
  }

  /// Attributes that turn `self` into `other`.
  pub fn changes_to(&self, other: &ConnectorSettings) -> Vec<ConnectorAttribute> {
    ConnectorAttribute::all_of(other)
      .into_iter()
      .filter(|attribute| !attribute.is_applied(self))
      .collect()
  }
}

impl std::fmt::Debug for ConnectorSettings {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConnectorSettings")
      .field("acceptor_priority_delta", &self.acceptor_priority_delta)
      .field("accept_queue_size", &self.accept_queue_size)
      .field("connection_factory_factories", &self.chain_services())
      .field("idle_timeout", &self.idle_timeout)
      .field("inherit_channel", &self.inherit_channel)
      .field("name", &self.name)
      .field("reuse_address", &self.reuse_address)
      .finish()
  }
}

/// One settable attribute of a server connector factory.
#[derive(Clone)]
pub enum ConnectorAttribute {
  AcceptorPriorityDelta(i32),
  AcceptQueueSize(u32),
  ConnectionFactoryFactories(Vec<Arc<dyn ConnectionFactoryFactory>>),
  IdleTimeout(Duration),
  InheritChannel(bool),
  Name(Option<String>),
  ReuseAddress(bool),
}

impl ConnectorAttribute {
  pub fn all_of(settings: &ConnectorSettings) -> Vec<ConnectorAttribute> {
    vec![
      ConnectorAttribute::AcceptorPriorityDelta(settings.acceptor_priority_delta),
      ConnectorAttribute::AcceptQueueSize(settings.accept_queue_size),
      ConnectorAttribute::ConnectionFactoryFactories(settings.connection_factory_factories.clone()),
      ConnectorAttribute::IdleTimeout(settings.idle_timeout),
      ConnectorAttribute::InheritChannel(settings.inherit_channel),
      ConnectorAttribute::Name(settings.name.clone()),
      ConnectorAttribute::ReuseAddress(settings.reuse_address),
    ]
  }
}

impl std::fmt::Debug for ConnectorAttribute {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ConnectorAttribute::AcceptorPriorityDelta(v) => f.debug_tuple("AcceptorPriorityDelta").field(v).finish(),
      ConnectorAttribute::AcceptQueueSize(v) => f.debug_tuple("AcceptQueueSize").field(v).finish(),
      ConnectorAttribute::ConnectionFactoryFactories(v) => {
        let services: Vec<ServiceId> = v.iter().map(|f| f.service_id()).collect();
        f.debug_tuple("ConnectionFactoryFactories").field(&services).finish()
      }
      ConnectorAttribute::IdleTimeout(v) => f.debug_tuple("IdleTimeout").field(v).finish(),
      ConnectorAttribute::InheritChannel(v) => f.debug_tuple("InheritChannel").field(v).finish(),
      ConnectorAttribute::Name(v) => f.debug_tuple("Name").field(v).finish(),
      ConnectorAttribute::ReuseAddress(v) => f.debug_tuple("ReuseAddress").field(v).finish(),
    }
  }
}

fn same_chain(a: &[Arc<dyn ConnectionFactoryFactory>], b: &[Arc<dyn ConnectionFactoryFactory>]) -> bool {
  a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.service_id() == y.service_id())
}

impl DynamicAttribute<ConnectorSettings> for ConnectorAttribute {
  fn name(&self) -> &'static str {
    match self {
      ConnectorAttribute::AcceptorPriorityDelta(_) => "acceptorPriorityDelta",
      ConnectorAttribute::AcceptQueueSize(_) => "acceptQueueSize",
      ConnectorAttribute::ConnectionFactoryFactories(_) => "connectionFactoryFactories",
      ConnectorAttribute::IdleTimeout(_) => "idleTimeout",
      ConnectorAttribute::InheritChannel(_) => "inheritChannel",
      ConnectorAttribute::Name(_) => "name",
      ConnectorAttribute::ReuseAddress(_) => "reuseAddress",
    }
  }

  fn class(&self) -> AttributeClass {
    match self {
      ConnectorAttribute::AcceptorPriorityDelta(_) => AttributeClass::Hot,
      ConnectorAttribute::ConnectionFactoryFactories(_) | ConnectorAttribute::IdleTimeout(_) => {
        AttributeClass::RequiresEndpointClose
      }
      ConnectorAttribute::AcceptQueueSize(_)
      | ConnectorAttribute::InheritChannel(_)
      | ConnectorAttribute::Name(_)
      | ConnectorAttribute::ReuseAddress(_) => AttributeClass::CreationOnly,
    }
  }

  fn apply_to(&self, settings: &mut ConnectorSettings) {
    match self {
      ConnectorAttribute::AcceptorPriorityDelta(v) => settings.acceptor_priority_delta = *v,
      ConnectorAttribute::AcceptQueueSize(v) => settings.accept_queue_size = *v,
      ConnectorAttribute::ConnectionFactoryFactories(v) => settings.connection_factory_factories = v.clone(),
      ConnectorAttribute::IdleTimeout(v) => settings.idle_timeout = *v,
      ConnectorAttribute::InheritChannel(v) => settings.inherit_channel = *v,
      ConnectorAttribute::Name(v) => settings.name = v.clone(),
      ConnectorAttribute::ReuseAddress(v) => settings.reuse_address = *v,
    }
  }

  fn is_applied(&self, settings: &ConnectorSettings) -> bool {
    match self {
      ConnectorAttribute::AcceptorPriorityDelta(v) => settings.acceptor_priority_delta == *v,
      ConnectorAttribute::AcceptQueueSize(v) => settings.accept_queue_size == *v,
      ConnectorAttribute::ConnectionFactoryFactories(v) => same_chain(&settings.connection_factory_factories, v),
      ConnectorAttribute::IdleTimeout(v) => settings.idle_timeout == *v,
      ConnectorAttribute::InheritChannel(v) => settings.inherit_channel == *v,
      ConnectorAttribute::Name(v) => &settings.name == v,
      ConnectorAttribute::ReuseAddress(v) => settings.reuse_address == *v,
    }
  }

  fn marks_regeneration(&self) -> bool {
    matches!(self, ConnectorAttribute::ConnectionFactoryFactories(_))
  }
}

/// Build a protocol chain back to front.
fn build_chain(factory_factories: &[Arc<dyn ConnectionFactoryFactory>]) -> Vec<Arc<dyn ConnectionFactory>> {
  if factory_factories.is_empty() {
    let default: Arc<dyn ConnectionFactory> = Arc::new(HttpConnectionFactory::new(HttpConfig::default(), None));
    return vec![default];
  }

  let mut chain: Vec<Arc<dyn ConnectionFactory>> = Vec::with_capacity(factory_factories.len());
  let mut next_protocol: Option<String> = None;
  for factory_factory in factory_factories.iter().rev() {
    let element = factory_factory.create_connection_factory(next_protocol.as_deref());
    next_protocol = Some(element.protocol().to_string());
    chain.push(element);
  }
  chain.reverse();
  chain
}

#[derive(Default)]
struct Chain {
  current: Vec<Arc<dyn ConnectionFactory>>,
  /// Services `current` was built from.
  built_from: Vec<ServiceId>,
  /// Elements replaced by a regeneration whose endpoints still need closing.
  retired: Vec<Arc<dyn ConnectionFactory>>,
}

/// A listener on one (host, port) pair.
pub struct ServerConnector {
  id: InstanceId,
  host: Option<String>,
  port: u16,
  settings: Mutex<ConnectorSettings>,
  chain: Mutex<Chain>,
}

impl ServerConnector {
  fn new(settings: ConnectorSettings, host: Option<&str>, port: u16) -> Self {
    let current = build_chain(&settings.connection_factory_factories);
    let built_from = settings.chain_services();
    Self {
      id: InstanceId::next(),
      host: host.map(str::to_string),
      port,
      settings: Mutex::new(settings),
      chain: Mutex::new(Chain {
        current,
        built_from,
        retired: Vec::new(),
      }),
    }
  }

  pub fn id(&self) -> InstanceId {
    self.id
  }

  pub fn host(&self) -> Option<&str> {
    self.host.as_deref()
  }

  pub fn port(&self) -> u16 {
    self.port
  }

  pub fn settings(&self) -> ConnectorSettings {
    self.settings.lock().clone()
  }

  /// Protocol of the first chain element.
  pub fn default_protocol(&self) -> Option<String> {
    self.chain.lock().current.first().map(|f| f.protocol().to_string())
  }

  pub fn protocols(&self) -> Vec<String> {
    self.chain.lock().current.iter().map(|f| f.protocol().to_string()).collect()
  }

  pub fn connection_factories(&self) -> Vec<Arc<dyn ConnectionFactory>> {
    self.chain.lock().current.clone()
  }
}

impl std::fmt::Debug for ServerConnector {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ServerConnector")
      .field("id", &self.id)
      .field("host", &self.host)
      .field("port", &self.port)
      .field("protocols", &self.protocols())
      .finish()
  }
}

impl EndpointCloseable for ServerConnector {
  fn close_referenced_endpoints(&self) {
    let mut chain = self.chain.lock();
    for element in chain.retired.drain(..) {
      element.close_referenced_endpoints();
    }
    for element in &chain.current {
      element.close_referenced_endpoints();
    }
  }
}

impl LiveInstance<ConnectorSettings> for ServerConnector {
  fn instance_id(&self) -> InstanceId {
    self.id
  }

  fn reconfigure(&self, change: &mut dyn FnMut(&mut ConnectorSettings) -> bool) -> Result<bool, AttributeError> {
    Ok(change(&mut self.settings.lock()))
  }

  fn regenerate(&self, settings: &ConnectorSettings) -> Result<bool, AttributeError> {
    let services = settings.chain_services();
    let mut chain = self.chain.lock();
    if chain.built_from == services {
      return Ok(false);
    }
    let fresh = build_chain(&settings.connection_factory_factories);
    let previous = std::mem::replace(&mut chain.current, fresh);
    chain.retired.extend(previous);
    chain.built_from = services;
    debug!(connector = %self.id, protocols = chain.current.len(), "regenerated protocol chain");
    Ok(true)
  }
}

/// Service that produces [`ServerConnector`]s.
pub struct ServerConnectorFactory {
  service: ServiceId,
  propagator: AttributePropagator<ConnectorSettings, ConnectorAttribute, ServerConnector>,
}

impl ServerConnectorFactory {
  pub fn new(settings: ConnectorSettings) -> Self {
    Self {
      service: ServiceId::next(),
      propagator: AttributePropagator::new(settings),
    }
  }

  pub fn settings(&self) -> ConnectorSettings {
    self.propagator.config()
  }

  pub fn set(&self, attribute: ConnectorAttribute) -> ApplyReport {
    self.propagator.apply_attribute(attribute)
  }

  /// Regenerate protocol chains and close endpoints as flagged by setters.
  pub fn update(&self) -> UpdateReport {
    self.propagator.update()
  }

  pub fn live_connectors(&self) -> Vec<Arc<ServerConnector>> {
    self.propagator.registry().snapshot()
  }
}

impl Default for ServerConnectorFactory {
  fn default() -> Self {
    Self::new(ConnectorSettings::default())
  }
}

impl std::fmt::Debug for ServerConnectorFactory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ServerConnectorFactory")
      .field("service", &self.service)
      .field("propagator", &self.propagator)
      .finish()
  }
}

impl ConnectorFactory<Arc<ServerConnector>> for ServerConnectorFactory {
  fn service_id(&self) -> ServiceId {
    self.service
  }

  fn create_connector(&self, host: Option<&str>, port: u16) -> Result<Arc<ServerConnector>, LifecycleError> {
    let connector = self
      .propagator
      .create_instance(|settings| Ok::<_, LifecycleError>(Arc::new(ServerConnector::new(settings.clone(), host, port))))?;
    info!(
      connector = %connector.id(),
      host = connector.host().unwrap_or("*"),
      port,
      "created server connector"
    );
    Ok(connector)
  }
}
