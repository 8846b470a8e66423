//! HTTP connection factories.
//!
//! An [`HttpConnectionFactoryFactory`] holds one [`HttpConfig`] and hands a
//! fresh [`HttpConnectionFactory`] to every connector that includes it in
//! its protocol chain. Connections accepted by those factories are tracked
//! weakly so a configuration sweep can close them.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::connector::{ConnectionFactory, ConnectionFactoryFactory};
use super::customizer::{CustomizerRef, Request, RequestCustomizer};
use crate::attribute::{
  ApplyReport, AttributeClass, AttributeError, AttributePropagator, DynamicAttribute, LiveInstance, UpdateReport,
};
use crate::consts::{
  DEFAULT_HEADER_CACHE_SIZE, DEFAULT_INPUT_BUFFER_SIZE, DEFAULT_OUTPUT_BUFFER_SIZE, DEFAULT_REQUEST_HEADER_SIZE,
  DEFAULT_RESPONSE_HEADER_SIZE, DEFAULT_SECURE_PORT, DEFAULT_SECURE_SCHEME, DEFAULT_SEND_DATE_HEADER,
  DEFAULT_SEND_SERVER_VERSION, DEFAULT_SEND_X_POWERED_BY, PROTOCOL_H2C, PROTOCOL_HTTP_1_1,
};
use crate::id::{InstanceId, ServiceId};
use crate::lifecycle::{Endpoint, EndpointCloseable};
use crate::registry::LiveInstanceRegistry;

/// HTTP protocol settings shared by every connection factory of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpConfig {
  /// Request customizers invoked in order for every request.
  pub customizers: Vec<CustomizerRef>,
  pub delay_dispatch_until_content: bool,
  /// Speak cleartext HTTP/2 instead of HTTP/1.1.
  pub h2c: bool,
  pub header_cache_size: u32,
  pub input_buffer_size: u32,
  /// `None` leaves the protocol engine default in place.
  pub output_aggregation_size: Option<u32>,
  pub output_buffer_size: u32,
  pub request_header_size: u32,
  pub response_header_size: u32,
  pub secure_port: u16,
  pub secure_scheme: String,
  pub send_date_header: bool,
  pub send_server_version: bool,
  pub send_x_powered_by: bool,
}

impl Default for HttpConfig {
  fn default() -> Self {
    Self {
      customizers: Vec::new(),
      delay_dispatch_until_content: false,
      h2c: false,
      header_cache_size: DEFAULT_HEADER_CACHE_SIZE,
      input_buffer_size: DEFAULT_INPUT_BUFFER_SIZE,
      output_aggregation_size: None,
      output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
      request_header_size: DEFAULT_REQUEST_HEADER_SIZE,
      response_header_size: DEFAULT_RESPONSE_HEADER_SIZE,
      secure_port: DEFAULT_SECURE_PORT,
      secure_scheme: DEFAULT_SECURE_SCHEME.to_string(),
      send_date_header: DEFAULT_SEND_DATE_HEADER,
      send_server_version: DEFAULT_SEND_SERVER_VERSION,
      send_x_powered_by: DEFAULT_SEND_X_POWERED_BY,
    }
  }
}

impl HttpConfig {
  /// Attributes that turn `self` into `other`, in field order.
  pub fn changes_to(&self, other: &HttpConfig) -> Vec<HttpAttribute> {
    HttpAttribute::all_of(other)
      .into_iter()
      .filter(|attribute| !attribute.is_applied(self))
      .collect()
  }

  /// Copy with every customizer reference bound to the service registered
  /// under its name.
  pub fn with_customizers(&self, services: &BTreeMap<String, Arc<RequestCustomizer>>) -> HttpConfig {
    HttpConfig {
      customizers: self.customizers.iter().map(|c| c.resolve(services)).collect(),
      ..self.clone()
    }
  }
}

/// One settable attribute of an HTTP connection factory factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAttribute {
  Customizers(Vec<CustomizerRef>),
  DelayDispatchUntilContent(bool),
  H2c(bool),
  HeaderCacheSize(u32),
  InputBufferSize(u32),
  OutputAggregationSize(Option<u32>),
  OutputBufferSize(u32),
  RequestHeaderSize(u32),
  ResponseHeaderSize(u32),
  SecurePort(u16),
  SecureScheme(String),
  SendDateHeader(bool),
  SendServerVersion(bool),
  SendXPoweredBy(bool),
}

impl HttpAttribute {
  /// Every attribute with the value `config` holds.
  pub fn all_of(config: &HttpConfig) -> Vec<HttpAttribute> {
    vec![
      HttpAttribute::Customizers(config.customizers.clone()),
      HttpAttribute::DelayDispatchUntilContent(config.delay_dispatch_until_content),
      HttpAttribute::H2c(config.h2c),
      HttpAttribute::HeaderCacheSize(config.header_cache_size),
      HttpAttribute::InputBufferSize(config.input_buffer_size),
      HttpAttribute::OutputAggregationSize(config.output_aggregation_size),
      HttpAttribute::OutputBufferSize(config.output_buffer_size),
      HttpAttribute::RequestHeaderSize(config.request_header_size),
      HttpAttribute::ResponseHeaderSize(config.response_header_size),
      HttpAttribute::SecurePort(config.secure_port),
      HttpAttribute::SecureScheme(config.secure_scheme.clone()),
      HttpAttribute::SendDateHeader(config.send_date_header),
      HttpAttribute::SendServerVersion(config.send_server_version),
      HttpAttribute::SendXPoweredBy(config.send_x_powered_by),
    ]
  }
}

impl DynamicAttribute<HttpConfig> for HttpAttribute {
  fn name(&self) -> &'static str {
    match self {
      HttpAttribute::Customizers(_) => "customizers",
      HttpAttribute::DelayDispatchUntilContent(_) => "delayDispatchUntilContent",
      HttpAttribute::H2c(_) => "h2c",
      HttpAttribute::HeaderCacheSize(_) => "headerCacheSize",
      HttpAttribute::InputBufferSize(_) => "inputBufferSize",
      HttpAttribute::OutputAggregationSize(_) => "outputAggregationSize",
      HttpAttribute::OutputBufferSize(_) => "outputBufferSize",
      HttpAttribute::RequestHeaderSize(_) => "requestHeaderSize",
      HttpAttribute::ResponseHeaderSize(_) => "responseHeaderSize",
      HttpAttribute::SecurePort(_) => "securePort",
      HttpAttribute::SecureScheme(_) => "secureScheme",
      HttpAttribute::SendDateHeader(_) => "sendDateHeader",
      HttpAttribute::SendServerVersion(_) => "sendServerVersion",
      HttpAttribute::SendXPoweredBy(_) => "sendXPoweredBy",
    }
  }

  fn class(&self) -> AttributeClass {
    match self {
      HttpAttribute::Customizers(_)
      | HttpAttribute::DelayDispatchUntilContent(_)
      | HttpAttribute::HeaderCacheSize(_)
      | HttpAttribute::InputBufferSize(_)
      | HttpAttribute::RequestHeaderSize(_)
      | HttpAttribute::ResponseHeaderSize(_)
      | HttpAttribute::SecurePort(_)
      | HttpAttribute::SecureScheme(_)
      | HttpAttribute::SendDateHeader(_)
      | HttpAttribute::SendServerVersion(_)
      | HttpAttribute::SendXPoweredBy(_) => AttributeClass::RequiresEndpointClose,
      HttpAttribute::OutputAggregationSize(_) | HttpAttribute::OutputBufferSize(_) => AttributeClass::Deferred,
      HttpAttribute::H2c(_) => AttributeClass::CreationOnly,
    }
  }

  fn apply_to(&self, config: &mut HttpConfig) {
    match self {
      HttpAttribute::Customizers(v) => config.customizers = v.clone(),
      HttpAttribute::DelayDispatchUntilContent(v) => config.delay_dispatch_until_content = *v,
      HttpAttribute::H2c(v) => config.h2c = *v,
      HttpAttribute::HeaderCacheSize(v) => config.header_cache_size = *v,
      HttpAttribute::InputBufferSize(v) => config.input_buffer_size = *v,
      HttpAttribute::OutputAggregationSize(v) => config.output_aggregation_size = *v,
      HttpAttribute::OutputBufferSize(v) => config.output_buffer_size = *v,
      HttpAttribute::RequestHeaderSize(v) => config.request_header_size = *v,
      HttpAttribute::ResponseHeaderSize(v) => config.response_header_size = *v,
      HttpAttribute::SecurePort(v) => config.secure_port = *v,
      HttpAttribute::SecureScheme(v) => config.secure_scheme = v.clone(),
      HttpAttribute::SendDateHeader(v) => config.send_date_header = *v,
      HttpAttribute::SendServerVersion(v) => config.send_server_version = *v,
      HttpAttribute::SendXPoweredBy(v) => config.send_x_powered_by = *v,
    }
  }

  fn is_applied(&self, config: &HttpConfig) -> bool {
    match self {
      HttpAttribute::Customizers(v) => &config.customizers == v,
      HttpAttribute::DelayDispatchUntilContent(v) => config.delay_dispatch_until_content == *v,
      HttpAttribute::H2c(v) => config.h2c == *v,
      HttpAttribute::HeaderCacheSize(v) => config.header_cache_size == *v,
      HttpAttribute::InputBufferSize(v) => config.input_buffer_size == *v,
      // An unset aggregation size never forces a resync.
      HttpAttribute::OutputAggregationSize(v) => v.is_none() || config.output_aggregation_size == *v,
      HttpAttribute::OutputBufferSize(v) => config.output_buffer_size == *v,
      HttpAttribute::RequestHeaderSize(v) => config.request_header_size == *v,
      HttpAttribute::ResponseHeaderSize(v) => config.response_header_size == *v,
      HttpAttribute::SecurePort(v) => config.secure_port == *v,
      HttpAttribute::SecureScheme(v) => &config.secure_scheme == v,
      HttpAttribute::SendDateHeader(v) => config.send_date_header == *v,
      HttpAttribute::SendServerVersion(v) => config.send_server_version == *v,
      HttpAttribute::SendXPoweredBy(v) => config.send_x_powered_by == *v,
    }
  }
}

/// A connection accepted by an [`HttpConnectionFactory`].
#[derive(Debug)]
pub struct HttpConnection {
  id: InstanceId,
  closed: AtomicBool,
}

impl HttpConnection {
  pub fn id(&self) -> InstanceId {
    self.id
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }
}

impl Endpoint for HttpConnection {
  fn close(&self) {
    if !self.closed.swap(true, Ordering::SeqCst) {
      debug!(connection = %self.id, "closed connection");
    }
  }
}

/// Protocol stack element produced for one connector.
pub struct HttpConnectionFactory {
  id: InstanceId,
  protocol: &'static str,
  next_protocol: Option<String>,
  config: Mutex<HttpConfig>,
  endpoints: LiveInstanceRegistry<dyn Endpoint>,
}

impl HttpConnectionFactory {
  pub fn new(config: HttpConfig, next_protocol: Option<&str>) -> Self {
    let protocol = if config.h2c { PROTOCOL_H2C } else { PROTOCOL_HTTP_1_1 };
    Self {
      id: InstanceId::next(),
      protocol,
      next_protocol: next_protocol.map(str::to_string),
      config: Mutex::new(config),
      endpoints: LiveInstanceRegistry::new(),
    }
  }

  /// Copy of the live configuration.
  pub fn config(&self) -> HttpConfig {
    self.config.lock().clone()
  }

  /// Accept a new connection. The caller owns it; the factory only tracks it.
  pub fn new_connection(&self) -> Arc<HttpConnection> {
    let connection = Arc::new(HttpConnection {
      id: InstanceId::next(),
      closed: AtomicBool::new(false),
    });
    let endpoint: Arc<dyn Endpoint> = connection.clone();
    self.endpoints.track(connection.id, &endpoint);
    connection
  }

  /// Run the bound customizers over `request`, in order.
  pub fn customize(&self, request: &mut Request) {
    let config = self.config.lock();
    for customizer in config.customizers.iter().filter_map(CustomizerRef::customizer) {
      customizer.customize(request, &config);
    }
  }

  /// Track an endpoint created by the protocol engine.
  pub fn track_endpoint(&self, id: InstanceId, endpoint: &Arc<dyn Endpoint>) {
    self.endpoints.track(id, endpoint);
  }

  pub fn open_endpoints(&self) -> usize {
    self.endpoints.len()
  }
}

impl std::fmt::Debug for HttpConnectionFactory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HttpConnectionFactory")
      .field("id", &self.id)
      .field("protocol", &self.protocol)
      .field("next_protocol", &self.next_protocol)
      .field("endpoints", &self.endpoints)
      .finish()
  }
}

impl EndpointCloseable for HttpConnectionFactory {
  fn close_referenced_endpoints(&self) {
    let endpoints = self.endpoints.snapshot();
    debug!(factory = %self.id, count = endpoints.len(), "closing referenced endpoints");
    for endpoint in endpoints {
      endpoint.close();
    }
  }
}

impl ConnectionFactory for HttpConnectionFactory {
  fn protocol(&self) -> &str {
    self.protocol
  }

  fn next_protocol(&self) -> Option<&str> {
    self.next_protocol.as_deref()
  }
}

impl LiveInstance<HttpConfig> for HttpConnectionFactory {
  fn instance_id(&self) -> InstanceId {
    self.id
  }

  fn reconfigure(&self, change: &mut dyn FnMut(&mut HttpConfig) -> bool) -> Result<bool, AttributeError> {
    Ok(change(&mut self.config.lock()))
  }
}

/// Service that produces [`HttpConnectionFactory`] instances.
pub struct HttpConnectionFactoryFactory {
  service: ServiceId,
  propagator: AttributePropagator<HttpConfig, HttpAttribute, HttpConnectionFactory>,
}

impl HttpConnectionFactoryFactory {
  pub fn new(config: HttpConfig) -> Self {
    Self {
      service: ServiceId::next(),
      propagator: AttributePropagator::new(config),
    }
  }

  pub fn config(&self) -> HttpConfig {
    self.propagator.config()
  }

  pub fn set(&self, attribute: HttpAttribute) -> ApplyReport {
    self.propagator.apply_attribute(attribute)
  }

  pub fn update(&self) -> UpdateReport {
    self.propagator.update()
  }

  /// Every connection factory produced so far that is still referenced.
  pub fn live_factories(&self) -> Vec<Arc<HttpConnectionFactory>> {
    self.propagator.registry().snapshot()
  }
}

impl Default for HttpConnectionFactoryFactory {
  fn default() -> Self {
    Self::new(HttpConfig::default())
  }
}

impl std::fmt::Debug for HttpConnectionFactoryFactory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HttpConnectionFactoryFactory")
      .field("service", &self.service)
      .field("propagator", &self.propagator)
      .finish()
  }
}

impl ConnectionFactoryFactory for HttpConnectionFactoryFactory {
  fn service_id(&self) -> ServiceId {
    self.service
  }

  fn create_connection_factory(&self, next_protocol: Option<&str>) -> Arc<dyn ConnectionFactory> {
    let created = self.propagator.create_instance(|config| {
      Ok::<_, Infallible>(Arc::new(HttpConnectionFactory::new(config.clone(), next_protocol)))
    });
    match created {
      Ok(factory) => factory,
      Err(never) => match never {},
    }
  }
}
