//! Request customizers.
//!
//! A [`RequestCustomizer`] is an immutable service. Changing its settings
//! replaces it with a new service, so every HTTP factory that references it
//! sees its customizer list change and closes the connections built with the
//! old one.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::http::HttpConfig;
use crate::consts::{
  DEFAULT_FORWARDED_FOR_HEADER, DEFAULT_FORWARDED_HOST_HEADER, DEFAULT_FORWARDED_PROTO_HEADER,
  DEFAULT_FORWARDED_SERVER_HEADER,
};
use crate::id::ServiceId;

/// Headers a reverse proxy uses to describe the original request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForwardedConfig {
  /// Header carrying the cipher suite the proxy negotiated. Unset means ignored.
  pub forwarded_cipher_suite: Option<String>,
  pub forwarded_host_header: String,
  pub forwarded_proto_header: String,
  pub forwarded_remote_address_header: String,
  pub forwarded_server_header: String,
  /// Header carrying the proxy's TLS session id. Unset means ignored.
  pub forwarded_ssl_session_id: Option<String>,
  /// Forced host, taking precedence over any forwarded host header.
  pub host_header: Option<String>,
}

impl Default for ForwardedConfig {
  fn default() -> Self {
    Self {
      forwarded_cipher_suite: None,
      forwarded_host_header: DEFAULT_FORWARDED_HOST_HEADER.to_string(),
      forwarded_proto_header: DEFAULT_FORWARDED_PROTO_HEADER.to_string(),
      forwarded_remote_address_header: DEFAULT_FORWARDED_FOR_HEADER.to_string(),
      forwarded_server_header: DEFAULT_FORWARDED_SERVER_HEADER.to_string(),
      forwarded_ssl_session_id: None,
      host_header: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CustomizerConfig {
  Forwarded(ForwardedConfig),
  /// Marks requests from a secure transport with the configured secure scheme.
  Secure,
}

impl CustomizerConfig {
  pub fn kind(&self) -> &'static str {
    match self {
      CustomizerConfig::Forwarded(_) => "forwarded",
      CustomizerConfig::Secure => "secure",
    }
  }
}

/// The parts of a request customizers may rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
  /// Header names are stored lowercase.
  headers: BTreeMap<String, String>,
  pub scheme: String,
  pub host: Option<String>,
  pub server_name: Option<String>,
  pub remote_address: Option<String>,
  pub secure: bool,
  pub cipher_suite: Option<String>,
  pub ssl_session_id: Option<String>,
}

impl Request {
  pub fn new(scheme: &str) -> Self {
    Self {
      scheme: scheme.to_string(),
      ..Self::default()
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.to_string());
    self
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
  }

  /// First entry of a comma separated header, as appended by proxy chains.
  fn leftmost(&self, name: &str) -> Option<String> {
    self
      .header(name)?
      .split(',')
      .map(str::trim)
      .find(|v| !v.is_empty())
      .map(str::to_string)
  }
}

/// A request customizer service.
#[derive(Debug)]
pub struct RequestCustomizer {
  service: ServiceId,
  name: String,
  config: CustomizerConfig,
}

impl RequestCustomizer {
  pub fn new(name: impl Into<String>, config: CustomizerConfig) -> Self {
    Self {
      service: ServiceId::next(),
      name: name.into(),
      config,
    }
  }

  pub fn service_id(&self) -> ServiceId {
    self.service
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn config(&self) -> &CustomizerConfig {
    &self.config
  }

  pub fn customize(&self, request: &mut Request, http: &HttpConfig) {
    match &self.config {
      CustomizerConfig::Forwarded(forwarded) => customize_forwarded(forwarded, request, http),
      CustomizerConfig::Secure => {
        if request.secure {
          request.scheme = http.secure_scheme.clone();
        }
      }
    }
  }
}

fn customize_forwarded(config: &ForwardedConfig, request: &mut Request, http: &HttpConfig) {
  if let Some(header) = &config.forwarded_cipher_suite {
    if let Some(suite) = request.header(header).map(str::to_string) {
      request.cipher_suite = Some(suite);
      request.secure = true;
    }
  }
  if let Some(header) = &config.forwarded_ssl_session_id {
    if let Some(session) = request.header(header).map(str::to_string) {
      request.ssl_session_id = Some(session);
      request.secure = true;
    }
  }

  if let Some(host) = &config.host_header {
    request.host = Some(host.clone());
  } else if let Some(host) = request.leftmost(&config.forwarded_host_header) {
    request.host = Some(host);
  }
  if let Some(server) = request.leftmost(&config.forwarded_server_header) {
    request.server_name = Some(server);
  }
  if let Some(remote) = request.leftmost(&config.forwarded_remote_address_header) {
    request.remote_address = Some(remote);
  }
  if let Some(proto) = request.leftmost(&config.forwarded_proto_header) {
    if proto == http.secure_scheme {
      request.secure = true;
    }
    request.scheme = proto;
  }
}

/// A customizer named by an HTTP factory.
///
/// Documents only carry the name. A bound reference also carries the service
/// it resolved to, and two references are equal only when both name and
/// service identity match.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct CustomizerRef {
  name: String,
  bound: Option<Arc<RequestCustomizer>>,
}

impl CustomizerRef {
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      bound: None,
    }
  }

  pub fn bound(customizer: Arc<RequestCustomizer>) -> Self {
    Self {
      name: customizer.name.clone(),
      bound: Some(customizer),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn service_id(&self) -> Option<ServiceId> {
    self.bound.as_ref().map(|c| c.service)
  }

  pub fn customizer(&self) -> Option<&Arc<RequestCustomizer>> {
    self.bound.as_ref()
  }

  /// Bind to the service registered under this name, or drop the binding.
  pub fn resolve(&self, services: &BTreeMap<String, Arc<RequestCustomizer>>) -> Self {
    match services.get(&self.name) {
      Some(customizer) => Self::bound(Arc::clone(customizer)),
      None => Self::named(self.name.clone()),
    }
  }
}

impl PartialEq for CustomizerRef {
  fn eq(&self, other: &Self) -> bool {
    self.name == other.name && self.service_id() == other.service_id()
  }
}

impl Eq for CustomizerRef {}

impl std::fmt::Debug for CustomizerRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.service_id() {
      Some(service) => write!(f, "{}@{}", self.name, service),
      None => write!(f, "{}", self.name),
    }
  }
}

impl From<String> for CustomizerRef {
  fn from(name: String) -> Self {
    Self::named(name)
  }
}

impl From<CustomizerRef> for String {
  fn from(reference: CustomizerRef) -> Self {
    reference.name
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn forwarded(config: ForwardedConfig) -> RequestCustomizer {
    RequestCustomizer::new("proxy", CustomizerConfig::Forwarded(config))
  }

  #[test]
  fn forwarded_headers_rewrite_the_request() {
    let customizer = forwarded(ForwardedConfig::default());
    let mut request = Request::new("http")
      .with_header("X-Forwarded-Host", "example.org, internal:8080")
      .with_header("x-forwarded-for", "203.0.113.7")
      .with_header("X-Forwarded-Server", "edge-1")
      .with_header("X-Forwarded-Proto", "https");

    customizer.customize(&mut request, &HttpConfig::default());
    assert_eq!(request.host.as_deref(), Some("example.org"));
    assert_eq!(request.remote_address.as_deref(), Some("203.0.113.7"));
    assert_eq!(request.server_name.as_deref(), Some("edge-1"));
    assert_eq!(request.scheme, "https");
    assert!(request.secure);
  }

  #[test]
  fn forced_host_wins_over_forwarded_host() {
    let customizer = forwarded(ForwardedConfig {
      host_header: Some("pinned.example".to_string()),
      ..ForwardedConfig::default()
    });
    let mut request = Request::new("http").with_header("X-Forwarded-Host", "example.org");
    customizer.customize(&mut request, &HttpConfig::default());
    assert_eq!(request.host.as_deref(), Some("pinned.example"));
  }

  #[test]
  fn cipher_suite_header_is_ignored_unless_configured() {
    let request = Request::new("http").with_header("Proxy-Cipher", "TLS_AES_128_GCM_SHA256");

    let mut plain = request.clone();
    forwarded(ForwardedConfig::default()).customize(&mut plain, &HttpConfig::default());
    assert_eq!(plain.cipher_suite, None);
    assert!(!plain.secure);

    let mut configured = request;
    let customizer = forwarded(ForwardedConfig {
      forwarded_cipher_suite: Some("Proxy-Cipher".to_string()),
      ..ForwardedConfig::default()
    });
    customizer.customize(&mut configured, &HttpConfig::default());
    assert_eq!(configured.cipher_suite.as_deref(), Some("TLS_AES_128_GCM_SHA256"));
    assert!(configured.secure);
  }

  #[test]
  fn secure_customizer_only_touches_secure_requests() {
    let customizer = RequestCustomizer::new("tls", CustomizerConfig::Secure);
    let http = HttpConfig {
      secure_scheme: "wss".to_string(),
      ..HttpConfig::default()
    };

    let mut plain = Request::new("http");
    customizer.customize(&mut plain, &http);
    assert_eq!(plain.scheme, "http");

    let mut secure = Request {
      secure: true,
      ..Request::new("http")
    };
    customizer.customize(&mut secure, &http);
    assert_eq!(secure.scheme, "wss");
  }

  #[test]
  fn references_compare_by_bound_service() {
    let first = Arc::new(RequestCustomizer::new("proxy", CustomizerConfig::Secure));
    let second = Arc::new(RequestCustomizer::new("proxy", CustomizerConfig::Secure));

    assert_eq!(CustomizerRef::named("proxy"), CustomizerRef::named("proxy"));
    assert_eq!(CustomizerRef::bound(first.clone()), CustomizerRef::bound(first.clone()));
    assert_ne!(CustomizerRef::bound(first.clone()), CustomizerRef::bound(second));
    assert_ne!(CustomizerRef::bound(first), CustomizerRef::named("proxy"));
  }

  #[test]
  fn config_is_tagged_by_type() {
    let config: CustomizerConfig =
      serde_json::from_str(r#"{ "type": "forwarded", "forwardedHostHeader": "X-Host" }"#).unwrap();
    let CustomizerConfig::Forwarded(forwarded) = &config else {
      panic!("expected a forwarded customizer, got {config:?}");
    };
    assert_eq!(forwarded.forwarded_host_header, "X-Host");
    assert_eq!(forwarded.forwarded_proto_header, DEFAULT_FORWARDED_PROTO_HEADER);

    let secure: CustomizerConfig = serde_json::from_str(r#"{ "type": "secure" }"#).unwrap();
    assert_eq!(secure.kind(), "secure");
  }

  #[test]
  fn reference_serializes_as_its_name() {
    let reference = CustomizerRef::bound(Arc::new(RequestCustomizer::new("proxy", CustomizerConfig::Secure)));
    assert_eq!(serde_json::to_string(&reference).unwrap(), r#""proxy""#);
    let parsed: CustomizerRef = serde_json::from_str(r#""proxy""#).unwrap();
    assert_eq!(parsed.service_id(), None);
  }
}
