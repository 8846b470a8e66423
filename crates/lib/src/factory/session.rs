//! Session handler factory.
//!
//! Only the maximum inactive interval reaches session handlers that are
//! already serving a context; every other setting applies to handlers
//! created afterwards. That includes the session cache settings, since each
//! handler builds its cache once.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::attribute::{
  ApplyReport, AttributeClass, AttributeError, AttributePropagator, DynamicAttribute, LiveInstance, UpdateReport,
};
use crate::consts::{
  DEFAULT_CHECKING_REMOTE_SESSION_ID_ENCODING, DEFAULT_HTTP_ONLY, DEFAULT_MAX_INACTIVE_INTERVAL_SECS,
  DEFAULT_NODE_ID_IN_SESSION_ID, DEFAULT_REFRESH_COOKIE_AGE, DEFAULT_SECURE_REQUEST_ONLY, DEFAULT_SESSION_COOKIE,
  DEFAULT_REMOVE_UNLOADABLE_SESSIONS, DEFAULT_SAVE_ON_CREATE, DEFAULT_SAVE_ON_INACTIVE_EVICTION,
  DEFAULT_SESSION_ID_PARAMETER_NAME, DEFAULT_USING_COOKIES, NEVER_EVICT,
};
use crate::id::{InstanceId, ServiceId};
use crate::lifecycle::EndpointCloseable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
  pub checking_remote_session_id_encoding: bool,
  pub cookie_name: String,
  /// Session cache eviction: -1 never, 0 when the last request exits, or
  /// seconds of inactivity.
  pub eviction_timeout: i32,
  pub http_only: bool,
  /// Seconds. Negative means sessions never expire.
  pub max_inactive_interval: i32,
  pub node_id_in_session_id: bool,
  pub refresh_cookie_age: i32,
  pub remove_unloadable_sessions: bool,
  pub save_on_create: bool,
  pub save_on_inactive_eviction: bool,
  pub secure_request_only: bool,
  pub session_attribute_listeners: Vec<String>,
  pub session_id_parameter_name: String,
  pub session_listeners: Vec<String>,
  pub using_cookies: bool,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      checking_remote_session_id_encoding: DEFAULT_CHECKING_REMOTE_SESSION_ID_ENCODING,
      cookie_name: DEFAULT_SESSION_COOKIE.to_string(),
      eviction_timeout: NEVER_EVICT,
      http_only: DEFAULT_HTTP_ONLY,
      max_inactive_interval: DEFAULT_MAX_INACTIVE_INTERVAL_SECS,
      node_id_in_session_id: DEFAULT_NODE_ID_IN_SESSION_ID,
      refresh_cookie_age: DEFAULT_REFRESH_COOKIE_AGE,
      remove_unloadable_sessions: DEFAULT_REMOVE_UNLOADABLE_SESSIONS,
      save_on_create: DEFAULT_SAVE_ON_CREATE,
      save_on_inactive_eviction: DEFAULT_SAVE_ON_INACTIVE_EVICTION,
      secure_request_only: DEFAULT_SECURE_REQUEST_ONLY,
      session_attribute_listeners: Vec::new(),
      session_id_parameter_name: DEFAULT_SESSION_ID_PARAMETER_NAME.to_string(),
      session_listeners: Vec::new(),
      using_cookies: DEFAULT_USING_COOKIES,
    }
  }
}

impl SessionConfig {
  pub fn changes_to(&self, other: &SessionConfig) -> Vec<SessionAttribute> {
    SessionAttribute::all_of(other)
      .into_iter()
      .filter(|attribute| !attribute.is_applied(self))
      .collect()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAttribute {
  CheckingRemoteSessionIdEncoding(bool),
  CookieName(String),
  EvictionTimeout(i32),
  HttpOnly(bool),
  MaxInactiveInterval(i32),
  NodeIdInSessionId(bool),
  RefreshCookieAge(i32),
  RemoveUnloadableSessions(bool),
  SaveOnCreate(bool),
  SaveOnInactiveEviction(bool),
  SecureRequestOnly(bool),
  SessionAttributeListeners(Vec<String>),
  SessionIdParameterName(String),
  SessionListeners(Vec<String>),
  UsingCookies(bool),
}

impl SessionAttribute {
  pub fn all_of(config: &SessionConfig) -> Vec<SessionAttribute> {
    vec![
      SessionAttribute::CheckingRemoteSessionIdEncoding(config.checking_remote_session_id_encoding),
      SessionAttribute::CookieName(config.cookie_name.clone()),
      SessionAttribute::EvictionTimeout(config.eviction_timeout),
      SessionAttribute::HttpOnly(config.http_only),
      SessionAttribute::MaxInactiveInterval(config.max_inactive_interval),
      SessionAttribute::NodeIdInSessionId(config.node_id_in_session_id),
      SessionAttribute::RefreshCookieAge(config.refresh_cookie_age),
      SessionAttribute::RemoveUnloadableSessions(config.remove_unloadable_sessions),
      SessionAttribute::SaveOnCreate(config.save_on_create),
      SessionAttribute::SaveOnInactiveEviction(config.save_on_inactive_eviction),
      SessionAttribute::SecureRequestOnly(config.secure_request_only),
      SessionAttribute::SessionAttributeListeners(config.session_attribute_listeners.clone()),
      SessionAttribute::SessionIdParameterName(config.session_id_parameter_name.clone()),
      SessionAttribute::SessionListeners(config.session_listeners.clone()),
      SessionAttribute::UsingCookies(config.using_cookies),
    ]
  }
}

impl DynamicAttribute<SessionConfig> for SessionAttribute {
  fn name(&self) -> &'static str {
    match self {
      SessionAttribute::CheckingRemoteSessionIdEncoding(_) => "checkingRemoteSessionIdEncoding",
      SessionAttribute::CookieName(_) => "cookieName",
      SessionAttribute::EvictionTimeout(_) => "evictionTimeout",
      SessionAttribute::HttpOnly(_) => "httpOnly",
      SessionAttribute::MaxInactiveInterval(_) => "maxInactiveInterval",
      SessionAttribute::NodeIdInSessionId(_) => "nodeIdInSessionId",
      SessionAttribute::RefreshCookieAge(_) => "refreshCookieAge",
      SessionAttribute::RemoveUnloadableSessions(_) => "removeUnloadableSessions",
      SessionAttribute::SaveOnCreate(_) => "saveOnCreate",
      SessionAttribute::SaveOnInactiveEviction(_) => "saveOnInactiveEviction",
      SessionAttribute::SecureRequestOnly(_) => "secureRequestOnly",
      SessionAttribute::SessionAttributeListeners(_) => "sessionAttributeListeners",
      SessionAttribute::SessionIdParameterName(_) => "sessionIdParameterName",
      SessionAttribute::SessionListeners(_) => "sessionListeners",
      SessionAttribute::UsingCookies(_) => "usingCookies",
    }
  }

  fn class(&self) -> AttributeClass {
    match self {
      SessionAttribute::MaxInactiveInterval(_) => AttributeClass::Hot,
      _ => AttributeClass::CreationOnly,
    }
  }

  fn apply_to(&self, config: &mut SessionConfig) {
    match self {
      SessionAttribute::CheckingRemoteSessionIdEncoding(v) => config.checking_remote_session_id_encoding = *v,
      SessionAttribute::CookieName(v) => config.cookie_name = v.clone(),
      SessionAttribute::EvictionTimeout(v) => config.eviction_timeout = *v,
      SessionAttribute::HttpOnly(v) => config.http_only = *v,
      SessionAttribute::MaxInactiveInterval(v) => config.max_inactive_interval = *v,
      SessionAttribute::NodeIdInSessionId(v) => config.node_id_in_session_id = *v,
      SessionAttribute::RefreshCookieAge(v) => config.refresh_cookie_age = *v,
      SessionAttribute::RemoveUnloadableSessions(v) => config.remove_unloadable_sessions = *v,
      SessionAttribute::SaveOnCreate(v) => config.save_on_create = *v,
      SessionAttribute::SaveOnInactiveEviction(v) => config.save_on_inactive_eviction = *v,
      SessionAttribute::SecureRequestOnly(v) => config.secure_request_only = *v,
      SessionAttribute::SessionAttributeListeners(v) => config.session_attribute_listeners = v.clone(),
      SessionAttribute::SessionIdParameterName(v) => config.session_id_parameter_name = v.clone(),
      SessionAttribute::SessionListeners(v) => config.session_listeners = v.clone(),
      SessionAttribute::UsingCookies(v) => config.using_cookies = *v,
    }
  }

  fn is_applied(&self, config: &SessionConfig) -> bool {
    match self {
      SessionAttribute::CheckingRemoteSessionIdEncoding(v) => config.checking_remote_session_id_encoding == *v,
      SessionAttribute::CookieName(v) => &config.cookie_name == v,
      SessionAttribute::EvictionTimeout(v) => config.eviction_timeout == *v,
      SessionAttribute::HttpOnly(v) => config.http_only == *v,
      SessionAttribute::MaxInactiveInterval(v) => config.max_inactive_interval == *v,
      SessionAttribute::NodeIdInSessionId(v) => config.node_id_in_session_id == *v,
      SessionAttribute::RefreshCookieAge(v) => config.refresh_cookie_age == *v,
      SessionAttribute::RemoveUnloadableSessions(v) => config.remove_unloadable_sessions == *v,
      SessionAttribute::SaveOnCreate(v) => config.save_on_create == *v,
      SessionAttribute::SaveOnInactiveEviction(v) => config.save_on_inactive_eviction == *v,
      SessionAttribute::SecureRequestOnly(v) => config.secure_request_only == *v,
      SessionAttribute::SessionAttributeListeners(v) => &config.session_attribute_listeners == v,
      SessionAttribute::SessionIdParameterName(v) => &config.session_id_parameter_name == v,
      SessionAttribute::SessionListeners(v) => &config.session_listeners == v,
      SessionAttribute::UsingCookies(v) => config.using_cookies == *v,
    }
  }
}

/// When a session cache drops inactive sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
  Never,
  /// As soon as the last request using the session exits.
  OnRequestExit,
  AfterIdle(Duration),
}

impl EvictionPolicy {
  pub fn from_timeout(seconds: i32) -> Self {
    match seconds {
      0 => EvictionPolicy::OnRequestExit,
      s if s > 0 => EvictionPolicy::AfterIdle(Duration::from_secs(s.unsigned_abs().into())),
      _ => EvictionPolicy::Never,
    }
  }
}

/// In-memory session cache built once per session handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCache {
  pub eviction: EvictionPolicy,
  pub remove_unloadable_sessions: bool,
  pub save_on_create: bool,
  pub save_on_inactive_eviction: bool,
}

impl SessionCache {
  fn from_config(config: &SessionConfig) -> Self {
    Self {
      eviction: EvictionPolicy::from_timeout(config.eviction_timeout),
      remove_unloadable_sessions: config.remove_unloadable_sessions,
      save_on_create: config.save_on_create,
      save_on_inactive_eviction: config.save_on_inactive_eviction,
    }
  }
}

/// Session management for one servlet context.
#[derive(Debug)]
pub struct SessionHandler {
  id: InstanceId,
  config: Mutex<SessionConfig>,
  cache: SessionCache,
}

impl SessionHandler {
  pub fn id(&self) -> InstanceId {
    self.id
  }

  pub fn config(&self) -> SessionConfig {
    self.config.lock().clone()
  }

  pub fn max_inactive_interval(&self) -> i32 {
    self.config.lock().max_inactive_interval
  }

  pub fn cache(&self) -> &SessionCache {
    &self.cache
  }
}

impl EndpointCloseable for SessionHandler {
  fn close_referenced_endpoints(&self) {}
}

impl LiveInstance<SessionConfig> for SessionHandler {
  fn instance_id(&self) -> InstanceId {
    self.id
  }

  fn reconfigure(&self, change: &mut dyn FnMut(&mut SessionConfig) -> bool) -> Result<bool, AttributeError> {
    Ok(change(&mut self.config.lock()))
  }
}

#[derive(Debug)]
pub struct SessionHandlerFactory {
  service: ServiceId,
  propagator: AttributePropagator<SessionConfig, SessionAttribute, SessionHandler>,
}

impl SessionHandlerFactory {
  pub fn new(config: SessionConfig) -> Self {
    Self {
      service: ServiceId::next(),
      propagator: AttributePropagator::new(config),
    }
  }

  pub fn service_id(&self) -> ServiceId {
    self.service
  }

  pub fn config(&self) -> SessionConfig {
    self.propagator.config()
  }

  pub fn set(&self, attribute: SessionAttribute) -> ApplyReport {
    self.propagator.apply_attribute(attribute)
  }

  pub fn update(&self) -> UpdateReport {
    self.propagator.update()
  }

  pub fn create_session_handler(&self) -> Arc<SessionHandler> {
    let created = self.propagator.create_instance(|config| {
      Ok::<_, std::convert::Infallible>(Arc::new(SessionHandler {
        id: InstanceId::next(),
        config: Mutex::new(config.clone()),
        cache: SessionCache::from_config(config),
      }))
    });
    match created {
      Ok(handler) => handler,
      Err(never) => match never {},
    }
  }

  pub fn live_handlers(&self) -> Vec<Arc<SessionHandler>> {
    self.propagator.registry().snapshot()
  }
}

impl Default for SessionHandlerFactory {
  fn default() -> Self {
    Self::new(SessionConfig::default())
  }
}
