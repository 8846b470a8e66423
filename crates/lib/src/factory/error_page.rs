//! Error page handlers.
//!
//! Every setting is hot: error pages are looked up per failed request, so a
//! change reaches the handlers of contexts that are already serving.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::attribute::{
  ApplyReport, AttributeClass, AttributeError, AttributePropagator, DynamicAttribute, LiveInstance, UpdateReport,
};
use crate::consts::{DEFAULT_ERROR_CACHE_CONTROL, DEFAULT_SHOW_MESSAGE_IN_TITLE, DEFAULT_SHOW_STACKS, ERROR_PAGE_GLOBAL};
use crate::id::{InstanceId, ServiceId};
use crate::lifecycle::EndpointCloseable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorHandlerConfig {
  /// Keyed by status code (`404`), status range (`500-599`), error type
  /// name, or `global`.
  pub error_pages: BTreeMap<String, String>,
  /// `None` omits the header.
  pub cache_control: Option<String>,
  pub show_message_in_title: bool,
  pub show_stacks: bool,
}

impl Default for ErrorHandlerConfig {
  fn default() -> Self {
    Self {
      error_pages: BTreeMap::new(),
      cache_control: Some(DEFAULT_ERROR_CACHE_CONTROL.to_string()),
      show_message_in_title: DEFAULT_SHOW_MESSAGE_IN_TITLE,
      show_stacks: DEFAULT_SHOW_STACKS,
    }
  }
}

impl ErrorHandlerConfig {
  pub fn changes_to(&self, other: &ErrorHandlerConfig) -> Vec<ErrorHandlerAttribute> {
    ErrorHandlerAttribute::all_of(other)
      .into_iter()
      .filter(|attribute| !attribute.is_applied(self))
      .collect()
  }

  /// Page for a failure, preferring the error type, then the exact status,
  /// then a status range, then the global page.
  pub fn error_page(&self, status: u16, error_type: Option<&str>) -> Option<&str> {
    let pages = &self.error_pages;
    if let Some(page) = error_type.and_then(|t| pages.get(t)) {
      return Some(page.as_str());
    }
    if let Some(page) = pages.get(&status.to_string()) {
      return Some(page.as_str());
    }
    let ranged = pages
      .iter()
      .find(|(key, _)| parse_range(key).is_some_and(|(from, to)| (from..=to).contains(&status)));
    if let Some((_, page)) = ranged {
      return Some(page.as_str());
    }
    pages.get(ERROR_PAGE_GLOBAL).map(String::as_str)
  }
}

fn parse_range(key: &str) -> Option<(u16, u16)> {
  let (from, to) = key.split_once('-')?;
  Some((from.trim().parse().ok()?, to.trim().parse().ok()?))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorHandlerAttribute {
  ErrorPages(BTreeMap<String, String>),
  CacheControl(Option<String>),
  ShowMessageInTitle(bool),
  ShowStacks(bool),
}

impl ErrorHandlerAttribute {
  pub fn all_of(config: &ErrorHandlerConfig) -> Vec<ErrorHandlerAttribute> {
    vec![
      ErrorHandlerAttribute::ErrorPages(config.error_pages.clone()),
      ErrorHandlerAttribute::CacheControl(config.cache_control.clone()),
      ErrorHandlerAttribute::ShowMessageInTitle(config.show_message_in_title),
      ErrorHandlerAttribute::ShowStacks(config.show_stacks),
    ]
  }
}

impl DynamicAttribute<ErrorHandlerConfig> for ErrorHandlerAttribute {
  fn name(&self) -> &'static str {
    match self {
      ErrorHandlerAttribute::ErrorPages(_) => "errorPages",
      ErrorHandlerAttribute::CacheControl(_) => "cacheControl",
      ErrorHandlerAttribute::ShowMessageInTitle(_) => "showMessageInTitle",
      ErrorHandlerAttribute::ShowStacks(_) => "showStacks",
    }
  }

  fn class(&self) -> AttributeClass {
    match self {
      ErrorHandlerAttribute::ErrorPages(_)
      | ErrorHandlerAttribute::CacheControl(_)
      | ErrorHandlerAttribute::ShowMessageInTitle(_)
      | ErrorHandlerAttribute::ShowStacks(_) => AttributeClass::Hot,
    }
  }

  fn apply_to(&self, config: &mut ErrorHandlerConfig) {
    match self {
      ErrorHandlerAttribute::ErrorPages(v) => config.error_pages = v.clone(),
      ErrorHandlerAttribute::CacheControl(v) => config.cache_control = v.clone(),
      ErrorHandlerAttribute::ShowMessageInTitle(v) => config.show_message_in_title = *v,
      ErrorHandlerAttribute::ShowStacks(v) => config.show_stacks = *v,
    }
  }

  fn is_applied(&self, config: &ErrorHandlerConfig) -> bool {
    match self {
      ErrorHandlerAttribute::ErrorPages(v) => &config.error_pages == v,
      ErrorHandlerAttribute::CacheControl(v) => &config.cache_control == v,
      ErrorHandlerAttribute::ShowMessageInTitle(v) => config.show_message_in_title == *v,
      ErrorHandlerAttribute::ShowStacks(v) => config.show_stacks == *v,
    }
  }
}

/// Error response for one failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
  pub status: u16,
  /// Page to dispatch to instead of rendering.
  pub page: Option<String>,
  pub cache_control: Option<String>,
  pub title: String,
  pub stack: Option<String>,
}

/// Renders errors for one servlet context.
#[derive(Debug)]
pub struct ErrorPageErrorHandler {
  id: InstanceId,
  config: Mutex<ErrorHandlerConfig>,
}

impl ErrorPageErrorHandler {
  pub fn id(&self) -> InstanceId {
    self.id
  }

  pub fn config(&self) -> ErrorHandlerConfig {
    self.config.lock().clone()
  }

  pub fn handle(&self, status: u16, message: &str, error: Option<(&str, &str)>) -> ErrorResponse {
    let config = self.config.lock();
    let title = if config.show_message_in_title && !message.is_empty() {
      format!("Error {} {}", status, message)
    } else {
      format!("Error {}", status)
    };
    ErrorResponse {
      status,
      page: config.error_page(status, error.map(|(t, _)| t)).map(str::to_string),
      cache_control: config.cache_control.clone(),
      title,
      stack: error.filter(|_| config.show_stacks).map(|(_, stack)| stack.to_string()),
    }
  }
}

impl EndpointCloseable for ErrorPageErrorHandler {
  fn close_referenced_endpoints(&self) {}
}

impl LiveInstance<ErrorHandlerConfig> for ErrorPageErrorHandler {
  fn instance_id(&self) -> InstanceId {
    self.id
  }

  fn reconfigure(&self, change: &mut dyn FnMut(&mut ErrorHandlerConfig) -> bool) -> Result<bool, AttributeError> {
    Ok(change(&mut self.config.lock()))
  }
}

#[derive(Debug)]
pub struct ErrorPageErrorHandlerFactory {
  service: ServiceId,
  propagator: AttributePropagator<ErrorHandlerConfig, ErrorHandlerAttribute, ErrorPageErrorHandler>,
}

impl ErrorPageErrorHandlerFactory {
  pub fn new(config: ErrorHandlerConfig) -> Self {
    Self {
      service: ServiceId::next(),
      propagator: AttributePropagator::new(config),
    }
  }

  pub fn service_id(&self) -> ServiceId {
    self.service
  }

  pub fn config(&self) -> ErrorHandlerConfig {
    self.propagator.config()
  }

  pub fn set(&self, attribute: ErrorHandlerAttribute) -> ApplyReport {
    self.propagator.apply_attribute(attribute)
  }

  pub fn update(&self) -> UpdateReport {
    self.propagator.update()
  }

  pub fn create_error_handler(&self) -> Arc<ErrorPageErrorHandler> {
    let created = self.propagator.create_instance(|config| {
      Ok::<_, std::convert::Infallible>(Arc::new(ErrorPageErrorHandler {
        id: InstanceId::next(),
        config: Mutex::new(config.clone()),
      }))
    });
    match created {
      Ok(handler) => handler,
      Err(never) => match never {},
    }
  }

  pub fn live_handlers(&self) -> Vec<Arc<ErrorPageErrorHandler>> {
    self.propagator.registry().snapshot()
  }
}

impl Default for ErrorPageErrorHandlerFactory {
  fn default() -> Self {
    Self::new(ErrorHandlerConfig::default())
  }
}
