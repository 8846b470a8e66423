//! Declared clauses and attribute resolution.
//!
//! A clause is one entry of a declared slot: "connector `main` uses factory
//! X with `port=8080`". The observation side delivers the full list of
//! clauses for a slot on every change; resolution helpers in this module turn
//! clause attributes into typed values and reject structurally invalid
//! entries with a [`ConfigurationError`] before anything is applied.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::consts::LIST_ATTR_SUFFIX;
use crate::id::ServiceId;
use crate::key::ReferenceIdentity;

/// Raw clause attributes, as delivered by the configuration source.
pub type Attributes = BTreeMap<String, Value>;

/// A declared entry without a service object attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
  pub reference_id: String,
  pub service: ServiceId,
  pub attributes: Attributes,
}

impl Clause {
  pub fn new(reference_id: impl Into<String>, service: ServiceId) -> Self {
    Self {
      reference_id: reference_id.into(),
      service,
      attributes: Attributes::new(),
    }
  }

  pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.attributes.insert(name.into(), value.into());
    self
  }

  pub fn reference(&self) -> ReferenceIdentity {
    ReferenceIdentity::new(self.reference_id.clone(), self.service)
  }
}

/// A declared entry together with the service it references.
pub struct ServiceClause<S: ?Sized> {
  pub clause: Clause,
  pub service: Arc<S>,
}

impl<S: ?Sized> ServiceClause<S> {
  pub fn new(clause: Clause, service: Arc<S>) -> Self {
    Self { clause, service }
  }
}

impl<S: ?Sized> Clone for ServiceClause<S> {
  fn clone(&self) -> Self {
    Self {
      clause: self.clause.clone(),
      service: Arc::clone(&self.service),
    }
  }
}

impl<S: ?Sized> std::fmt::Debug for ServiceClause<S> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ServiceClause").field("clause", &self.clause).finish_non_exhaustive()
  }
}

/// A declared entry is structurally invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
  #[error("'{attribute}' attribute must be provided in clause '{reference_id}'")]
  MissingAttribute {
    reference_id: String,
    attribute: &'static str,
  },

  #[error("invalid value for '{attribute}' in clause '{reference_id}': {value}")]
  InvalidValue {
    reference_id: String,
    attribute: String,
    value: String,
  },

  #[error("invalid dispatcher type in clause '{reference_id}': {value}")]
  InvalidDispatcher { reference_id: String, value: String },
}

fn value_to_string(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

/// Resolve an optional string attribute. `null` counts as absent.
pub fn resolve_string(attributes: &Attributes, name: &str) -> Option<String> {
  match attributes.get(name) {
    None | Some(Value::Null) => None,
    Some(value) => Some(value_to_string(value)),
  }
}

/// Resolve a string attribute that must be present.
pub fn resolve_required_string(
  reference_id: &str,
  attributes: &Attributes,
  name: &'static str,
) -> Result<String, ConfigurationError> {
  resolve_string(attributes, name).ok_or_else(|| ConfigurationError::MissingAttribute {
    reference_id: reference_id.to_string(),
    attribute: name,
  })
}

/// Resolve a port. Absent means 0 (any free port).
pub fn resolve_port(reference_id: &str, attributes: &Attributes, name: &str) -> Result<u16, ConfigurationError> {
  let invalid = |value: &Value| ConfigurationError::InvalidValue {
    reference_id: reference_id.to_string(),
    attribute: name.to_string(),
    value: value_to_string(value),
  };

  match attributes.get(name) {
    None | Some(Value::Null) => Ok(0),
    Some(value @ Value::Number(n)) => n
      .as_u64()
      .and_then(|n| u16::try_from(n).ok())
      .ok_or_else(|| invalid(value)),
    Some(value @ Value::String(s)) => s.trim().parse::<u16>().map_err(|_| invalid(value)),
    Some(value) => Err(invalid(value)),
  }
}

/// Resolve a boolean attribute, accepting `true`/`false` strings.
pub fn resolve_bool(
  reference_id: &str,
  attributes: &Attributes,
  name: &str,
  default: bool,
) -> Result<bool, ConfigurationError> {
  match attributes.get(name) {
    None | Some(Value::Null) => Ok(default),
    Some(Value::Bool(b)) => Ok(*b),
    Some(Value::String(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
    Some(Value::String(s)) if s.eq_ignore_ascii_case("false") => Ok(false),
    Some(value) => Err(ConfigurationError::InvalidValue {
      reference_id: reference_id.to_string(),
      attribute: name.to_string(),
      value: value_to_string(value),
    }),
  }
}

/// Resolve an attribute that may hold a list.
///
/// Accepts a JSON array, or a comma separated string. Falls back to the
/// `name:List<String>` spelling some configuration sources use. Blank
/// entries are dropped.
pub fn resolve_list(attributes: &Attributes, name: &str) -> Vec<String> {
  let value = attributes
    .get(name)
    .or_else(|| attributes.get(&format!("{}{}", name, LIST_ATTR_SUFFIX)));

  let items: Vec<String> = match value {
    None | Some(Value::Null) => return Vec::new(),
    Some(Value::Array(items)) => items.iter().map(value_to_string).collect(),
    Some(other) => value_to_string(other).split(',').map(str::to_string).collect(),
  };

  items
    .into_iter()
    .map(|s| s.trim().to_string())
    .filter(|s| !s.is_empty())
    .collect()
}
