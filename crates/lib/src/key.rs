//! Resource identity keys.
//!
//! A [`ResourceKey`] answers one question during reconciliation: is this
//! declared entry the same logical resource that was realized last time?
//! Keys combine the declaring reference with the parameters that were
//! resolved from its clause. Equality is structural, so changing any keyed
//! parameter (a port, a host) produces a different key and the reconciler
//! treats the entry as remove + add.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::FINGERPRINT_LEN;
use crate::id::ServiceId;

pub type FingerprintError = serde_json::Error;

/// Which declared reference produced a resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReferenceIdentity {
  /// Id of the clause within its slot (e.g. the connector clause name).
  pub reference_id: String,
  /// The service the clause points at.
  pub service: ServiceId,
}

impl ReferenceIdentity {
  pub fn new(reference_id: impl Into<String>, service: ServiceId) -> Self {
    Self {
      reference_id: reference_id.into(),
      service,
    }
  }
}

impl std::fmt::Display for ReferenceIdentity {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}@{}", self.reference_id, self.service)
  }
}

/// A resolved parameter value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
  Bool(bool),
  Int(i64),
  Str(String),
  List(Vec<String>),
}

impl From<bool> for ParamValue {
  fn from(value: bool) -> Self {
    ParamValue::Bool(value)
  }
}

impl From<i64> for ParamValue {
  fn from(value: i64) -> Self {
    ParamValue::Int(value)
  }
}

impl From<u16> for ParamValue {
  fn from(value: u16) -> Self {
    ParamValue::Int(i64::from(value))
  }
}

impl From<&str> for ParamValue {
  fn from(value: &str) -> Self {
    ParamValue::Str(value.to_string())
  }
}

impl From<String> for ParamValue {
  fn from(value: String) -> Self {
    ParamValue::Str(value)
  }
}

impl From<Vec<String>> for ParamValue {
  fn from(value: Vec<String>) -> Self {
    ParamValue::List(value)
  }
}

impl std::fmt::Display for ParamValue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ParamValue::Bool(b) => write!(f, "{}", b),
      ParamValue::Int(i) => write!(f, "{}", i),
      ParamValue::Str(s) => write!(f, "{}", s),
      ParamValue::List(items) => write!(f, "[{}]", items.join(",")),
    }
  }
}

/// Immutable identity of a declared resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
  pub reference: ReferenceIdentity,
  /// Keyed parameters. Absent optional parameters are simply not present.
  pub params: BTreeMap<String, ParamValue>,
}

impl ResourceKey {
  pub fn new(reference: ReferenceIdentity) -> Self {
    Self {
      reference,
      params: BTreeMap::new(),
    }
  }

  /// Add a keyed parameter.
  pub fn with_param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
    self.params.insert(name.into(), value.into());
    self
  }

  /// Add a keyed parameter only when a value is present.
  pub fn with_optional_param(self, name: impl Into<String>, value: Option<impl Into<ParamValue>>) -> Self {
    match value {
      Some(value) => self.with_param(name, value),
      None => self,
    }
  }

  pub fn param(&self, name: &str) -> Option<&ParamValue> {
    self.params.get(name)
  }
}

impl std::fmt::Display for ResourceKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.reference)?;
    if !self.params.is_empty() {
      let params: Vec<String> = self.params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
      write!(f, "{{{}}}", params.join(","))?;
    }
    Ok(())
  }
}

impl Fingerprinted for ResourceKey {}

/// A short hex digest identifying a key in logs and CLI output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl std::fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Anything serializable can be fingerprinted by hashing its JSON form.
///
/// Keys use ordered maps so the serialized form, and with it the
/// fingerprint, is stable across runs.
pub trait Fingerprinted: Serialize {
  fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
    let serialized = serde_json::to_string(self)?;
    let digest = Sha256::digest(serialized.as_bytes());
    let full = hex::encode(digest);
    Ok(Fingerprint(full[..FINGERPRINT_LEN].to_string()))
  }
}
