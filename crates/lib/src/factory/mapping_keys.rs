//! Identity keys for servlet and filter holders and their mappings.
//!
//! Each servlet clause yields a [`HolderKey`] and a [`ServletMappingKey`];
//! each filter clause yields a [`HolderKey`] and a [`FilterMappingKey`].
//! Two declarations produce the same key exactly when they would produce an
//! indistinguishable holder or mapping, so an unchanged entry keeps its live
//! object across reconfigurations.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use serde::Serialize;

use crate::clause::{Clause, ConfigurationError, resolve_bool, resolve_list, resolve_string};
use crate::consts::{ATTR_ASYNC_SUPPORTED, ATTR_DISPATCHER, ATTR_SERVLET_NAME, ATTR_URL_PATTERN, INIT_PARAM_PREFIX};
use crate::id::ServiceId;

/// Request dispatch kinds a filter mapping can apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatcherType {
  Forward,
  Include,
  Request,
  Async,
  Error,
}

impl FromStr for DispatcherType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "FORWARD" => Ok(DispatcherType::Forward),
      "INCLUDE" => Ok(DispatcherType::Include),
      "REQUEST" => Ok(DispatcherType::Request),
      "ASYNC" => Ok(DispatcherType::Async),
      "ERROR" => Ok(DispatcherType::Error),
      other => Err(other.to_string()),
    }
  }
}

impl std::fmt::Display for DispatcherType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      DispatcherType::Forward => "FORWARD",
      DispatcherType::Include => "INCLUDE",
      DispatcherType::Request => "REQUEST",
      DispatcherType::Async => "ASYNC",
      DispatcherType::Error => "ERROR",
    };
    write!(f, "{}", s)
  }
}

/// Identity of a servlet or filter holder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct HolderKey {
  pub name: String,
  pub service: ServiceId,
  /// `init-` prefixed clause attributes with the prefix stripped.
  pub init_parameters: BTreeMap<String, String>,
  pub async_supported: bool,
}

impl HolderKey {
  pub fn from_clause(clause: &Clause) -> Result<Self, ConfigurationError> {
    let init_parameters = clause
      .attributes
      .keys()
      .filter_map(|name| {
        let param = name.strip_prefix(INIT_PARAM_PREFIX)?;
        let value = resolve_string(&clause.attributes, name)?;
        Some((param.to_string(), value))
      })
      .collect();

    Ok(Self {
      name: clause.reference_id.clone(),
      service: clause.service,
      init_parameters,
      async_supported: resolve_bool(&clause.reference_id, &clause.attributes, ATTR_ASYNC_SUPPORTED, false)?,
    })
  }
}

/// Identity of a servlet mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ServletMappingKey {
  pub servlet_name: String,
  pub service: ServiceId,
  pub url_patterns: Vec<String>,
}

impl ServletMappingKey {
  pub fn from_clause(clause: &Clause) -> Self {
    Self {
      servlet_name: clause.reference_id.clone(),
      service: clause.service,
      url_patterns: resolve_list(&clause.attributes, ATTR_URL_PATTERN),
    }
  }
}

/// Identity of a filter mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FilterMappingKey {
  pub filter_name: String,
  pub service: ServiceId,
  pub url_patterns: Vec<String>,
  pub servlet_names: Vec<String>,
  pub dispatchers: BTreeSet<DispatcherType>,
}

impl FilterMappingKey {
  pub fn from_clause(clause: &Clause) -> Result<Self, ConfigurationError> {
    let dispatchers = resolve_list(&clause.attributes, ATTR_DISPATCHER)
      .iter()
      .map(|value| {
        value.parse::<DispatcherType>().map_err(|value| ConfigurationError::InvalidDispatcher {
          reference_id: clause.reference_id.clone(),
          value,
        })
      })
      .collect::<Result<BTreeSet<_>, _>>()?;

    Ok(Self {
      filter_name: clause.reference_id.clone(),
      service: clause.service,
      url_patterns: resolve_list(&clause.attributes, ATTR_URL_PATTERN),
      servlet_names: resolve_list(&clause.attributes, ATTR_SERVLET_NAME),
      dispatchers,
    })
  }
}
