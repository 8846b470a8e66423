//! JSON server documents.
//!
//! A [`ServerDocument`] names every factory a server uses and lists the
//! connector and context clauses that point at them, along with the request
//! customizers its HTTP factories reference. Servlet and filter
//! clauses live inside their context factory. Documents are parsed with
//! `serde_json` and checked with [`ServerDocument::validate`] before anything
//! is realized.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clause::{Attributes, Clause, ConfigurationError};
use crate::consts::{DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_INHERIT_CHANNEL, DEFAULT_REUSE_ADDRESS};
use crate::factory::{CustomizerConfig, ErrorHandlerConfig, FilterMappingKey, HolderKey, HttpConfig, SessionConfig};
use crate::id::ServiceId;
use crate::supervisor::{connector_key, context_key};

#[derive(Debug, Error)]
pub enum DocumentError {
  #[error("failed to read {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {}: {source}", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("{referenced_by} references unknown {kind} '{name}'")]
  UnknownReference {
    kind: &'static str,
    name: String,
    referenced_by: String,
  },

  #[error("{slot} clause '{name}' is declared more than once")]
  DuplicateClause { slot: &'static str, name: String },

  #[error(transparent)]
  Clause(#[from] ConfigurationError),
}

/// One declared clause: a reference name, the service it points at, and raw
/// attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClauseDoc {
  pub name: String,
  /// Name of the referenced service (a factory name for connectors and
  /// contexts, a servlet or filter service name inside context factories).
  pub service: String,
  #[serde(default)]
  pub attributes: Attributes,
}

impl ClauseDoc {
  pub fn to_clause(&self, service: ServiceId) -> Clause {
    Clause {
      reference_id: self.name.clone(),
      service,
      attributes: self.attributes.clone(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ConnectorFactoryDoc {
  pub acceptor_priority_delta: i32,
  pub accept_queue_size: u32,
  /// HTTP factory names, front to back.
  pub chain: Vec<String>,
  pub idle_timeout_ms: u64,
  pub inherit_channel: bool,
  pub name: Option<String>,
  pub reuse_address: bool,
}

impl Default for ConnectorFactoryDoc {
  fn default() -> Self {
    Self {
      acceptor_priority_delta: 0,
      accept_queue_size: 0,
      chain: Vec::new(),
      idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
      inherit_channel: DEFAULT_INHERIT_CHANNEL,
      name: None,
      reuse_address: DEFAULT_REUSE_ADDRESS,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ContextFactoryDoc {
  pub session_factory: Option<String>,
  pub error_handler_factory: Option<String>,
  pub servlets: Vec<ClauseDoc>,
  pub filters: Vec<ClauseDoc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ServerDocument {
  pub description: Option<String>,
  pub customizers: BTreeMap<String, CustomizerConfig>,
  pub http_factories: BTreeMap<String, HttpConfig>,
  pub connector_factories: BTreeMap<String, ConnectorFactoryDoc>,
  pub session_factories: BTreeMap<String, SessionConfig>,
  pub error_handler_factories: BTreeMap<String, ErrorHandlerConfig>,
  pub context_factories: BTreeMap<String, ContextFactoryDoc>,
  pub connectors: Vec<ClauseDoc>,
  pub contexts: Vec<ClauseDoc>,
}

impl ServerDocument {
  pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(content)
  }

  /// Check cross references and clause attributes.
  ///
  /// Clause keys are compared per referenced factory name, so the service
  /// identity used while resolving is irrelevant here.
  pub fn validate(&self) -> Result<(), DocumentError> {
    for (name, http) in &self.http_factories {
      for customizer in &http.customizers {
        if !self.customizers.contains_key(customizer.name()) {
          return Err(DocumentError::UnknownReference {
            kind: "customizer",
            name: customizer.name().to_string(),
            referenced_by: format!("http factory '{}'", name),
          });
        }
      }
    }

    for (name, factory) in &self.connector_factories {
      for http in &factory.chain {
        if !self.http_factories.contains_key(http) {
          return Err(DocumentError::UnknownReference {
            kind: "http factory",
            name: http.clone(),
            referenced_by: format!("connector factory '{}'", name),
          });
        }
      }
    }

    for (name, factory) in &self.context_factories {
      if let Some(session) = &factory.session_factory {
        if !self.session_factories.contains_key(session) {
          return Err(DocumentError::UnknownReference {
            kind: "session factory",
            name: session.clone(),
            referenced_by: format!("context factory '{}'", name),
          });
        }
      }
      if let Some(errors) = &factory.error_handler_factory {
        if !self.error_handler_factories.contains_key(errors) {
          return Err(DocumentError::UnknownReference {
            kind: "error handler factory",
            name: errors.clone(),
            referenced_by: format!("context factory '{}'", name),
          });
        }
      }
      for servlet in &factory.servlets {
        HolderKey::from_clause(&servlet.to_clause(ServiceId(0)))?;
      }
      for filter in &factory.filters {
        let clause = filter.to_clause(ServiceId(0));
        HolderKey::from_clause(&clause)?;
        FilterMappingKey::from_clause(&clause)?;
      }
    }

    let mut seen = HashSet::new();
    for connector in &self.connectors {
      if !self.connector_factories.contains_key(&connector.service) {
        return Err(DocumentError::UnknownReference {
          kind: "connector factory",
          name: connector.service.clone(),
          referenced_by: format!("connector '{}'", connector.name),
        });
      }
      let (key, _, _) = connector_key(&connector.to_clause(ServiceId(0)))?;
      if !seen.insert((connector.service.as_str(), key)) {
        return Err(DocumentError::DuplicateClause {
          slot: "connector",
          name: connector.name.clone(),
        });
      }
    }

    let mut seen = HashSet::new();
    for context in &self.contexts {
      if !self.context_factories.contains_key(&context.service) {
        return Err(DocumentError::UnknownReference {
          kind: "context factory",
          name: context.service.clone(),
          referenced_by: format!("context '{}'", context.name),
        });
      }
      let (key, _) = context_key(&context.to_clause(ServiceId(0)))?;
      if !seen.insert((context.service.as_str(), key)) {
        return Err(DocumentError::DuplicateClause {
          slot: "context",
          name: context.name.clone(),
        });
      }
    }

    Ok(())
  }
}

/// Read, parse and validate a server document.
pub fn load_document(path: &Path) -> Result<ServerDocument, DocumentError> {
  let content = fs::read_to_string(path).map_err(|source| DocumentError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let document = ServerDocument::from_json(&content).map_err(|source| DocumentError::Parse {
    path: path.to_path_buf(),
    source,
  })?;
  document.validate()?;
  Ok(document)
}
