//! Supervisor state, errors, and resolved clause forms.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::engine::{ConnectorFactory, ContextFactory};
use crate::clause::{ConfigurationError, ServiceClause, resolve_port, resolve_required_string, resolve_string};
use crate::consts::{ATTR_CONTEXT_PATH, ATTR_HOST, ATTR_PORT};
use crate::key::ResourceKey;
use crate::lifecycle::LifecycleError;

/// Lifecycle state of a supervised server.
///
/// `Inactive -> Starting -> Running -> Stopping -> Inactive`. `Failed` is
/// reachable from `Starting` and `Running` and is never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
  Inactive,
  Starting,
  Running,
  Stopping,
  Failed,
}

impl std::fmt::Display for SupervisorState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      SupervisorState::Inactive => "inactive",
      SupervisorState::Starting => "starting",
      SupervisorState::Running => "running",
      SupervisorState::Stopping => "stopping",
      SupervisorState::Failed => "failed",
    };
    write!(f, "{}", s)
  }
}

/// Handle returned by a [`ServiceRegistry`](super::ServiceRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RegistrationId(pub u64);

#[derive(Debug, Error)]
pub enum SupervisorError {
  #[error(transparent)]
  Configuration(#[from] ConfigurationError),

  #[error(transparent)]
  Lifecycle(#[from] LifecycleError),

  /// Deactivation finished, but some resources did not stop cleanly.
  #[error("server stopped uncleanly ({} failure(s)): {}", .failures.len(), first_failure(.failures))]
  UncleanStop { failures: Vec<LifecycleError> },

  #[error("cannot {operation} while {state}")]
  InvalidState {
    operation: &'static str,
    state: SupervisorState,
  },
}

fn first_failure(failures: &[LifecycleError]) -> String {
  failures.first().map(ToString::to_string).unwrap_or_default()
}

/// Counts of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
  pub created: usize,
  pub removed: usize,
  pub retained: usize,
  /// Retained entries updated in place (context path drift).
  pub updated: usize,
  /// Stale resources that were detached but did not stop cleanly.
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub failures: Vec<LifecycleError>,
}

impl ReconcileSummary {
  pub fn is_empty(&self) -> bool {
    self.created == 0 && self.removed == 0 && self.updated == 0
  }

  pub fn is_clean(&self) -> bool {
    self.failures.is_empty()
  }
}

pub type ConnectorClause<C> = ServiceClause<dyn ConnectorFactory<C>>;
pub type ContextClause<H> = ServiceClause<dyn ContextFactory<H>>;

/// A connector clause after attribute resolution.
pub struct ConnectorSpec<C> {
  pub host: Option<String>,
  pub port: u16,
  pub factory: Arc<dyn ConnectorFactory<C>>,
}

impl<C> Clone for ConnectorSpec<C> {
  fn clone(&self) -> Self {
    Self {
      host: self.host.clone(),
      port: self.port,
      factory: Arc::clone(&self.factory),
    }
  }
}

/// A context clause after attribute resolution.
pub struct ContextSpec<H> {
  pub context_path: String,
  pub factory: Arc<dyn ContextFactory<H>>,
}

impl<H> Clone for ContextSpec<H> {
  fn clone(&self) -> Self {
    Self {
      context_path: self.context_path.clone(),
      factory: Arc::clone(&self.factory),
    }
  }
}

/// Key of a connector: reference plus the resolved host and port.
pub fn connector_key(clause: &crate::clause::Clause) -> Result<(ResourceKey, Option<String>, u16), ConfigurationError> {
  let host = resolve_string(&clause.attributes, ATTR_HOST);
  let port = resolve_port(&clause.reference_id, &clause.attributes, ATTR_PORT)?;
  let key = ResourceKey::new(clause.reference())
    .with_optional_param(ATTR_HOST, host.clone())
    .with_param(ATTR_PORT, port);
  Ok((key, host, port))
}

/// Key of a context: the reference only. The path may drift in place.
pub fn context_key(clause: &crate::clause::Clause) -> Result<(ResourceKey, String), ConfigurationError> {
  let context_path = resolve_required_string(&clause.reference_id, &clause.attributes, ATTR_CONTEXT_PATH)?;
  Ok((ResourceKey::new(clause.reference()), context_path))
}

pub(crate) fn resolve_connectors<C>(
  clauses: &[ConnectorClause<C>],
) -> Result<Vec<(ResourceKey, ConnectorSpec<C>)>, ConfigurationError> {
  clauses
    .iter()
    .map(|c| {
      let (key, host, port) = connector_key(&c.clause)?;
      Ok((
        key,
        ConnectorSpec {
          host,
          port,
          factory: Arc::clone(&c.service),
        },
      ))
    })
    .collect()
}

pub(crate) fn resolve_contexts<H>(
  clauses: &[ContextClause<H>],
) -> Result<Vec<(ResourceKey, ContextSpec<H>)>, ConfigurationError> {
  clauses
    .iter()
    .map(|c| {
      let (key, context_path) = context_key(&c.clause)?;
      Ok((
        key,
        ContextSpec {
          context_path,
          factory: Arc::clone(&c.service),
        },
      ))
    })
    .collect()
}
