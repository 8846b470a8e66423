//! Servlet context handlers and the factory that produces them.
//!
//! The factory receives the complete servlet and filter clause lists on every
//! change. Declarations are stored first; [`ServletContextHandlerFactory::update`]
//! then upgrades every live servlet handler through four ordered mapping
//! reconcilers, so unchanged holders and mappings keep their identity while
//! the tables take the newly declared order.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::error_page::{ErrorPageErrorHandler, ErrorPageErrorHandlerFactory};
use super::mapping_keys::{DispatcherType, FilterMappingKey, HolderKey, ServletMappingKey};
use super::session::{SessionHandler, SessionHandlerFactory};
use crate::clause::{Clause, ConfigurationError};
use crate::id::{InstanceId, ServiceId};
use crate::lifecycle::LifecycleError;
use crate::reconcile::{MappingReconciler, OrderedMappingEntry};
use crate::registry::LiveInstanceRegistry;
use crate::supervisor::ContextFactory;

/// A servlet or filter registered in a servlet handler.
#[derive(Debug)]
pub struct Holder {
  pub id: InstanceId,
  pub name: String,
  pub service: ServiceId,
  pub init_parameters: BTreeMap<String, String>,
  pub async_supported: bool,
}

impl Holder {
  fn from_key(key: &HolderKey) -> Self {
    Self {
      id: InstanceId::next(),
      name: key.name.clone(),
      service: key.service,
      init_parameters: key.init_parameters.clone(),
      async_supported: key.async_supported,
    }
  }
}

#[derive(Debug)]
pub struct ServletMapping {
  pub id: InstanceId,
  pub servlet_name: String,
  pub url_patterns: Vec<String>,
}

#[derive(Debug)]
pub struct FilterMapping {
  pub id: InstanceId,
  pub filter_name: String,
  pub url_patterns: Vec<String>,
  pub servlet_names: Vec<String>,
  pub dispatchers: BTreeSet<DispatcherType>,
}

/// The four ordered tables of a servlet handler.
#[derive(Debug, Clone, Default)]
pub struct HandlerTables {
  pub servlets: Vec<Arc<Holder>>,
  pub servlet_mappings: Vec<Arc<ServletMapping>>,
  pub filters: Vec<Arc<Holder>>,
  pub filter_mappings: Vec<Arc<FilterMapping>>,
}

impl HandlerTables {
  pub fn servlet_names(&self) -> Vec<&str> {
    self.servlets.iter().map(|h| h.name.as_str()).collect()
  }

  pub fn filter_names(&self) -> Vec<&str> {
    self.filters.iter().map(|h| h.name.as_str()).collect()
  }
}

#[derive(Debug)]
pub struct ServletHandler {
  id: InstanceId,
  tables: Mutex<HandlerTables>,
}

impl ServletHandler {
  pub fn id(&self) -> InstanceId {
    self.id
  }

  pub fn tables(&self) -> HandlerTables {
    self.tables.lock().clone()
  }

  fn replace_tables(&self, tables: HandlerTables) {
    *self.tables.lock() = tables;
  }
}

/// A handler serving one context path.
#[derive(Debug)]
pub struct ServletContextHandler {
  id: InstanceId,
  context_path: Mutex<String>,
  servlet_handler: Arc<ServletHandler>,
  session_handler: Option<Arc<SessionHandler>>,
  error_handler: Option<Arc<ErrorPageErrorHandler>>,
}

impl ServletContextHandler {
  pub fn id(&self) -> InstanceId {
    self.id
  }

  pub fn context_path(&self) -> String {
    self.context_path.lock().clone()
  }

  pub fn set_context_path(&self, context_path: &str) {
    *self.context_path.lock() = context_path.to_string();
  }

  pub fn servlet_handler(&self) -> &Arc<ServletHandler> {
    &self.servlet_handler
  }

  pub fn session_handler(&self) -> Option<&Arc<SessionHandler>> {
    self.session_handler.as_ref()
  }

  pub fn error_handler(&self) -> Option<&Arc<ErrorPageErrorHandler>> {
    self.error_handler.as_ref()
  }
}

#[derive(Debug, Clone, Default)]
struct Declaration {
  servlets: Vec<OrderedMappingEntry<HolderKey>>,
  servlet_mappings: Vec<OrderedMappingEntry<ServletMappingKey>>,
  filters: Vec<OrderedMappingEntry<HolderKey>>,
  filter_mappings: Vec<OrderedMappingEntry<FilterMappingKey>>,
}

#[derive(Default)]
struct Reconcilers {
  servlets: MappingReconciler<HolderKey>,
  servlet_mappings: MappingReconciler<ServletMappingKey>,
  filters: MappingReconciler<HolderKey>,
  filter_mappings: MappingReconciler<FilterMappingKey>,
}

impl Reconcilers {
  fn remember(&mut self, declaration: &Declaration) {
    self.servlets.update_previous_keys(&declaration.servlets);
    self.servlet_mappings.update_previous_keys(&declaration.servlet_mappings);
    self.filters.update_previous_keys(&declaration.filters);
    self.filter_mappings.update_previous_keys(&declaration.filter_mappings);
  }

  /// Tables for `declaration`, reusing entries of `existing`.
  fn upgrade(&self, declaration: &Declaration, existing: &HandlerTables) -> HandlerTables {
    HandlerTables {
      servlets: self
        .servlets
        .generate_upgraded(&declaration.servlets, &existing.servlets, |e| Arc::new(Holder::from_key(&e.key))),
      servlet_mappings: self.servlet_mappings.generate_upgraded(
        &declaration.servlet_mappings,
        &existing.servlet_mappings,
        |e| {
          Arc::new(ServletMapping {
            id: InstanceId::next(),
            servlet_name: e.key.servlet_name.clone(),
            url_patterns: e.key.url_patterns.clone(),
          })
        },
      ),
      filters: self
        .filters
        .generate_upgraded(&declaration.filters, &existing.filters, |e| Arc::new(Holder::from_key(&e.key))),
      filter_mappings: self.filter_mappings.generate_upgraded(
        &declaration.filter_mappings,
        &existing.filter_mappings,
        |e| {
          Arc::new(FilterMapping {
            id: InstanceId::next(),
            filter_name: e.key.filter_name.clone(),
            url_patterns: e.key.url_patterns.clone(),
            servlet_names: e.key.servlet_names.clone(),
            dispatchers: e.key.dispatchers.clone(),
          })
        },
      ),
    }
  }
}

struct State {
  /// Stored by the setters, realized by the next `update`.
  declared: Declaration,
  /// What every live servlet handler currently reflects.
  applied: Declaration,
  reconcilers: Reconcilers,
  session_factory: Option<Arc<SessionHandlerFactory>>,
  error_handler_factory: Option<Arc<ErrorPageErrorHandlerFactory>>,
  pending: bool,
}

/// Report of one `update` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextUpdateReport {
  /// Live servlet handlers whose tables were rebuilt.
  pub handlers: usize,
}

/// Service that produces [`ServletContextHandler`]s.
pub struct ServletContextHandlerFactory {
  service: ServiceId,
  state: Mutex<State>,
  handlers: LiveInstanceRegistry<ServletHandler>,
}

impl ServletContextHandlerFactory {
  pub fn new() -> Self {
    Self {
      service: ServiceId::next(),
      state: Mutex::new(State {
        declared: Declaration::default(),
        applied: Declaration::default(),
        reconcilers: Reconcilers::default(),
        session_factory: None,
        error_handler_factory: None,
        pending: false,
      }),
      handlers: LiveInstanceRegistry::new(),
    }
  }

  /// Declare the complete servlet list. Takes effect on the next `update`.
  pub fn set_servlets(&self, clauses: &[Clause]) -> Result<(), ConfigurationError> {
    let mut holders = Vec::with_capacity(clauses.len());
    let mut mappings = Vec::with_capacity(clauses.len());
    for clause in clauses {
      holders.push((HolderKey::from_clause(clause)?, clause.attributes.clone()));
      mappings.push((ServletMappingKey::from_clause(clause), clause.attributes.clone()));
    }

    let mut state = self.state.lock();
    state.declared.servlets = OrderedMappingEntry::sequence(holders);
    state.declared.servlet_mappings = OrderedMappingEntry::sequence(mappings);
    state.pending = true;
    debug!(factory = %self.service, servlets = clauses.len(), "declared servlets");
    Ok(())
  }

  /// Declare the complete filter list. Takes effect on the next `update`.
  pub fn set_filters(&self, clauses: &[Clause]) -> Result<(), ConfigurationError> {
    let mut holders = Vec::with_capacity(clauses.len());
    let mut mappings = Vec::with_capacity(clauses.len());
    for clause in clauses {
      holders.push((HolderKey::from_clause(clause)?, clause.attributes.clone()));
      mappings.push((FilterMappingKey::from_clause(clause)?, clause.attributes.clone()));
    }

    let mut state = self.state.lock();
    state.declared.filters = OrderedMappingEntry::sequence(holders);
    state.declared.filter_mappings = OrderedMappingEntry::sequence(mappings);
    state.pending = true;
    debug!(factory = %self.service, filters = clauses.len(), "declared filters");
    Ok(())
  }

  /// Session handler factory for handlers created afterwards.
  pub fn set_session_handler_factory(&self, factory: Option<Arc<SessionHandlerFactory>>) {
    self.state.lock().session_factory = factory;
  }

  /// Error handler factory for handlers created afterwards.
  pub fn set_error_handler_factory(&self, factory: Option<Arc<ErrorPageErrorHandlerFactory>>) {
    self.state.lock().error_handler_factory = factory;
  }

  /// Upgrade every live servlet handler to the declared servlets and filters.
  pub fn update(&self) -> ContextUpdateReport {
    let mut state = self.state.lock();
    let mut report = ContextUpdateReport::default();
    if !state.pending {
      return report;
    }

    for handler in self.handlers.snapshot() {
      let tables = state.reconcilers.upgrade(&state.declared, &handler.tables());
      handler.replace_tables(tables);
      report.handlers += 1;
    }

    let declared = state.declared.clone();
    state.reconcilers.remember(&declared);
    state.applied = declared;
    state.pending = false;

    info!(
      factory = %self.service,
      handlers = report.handlers,
      servlets = state.applied.servlets.len(),
      filters = state.applied.filters.len(),
      "servlet handlers updated"
    );
    report
  }

  pub fn live_servlet_handlers(&self) -> Vec<Arc<ServletHandler>> {
    self.handlers.snapshot()
  }
}

impl Default for ServletContextHandlerFactory {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for ServletContextHandlerFactory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ServletContextHandlerFactory")
      .field("service", &self.service)
      .field("handlers", &self.handlers)
      .finish_non_exhaustive()
  }
}

impl ContextFactory<Arc<ServletContextHandler>> for ServletContextHandlerFactory {
  fn service_id(&self) -> ServiceId {
    self.service
  }

  fn create_handler(&self, context_path: &str) -> Result<Arc<ServletContextHandler>, LifecycleError> {
    let state = self.state.lock();

    let servlet_handler = Arc::new(ServletHandler {
      id: InstanceId::next(),
      tables: Mutex::new(Reconcilers::default().upgrade(&state.applied, &HandlerTables::default())),
    });
    let session_handler = state.session_factory.as_ref().map(|f| f.create_session_handler());
    let error_handler = state.error_handler_factory.as_ref().map(|f| f.create_error_handler());

    self.handlers.track(servlet_handler.id, &servlet_handler);

    let handler = Arc::new(ServletContextHandler {
      id: InstanceId::next(),
      context_path: Mutex::new(context_path.to_string()),
      servlet_handler,
      session_handler,
      error_handler,
    });
    info!(handler = %handler.id, context_path, "created servlet context handler");
    Ok(handler)
  }
}
