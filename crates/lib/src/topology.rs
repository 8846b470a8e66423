//! Realizing server documents.
//!
//! A [`Topology`] turns a [`ServerDocument`] into live factories and clause
//! sets for one [`ServerSupervisor`]. Factories are kept by name across
//! reloads so their service identities, and with them every connector and
//! context key, stay stable. Request customizers are the exception: a changed
//! customizer is replaced, and the HTTP factories bound to it see their
//! customizer list change. Applying a new document translates factory
//! changes into typed attribute setters followed by a single `update()` per
//! changed factory, then re-delivers the clause sets.
//!
//! [`plan_documents`] computes the same decisions between two documents
//! without touching anything.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::attribute::{ApplyEffect, ApplyReport, DynamicAttribute, UpdateReport};
use crate::clause::{Clause, ConfigurationError, ServiceClause};
use crate::document::{ClauseDoc, ConnectorFactoryDoc, DocumentError, ServerDocument};
use crate::factory::{
  ConnectionFactoryFactory, ConnectorSettings, ErrorHandlerConfig, ErrorPageErrorHandlerFactory, HttpConfig,
  HttpConnectionFactoryFactory, RequestCustomizer, ServerConnector, ServerConnectorFactory, ServletContextHandler,
  ServletContextHandlerFactory, SessionConfig, SessionHandlerFactory,
};
use crate::id::ServiceId;
use crate::key::{Fingerprinted, ResourceKey};
use crate::lifecycle::LifecycleError;
use crate::reconcile::reconcile;
use crate::supervisor::{
  ConnectorClause, ConnectorFactory, ContextClause, ContextFactory, ReconcileSummary, ServerEngine, ServerSupervisor,
  SupervisorError, connector_key, context_key,
};

pub const KIND_HTTP: &str = "http factory";
pub const KIND_CONNECTOR: &str = "connector factory";
pub const KIND_SESSION: &str = "session factory";
pub const KIND_CONTEXT: &str = "context factory";
pub const KIND_CUSTOMIZER: &str = "customizer";
pub const KIND_ERROR_HANDLER: &str = "error handler factory";

#[derive(Debug, Error)]
pub enum TopologyError {
  #[error(transparent)]
  Document(#[from] DocumentError),

  #[error(transparent)]
  Configuration(#[from] ConfigurationError),

  #[error(transparent)]
  Supervisor(#[from] SupervisorError),
}

/// One attribute setter issued while applying a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeChange {
  pub kind: &'static str,
  pub factory: String,
  pub attribute: &'static str,
  pub effect: ApplyEffect,
  /// Live instances updated immediately.
  pub updated: usize,
}

/// Outcome of [`Topology::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopologyReport {
  pub attribute_changes: Vec<AttributeChange>,
  pub factories_created: usize,
  pub factories_updated: usize,
  pub factories_removed: usize,
  /// Customizers re-created with new settings.
  pub customizers_replaced: usize,
  /// Live instances closed by factory updates.
  pub endpoints_closed: usize,
  /// Attribute and update failures on individual live instances.
  pub instance_failures: usize,
  pub connectors: ReconcileSummary,
  pub contexts: ReconcileSummary,
}

impl TopologyReport {
  pub fn is_empty(&self) -> bool {
    self.attribute_changes.is_empty()
      && self.factories_created == 0
      && self.factories_updated == 0
      && self.factories_removed == 0
      && self.customizers_replaced == 0
      && self.connectors.is_empty()
      && self.contexts.is_empty()
  }

  /// Stale connectors and contexts that were detached but failed to stop.
  pub fn stop_failures(&self) -> impl Iterator<Item = &LifecycleError> {
    self.contexts.failures.iter().chain(&self.connectors.failures)
  }

  fn record_set(&mut self, kind: &'static str, factory: &str, report: ApplyReport) {
    for failure in &report.failures {
      warn!(kind, factory, error = %failure, "attribute rejected by live instance");
    }
    self.instance_failures += report.failures.len();
    self.attribute_changes.push(AttributeChange {
      kind,
      factory: factory.to_string(),
      attribute: report.attribute,
      effect: report.effect,
      updated: report.updated,
    });
  }

  fn record_update(&mut self, kind: &'static str, factory: &str, report: UpdateReport) {
    for failure in &report.failures {
      warn!(kind, factory, error = %failure, "live instance failed to update");
    }
    self.instance_failures += report.failures.len();
    self.endpoints_closed += report.closed;
    self.factories_updated += 1;
  }
}

type HttpFactories = BTreeMap<String, Arc<HttpConnectionFactoryFactory>>;
type Customizers = BTreeMap<String, Arc<RequestCustomizer>>;

fn connector_settings(doc: &ConnectorFactoryDoc, http: &HttpFactories) -> ConnectorSettings {
  ConnectorSettings {
    acceptor_priority_delta: doc.acceptor_priority_delta,
    accept_queue_size: doc.accept_queue_size,
    connection_factory_factories: doc
      .chain
      .iter()
      .filter_map(|name| http.get(name))
      .map(|factory| Arc::clone(factory) as Arc<dyn ConnectionFactoryFactory>)
      .collect(),
    idle_timeout: Duration::from_millis(doc.idle_timeout_ms),
    inherit_channel: doc.inherit_channel,
    name: doc.name.clone(),
    reuse_address: doc.reuse_address,
  }
}

/// Drop entries whose name is not in `keep`. Returns how many were dropped.
fn retain_named<V, K>(map: &mut BTreeMap<String, V>, keep: &BTreeMap<String, K>) -> usize {
  let before = map.len();
  map.retain(|name, _| keep.contains_key(name));
  before - map.len()
}

/// Live factories and supervisor for one server document.
pub struct Topology<E>
where
  E: ServerEngine<Connector = Arc<ServerConnector>, Handler = Arc<ServletContextHandler>>,
{
  supervisor: ServerSupervisor<E>,
  customizers: Customizers,
  http: HttpFactories,
  connectors: BTreeMap<String, Arc<ServerConnectorFactory>>,
  sessions: BTreeMap<String, Arc<SessionHandlerFactory>>,
  error_handlers: BTreeMap<String, Arc<ErrorPageErrorHandlerFactory>>,
  contexts: BTreeMap<String, Arc<ServletContextHandlerFactory>>,
  /// Servlet and filter service names.
  services: BTreeMap<String, ServiceId>,
  current: Option<ServerDocument>,
}

impl<E> Topology<E>
where
  E: ServerEngine<Connector = Arc<ServerConnector>, Handler = Arc<ServletContextHandler>>,
{
  pub fn new(supervisor: ServerSupervisor<E>) -> Self {
    Self {
      supervisor,
      customizers: BTreeMap::new(),
      http: BTreeMap::new(),
      connectors: BTreeMap::new(),
      sessions: BTreeMap::new(),
      error_handlers: BTreeMap::new(),
      contexts: BTreeMap::new(),
      services: BTreeMap::new(),
      current: None,
    }
  }

  pub fn supervisor(&self) -> &ServerSupervisor<E> {
    &self.supervisor
  }

  /// The last document applied successfully.
  pub fn document(&self) -> Option<&ServerDocument> {
    self.current.as_ref()
  }

  pub fn customizer(&self, name: &str) -> Option<&Arc<RequestCustomizer>> {
    self.customizers.get(name)
  }

  pub fn http_factory(&self, name: &str) -> Option<&Arc<HttpConnectionFactoryFactory>> {
    self.http.get(name)
  }

  pub fn connector_factory(&self, name: &str) -> Option<&Arc<ServerConnectorFactory>> {
    self.connectors.get(name)
  }

  pub fn session_factory(&self, name: &str) -> Option<&Arc<SessionHandlerFactory>> {
    self.sessions.get(name)
  }

  pub fn error_handler_factory(&self, name: &str) -> Option<&Arc<ErrorPageErrorHandlerFactory>> {
    self.error_handlers.get(name)
  }

  pub fn context_factory(&self, name: &str) -> Option<&Arc<ServletContextHandlerFactory>> {
    self.contexts.get(name)
  }

  /// Bring factories and supervisor in line with `document`.
  pub fn apply(&mut self, document: &ServerDocument) -> Result<TopologyReport, TopologyError> {
    document.validate()?;
    let mut report = TopologyReport::default();

    self.apply_customizers(document, &mut report);
    self.apply_http(document, &mut report);
    self.apply_sessions(document, &mut report);
    self.apply_error_handlers(document, &mut report);
    self.apply_connector_factories(document, &mut report);
    self.apply_context_factories(document, &mut report)?;

    let contexts = self.context_clauses(document);
    report.contexts = self.supervisor.set_context_clauses(&contexts)?;
    let connectors = self.connector_clauses(document);
    report.connectors = self.supervisor.set_connector_clauses(&connectors)?;

    report.factories_removed += retain_named(&mut self.connectors, &document.connector_factories);
    report.factories_removed += retain_named(&mut self.contexts, &document.context_factories);
    report.factories_removed += retain_named(&mut self.http, &document.http_factories);
    report.factories_removed += retain_named(&mut self.sessions, &document.session_factories);
    report.factories_removed += retain_named(&mut self.error_handlers, &document.error_handler_factories);
    report.factories_removed += retain_named(&mut self.customizers, &document.customizers);

    self.current = Some(document.clone());
    info!(
      state = %self.supervisor.state(),
      attributes = report.attribute_changes.len(),
      factories_updated = report.factories_updated,
      customizers_replaced = report.customizers_replaced,
      connectors_created = report.connectors.created,
      connectors_removed = report.connectors.removed,
      contexts_created = report.contexts.created,
      contexts_removed = report.contexts.removed,
      stop_failures = report.stop_failures().count(),
      "document applied"
    );
    Ok(report)
  }

  fn apply_customizers(&mut self, document: &ServerDocument, report: &mut TopologyReport) {
    for (name, config) in &document.customizers {
      match self.customizers.get(name) {
        Some(existing) if existing.config() == config => continue,
        Some(existing) => {
          info!(customizer = name.as_str(), previous = %existing.service_id(), "replacing customizer");
          report.customizers_replaced += 1;
        }
        None => report.factories_created += 1,
      }
      self
        .customizers
        .insert(name.clone(), Arc::new(RequestCustomizer::new(name.clone(), config.clone())));
    }
  }

  fn apply_http(&mut self, document: &ServerDocument, report: &mut TopologyReport) {
    for (name, declared) in &document.http_factories {
      let config = declared.with_customizers(&self.customizers);
      let Some(factory) = self.http.get(name) else {
        self
          .http
          .insert(name.clone(), Arc::new(HttpConnectionFactoryFactory::new(config)));
        report.factories_created += 1;
        continue;
      };
      let changes = factory.config().changes_to(&config);
      if changes.is_empty() {
        continue;
      }
      for attribute in changes {
        report.record_set(KIND_HTTP, name, factory.set(attribute));
      }
      report.record_update(KIND_HTTP, name, factory.update());
    }
  }

  fn apply_sessions(&mut self, document: &ServerDocument, report: &mut TopologyReport) {
    for (name, config) in &document.session_factories {
      let Some(factory) = self.sessions.get(name) else {
        self
          .sessions
          .insert(name.clone(), Arc::new(SessionHandlerFactory::new(config.clone())));
        report.factories_created += 1;
        continue;
      };
      let changes = factory.config().changes_to(config);
      if changes.is_empty() {
        continue;
      }
      for attribute in changes {
        report.record_set(KIND_SESSION, name, factory.set(attribute));
      }
      report.record_update(KIND_SESSION, name, factory.update());
    }
  }

  fn apply_error_handlers(&mut self, document: &ServerDocument, report: &mut TopologyReport) {
    for (name, config) in &document.error_handler_factories {
      let Some(factory) = self.error_handlers.get(name) else {
        self
          .error_handlers
          .insert(name.clone(), Arc::new(ErrorPageErrorHandlerFactory::new(config.clone())));
        report.factories_created += 1;
        continue;
      };
      let changes = factory.config().changes_to(config);
      if changes.is_empty() {
        continue;
      }
      for attribute in changes {
        report.record_set(KIND_ERROR_HANDLER, name, factory.set(attribute));
      }
      report.record_update(KIND_ERROR_HANDLER, name, factory.update());
    }
  }

  fn apply_connector_factories(&mut self, document: &ServerDocument, report: &mut TopologyReport) {
    for (name, doc) in &document.connector_factories {
      let settings = connector_settings(doc, &self.http);
      let Some(factory) = self.connectors.get(name) else {
        self
          .connectors
          .insert(name.clone(), Arc::new(ServerConnectorFactory::new(settings)));
        report.factories_created += 1;
        continue;
      };
      let changes = factory.settings().changes_to(&settings);
      if changes.is_empty() {
        continue;
      }
      for attribute in changes {
        report.record_set(KIND_CONNECTOR, name, factory.set(attribute));
      }
      report.record_update(KIND_CONNECTOR, name, factory.update());
    }
  }

  fn apply_context_factories(
    &mut self,
    document: &ServerDocument,
    report: &mut TopologyReport,
  ) -> Result<(), TopologyError> {
    for (name, doc) in &document.context_factories {
      let previous = self.current.as_ref().and_then(|d| d.context_factories.get(name));
      let created = !self.contexts.contains_key(name);
      if !created && previous == Some(doc) {
        continue;
      }

      let servlets = self.service_clauses(&doc.servlets);
      let filters = self.service_clauses(&doc.filters);
      let session = doc.session_factory.as_ref().and_then(|s| self.sessions.get(s)).cloned();
      let errors = doc
        .error_handler_factory
        .as_ref()
        .and_then(|e| self.error_handlers.get(e))
        .cloned();

      let factory = Arc::clone(
        self
          .contexts
          .entry(name.clone())
          .or_insert_with(|| Arc::new(ServletContextHandlerFactory::new())),
      );
      factory.set_session_handler_factory(session);
      factory.set_error_handler_factory(errors);
      factory.set_servlets(&servlets)?;
      factory.set_filters(&filters)?;
      let updated = factory.update();

      if created {
        report.factories_created += 1;
      } else {
        report.factories_updated += 1;
        info!(factory = name.as_str(), handlers = updated.handlers, "context factory updated");
      }
    }
    Ok(())
  }

  fn service_clauses(&mut self, docs: &[ClauseDoc]) -> Vec<Clause> {
    docs
      .iter()
      .map(|doc| {
        let service = *self.services.entry(doc.service.clone()).or_insert_with(ServiceId::next);
        doc.to_clause(service)
      })
      .collect()
  }

  fn connector_clauses(&self, document: &ServerDocument) -> Vec<ConnectorClause<Arc<ServerConnector>>> {
    document
      .connectors
      .iter()
      .filter_map(|doc| {
        let factory = self.connectors.get(&doc.service)?;
        let service: Arc<dyn ConnectorFactory<Arc<ServerConnector>>> = Arc::clone(factory) as _;
        Some(ServiceClause::new(doc.to_clause(service.service_id()), service))
      })
      .collect()
  }

  fn context_clauses(&self, document: &ServerDocument) -> Vec<ContextClause<Arc<ServletContextHandler>>> {
    document
      .contexts
      .iter()
      .filter_map(|doc| {
        let factory = self.contexts.get(&doc.service)?;
        let service: Arc<dyn ContextFactory<Arc<ServletContextHandler>>> = Arc::clone(factory) as _;
        Some(ServiceClause::new(doc.to_clause(service.service_id()), service))
      })
      .collect()
  }
}

impl<E> std::fmt::Debug for Topology<E>
where
  E: ServerEngine<Connector = Arc<ServerConnector>, Handler = Arc<ServletContextHandler>>,
{
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Topology")
      .field("supervisor", &self.supervisor)
      .field("customizers", &self.customizers.keys().collect::<Vec<_>>())
      .field("http", &self.http.keys().collect::<Vec<_>>())
      .field("connectors", &self.connectors.keys().collect::<Vec<_>>())
      .field("sessions", &self.sessions.keys().collect::<Vec<_>>())
      .field("contexts", &self.contexts.keys().collect::<Vec<_>>())
      .finish_non_exhaustive()
  }
}

/// A declared entry as shown in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
  pub name: String,
  pub factory: String,
  /// Keyed parameters, e.g. `host=127.0.0.1,port=9090`.
  pub params: String,
  pub fingerprint: String,
  /// Context path, for context entries.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub context_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SlotPlan {
  pub create: Vec<PlanEntry>,
  pub remove: Vec<PlanEntry>,
  pub retain: Vec<PlanEntry>,
  /// Retained entries changed in place.
  pub update: Vec<PlanEntry>,
}

impl SlotPlan {
  pub fn is_empty(&self) -> bool {
    self.create.is_empty() && self.remove.is_empty() && self.update.is_empty()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FactoryChange {
  Added,
  Removed,
  /// Re-created under the same name with new settings.
  Replaced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedFactory {
  pub kind: &'static str,
  pub name: String,
  pub change: FactoryChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedAttribute {
  pub kind: &'static str,
  pub factory: String,
  pub attribute: &'static str,
  pub effect: ApplyEffect,
}

/// Decisions that applying `to` after `from` would make.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Plan {
  pub factories: Vec<PlannedFactory>,
  pub attributes: Vec<PlannedAttribute>,
  pub connectors: SlotPlan,
  pub contexts: SlotPlan,
}

impl Plan {
  pub fn is_empty(&self) -> bool {
    self.factories.is_empty() && self.attributes.is_empty() && self.connectors.is_empty() && self.contexts.is_empty()
  }
}

/// Stable service identities by name, scoped to one plan.
#[derive(Default)]
struct Names(BTreeMap<String, ServiceId>);

impl Names {
  fn id(&mut self, name: &str) -> ServiceId {
    let next = ServiceId(self.0.len() as u64 + 1);
    *self.0.entry(name.to_string()).or_insert(next)
  }
}

fn plan_entry(doc: &ClauseDoc, key: &ResourceKey, context_path: Option<String>) -> Result<PlanEntry, TopologyError> {
  let params: Vec<String> = key.params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
  let fingerprint = key
    .fingerprint()
    .map(|f| f.to_string())
    .map_err(|e| ConfigurationError::InvalidValue {
      reference_id: doc.name.clone(),
      attribute: "key".to_string(),
      value: e.to_string(),
    })?;
  Ok(PlanEntry {
    name: doc.name.clone(),
    factory: doc.service.clone(),
    params: params.join(","),
    fingerprint,
    context_path,
  })
}

fn by_name(entries: &mut [PlanEntry]) {
  entries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.params.cmp(&b.params)));
}

/// Attribute name and effect of every change, in setter order.
type Changes = Vec<(&'static str, ApplyEffect)>;

fn describe<C, A: DynamicAttribute<C>>(attributes: Vec<A>) -> Changes {
  attributes
    .iter()
    .map(|attribute| (attribute.name(), ApplyEffect::from(attribute.class())))
    .collect()
}

fn plan_factories<V>(
  plan: &mut Plan,
  kind: &'static str,
  from: &BTreeMap<String, V>,
  to: &BTreeMap<String, V>,
  mut changes: impl FnMut(&V, &V) -> Changes,
) {
  for name in from.keys().filter(|n| !to.contains_key(*n)) {
    plan.factories.push(PlannedFactory {
      kind,
      name: name.clone(),
      change: FactoryChange::Removed,
    });
  }
  for (name, next) in to {
    match from.get(name) {
      None => plan.factories.push(PlannedFactory {
        kind,
        name: name.clone(),
        change: FactoryChange::Added,
      }),
      Some(previous) => {
        for (attribute, effect) in changes(previous, next) {
          plan.attributes.push(PlannedAttribute {
            kind,
            factory: name.clone(),
            attribute,
            effect,
          });
        }
      }
    }
  }
}

fn plan_connectors(from: &ServerDocument, to: &ServerDocument, names: &mut Names) -> Result<SlotPlan, TopologyError> {
  let mut previous = HashMap::new();
  for doc in &from.connectors {
    let (key, _, _) = connector_key(&doc.to_clause(names.id(&doc.service)))?;
    previous.entry(key).or_insert(doc);
  }
  let mut declared = Vec::new();
  for doc in &to.connectors {
    let (key, _, _) = connector_key(&doc.to_clause(names.id(&doc.service)))?;
    declared.push((key, doc));
  }

  let decisions = reconcile(previous, declared);
  let mut slot = SlotPlan::default();
  for (key, doc) in &decisions.to_create {
    slot.create.push(plan_entry(doc, key, None)?);
  }
  for (key, doc) in &decisions.to_remove {
    slot.remove.push(plan_entry(doc, key, None)?);
  }
  for (key, doc) in &decisions.retained {
    slot.retain.push(plan_entry(doc, key, None)?);
  }
  by_name(&mut slot.remove);
  by_name(&mut slot.retain);
  Ok(slot)
}

fn plan_contexts(from: &ServerDocument, to: &ServerDocument, names: &mut Names) -> Result<SlotPlan, TopologyError> {
  let mut previous = HashMap::new();
  for doc in &from.contexts {
    let (key, path) = context_key(&doc.to_clause(names.id(&doc.service)))?;
    previous.entry(key).or_insert((doc, path));
  }
  let mut declared = Vec::new();
  for doc in &to.contexts {
    let (key, path) = context_key(&doc.to_clause(names.id(&doc.service)))?;
    declared.push((key, (doc, path)));
  }

  let next_paths: HashMap<ResourceKey, String> = declared
    .iter()
    .rev()
    .map(|(key, (_, path))| (key.clone(), path.clone()))
    .collect();

  let decisions = reconcile(previous, declared);
  let mut slot = SlotPlan::default();
  for (key, (doc, path)) in &decisions.to_create {
    slot.create.push(plan_entry(doc, key, Some(path.clone()))?);
  }
  for (key, (doc, path)) in &decisions.to_remove {
    slot.remove.push(plan_entry(doc, key, Some(path.clone()))?);
  }
  for (key, (doc, path)) in &decisions.retained {
    match next_paths.get(key) {
      Some(next) if next != path => slot.update.push(plan_entry(doc, key, Some(next.clone()))?),
      _ => slot.retain.push(plan_entry(doc, key, Some(path.clone()))?),
    }
  }
  by_name(&mut slot.remove);
  by_name(&mut slot.retain);
  by_name(&mut slot.update);
  Ok(slot)
}

/// Compute what applying `to` on top of `from` would do.
pub fn plan_documents(from: &ServerDocument, to: &ServerDocument) -> Result<Plan, TopologyError> {
  from.validate()?;
  to.validate()?;
  let mut plan = Plan::default();

  // Customizer bindings compare by identity; a changed customizer gets a
  // fresh scratch service, an unchanged one keeps the old.
  let before: Customizers = from
    .customizers
    .iter()
    .map(|(name, config)| (name.clone(), Arc::new(RequestCustomizer::new(name.clone(), config.clone()))))
    .collect();
  let mut after = Customizers::new();
  for (name, config) in &to.customizers {
    let customizer = match before.get(name) {
      Some(previous) if previous.config() == config => Arc::clone(previous),
      Some(_) => {
        plan.factories.push(PlannedFactory {
          kind: KIND_CUSTOMIZER,
          name: name.clone(),
          change: FactoryChange::Replaced,
        });
        Arc::new(RequestCustomizer::new(name.clone(), config.clone()))
      }
      None => Arc::new(RequestCustomizer::new(name.clone(), config.clone())),
    };
    after.insert(name.clone(), customizer);
  }
  plan_factories(&mut plan, KIND_CUSTOMIZER, &from.customizers, &to.customizers, |_, _| Vec::new());

  plan_factories(&mut plan, KIND_HTTP, &from.http_factories, &to.http_factories, |a, b| {
    describe::<HttpConfig, _>(a.with_customizers(&before).changes_to(&b.with_customizers(&after)))
  });
  plan_factories(&mut plan, KIND_SESSION, &from.session_factories, &to.session_factories, |a, b| {
    describe::<SessionConfig, _>(a.changes_to(b))
  });
  plan_factories(
    &mut plan,
    KIND_ERROR_HANDLER,
    &from.error_handler_factories,
    &to.error_handler_factories,
    |a, b| describe::<ErrorHandlerConfig, _>(a.changes_to(b)),
  );

  // Chain elements compare by service identity; one scratch factory per name.
  let http_names: BTreeSet<&String> = from.http_factories.keys().chain(to.http_factories.keys()).collect();
  let scratch: HttpFactories = http_names
    .into_iter()
    .map(|name| (name.clone(), Arc::new(HttpConnectionFactoryFactory::default())))
    .collect();
  plan_factories(
    &mut plan,
    KIND_CONNECTOR,
    &from.connector_factories,
    &to.connector_factories,
    |a, b| describe::<ConnectorSettings, _>(connector_settings(a, &scratch).changes_to(&connector_settings(b, &scratch))),
  );

  for name in from.context_factories.keys().filter(|n| !to.context_factories.contains_key(*n)) {
    plan.factories.push(PlannedFactory {
      kind: KIND_CONTEXT,
      name: name.clone(),
      change: FactoryChange::Removed,
    });
  }
  for (name, next) in &to.context_factories {
    let Some(previous) = from.context_factories.get(name) else {
      plan.factories.push(PlannedFactory {
        kind: KIND_CONTEXT,
        name: name.clone(),
        change: FactoryChange::Added,
      });
      continue;
    };
    let changed = [
      ("servlets", previous.servlets != next.servlets),
      ("filters", previous.filters != next.filters),
      ("sessionFactory", previous.session_factory != next.session_factory),
      ("errorHandlerFactory", previous.error_handler_factory != next.error_handler_factory),
    ];
    for (attribute, _) in changed.into_iter().filter(|(_, changed)| *changed) {
      plan.attributes.push(PlannedAttribute {
        kind: KIND_CONTEXT,
        factory: name.clone(),
        attribute,
        effect: ApplyEffect::HotApplied,
      });
    }
  }

  let mut names = Names::default();
  plan.connectors = plan_connectors(from, to, &mut names)?;
  plan.contexts = plan_contexts(from, to, &mut names)?;
  Ok(plan)
}
