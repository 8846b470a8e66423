use std::sync::Arc;

use keel_lib::clause::Clause;
use keel_lib::factory::{DispatcherType, SessionConfig, SessionHandlerFactory};
use keel_lib::id::ServiceId;

use super::common::Harness;

fn servlet(name: &str, service: u64, pattern: &str) -> Clause {
  Clause::new(name, ServiceId(service)).with_attribute("urlPattern", pattern)
}

#[test]
fn reordering_servlets_on_a_running_server_keeps_holders() {
  let h = Harness::new();
  h.context_factory
    .set_servlets(&[servlet("a", 1, "/a"), servlet("b", 2, "/b"), servlet("c", 3, "/c")])
    .unwrap();
  h.context_factory.update();
  h.supervisor.set_context_clauses(&[h.context("root", "/")]).unwrap();
  h.supervisor.activate().unwrap();

  let handler = h.supervisor.handlers()[0].clone();
  let before = handler.servlet_handler().tables();

  h.context_factory
    .set_servlets(&[servlet("c", 3, "/c"), servlet("a", 1, "/a"), servlet("d", 4, "/d")])
    .unwrap();
  let report = h.context_factory.update();
  assert_eq!(report.handlers, 1);

  let after = handler.servlet_handler().tables();
  assert_eq!(after.servlet_names(), vec!["c", "a", "d"]);
  assert!(Arc::ptr_eq(&after.servlets[0], &before.servlets[2]));
  assert!(Arc::ptr_eq(&after.servlets[1], &before.servlets[0]));
  assert!(!before.servlets.iter().any(|old| Arc::ptr_eq(old, &after.servlets[2])));
}

#[test]
fn filters_carry_dispatchers_and_servlet_names() {
  let h = Harness::new();
  let filter = Clause::new("auth", ServiceId(10))
    .with_attribute("urlPattern", "/api/*, /admin/*")
    .with_attribute("servletName", serde_json::json!(["api"]))
    .with_attribute("dispatcher", "REQUEST,ASYNC");
  h.context_factory.set_filters(&[filter]).unwrap();
  h.context_factory.update();

  h.supervisor.set_context_clauses(&[h.context("root", "/")]).unwrap();
  h.supervisor.activate().unwrap();

  let tables = h.supervisor.handlers()[0].servlet_handler().tables();
  assert_eq!(tables.filter_names(), vec!["auth"]);
  let mapping = &tables.filter_mappings[0];
  assert_eq!(mapping.url_patterns, vec!["/api/*", "/admin/*"]);
  assert_eq!(mapping.servlet_names, vec!["api"]);
  assert!(mapping.dispatchers.contains(&DispatcherType::Request));
  assert!(mapping.dispatchers.contains(&DispatcherType::Async));
  assert_eq!(mapping.dispatchers.len(), 2);
}

#[test]
fn invalid_filter_leaves_applied_tables_alone() {
  let h = Harness::new();
  h.context_factory.set_servlets(&[servlet("a", 1, "/a")]).unwrap();
  h.context_factory.update();

  let bad = Clause::new("auth", ServiceId(10)).with_attribute("dispatcher", "SOMETIMES");
  assert!(h.context_factory.set_filters(&[bad]).is_err());

  h.supervisor.set_context_clauses(&[h.context("root", "/")]).unwrap();
  h.supervisor.activate().unwrap();
  let tables = h.supervisor.handlers()[0].servlet_handler().tables();
  assert_eq!(tables.servlet_names(), vec!["a"]);
  assert!(tables.filters.is_empty());
}

#[test]
fn contexts_get_session_handlers_from_the_configured_factory() {
  let h = Harness::new();
  let sessions = Arc::new(SessionHandlerFactory::new(SessionConfig {
    max_inactive_interval: 120,
    ..SessionConfig::default()
  }));
  h.context_factory.set_session_handler_factory(Some(sessions.clone()));
  h.supervisor.set_context_clauses(&[h.context("root", "/")]).unwrap();
  h.supervisor.activate().unwrap();

  let handler = h.supervisor.handlers()[0].clone();
  let session = handler.session_handler().unwrap();
  assert_eq!(session.max_inactive_interval(), 120);
  assert_eq!(sessions.live_handlers().len(), 1);
}
