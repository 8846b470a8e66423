use std::sync::Arc;

use keel_lib::attribute::ApplyEffect;
use keel_lib::document::ServerDocument;
use keel_lib::factory::{CustomizerConfig, CustomizerRef, ErrorHandlerConfig, ForwardedConfig, Request};
use keel_lib::sim::{EngineEvent, InMemoryServiceRegistry, SimulatedEngine, SimulatedHost};
use keel_lib::supervisor::{ServerSupervisor, SupervisorState};
use keel_lib::topology::{Topology, TopologyError};

const DOCUMENT: &str = r#"{
  "httpFactories": { "plain": {} },
  "connectorFactories": { "default": { "chain": ["plain"] } },
  "sessionFactories": { "sessions": { "maxInactiveInterval": 300 } },
  "contextFactories": {
    "app": {
      "sessionFactory": "sessions",
      "servlets": [
        { "name": "a", "service": "servlet-a", "attributes": { "urlPattern": "/a" } },
        { "name": "b", "service": "servlet-b", "attributes": { "urlPattern": "/b" } }
      ]
    }
  },
  "connectors": [
    { "name": "public", "service": "default", "attributes": { "port": 8080 } },
    { "name": "admin", "service": "default", "attributes": { "host": "127.0.0.1", "port": 9090 } }
  ],
  "contexts": [{ "name": "root", "service": "app", "attributes": { "contextPath": "/" } }]
}"#;

fn running() -> (SimulatedHost, Topology<SimulatedEngine>) {
  let host = SimulatedHost::new();
  let supervisor = ServerSupervisor::new(host.engine_factory(), InMemoryServiceRegistry::new());
  let mut topology = Topology::new(supervisor);
  topology.apply(&document()).unwrap();
  topology.supervisor().activate().unwrap();
  (host, topology)
}

fn document() -> ServerDocument {
  ServerDocument::from_json(DOCUMENT).unwrap()
}

fn forwarded(host_header: &str) -> CustomizerConfig {
  CustomizerConfig::Forwarded(ForwardedConfig {
    forwarded_host_header: host_header.to_string(),
    ..ForwardedConfig::default()
  })
}

/// The base document behind a proxy, with error pages on the context.
fn proxied() -> ServerDocument {
  let mut document = document();
  document.customizers.insert("proxy".to_string(), forwarded("X-Host"));
  document.http_factories.get_mut("plain").unwrap().customizers = vec![CustomizerRef::named("proxy")];
  document
    .error_handler_factories
    .insert("pages".to_string(), ErrorHandlerConfig::default());
  document.context_factories.get_mut("app").unwrap().error_handler_factory = Some("pages".to_string());
  document
}

fn running_with(document: &ServerDocument) -> Topology<SimulatedEngine> {
  let host = SimulatedHost::new();
  let mut topology = Topology::new(ServerSupervisor::new(host.engine_factory(), InMemoryServiceRegistry::new()));
  topology.apply(document).unwrap();
  topology.supervisor().activate().unwrap();
  topology
}

#[test]
fn document_realizes_connectors_and_contexts() {
  let (host, topology) = running();
  assert_eq!(topology.supervisor().state(), SupervisorState::Running);
  assert_eq!(host.log().count(|e| matches!(e, EngineEvent::ConnectorStarted { .. })), 2);

  let handler = topology.supervisor().handlers()[0].clone();
  assert_eq!(handler.servlet_handler().tables().servlet_names(), vec!["a", "b"]);
  assert_eq!(handler.session_handler().unwrap().max_inactive_interval(), 300);
}

#[test]
fn reload_with_a_moved_port_replaces_one_connector() {
  let (_host, mut topology) = running();
  let admin = topology
    .supervisor()
    .connectors()
    .into_iter()
    .find(|c| c.port() == 9090)
    .unwrap();

  let mut next = document();
  next.connectors[0].attributes.insert("port".to_string(), 8081.into());
  let report = topology.apply(&next).unwrap();

  assert_eq!((report.connectors.created, report.connectors.removed), (1, 1));
  let ports: Vec<u16> = topology.supervisor().connectors().iter().map(|c| c.port()).collect();
  assert!(ports.contains(&8081) && !ports.contains(&8080));
  let still_admin = topology
    .supervisor()
    .connectors()
    .into_iter()
    .find(|c| c.port() == 9090)
    .unwrap();
  assert!(Arc::ptr_eq(&admin, &still_admin));
}

#[test]
fn reload_with_http_changes_closes_live_connections_once() {
  let (_host, mut topology) = running();
  let http = topology.http_factory("plain").unwrap().clone();
  let connections: Vec<_> = http.live_factories().iter().map(|f| f.new_connection()).collect();
  assert_eq!(connections.len(), 2);

  let mut next = document();
  let plain = next.http_factories.get_mut("plain").unwrap();
  plain.send_date_header = true;
  plain.send_x_powered_by = true;
  let report = topology.apply(&next).unwrap();

  assert_eq!(report.attribute_changes.len(), 2);
  assert_eq!(report.factories_updated, 1);
  assert_eq!(report.endpoints_closed, 2);
  assert!(connections.iter().all(|c| c.is_closed()));
  assert!(report.connectors.is_empty());
}

#[test]
fn reload_with_reordered_servlets_keeps_holders_and_handler() {
  let (_host, mut topology) = running();
  let handler = topology.supervisor().handlers()[0].clone();
  let before = handler.servlet_handler().tables();

  let mut next = document();
  next.context_factories.get_mut("app").unwrap().servlets.reverse();
  let report = topology.apply(&next).unwrap();

  assert!(report.contexts.is_empty());
  assert!(Arc::ptr_eq(&handler, &topology.supervisor().handlers()[0]));
  let after = handler.servlet_handler().tables();
  assert_eq!(after.servlet_names(), vec!["b", "a"]);
  assert!(Arc::ptr_eq(&after.servlets[0], &before.servlets[1]));
}

#[test]
fn reload_with_a_new_context_path_updates_in_place() {
  let (host, mut topology) = running();
  let handler = topology.supervisor().handlers()[0].clone();

  let mut next = document();
  next.contexts[0].attributes.insert("contextPath".to_string(), "/shop".into());
  let report = topology.apply(&next).unwrap();

  assert_eq!(report.contexts.updated, 1);
  assert_eq!(report.contexts.created, 0);
  assert_eq!(handler.context_path(), "/shop");
  assert_eq!(host.log().count(|e| matches!(e, EngineEvent::ContextPathChanged { .. })), 1);
}

#[test]
fn reload_onto_an_occupied_port_fails_the_server() {
  let (host, mut topology) = running();
  host.occupy(7000);

  let mut next = document();
  next.connectors[0].attributes.insert("port".to_string(), 7000.into());
  let err = topology.apply(&next).unwrap_err();

  assert!(matches!(err, TopologyError::Supervisor(_)));
  assert_eq!(topology.supervisor().state(), SupervisorState::Failed);
  assert_eq!(topology.supervisor().connector_count(), 0);
}

#[test]
fn reload_with_a_dangling_reference_is_rejected() {
  let (_host, mut topology) = running();
  let mut next = document();
  next.connectors[1].service = "gone".to_string();

  assert!(matches!(topology.apply(&next), Err(TopologyError::Document(_))));
  assert_eq!(topology.supervisor().state(), SupervisorState::Running);
  assert_eq!(topology.supervisor().connector_count(), 2);
}

#[test]
fn reload_with_a_changed_customizer_closes_live_connections_once() {
  let mut topology = running_with(&proxied());
  let http = topology.http_factory("plain").unwrap().clone();
  let live = http.live_factories();
  let connections: Vec<_> = live.iter().map(|f| f.new_connection()).collect();
  let previous = topology.customizer("proxy").unwrap().service_id();

  let mut next = proxied();
  next.customizers.insert("proxy".to_string(), forwarded("X-Original-Host"));
  let report = topology.apply(&next).unwrap();

  assert_eq!(report.customizers_replaced, 1);
  let changes: Vec<(&str, ApplyEffect)> = report.attribute_changes.iter().map(|c| (c.attribute, c.effect)).collect();
  assert_eq!(changes, vec![("customizers", ApplyEffect::RequiresEndpointClose)]);
  assert_eq!(report.factories_updated, 1);
  assert_eq!(report.endpoints_closed, 2);
  assert!(connections.iter().all(|c| c.is_closed()));
  assert!(report.connectors.is_empty());
  assert_ne!(topology.customizer("proxy").unwrap().service_id(), previous);

  let mut request = Request::new("http").with_header("X-Original-Host", "example.org");
  live[0].customize(&mut request);
  assert_eq!(request.host.as_deref(), Some("example.org"));

  let again = topology.apply(&next).unwrap();
  assert!(again.is_empty(), "{again:?}");
}

#[test]
fn reload_with_new_error_pages_reaches_the_live_context() {
  let mut topology = running_with(&proxied());
  let handler = topology.supervisor().handlers()[0].clone();

  let mut next = proxied();
  let pages = next.error_handler_factories.get_mut("pages").unwrap();
  pages.error_pages.insert("404".to_string(), "/missing.html".to_string());
  let report = topology.apply(&next).unwrap();

  assert_eq!(report.attribute_changes.len(), 1);
  assert_eq!(report.attribute_changes[0].effect, ApplyEffect::HotApplied);
  assert_eq!(report.endpoints_closed, 0);
  assert!(report.contexts.is_empty());
  let response = handler.error_handler().unwrap().handle(404, "Not Found", None);
  assert_eq!(response.page.as_deref(), Some("/missing.html"));
}
