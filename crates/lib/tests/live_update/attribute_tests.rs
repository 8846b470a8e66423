use std::sync::Arc;
use std::time::Duration;

use keel_lib::attribute::ApplyEffect;
use keel_lib::factory::{
  ConnectionFactoryFactory, ConnectorAttribute, ConnectorSettings, HttpAttribute, HttpConfig,
  HttpConnectionFactoryFactory, ServerConnectorFactory, SessionAttribute, SessionHandlerFactory,
};
use keel_lib::supervisor::ConnectorFactory;

fn chained(http: &Arc<HttpConnectionFactoryFactory>) -> ServerConnectorFactory {
  let element: Arc<dyn ConnectionFactoryFactory> = http.clone();
  ServerConnectorFactory::new(ConnectorSettings {
    connection_factory_factories: vec![element],
    ..ConnectorSettings::default()
  })
}

#[test]
fn burst_of_http_changes_closes_connections_once() {
  let http = Arc::new(HttpConnectionFactoryFactory::default());
  let connectors = chained(&http);
  let _a = connectors.create_connector(None, 8080).unwrap();
  let _b = connectors.create_connector(None, 8081).unwrap();

  let factories = http.live_factories();
  assert_eq!(factories.len(), 2);
  let connections: Vec<_> = factories.iter().map(|f| f.new_connection()).collect();

  for attribute in [
    HttpAttribute::SendDateHeader(true),
    HttpAttribute::SendServerVersion(false),
    HttpAttribute::RequestHeaderSize(16 * 1024),
  ] {
    let report = http.set(attribute);
    assert_eq!(report.effect, ApplyEffect::RequiresEndpointClose);
    assert_eq!(report.updated, 2);
  }
  assert!(connections.iter().all(|c| !c.is_closed()));
  assert!(factories.iter().all(|f| f.config().send_date_header));

  let report = http.update();
  assert_eq!(report.closed, 2);
  assert!(connections.iter().all(|c| c.is_closed()));

  assert!(http.update().is_noop());
}

#[test]
fn deferred_buffer_size_reaches_instances_on_update() {
  let http = Arc::new(HttpConnectionFactoryFactory::default());
  let connectors = chained(&http);
  let _connector = connectors.create_connector(None, 8080).unwrap();
  let factory = http.live_factories().remove(0);

  let report = http.set(HttpAttribute::OutputBufferSize(64 * 1024));
  assert_eq!(report.effect, ApplyEffect::Deferred);
  assert_eq!(factory.config().output_buffer_size, HttpConfig::default().output_buffer_size);

  let report = http.update();
  assert_eq!(report.synced, 1);
  assert_eq!(report.closed, 1);
  assert_eq!(factory.config().output_buffer_size, 64 * 1024);
}

#[test]
fn creation_only_attribute_reaches_new_instances_only() {
  let http = Arc::new(HttpConnectionFactoryFactory::default());
  let connectors = chained(&http);
  let old = connectors.create_connector(None, 8080).unwrap();

  let report = http.set(HttpAttribute::H2c(true));
  assert_eq!(report.effect, ApplyEffect::CreationOnly);
  assert_eq!(report.updated, 0);
  http.update();
  assert_eq!(old.protocols(), vec!["HTTP/1.1".to_string()]);

  let new = connectors.create_connector(None, 8081).unwrap();
  assert_eq!(new.protocols(), vec!["h2c".to_string()]);
}

#[test]
fn hot_acceptor_priority_applies_without_closing() {
  let http = Arc::new(HttpConnectionFactoryFactory::default());
  let connectors = chained(&http);
  let connector = connectors.create_connector(None, 8080).unwrap();
  let connection = http.live_factories()[0].new_connection();

  let report = connectors.set(ConnectorAttribute::AcceptorPriorityDelta(3));
  assert_eq!(report.effect, ApplyEffect::HotApplied);
  assert_eq!(connector.settings().acceptor_priority_delta, 3);

  assert_eq!(connectors.update().closed, 0);
  assert!(!connection.is_closed());
}

#[test]
fn idle_timeout_change_closes_endpoints_on_update() {
  let http = Arc::new(HttpConnectionFactoryFactory::default());
  let connectors = chained(&http);
  let connector = connectors.create_connector(None, 8080).unwrap();
  let connection = http.live_factories()[0].new_connection();

  connectors.set(ConnectorAttribute::IdleTimeout(Duration::from_secs(5)));
  assert_eq!(connector.settings().idle_timeout, Duration::from_secs(5));
  assert!(!connection.is_closed());

  assert_eq!(connectors.update().closed, 1);
  assert!(connection.is_closed());
}

#[test]
fn chain_change_regenerates_and_closes_old_endpoints() {
  let plain = Arc::new(HttpConnectionFactoryFactory::default());
  let h2c = Arc::new(HttpConnectionFactoryFactory::new(HttpConfig {
    h2c: true,
    ..HttpConfig::default()
  }));
  let connectors = chained(&plain);
  let connector = connectors.create_connector(None, 8080).unwrap();
  let connection = plain.live_factories()[0].new_connection();

  let elements: Vec<Arc<dyn ConnectionFactoryFactory>> = vec![h2c.clone(), plain.clone()];
  connectors.set(ConnectorAttribute::ConnectionFactoryFactories(elements));
  let report = connectors.update();

  assert_eq!(report.regenerated, 1);
  assert!(connection.is_closed());
  assert_eq!(connector.protocols(), vec!["h2c".to_string(), "HTTP/1.1".to_string()]);
  assert_eq!(connector.default_protocol().as_deref(), Some("h2c"));
}

#[test]
fn dropped_connectors_are_not_updated() {
  let http = Arc::new(HttpConnectionFactoryFactory::default());
  let connectors = chained(&http);
  let kept = connectors.create_connector(None, 8080).unwrap();
  drop(connectors.create_connector(None, 8081).unwrap());

  let report = connectors.set(ConnectorAttribute::AcceptorPriorityDelta(1));
  assert_eq!(report.updated, 1);
  assert_eq!(connectors.live_connectors().len(), 1);
  assert!(Arc::ptr_eq(&connectors.live_connectors()[0], &kept));
}

#[test]
fn session_timeout_is_hot_and_cookie_is_creation_only() {
  let sessions = SessionHandlerFactory::default();
  let handler = sessions.create_session_handler();

  assert_eq!(
    sessions.set(SessionAttribute::MaxInactiveInterval(60)).effect,
    ApplyEffect::HotApplied
  );
  assert_eq!(handler.max_inactive_interval(), 60);

  assert_eq!(
    sessions.set(SessionAttribute::CookieName("SID".to_string())).effect,
    ApplyEffect::CreationOnly
  );
  sessions.update();
  assert_eq!(handler.config().cookie_name, "JSESSIONID");
  assert_eq!(sessions.create_session_handler().config().cookie_name, "SID");
}
