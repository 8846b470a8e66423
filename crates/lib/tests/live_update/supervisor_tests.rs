use std::sync::Arc;

use keel_lib::sim::EngineEvent;
use keel_lib::supervisor::{SupervisorError, SupervisorState};

use super::common::Harness;

#[test]
fn replacing_a_listener_keeps_the_unchanged_one() {
  let h = Harness::new();
  h.supervisor
    .set_connector_clauses(&[h.connector("a", 8080), h.connector("b", 8081)])
    .unwrap();
  h.supervisor.activate().unwrap();
  assert_eq!(h.bound_ports(), vec![8080, 8081]);
  let b_before = h.connector_on_port(8081);

  let summary = h
    .supervisor
    .set_connector_clauses(&[h.connector("b", 8081), h.connector("c", 8082)])
    .unwrap();

  assert_eq!((summary.created, summary.removed, summary.retained), (1, 1, 1));
  assert_eq!(h.bound_ports(), vec![8081, 8082]);
  assert!(Arc::ptr_eq(&b_before, &h.connector_on_port(8081)));
  assert_eq!(h.count_events(|e| matches!(e, EngineEvent::ConnectorRemoved { .. })), 1);
}

#[test]
fn redelivering_the_same_clauses_changes_nothing() {
  let h = Harness::new();
  let clauses = [h.connector("a", 8080), h.connector_on("admin", "127.0.0.1", 9090)];
  h.supervisor.set_connector_clauses(&clauses).unwrap();
  h.supervisor.activate().unwrap();
  let events = h.host.log().events().len();

  let summary = h.supervisor.set_connector_clauses(&clauses).unwrap();
  assert!(summary.is_empty());
  assert_eq!(summary.retained, 2);
  assert_eq!(h.host.log().events().len(), events);
}

#[test]
fn port_conflict_while_running_fails_the_whole_server() {
  let h = Harness::new();
  h.host.occupy(9000);
  h.supervisor.set_connector_clauses(&[h.connector("a", 8080)]).unwrap();
  h.supervisor.set_context_clauses(&[h.context("root", "/")]).unwrap();
  h.supervisor.activate().unwrap();
  assert_eq!(h.registry.len(), 1);

  let err = h
    .supervisor
    .set_connector_clauses(&[h.connector("a", 8080), h.connector("b", 9000)])
    .unwrap_err();

  assert!(matches!(err, SupervisorError::Lifecycle(_)));
  assert_eq!(h.supervisor.state(), SupervisorState::Failed);
  assert_eq!(h.supervisor.connector_count(), 0);
  assert_eq!(h.supervisor.context_count(), 0);
  assert!(h.registry.is_empty());
  assert!(h.supervisor.with_engine(|_| ()).is_none());
  assert_eq!(h.count_events(|e| matches!(e, EngineEvent::Destroyed)), 1);
}

#[test]
fn failed_is_absorbing() {
  let h = Harness::new();
  h.host.occupy(8080);
  h.supervisor.set_connector_clauses(&[h.connector("a", 8080)]).unwrap();
  assert!(h.supervisor.activate().is_err());
  assert_eq!(h.supervisor.state(), SupervisorState::Failed);

  h.host.release(8080);
  assert!(matches!(
    h.supervisor.activate(),
    Err(SupervisorError::InvalidState {
      operation: "activate",
      state: SupervisorState::Failed
    })
  ));
  // Declarations are still accepted and stored.
  let summary = h.supervisor.set_connector_clauses(&[h.connector("b", 8081)]).unwrap();
  assert!(summary.is_empty());
  h.supervisor.deactivate().unwrap();
  assert_eq!(h.supervisor.state(), SupervisorState::Failed);
}

#[test]
fn activation_failure_unwinds_started_resources() {
  let h = Harness::new();
  h.host.occupy(8081);
  h.supervisor
    .set_connector_clauses(&[h.connector("a", 8080), h.connector("b", 8081)])
    .unwrap();

  assert!(h.supervisor.activate().is_err());
  assert_eq!(h.supervisor.connector_count(), 0);
  assert!(h.registry.is_empty());
  assert_eq!(h.count_events(|e| matches!(e, EngineEvent::Stopped)), 1);
}

#[test]
fn registration_failure_fails_activation() {
  let h = Harness::new();
  h.registry.fail_registrations(true);
  h.supervisor.set_connector_clauses(&[h.connector("a", 8080)]).unwrap();

  let err = h.supervisor.activate().unwrap_err();
  assert!(err.to_string().contains("registry unavailable"));
  assert_eq!(h.supervisor.state(), SupervisorState::Failed);
  assert!(!h.supervisor.is_registered());
}

#[test]
fn clauses_stored_while_inactive_apply_on_activation() {
  let h = Harness::new();
  let summary = h
    .supervisor
    .set_connector_clauses(&[h.connector("a", 8080), h.connector("b", 8081)])
    .unwrap();
  assert!(summary.is_empty());
  assert_eq!(h.supervisor.connector_count(), 0);
  assert!(h.supervisor.with_engine(|_| ()).is_none());

  h.supervisor.activate().unwrap();
  assert_eq!(h.supervisor.state(), SupervisorState::Running);
  assert_eq!(h.supervisor.connector_count(), 2);
  assert!(h.supervisor.is_registered());
}

#[test]
fn handlers_start_before_connectors() {
  let h = Harness::new();
  h.supervisor.set_connector_clauses(&[h.connector("a", 8080)]).unwrap();
  h.supervisor.set_context_clauses(&[h.context("root", "/")]).unwrap();
  h.supervisor.activate().unwrap();

  let events = h.host.log().events();
  let handler = events
    .iter()
    .position(|e| matches!(e, EngineEvent::HandlerStarted { .. }))
    .unwrap();
  let connector = events
    .iter()
    .position(|e| matches!(e, EngineEvent::ConnectorStarted { .. }))
    .unwrap();
  assert!(handler < connector);
}

#[test]
fn deactivate_unregisters_and_allows_reactivation() {
  let h = Harness::new();
  h.supervisor.set_connector_clauses(&[h.connector("a", 8080)]).unwrap();
  h.supervisor.activate().unwrap();

  h.supervisor.deactivate().unwrap();
  assert_eq!(h.supervisor.state(), SupervisorState::Inactive);
  assert!(h.registry.is_empty());
  assert_eq!(h.supervisor.connector_count(), 0);
  assert_eq!(h.count_events(|e| matches!(e, EngineEvent::Destroyed)), 1);

  // A second deactivate is a no-op.
  h.supervisor.deactivate().unwrap();

  h.supervisor.activate().unwrap();
  assert_eq!(h.bound_ports(), vec![8080]);
  assert_eq!(h.registry.len(), 1);
}

#[test]
fn unclean_stop_still_ends_inactive() {
  let h = Harness::new();
  h.supervisor.set_connector_clauses(&[h.connector("a", 8080)]).unwrap();
  h.supervisor.activate().unwrap();
  h.host.fail_stops(true);

  let err = h.supervisor.deactivate().unwrap_err();
  assert!(matches!(err, SupervisorError::UncleanStop { ref failures } if failures.len() == 1));
  assert_eq!(h.supervisor.state(), SupervisorState::Inactive);
  assert!(h.registry.is_empty());
}

#[test]
fn activating_twice_is_rejected() {
  let h = Harness::new();
  h.supervisor.activate().unwrap();
  assert!(matches!(
    h.supervisor.activate(),
    Err(SupervisorError::InvalidState { state: SupervisorState::Running, .. })
  ));
  assert_eq!(h.supervisor.state(), SupervisorState::Running);
}

#[test]
fn invalid_clause_is_rejected_before_anything_changes() {
  let h = Harness::new();
  h.supervisor.set_connector_clauses(&[h.connector("a", 8080)]).unwrap();
  h.supervisor.activate().unwrap();

  let mut bad = h.connector("b", 0);
  bad.clause = bad.clause.with_attribute("port", "eighty");
  let err = h
    .supervisor
    .set_connector_clauses(&[h.connector("a", 8080), bad])
    .unwrap_err();

  assert!(matches!(err, SupervisorError::Configuration(_)));
  assert_eq!(h.supervisor.state(), SupervisorState::Running);
  assert_eq!(h.bound_ports(), vec![8080]);
}

#[test]
fn duplicate_declarations_realize_once() {
  let h = Harness::new();
  h.supervisor
    .set_connector_clauses(&[h.connector("a", 8080), h.connector("a", 8080)])
    .unwrap();
  h.supervisor.activate().unwrap();
  assert_eq!(h.supervisor.connector_count(), 1);

  let summary = h
    .supervisor
    .set_connector_clauses(&[h.connector("a", 8080), h.connector("a", 8080)])
    .unwrap();
  assert_eq!(summary.retained, 1);
  assert_eq!(summary.created, 0);
}

#[test]
fn context_path_drift_updates_in_place() {
  let h = Harness::new();
  h.supervisor.set_context_clauses(&[h.context("root", "/")]).unwrap();
  h.supervisor.activate().unwrap();
  let before = h.supervisor.handlers()[0].clone();

  let summary = h.supervisor.set_context_clauses(&[h.context("root", "/app")]).unwrap();

  assert_eq!((summary.created, summary.removed, summary.updated), (0, 0, 1));
  let after = h.supervisor.handlers()[0].clone();
  assert!(Arc::ptr_eq(&before, &after));
  assert_eq!(after.context_path(), "/app");
  assert_eq!(
    h.count_events(|e| matches!(e, EngineEvent::ContextPathChanged { context_path, .. } if context_path == "/app")),
    1
  );
}

#[test]
fn published_handler_order_follows_declaration() {
  let h = Harness::new();
  h.supervisor
    .set_context_clauses(&[h.context("a", "/a"), h.context("b", "/b")])
    .unwrap();
  h.supervisor.activate().unwrap();
  let first = h.supervisor.handlers();

  h.supervisor
    .set_context_clauses(&[h.context("b", "/b"), h.context("a", "/a")])
    .unwrap();
  let second = h.supervisor.handlers();

  assert!(Arc::ptr_eq(&first[0], &second[1]));
  assert!(Arc::ptr_eq(&first[1], &second[0]));
  let paths: Vec<String> = second.iter().map(|handler| handler.context_path()).collect();
  assert_eq!(paths, vec!["/b", "/a"]);
}

#[test]
fn removed_context_is_stopped_and_new_one_started() {
  let h = Harness::new();
  h.supervisor.set_context_clauses(&[h.context("old", "/old")]).unwrap();
  h.supervisor.activate().unwrap();

  let summary = h.supervisor.set_context_clauses(&[h.context("new", "/new")]).unwrap();
  assert_eq!((summary.created, summary.removed), (1, 1));
  assert_eq!(h.count_events(|e| matches!(e, EngineEvent::HandlerStopped { .. })), 1);
  assert_eq!(h.count_events(|e| matches!(e, EngineEvent::HandlerStarted { .. })), 2);

  let handler = h.supervisor.handlers()[0].clone();
  assert!(h.supervisor.with_engine(|e| e.handlers().len()).unwrap() == 1);
  assert_eq!(handler.context_path(), "/new");
}

#[test]
fn stale_context_is_unpublished_before_it_stops() {
  let h = Harness::new();
  h.supervisor
    .set_context_clauses(&[h.context("a", "/a"), h.context("b", "/b")])
    .unwrap();
  h.supervisor.activate().unwrap();
  let kept = h.supervisor.handlers()[0].id();
  h.host.log().clear();

  h.supervisor.set_context_clauses(&[h.context("a", "/a")]).unwrap();

  let events = h.host.log().events();
  let published = events
    .iter()
    .position(|e| matches!(e, EngineEvent::HandlersPublished { handlers } if handlers == &vec![kept]))
    .unwrap();
  let stopped = events
    .iter()
    .position(|e| matches!(e, EngineEvent::HandlerStopped { .. }))
    .unwrap();
  assert!(published < stopped, "{events:?}");
}

#[test]
fn stale_context_stop_failure_is_reported() {
  let h = Harness::new();
  h.supervisor
    .set_context_clauses(&[h.context("a", "/a"), h.context("b", "/b")])
    .unwrap();
  h.supervisor.activate().unwrap();
  h.host.fail_stops(true);

  let summary = h.supervisor.set_context_clauses(&[h.context("a", "/a")]).unwrap();

  assert_eq!(summary.removed, 1);
  assert_eq!(summary.failures.len(), 1);
  assert!(!summary.is_clean());
  assert!(summary.failures[0].to_string().contains("simulated stop failure"));
  assert_eq!(h.supervisor.state(), SupervisorState::Running);
  assert_eq!(h.supervisor.context_count(), 1);
  assert_eq!(h.supervisor.with_engine(|e| e.handlers().len()), Some(1));
}

#[test]
fn stale_connector_stop_failure_is_reported() {
  let h = Harness::new();
  h.supervisor
    .set_connector_clauses(&[h.connector("a", 8080), h.connector("b", 8081)])
    .unwrap();
  h.supervisor.activate().unwrap();
  h.host.fail_stops(true);

  let summary = h.supervisor.set_connector_clauses(&[h.connector("a", 8080)]).unwrap();

  assert_eq!(summary.removed, 1);
  assert_eq!(summary.failures.len(), 1);
  assert_eq!(h.bound_ports(), vec![8080]);
  assert_eq!(h.supervisor.state(), SupervisorState::Running);
}

#[test]
fn clean_reconciliation_has_no_failures() {
  let h = Harness::new();
  h.supervisor.set_connector_clauses(&[h.connector("a", 8080)]).unwrap();
  h.supervisor.activate().unwrap();

  let summary = h.supervisor.set_connector_clauses(&[h.connector("b", 8081)]).unwrap();
  assert!(summary.is_clean());
}
