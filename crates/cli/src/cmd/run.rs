//! Implementation of the `keel run` command.
//!
//! Realizes a server document on the simulated engine, then polls the file
//! and reconciles the running server whenever its content changes. Ctrl-C
//! deactivates the server.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use keel_lib::clause::Attributes;
use keel_lib::document::{ServerDocument, load_document};
use keel_lib::sim::{InMemoryServiceRegistry, SimulatedEngine, SimulatedHost};
use keel_lib::supervisor::ServerSupervisor;
use keel_lib::topology::{Topology, TopologyReport};

use crate::output::{print_error, print_info, print_stat, print_success, print_warning};

pub fn cmd_run(config: &Path, interval: Duration, once: bool) -> Result<()> {
  let config = dunce::canonicalize(config).with_context(|| format!("Failed to resolve path: {}", config.display()))?;
  let document =
    load_document(&config).with_context(|| format!("Failed to load server document: {}", config.display()))?;

  let host = SimulatedHost::new();
  let registry = InMemoryServiceRegistry::new();
  let mut properties = Attributes::new();
  properties.insert("document".to_string(), config.display().to_string().into());
  let supervisor = ServerSupervisor::new(host.engine_factory(), registry.clone()).with_properties(properties);

  let mut topology = Topology::new(supervisor);
  topology.apply(&document).context("Failed to apply server document")?;
  topology.supervisor().activate().context("Failed to start server")?;
  print_success(&format!("Server running ({} registration(s))", registry.len()));
  print_server(&topology);

  if !once {
    let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
    rt.block_on(watch(&mut topology, &config, interval))?;
  }

  match topology.supervisor().deactivate() {
    Ok(()) => print_success("Server stopped"),
    Err(e) => {
      print_error(&e.to_string());
      return Err(e).context("Failed to stop server cleanly");
    }
  }
  Ok(())
}

async fn watch(topology: &mut Topology<SimulatedEngine>, config: &Path, interval: Duration) -> Result<()> {
  let mut last = tokio::fs::read_to_string(config).await.ok();
  let mut tick = tokio::time::interval(interval);
  tick.tick().await;

  info!(path = %config.display(), interval = ?interval, "watching server document");
  loop {
    tokio::select! {
      _ = tick.tick() => {
        let content = match tokio::fs::read_to_string(config).await {
          Ok(content) => content,
          Err(e) => {
            print_warning(&format!("Cannot read {}: {}", config.display(), e));
            continue;
          }
        };
        if last.as_deref() == Some(content.as_str()) {
          continue;
        }
        last = Some(content.clone());
        debug!(path = %config.display(), "server document changed");
        reload(topology, &content);
      }

      _ = tokio::signal::ctrl_c() => {
        print_info("Received Ctrl-C, stopping server");
        return Ok(());
      }
    }
  }
}

/// A document that fails to parse or validate leaves the server untouched.
fn reload(topology: &mut Topology<SimulatedEngine>, content: &str) {
  let document = match ServerDocument::from_json(content) {
    Ok(document) => document,
    Err(e) => {
      print_warning(&format!("Ignoring invalid document: {}", e));
      return;
    }
  };
  match topology.apply(&document) {
    Ok(report) => {
      print_report(&report);
      print_server(topology);
    }
    Err(e) => print_error(&format!("Reload failed: {}", e)),
  }
}

fn print_report(report: &TopologyReport) {
  if report.is_empty() {
    print_info("Document changed, nothing to reconcile");
    return;
  }
  print_success("Reloaded");
  print_stat(
    "Attributes",
    &format!(
      "{} set on {} factories, {} endpoint sweeps",
      report.attribute_changes.len(),
      report.factories_updated,
      report.endpoints_closed
    ),
  );
  if report.customizers_replaced > 0 {
    print_stat("Customizers", &format!("{} replaced", report.customizers_replaced));
  }
  print_stat(
    "Connectors",
    &format!(
      "+{} -{} ({} retained)",
      report.connectors.created, report.connectors.removed, report.connectors.retained
    ),
  );
  print_stat(
    "Contexts",
    &format!(
      "+{} -{} ~{} ({} retained)",
      report.contexts.created, report.contexts.removed, report.contexts.updated, report.contexts.retained
    ),
  );
  for failure in report.stop_failures() {
    print_warning(&format!("Stale resource did not stop cleanly: {}", failure));
  }
}

fn print_server(topology: &Topology<SimulatedEngine>) {
  let supervisor = topology.supervisor();
  print_stat("State", &supervisor.state().to_string());
  for connector in supervisor.connectors() {
    let host = connector.host().unwrap_or("*");
    print_stat(
      "Connector",
      &format!("{}:{} [{}]", host, connector.port(), connector.protocols().join(" -> ")),
    );
  }
  for handler in supervisor.handlers() {
    let servlets = handler.servlet_handler().tables().servlet_names().len();
    print_stat(
      "Context",
      &format!("{} ({} servlet(s))", handler.context_path(), servlets),
    );
  }
}
