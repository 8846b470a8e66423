//! Implementation of the `keel check` command.

use std::path::Path;

use anyhow::{Context, Result};

use keel_lib::document::load_document;

use crate::output::{print_stat, print_success};

pub fn cmd_check(config: &Path) -> Result<()> {
  let document =
    load_document(config).with_context(|| format!("Failed to load server document: {}", config.display()))?;

  print_success(&format!("{} is valid", config.display()));
  if let Some(description) = &document.description {
    print_stat("Description", description);
  }
  print_stat("Customizers", &document.customizers.len().to_string());
  print_stat("HTTP factories", &document.http_factories.len().to_string());
  print_stat("Connector factories", &document.connector_factories.len().to_string());
  print_stat("Session factories", &document.session_factories.len().to_string());
  print_stat("Error handler factories", &document.error_handler_factories.len().to_string());
  print_stat("Context factories", &document.context_factories.len().to_string());
  print_stat("Connectors", &document.connectors.len().to_string());
  print_stat("Contexts", &document.contexts.len().to_string());
  Ok(())
}
