//! Implementation of the `keel plan` command.
//!
//! Loads two server documents and prints the factory, attribute, connector
//! and context decisions a reload from the first to the second would make.

use std::path::Path;

use anyhow::{Context, Result};

use keel_lib::document::load_document;
use keel_lib::topology::{FactoryChange, PlanEntry, SlotPlan, plan_documents};

use crate::output::{OutputFormat, print_change, print_info, print_json, print_stat, symbols};

pub fn cmd_plan(from: &Path, to: &Path, output: OutputFormat, verbose: bool) -> Result<()> {
  let previous = load_document(from).with_context(|| format!("Failed to load server document: {}", from.display()))?;
  let next = load_document(to).with_context(|| format!("Failed to load server document: {}", to.display()))?;

  let plan = plan_documents(&previous, &next).context("Failed to compute plan")?;

  if output.is_json() {
    return print_json(&plan);
  }

  if plan.is_empty() {
    print_info("No changes");
    return Ok(());
  }

  if !plan.factories.is_empty() {
    println!("Factories:");
    for factory in &plan.factories {
      let symbol = match factory.change {
        FactoryChange::Added => symbols::ADD,
        FactoryChange::Removed => symbols::REMOVE,
        FactoryChange::Replaced => symbols::MODIFY,
      };
      print_change(symbol, &factory.name, factory.kind);
    }
  }

  if !plan.attributes.is_empty() {
    println!("Attributes:");
    for attribute in &plan.attributes {
      let subject = format!("{}.{}", attribute.factory, attribute.attribute);
      print_change(symbols::MODIFY, &subject, &attribute.effect.to_string());
    }
  }

  print_slot("Connectors", &plan.connectors, verbose);
  print_slot("Contexts", &plan.contexts, verbose);

  println!();
  print_stat(
    "Connectors",
    &format!(
      "{} to create, {} to remove, {} retained",
      plan.connectors.create.len(),
      plan.connectors.remove.len(),
      plan.connectors.retain.len()
    ),
  );
  print_stat(
    "Contexts",
    &format!(
      "{} to create, {} to remove, {} to update, {} retained",
      plan.contexts.create.len(),
      plan.contexts.remove.len(),
      plan.contexts.update.len(),
      plan.contexts.retain.len()
    ),
  );
  Ok(())
}

fn print_slot(title: &str, slot: &SlotPlan, verbose: bool) {
  if slot.is_empty() && !verbose {
    return;
  }
  println!("{}:", title);
  for entry in &slot.create {
    print_change(symbols::ADD, &subject(entry), &detail(entry, verbose));
  }
  for entry in &slot.remove {
    print_change(symbols::REMOVE, &subject(entry), &detail(entry, verbose));
  }
  for entry in &slot.update {
    print_change(symbols::MODIFY, &subject(entry), &detail(entry, verbose));
  }
  if verbose {
    for entry in &slot.retain {
      print_change(" ", &subject(entry), &detail(entry, verbose));
    }
  }
}

fn subject(entry: &PlanEntry) -> String {
  format!("{} via {}", entry.name, entry.factory)
}

fn detail(entry: &PlanEntry, verbose: bool) -> String {
  let mut parts = Vec::new();
  if !entry.params.is_empty() {
    parts.push(entry.params.clone());
  }
  if let Some(path) = &entry.context_path {
    parts.push(format!("path={}", path));
  }
  if verbose {
    parts.push(entry.fingerprint.clone());
  }
  parts.join(", ")
}
