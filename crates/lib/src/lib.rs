//! keel-lib: reconciliation and live-update engine for supervised servers
//!
//! This crate keeps a set of long-lived server resources in line with a
//! declarative configuration that changes while traffic is flowing:
//! - `key`: identity fingerprints deciding "same resource as before"
//! - `reconcile`: set and ordered-mapping reconciliation
//! - `registry`: weak tracking of every instance a factory produced
//! - `attribute`: classified attribute propagation with batched endpoint sweeps
//! - `factory`: HTTP, connector, session and servlet context factories
//! - `supervisor`: the server state machine that owns listeners and contexts
//! - `document` / `topology`: JSON server documents and their realization

pub mod attribute;
pub mod clause;
pub mod consts;
pub mod document;
pub mod factory;
pub mod id;
pub mod key;
pub mod lifecycle;
pub mod reconcile;
pub mod registry;
pub mod sim;
pub mod supervisor;
pub mod topology;
