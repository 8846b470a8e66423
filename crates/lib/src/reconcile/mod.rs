//! Reconciliation of declared configuration against realized resources.
//!
//! Two strategies live here:
//!
//! - [`set`]: unordered resources identified by key (connectors, contexts).
//!   Produces create / remove / retain decisions and leaves lifecycle calls
//!   to the caller.
//! - [`mapping`]: ordered, named sub-resources (servlet and filter holders
//!   and their mappings) where the output is the new ordered array, reusing
//!   previous objects for unchanged keys.

pub mod mapping;
pub mod set;

pub use mapping::{MappingReconciler, OrderedMappingEntry};
pub use set::{Reconciliation, reconcile};
