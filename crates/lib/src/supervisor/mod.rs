//! Top-level server supervision.
//!
//! A [`ServerSupervisor`] owns one server engine together with the
//! connectors and context handlers realized from the declared clause sets.
//! It drives the engine through the [`ServerEngine`] trait, resolves clauses
//! into [`ResourceKey`](crate::key::ResourceKey)s and uses the set
//! reconciler to decide what to create, stop or keep.
//!
//! Start failures are atomic: the whole server is unwound and left
//! [`SupervisorState::Failed`]. Nothing is externally registered until
//! everything started.

mod engine;
mod server;
mod types;

pub use engine::{ConnectorFactory, ContextFactory, ServerEngine, ServiceRegistry};
pub use server::ServerSupervisor;
pub use types::{
  ConnectorClause, ConnectorSpec, ContextClause, ContextSpec, ReconcileSummary, RegistrationId, SupervisorError,
  SupervisorState, connector_key, context_key,
};
