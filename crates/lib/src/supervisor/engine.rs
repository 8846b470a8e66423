//! Collaborator traits the supervisor drives.

use crate::clause::Attributes;
use crate::id::ServiceId;
use crate::lifecycle::LifecycleError;

use super::types::RegistrationId;

/// The protocol engine hosting connectors and context handlers.
///
/// Connector and handler handles are cheap clones (typically `Arc`s) so the
/// supervisor can keep its own bookkeeping next to the engine's.
pub trait ServerEngine: Send {
  type Connector: Clone + Send + Sync;
  type Handler: Clone + Send + Sync;

  fn add_connector(&mut self, connector: &Self::Connector) -> Result<(), LifecycleError>;

  fn start_connector(&mut self, connector: &Self::Connector) -> Result<(), LifecycleError>;

  /// Stop and detach a connector.
  fn remove_connector(&mut self, connector: &Self::Connector) -> Result<(), LifecycleError>;

  /// Publish the ordered handler list.
  fn set_handlers(&mut self, handlers: &[Self::Handler]);

  fn start_handler(&mut self, handler: &Self::Handler) -> Result<(), LifecycleError>;

  fn stop_handler(&mut self, handler: &Self::Handler) -> Result<(), LifecycleError>;

  fn is_handler_started(&self, handler: &Self::Handler) -> bool;

  fn set_context_path(&mut self, handler: &Self::Handler, context_path: &str);

  /// Start the container together with every attached connector and handler.
  fn start(&mut self) -> Result<(), LifecycleError>;

  fn stop(&mut self) -> Result<(), LifecycleError>;

  /// Release every resource. The engine is not used afterwards.
  fn destroy(&mut self);

  fn is_started(&self) -> bool;
}

/// Creates connectors listening on a (host, port) pair.
pub trait ConnectorFactory<C>: Send + Sync {
  fn service_id(&self) -> ServiceId;

  fn create_connector(&self, host: Option<&str>, port: u16) -> Result<C, LifecycleError>;
}

/// Creates context handlers serving a context path.
pub trait ContextFactory<H>: Send + Sync {
  fn service_id(&self) -> ServiceId;

  fn create_handler(&self, context_path: &str) -> Result<H, LifecycleError>;
}

/// Makes a running container visible to the rest of the system.
pub trait ServiceRegistry: Send {
  fn register(&mut self, properties: &Attributes) -> Result<RegistrationId, LifecycleError>;

  fn unregister(&mut self, registration: RegistrationId);
}
