//! Concrete factories whose live instances follow configuration changes.

pub mod connector;
pub mod context;
pub mod customizer;
pub mod error_page;
pub mod http;
pub mod mapping_keys;
pub mod session;

pub use connector::{
  ConnectionFactory, ConnectionFactoryFactory, ConnectorAttribute, ConnectorSettings, ServerConnector,
  ServerConnectorFactory,
};
pub use context::{HandlerTables, ServletContextHandler, ServletContextHandlerFactory, ServletHandler};
pub use customizer::{CustomizerConfig, CustomizerRef, ForwardedConfig, Request, RequestCustomizer};
pub use error_page::{
  ErrorHandlerAttribute, ErrorHandlerConfig, ErrorPageErrorHandler, ErrorPageErrorHandlerFactory, ErrorResponse,
};
pub use http::{HttpAttribute, HttpConfig, HttpConnection, HttpConnectionFactory, HttpConnectionFactoryFactory};
pub use mapping_keys::{DispatcherType, FilterMappingKey, HolderKey, ServletMappingKey};
pub use session::{EvictionPolicy, SessionAttribute, SessionCache, SessionConfig, SessionHandler, SessionHandlerFactory};
