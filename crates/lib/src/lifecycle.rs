//! Lifecycle collaborator contracts.
//!
//! The protocol engine that actually opens sockets and dispatches requests is
//! an external collaborator. This module names what the engine reports back
//! when a lifecycle step fails, and the endpoint-closure contract created
//! resources expose to the sweep phase of an attribute update.

use serde::Serialize;
use thiserror::Error;

/// A create, start or stop step of a resource failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum LifecycleError {
  #[error("failed to create {resource}: {message}")]
  Create { resource: String, message: String },

  #[error("failed to start {resource}: {message}")]
  Start { resource: String, message: String },

  #[error("failed to stop {resource}: {message}")]
  Stop { resource: String, message: String },

  #[error("failed to register {resource}: {message}")]
  Register { resource: String, message: String },
}

impl LifecycleError {
  pub fn create(resource: impl Into<String>, message: impl Into<String>) -> Self {
    LifecycleError::Create {
      resource: resource.into(),
      message: message.into(),
    }
  }

  pub fn start(resource: impl Into<String>, message: impl Into<String>) -> Self {
    LifecycleError::Start {
      resource: resource.into(),
      message: message.into(),
    }
  }

  pub fn stop(resource: impl Into<String>, message: impl Into<String>) -> Self {
    LifecycleError::Stop {
      resource: resource.into(),
      message: message.into(),
    }
  }
}

/// A network endpoint (an accepted connection) owned by the protocol engine.
pub trait Endpoint: Send + Sync {
  /// Close the endpoint. Must be idempotent.
  fn close(&self);
}

/// Implemented by created resources that hold references to endpoints.
///
/// Invoked during the sweep that follows attribute changes requiring
/// dependent connections to reconnect with the new settings.
pub trait EndpointCloseable {
  fn close_referenced_endpoints(&self);
}
