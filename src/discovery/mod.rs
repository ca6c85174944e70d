//! Service discovery contract.
//!
//! # Responsibilities
//! - Describe one discoverable service instance ([`ServiceDescriptor`])
//! - Define the register/unregister contract the server consumes
//!
//! # Design Decisions
//! - The backend's storage and propagation are out of scope; only the two
//!   calls are consumed
//! - The server registers after the listener accepts and unregisters before
//!   the graceful stop
//! - [`NoopDiscovery`] is the default, so a server without a backend still
//!   runs, just undiscoverable

pub mod memory;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{DiscoveryEvent, InMemoryDiscovery};

/// The discovery-facing identity and address of one service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ServiceDescriptor {
    /// Application identity the instance is found by.
    pub app_id: String,

    /// Advertised `host:port`. Empty until resolved from the listen address.
    #[serde(default)]
    pub address: String,

    /// Free-form attributes passed through to the backend.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ServiceDescriptor {
    /// Descriptor whose address is derived from the listen address.
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            ..Self::default()
        }
    }

    /// Descriptor advertised verbatim at `address`.
    pub fn with_address(app_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            address: address.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.app_id, self.address)
    }
}

/// Failure reported by a discovery backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    #[error("discovery backend unavailable: {0}")]
    Unavailable(String),

    #[error("service {0} is not registered")]
    NotRegistered(String),
}

/// A discovery backend.
#[async_trait]
pub trait Discovery: Send + Sync + 'static {
    async fn register(&self, service: &ServiceDescriptor) -> Result<(), DiscoveryError>;

    async fn unregister(&self, service: &ServiceDescriptor) -> Result<(), DiscoveryError>;
}

/// Backend that accepts everything and remembers nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDiscovery;

#[async_trait]
impl Discovery for NoopDiscovery {
    async fn register(&self, service: &ServiceDescriptor) -> Result<(), DiscoveryError> {
        tracing::debug!(service = %service, "no discovery backend configured, skipping register");
        Ok(())
    }

    async fn unregister(&self, service: &ServiceDescriptor) -> Result<(), DiscoveryError> {
        tracing::debug!(service = %service, "no discovery backend configured, skipping unregister");
        Ok(())
    }
}
