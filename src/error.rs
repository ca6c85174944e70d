//! Server-level errors.
//!
//! Everything here is fatal for the server that returns it: the library
//! reports it to the caller and the binary logs it and exits non-zero.
//! Per-call failures never show up here; they are `tonic::Status` values
//! contained inside the interceptor pipeline.
//!
//! The error is `Clone` so that every waiter on a background server sees
//! the same outcome; non-cloneable sources are shared behind `Arc`.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinError;

use crate::config::ConfigError;
use crate::discovery::DiscoveryError;

#[derive(Debug, Clone, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[source] Arc<ConfigError>),

    #[error("invalid route {path:?}: {reason}")]
    Route { path: String, reason: &'static str },

    #[error("server is already running")]
    AlreadyStarted,

    #[error("services cannot be bound after the server has started")]
    ServicesFrozen,

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: Arc<io::Error>,
    },

    #[error(
        "retrieving intranet ip failed, check the network interfaces or assign the service address manually: {0}"
    )]
    IntranetAddress(#[source] Arc<io::Error>),

    #[error("failed to register service {service}: {source}")]
    Registration {
        service: String,
        #[source]
        source: DiscoveryError,
    },

    #[error("accept loop failed: {0}")]
    Serve(#[source] Arc<io::Error>),

    #[error("accept loop exited before shutdown was requested")]
    ServeExited,

    #[error("failed to install signal handler: {0}")]
    Signal(#[source] Arc<io::Error>),

    #[error("server task failed: {0}")]
    Task(#[source] Arc<JoinError>),
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        ServerError::Config(Arc::new(err))
    }
}

impl From<JoinError> for ServerError {
    fn from(err: JoinError) -> Self {
        ServerError::Task(Arc::new(err))
    }
}
