//! RPC server lifecycle and interceptor shell.
//!
//! Turns a static configuration into a listening, discoverable, gracefully
//! stoppable gRPC server, and wraps every call in an ordered interceptor
//! pipeline (error translation, logging, panic recovery, then the caller's
//! own interceptors such as validation and tracing).

pub mod config;
pub mod discovery;
pub mod error;
pub mod health;
pub mod interceptor;
pub mod lifecycle;
pub mod observability;
pub mod server;
pub mod service;
pub mod transport;

pub use config::ServerConfig;
pub use discovery::{Discovery, ServiceDescriptor};
pub use error::ServerError;
pub use interceptor::{InterceptorChain, RpcError};
pub use lifecycle::{LifecycleState, Shutdown};
pub use server::{RpcServer, ServerBuilder};
pub use transport::MethodRouter;
