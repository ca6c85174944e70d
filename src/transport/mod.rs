//! RPC transport.
//!
//! # Data Flow
//! ```text
//! HTTP/2 request (axum, request id layers)
//!     → router.rs (route per full method path, unknown paths → UNIMPLEMENTED)
//!     → tonic framing + prost codec
//!     → adapter.rs (erase into Payload, run the interceptor chain)
//!     → handler.rs (typed user closure)
//! ```
//!
//! # Design Decisions
//! - tonic provides the framing and codecs, axum the HTTP/2 server and the
//!   graceful stop
//! - Methods are registered with plain async closures over prost messages,
//!   no generated service traits needed

mod adapter;
mod handler;
pub mod router;

pub use handler::RequestStream;
pub use router::{validate_path, MethodRouter};
