//! Service binding.
//!
//! # Data Flow
//! ```text
//! ServiceDescriptor (address empty or explicit)
//!     → binder.rs (wildcard host? intranet ip + port : listen address)
//!     → bound descriptors, frozen once the server runs
//!     → registered with discovery after the listener accepts
//! ```

pub mod binder;
pub mod intranet;

pub use binder::{default_app_id, is_wildcard_host, split_host_port, IntranetResolver, ServiceBinder};
pub use intranet::{intranet_ip, is_intranet};
