//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Run / Start:
//!     Unbound → bind listener → spawn accept loop → register services → Listening
//!
//! Shutdown (shutdown.rs, signals.rs):
//!     SIGINT/SIGQUIT/SIGTERM/SIGABRT or stop() → Draining
//!     → unregister services (best effort) → fixed grace sleep
//!     → graceful stop of the accept loop → in-flight calls finish → Stopped
//! ```
//!
//! # Design Decisions
//! - Registration strictly after the listener accepts, unregistration
//!   strictly before the graceful stop
//! - The grace interval is fixed; the graceful stop has no deadline
//! - State is published on a watch channel so health checks and tests can
//!   follow it

pub mod shutdown;
pub mod signals;

use std::fmt;
use std::time::Duration;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use signals::{TerminationSignal, TerminationSignals};

/// Pause between unregistering from discovery and stopping the accept loop,
/// so discovery consumers stop routing new calls here first.
pub const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Where a server is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Built, no socket yet.
    Unbound,
    /// Socket open, accepting, services registered.
    Listening,
    /// Stop requested, unregistering and waiting out the grace interval.
    Draining,
    /// Accept loop finished, socket released.
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Unbound => "unbound",
            LifecycleState::Listening => "listening",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
