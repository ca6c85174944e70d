//! OS signal handling.
//!
//! # Responsibilities
//! - Subscribe to the termination signals (SIGINT, SIGQUIT, SIGTERM, SIGABRT)
//! - Resolve once any of them arrives, reporting which one
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Every recognised signal means the same thing: start draining
//! - SIGKILL is named so it can be reported, but it can't be caught and is
//!   never subscribed

use std::fmt;
use std::io;

/// A process signal that requests shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Quit,
    Terminate,
    Abort,
    Kill,
}

impl TerminationSignal {
    /// Signals a handler can actually be installed for.
    pub const SUBSCRIBED: [TerminationSignal; 4] = [
        TerminationSignal::Interrupt,
        TerminationSignal::Quit,
        TerminationSignal::Terminate,
        TerminationSignal::Abort,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TerminationSignal::Interrupt => "SIGINT",
            TerminationSignal::Quit => "SIGQUIT",
            TerminationSignal::Terminate => "SIGTERM",
            TerminationSignal::Abort => "SIGABRT",
            TerminationSignal::Kill => "SIGKILL",
        }
    }

    /// Whether a handler can be installed for this signal.
    pub fn is_catchable(&self) -> bool {
        !matches!(self, TerminationSignal::Kill)
    }
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Installed handlers for every subscribed termination signal.
#[cfg(unix)]
#[derive(Debug)]
pub struct TerminationSignals {
    interrupt: tokio::signal::unix::Signal,
    quit: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    abort: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    /// Install the handlers. From here on the signals no longer run their
    /// default action; they are delivered to [`TerminationSignals::recv`].
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
            terminate: signal(SignalKind::terminate())?,
            abort: signal(SignalKind::from_raw(nix::libc::SIGABRT))?,
        })
    }

    /// Resolve on the next termination signal.
    pub async fn recv(&mut self) -> TerminationSignal {
        tokio::select! {
            _ = self.interrupt.recv() => TerminationSignal::Interrupt,
            _ = self.quit.recv() => TerminationSignal::Quit,
            _ = self.terminate.recv() => TerminationSignal::Terminate,
            _ = self.abort.recv() => TerminationSignal::Abort,
        }
    }
}

#[cfg(not(unix))]
#[derive(Debug)]
pub struct TerminationSignals {
    _private: (),
}

#[cfg(not(unix))]
impl TerminationSignals {
    pub fn install() -> io::Result<Self> {
        Ok(Self { _private: () })
    }

    pub async fn recv(&mut self) -> TerminationSignal {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        TerminationSignal::Interrupt
    }
}
