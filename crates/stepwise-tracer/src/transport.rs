//! Transport capability the session is written against
//!
//! A transport is one live connection to a tracer: a line sink for commands
//! and a source of [`TracerEvent`]s. [`crate::process::ProcessTransport`] is
//! the real implementation; `test_utils::ScriptedTransport` is a channel-level
//! stand-in for tests.

use stepwise_core::events::TracerEvent;
use stepwise_core::prelude::*;

/// One live tracer connection, exclusively owned by a session.
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport {
    /// Write one command line. The newline is appended by the transport.
    async fn write_line(&mut self, line: &str) -> Result<()>;

    /// Wait for the next event. `None` once the transport is exhausted.
    async fn next_event(&mut self) -> Option<TracerEvent>;

    /// An event that has already been delivered, without waiting.
    fn try_next_event(&mut self) -> Option<TracerEvent>;

    /// Release the connection: close input, stop reading, reap the process.
    async fn close(&mut self);
}

/// Creates transports for a command string.
pub trait Launcher: Send + Sync {
    type Transport: Transport;

    fn launch(&self, command: &str) -> Result<Self::Transport>;
}
