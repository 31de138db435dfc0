//! # stepwise-tracer - Tracer Process Protocol
//!
//! Spawns external tracer processes, reassembles their output into lines,
//! parses result batches and runs the `start`/`step`/`input`/`stop` command
//! lifecycle.
//!
//! Depends on [`stepwise_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Session
//! - [`TracerSession`] - State machine owning one tracer process
//!
//! ### Protocol
//! - [`BatchParser`] - Classify output lines and decode result batches
//! - [`LinePolicy`] - Strict or lenient handling of non-batch stdout lines
//! - [`TracerCommand`] - Commands written to the tracer's stdin
//!
//! ### Transport
//! - [`Transport`], [`Launcher`] - Capability the session is written against
//! - [`ProcessLauncher`], [`ProcessTransport`] - Shell-spawned tracer processes
//! - [`LineDemultiplexer`], [`LineBuffer`] - Chunk-to-line reassembly

pub mod demux;
pub mod process;
pub mod protocol;
pub mod session;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod transport;

// Public API re-exports
pub use demux::{LineBuffer, LineDemultiplexer};
pub use process::{ProcessLauncher, ProcessTransport, DEFAULT_SHUTDOWN_GRACE};
pub use protocol::{parse_batch, BatchParser, LinePolicy, TracerCommand};
pub use session::TracerSession;
pub use transport::{Launcher, LocalTransport, Transport};
