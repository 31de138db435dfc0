//! stepwise library
//!
//! Command implementations behind the `stepwise` binary. The tracer protocol
//! lives in `stepwise-tracer`; configuration and limits in `stepwise-app`.

pub mod repl;
pub mod trace;

pub use repl::{parse_command, run_repl};
pub use trace::{open_session, run_trace, TraceOptions, TraceTarget};
