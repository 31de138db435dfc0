//! # stepwise-app - Configuration and Trace Driving
//!
//! Everything between the CLI and the tracer protocol: loading
//! `stepwise.toml`, mapping languages to tracer commands, running sessions
//! under time and step limits, and the NDJSON events written in headless mode.
//!
//! ## Public API
//!
//! - [`Settings`], [`load_config`] - Configuration
//! - [`TracerRegistry`] - Language → session lookup
//! - [`TraceRunner`], [`TraceLimits`], [`TraceSummary`] - Limit enforcement
//! - [`HeadlessEvent`] - NDJSON output events

pub mod config;
pub mod headless;
pub mod registry;
pub mod runner;

pub use config::{load_config, Settings};
pub use headless::HeadlessEvent;
pub use registry::{session_for_command, TracerRegistry};
pub use runner::{render_exception, user_message, TraceLimits, TraceRunner, TraceSummary};
