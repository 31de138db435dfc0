//! Error types shared by every stepwise crate

use std::path::PathBuf;
use thiserror::Error;

use crate::session::SessionState;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], used by callers that only need to
/// decide between "caller bug", "tracer unavailable" and "session gone".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Command issued in a state that forbids it.
    InvalidState,
    /// The tracer wrote to stderr or produced output of the wrong shape.
    Protocol,
    /// The tracer could not be spawned, written to, or exited unexpectedly.
    Process,
    /// The session was stopped while the command was pending.
    Stopped,
    /// Anything else (config, IO, limits).
    Other,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::InvalidState => "invalid_state",
            FaultKind::Protocol => "protocol",
            FaultKind::Process => "process",
            FaultKind::Stopped => "stopped",
            FaultKind::Other => "other",
        }
    }
}

/// Application error types organized by layer
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Session Errors
    // ─────────────────────────────────────────────────────────────
    #[error("unexpected tracer state: {state}, expected one of: {expected}")]
    InvalidState {
        state: SessionState,
        expected: &'static str,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Tracer session stopped while the command was pending")]
    SessionStopped,

    // ─────────────────────────────────────────────────────────────
    // Protocol Errors
    // ─────────────────────────────────────────────────────────────
    #[error("process stderr: {line}")]
    Stderr { line: String },

    #[error("process stdout: {reason} (line: {line})")]
    MalformedBatch { line: String, reason: String },

    #[error("process stdout: {line}")]
    UnexpectedOutput { line: String },

    #[error("process stdout: empty result batch (line: {line})")]
    EmptyBatch { line: String },

    // ─────────────────────────────────────────────────────────────
    // Process Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to spawn tracer process: {reason}")]
    ProcessSpawn { reason: String },

    #[error("Tracer process exited unexpectedly with code: {code:?}")]
    ProcessExit { code: Option<i32> },

    #[error("Failed to write to tracer process: {reason}")]
    ProcessWrite { reason: String },

    // ─────────────────────────────────────────────────────────────
    // Driver Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Trace took longer than {after_ms}ms to execute")]
    Timeout { after_ms: u64 },

    #[error("Trace exceeded the limit of {steps} steps")]
    StepLimit { steps: usize },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Language {language} is not available")]
    UnknownLanguage { language: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn invalid_state(state: SessionState, expected: &'static str) -> Self {
        Self::InvalidState { state, expected }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn stderr(line: impl Into<String>) -> Self {
        Self::Stderr { line: line.into() }
    }

    pub fn malformed_batch(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedBatch {
            line: line.into(),
            reason: reason.into(),
        }
    }

    pub fn unexpected_output(line: impl Into<String>) -> Self {
        Self::UnexpectedOutput { line: line.into() }
    }

    pub fn process_write(reason: impl Into<String>) -> Self {
        Self::ProcessWrite {
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn unknown_language(language: impl Into<String>) -> Self {
        Self::UnknownLanguage {
            language: language.into(),
        }
    }

    /// Classify this error for callers that map faults to user-facing messages.
    pub fn kind(&self) -> FaultKind {
        match self {
            Error::InvalidState { .. } => FaultKind::InvalidState,
            Error::Stderr { .. }
            | Error::MalformedBatch { .. }
            | Error::UnexpectedOutput { .. }
            | Error::EmptyBatch { .. } => FaultKind::Protocol,
            Error::ProcessSpawn { .. } | Error::ProcessExit { .. } | Error::ProcessWrite { .. } => {
                FaultKind::Process
            }
            Error::SessionStopped => FaultKind::Stopped,
            _ => FaultKind::Other,
        }
    }

    pub fn is_protocol_fault(&self) -> bool {
        self.kind() == FaultKind::Protocol
    }

    pub fn is_process_fault(&self) -> bool {
        self.kind() == FaultKind::Process
    }

    /// Check if this error should abort the whole program rather than one trace
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. } | Error::Config { .. } | Error::ProcessSpawn { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
