//! Headless output - NDJSON trace events on stdout
//!
//! Every event is one JSON object per line with an `event` tag and a
//! millisecond `timestamp`. Logs go to the log file, never to stdout, so the
//! stream can be piped straight into another program.
//!
//! # Example Output
//!
//! ```json
//! {"event":"session_started","command":"python3 tracer.py","timestamp":1704700001000}
//! {"event":"batch","command":"start","state":"started","results":[{"kind":"step","line":1}],"timestamp":1704700001020}
//! {"event":"batch","command":"step","state":"stopped","results":[{"kind":"completed"}],"timestamp":1704700001031}
//! {"event":"session_stopped","timestamp":1704700001032}
//! {"event":"summary","batches":2,"results":2,"steps":1,"sentinel":"completed","timestamp":1704700001032}
//! ```

use chrono::Utc;
use serde::Serialize;
use std::io::{self, Write};
use tracing::error;

use stepwise_core::{Error, ResultBatch, Sentinel, SessionState, TraceResult};

use crate::runner::{render_exception, user_message, TraceSummary};

/// Events emitted in headless mode
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeadlessEvent {
    /// Tracer about to be launched
    SessionStarted {
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        timestamp: i64,
    },

    /// Batch answering a `start` or `step`
    Batch {
        command: String,
        state: SessionState,
        results: Vec<TraceResult>,
        timestamp: i64,
    },

    /// The traced program raised; `message` is the tracer's own report
    Exception { message: String, timestamp: i64 },

    /// Session reached `stopped`
    SessionStopped { timestamp: i64 },

    /// A command failed
    Fault {
        kind: &'static str,
        message: String,
        timestamp: i64,
    },

    /// Totals for a completed run
    Summary {
        batches: usize,
        results: usize,
        steps: usize,
        sentinel: Sentinel,
        timestamp: i64,
    },
}

impl HeadlessEvent {
    /// Emit this event to stdout as JSON
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize headless event: {}", e);
                return;
            }
        };

        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write headless event to stdout: {}", e);
            return;
        }

        if let Err(e) = stdout.flush() {
            error!("Failed to flush headless stdout: {}", e);
        }
    }

    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    // ─────────────────────────────────────────────────────────
    // Convenience constructors
    // ─────────────────────────────────────────────────────────

    pub fn session_started(command: &str, language: Option<&str>) -> Self {
        Self::SessionStarted {
            command: command.to_string(),
            language: language.map(str::to_string),
            timestamp: Self::now(),
        }
    }

    pub fn batch(command: &str, state: SessionState, batch: &ResultBatch) -> Self {
        Self::Batch {
            command: command.to_string(),
            state,
            results: batch.results().to_vec(),
            timestamp: Self::now(),
        }
    }

    /// Exception event for the batch's final result, if it is one
    pub fn exception(batch: &ResultBatch) -> Option<Self> {
        render_exception(batch.last()).map(|message| Self::Exception {
            message,
            timestamp: Self::now(),
        })
    }

    pub fn session_stopped() -> Self {
        Self::SessionStopped {
            timestamp: Self::now(),
        }
    }

    /// Fault event carrying the user-facing message for `error`
    pub fn fault(error: &Error) -> Self {
        Self::Fault {
            kind: error.kind().as_str(),
            message: user_message(error),
            timestamp: Self::now(),
        }
    }

    pub fn summary(summary: &TraceSummary) -> Self {
        Self::Summary {
            batches: summary.batches,
            results: summary.results,
            steps: summary.steps,
            sentinel: summary.sentinel,
            timestamp: Self::now(),
        }
    }
}
