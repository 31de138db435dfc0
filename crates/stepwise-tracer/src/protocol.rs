//! Line protocol spoken with tracer processes
//!
//! Commands go to the tracer's stdin, one per line: `start`, `step`,
//! `input <value>`, `stop`. Every `start`/`step` is answered by one stdout line
//! holding a JSON array of result objects. Anything on stderr is a fault.

use std::fmt;

use serde_json::Value;

use stepwise_core::events::{Line, StreamOrigin};
use stepwise_core::prelude::*;
use stepwise_core::{ResultBatch, TraceResult};

/// How stdout lines that are not result batches are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinePolicy {
    /// Any non-blank stdout line not starting with `[` is a protocol fault.
    #[default]
    Strict,
    /// Non-batch stdout lines are logged and skipped.
    Lenient,
}

impl LinePolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "strict" => Some(LinePolicy::Strict),
            "lenient" => Some(LinePolicy::Lenient),
            _ => None,
        }
    }
}

/// A command written to the tracer's stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracerCommand {
    Start,
    Step,
    Input(String),
    Stop,
}

impl TracerCommand {
    /// Build an input command, rejecting values that would break line framing.
    pub fn input(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.contains(['\n', '\r']) {
            return Err(Error::invalid_input(
                "input value must not contain line breaks",
            ));
        }
        Ok(TracerCommand::Input(value))
    }

    /// The wire form, without the trailing newline
    pub fn to_line(&self) -> String {
        match self {
            TracerCommand::Start => "start".to_string(),
            TracerCommand::Step => "step".to_string(),
            TracerCommand::Input(value) => format!("input {}", value),
            TracerCommand::Stop => "stop".to_string(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TracerCommand::Start => "start",
            TracerCommand::Step => "step",
            TracerCommand::Input(_) => "input",
            TracerCommand::Stop => "stop",
        }
    }
}

impl fmt::Display for TracerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

/// Turns tracer output lines into result batches.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchParser {
    policy: LinePolicy,
}

impl BatchParser {
    pub fn new(policy: LinePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> LinePolicy {
        self.policy
    }

    /// Interpret one line.
    ///
    /// Returns `Ok(Some(batch))` for a result batch, `Ok(None)` for a line the
    /// policy skips, and a protocol fault otherwise. Stderr lines are always
    /// faults, whatever they contain.
    pub fn accept(&self, line: &Line) -> Result<Option<ResultBatch>> {
        if line.origin == StreamOrigin::Stderr {
            return Err(Error::stderr(line.text.trim_end()));
        }

        let trimmed = line.text.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        if !trimmed.starts_with('[') {
            return match self.policy {
                LinePolicy::Strict => Err(Error::unexpected_output(trimmed)),
                LinePolicy::Lenient => {
                    debug!("Ignoring non-batch stdout line: {}", trimmed);
                    Ok(None)
                }
            };
        }

        parse_batch(trimmed).map(Some)
    }
}

/// Decode a `[`-prefixed line as a non-empty array of results
pub fn parse_batch(text: &str) -> Result<ResultBatch> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::malformed_batch(text, e.to_string()))?;
    let results: Vec<TraceResult> =
        serde_json::from_value(value).map_err(|e| Error::malformed_batch(text, e.to_string()))?;
    ResultBatch::new(results).ok_or_else(|| Error::EmptyBatch {
        line: text.to_string(),
    })
}
