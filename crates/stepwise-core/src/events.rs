//! Events produced by a tracer's output streams

use serde::Serialize;

/// Which output stream of the tracer a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamOrigin {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamOrigin::Stdout => write!(f, "stdout"),
            StreamOrigin::Stderr => write!(f, "stderr"),
        }
    }
}

/// A complete line of tracer output, without its newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub origin: StreamOrigin,
    pub text: String,
    /// `false` only for the trailing fragment flushed when a stream ends
    /// without a final newline.
    pub terminated: bool,
}

impl Line {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            origin: StreamOrigin::Stdout,
            text: text.into(),
            terminated: true,
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            origin: StreamOrigin::Stderr,
            text: text.into(),
            terminated: true,
        }
    }
}

/// What a transport delivers to the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracerEvent {
    /// A line read from stdout or stderr
    Line(Line),
    /// The process exited; no further lines follow
    Exited { code: Option<i32> },
}

impl TracerEvent {
    pub fn stdout(text: impl Into<String>) -> Self {
        TracerEvent::Line(Line::stdout(text))
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        TracerEvent::Line(Line::stderr(text))
    }
}
