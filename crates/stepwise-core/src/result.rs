//! Trace results emitted by tracer processes
//!
//! A tracer answers every command with one JSON array of result objects. Each
//! object carries a `kind` discriminator; everything else is a payload whose
//! shape is agreed between the caller and the tracer binary, so it is kept as
//! raw JSON here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Discriminator of a [`TraceResult`].
///
/// Unknown kinds are preserved in [`ResultKind::Other`] so tracers can extend
/// the protocol without breaking the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum ResultKind {
    Step,
    Print,
    Exception,
    Completed,
    Other(String),
}

impl ResultKind {
    pub fn as_str(&self) -> &str {
        match self {
            ResultKind::Step => "step",
            ResultKind::Print => "print",
            ResultKind::Exception => "exception",
            ResultKind::Completed => "completed",
            ResultKind::Other(kind) => kind,
        }
    }
}

impl From<String> for ResultKind {
    fn from(kind: String) -> Self {
        match kind.as_str() {
            "step" => ResultKind::Step,
            "print" => ResultKind::Print,
            "exception" => ResultKind::Exception,
            "completed" => ResultKind::Completed,
            _ => ResultKind::Other(kind),
        }
    }
}

impl From<ResultKind> for String {
    fn from(kind: ResultKind) -> Self {
        match kind {
            ResultKind::Other(kind) => kind,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for ResultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event emitted by a tracer step. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TraceResult {
    pub kind: ResultKind,
    /// Every field of the tracer's object except `kind`, verbatim.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl TraceResult {
    pub fn new(kind: ResultKind) -> Self {
        Self {
            kind,
            payload: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// Current source line of a `step` result
    pub fn line(&self) -> Option<u64> {
        self.payload.get("line").and_then(Value::as_u64)
    }

    /// Printed text of a `print` result
    pub fn text(&self) -> Option<&str> {
        self.payload.get("text").and_then(Value::as_str)
    }

    /// Structured cause of an `exception` result
    pub fn cause(&self) -> Option<&Value> {
        self.payload.get("cause")
    }

    pub fn is_exception(&self) -> bool {
        self.kind == ResultKind::Exception
    }

    pub fn is_completed(&self) -> bool {
        self.kind == ResultKind::Completed
    }
}

/// The ordered, non-empty group of results answering one command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultBatch(Vec<TraceResult>);

impl ResultBatch {
    /// Wrap parsed results. Returns `None` for an empty list.
    pub fn new(results: Vec<TraceResult>) -> Option<Self> {
        if results.is_empty() {
            None
        } else {
            Some(Self(results))
        }
    }

    /// The result that decides the batch's [`Sentinel`].
    pub fn last(&self) -> &TraceResult {
        // Non-empty by construction.
        &self.0[self.0.len() - 1]
    }

    pub fn sentinel(&self) -> Sentinel {
        Sentinel::classify(self)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TraceResult> {
        self.0.iter()
    }

    pub fn results(&self) -> &[TraceResult] {
        &self.0
    }

    pub fn into_results(self) -> Vec<TraceResult> {
        self.0
    }
}

impl<'a> IntoIterator for &'a ResultBatch {
    type Item = &'a TraceResult;
    type IntoIter = std::slice::Iter<'a, TraceResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// What the last result of a batch says about the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentinel {
    /// The traced program finished normally.
    Completed,
    /// The traced program failed; the exception result is part of the batch.
    Exception,
    /// More `step`/`input` commands are valid.
    Continue,
}

impl Sentinel {
    pub fn classify(batch: &ResultBatch) -> Self {
        match batch.last().kind {
            ResultKind::Completed => Sentinel::Completed,
            ResultKind::Exception => Sentinel::Exception,
            _ => Sentinel::Continue,
        }
    }

    /// Whether the session closes after this batch
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Sentinel::Continue)
    }
}
