//! Drives a tracer session under time and step limits
//!
//! The session itself has no notion of time. [`TraceRunner`] wraps each
//! `start`/`step` in a timeout and stops the session when it fires, then
//! repeats `step` until the session stops on its own or the step budget runs
//! out.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use stepwise_core::prelude::*;
use stepwise_core::{FaultKind, ResultBatch, Sentinel, SessionState, TraceResult};
use stepwise_tracer::{Launcher, TracerSession};

use crate::config::LimitSettings;

/// Message shown for any protocol or process fault
pub const TRACER_UNAVAILABLE: &str = "tracer unavailable";

/// Limits applied by a [`TraceRunner`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceLimits {
    pub steps: usize,
    pub timeout: Duration,
}

impl Default for TraceLimits {
    fn default() -> Self {
        Self::from(&LimitSettings::default())
    }
}

impl From<&LimitSettings> for TraceLimits {
    fn from(settings: &LimitSettings) -> Self {
        Self {
            steps: settings.steps,
            timeout: settings.timeout(),
        }
    }
}

/// Outcome of a trace driven to its end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TraceSummary {
    /// Batches received, including the one answering `start`
    pub batches: usize,
    /// Results across all batches
    pub results: usize,
    /// `step` commands issued
    pub steps: usize,
    pub sentinel: Sentinel,
}

#[derive(Debug, Clone, Default)]
pub struct TraceRunner {
    limits: TraceLimits,
}

impl TraceRunner {
    pub fn new(limits: TraceLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> TraceLimits {
        self.limits
    }

    pub async fn start<L: Launcher>(&self, session: &TracerSession<L>) -> Result<ResultBatch> {
        self.bounded(session, "start", session.start()).await
    }

    pub async fn step<L: Launcher>(&self, session: &TracerSession<L>) -> Result<ResultBatch> {
        self.bounded(session, "step", session.step()).await
    }

    async fn bounded<L, F>(
        &self,
        session: &TracerSession<L>,
        command: &str,
        pending: F,
    ) -> Result<ResultBatch>
    where
        L: Launcher,
        F: std::future::Future<Output = Result<ResultBatch>>,
    {
        match tokio::time::timeout(self.limits.timeout, pending).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let after_ms = self.limits.timeout.as_millis() as u64;
                warn!("Tracer did not answer {} within {}ms", command, after_ms);
                session.stop().await;
                Err(Error::Timeout { after_ms })
            }
        }
    }

    /// Start the session and step it until it stops.
    ///
    /// `on_batch` sees every batch with the name of the command that produced
    /// it. Any error stops the session before it is returned.
    pub async fn run_to_end<L, F>(
        &self,
        session: &TracerSession<L>,
        on_batch: F,
    ) -> Result<TraceSummary>
    where
        L: Launcher,
        F: FnMut(&str, &ResultBatch),
    {
        self.run_with_input(session, &[], on_batch).await
    }

    /// Like [`run_to_end`](Self::run_to_end), writing `inputs` to the tracer
    /// right after `start` when the program keeps running.
    pub async fn run_with_input<L, F>(
        &self,
        session: &TracerSession<L>,
        inputs: &[String],
        mut on_batch: F,
    ) -> Result<TraceSummary>
    where
        L: Launcher,
        F: FnMut(&str, &ResultBatch),
    {
        let outcome = self.drive(session, inputs, &mut on_batch).await;
        if outcome.is_err() {
            session.stop().await;
        }
        outcome
    }

    async fn drive<L, F>(
        &self,
        session: &TracerSession<L>,
        inputs: &[String],
        on_batch: &mut F,
    ) -> Result<TraceSummary>
    where
        L: Launcher,
        F: FnMut(&str, &ResultBatch),
    {
        let batch = self.start(session).await?;
        on_batch("start", &batch);

        let mut summary = TraceSummary {
            batches: 1,
            results: batch.len(),
            steps: 0,
            sentinel: batch.sentinel(),
        };

        if session.state() == SessionState::Started {
            for value in inputs {
                session.provide_input(value).await?;
            }
        }

        while session.state() == SessionState::Started {
            if summary.steps >= self.limits.steps {
                warn!("Step limit of {} reached, stopping tracer", self.limits.steps);
                return Err(Error::StepLimit {
                    steps: self.limits.steps,
                });
            }

            let batch = self.step(session).await?;
            summary.steps += 1;
            summary.batches += 1;
            summary.results += batch.len();
            summary.sentinel = batch.sentinel();
            on_batch("step", &batch);
        }

        info!(
            "Trace finished after {} steps with {:?}",
            summary.steps, summary.sentinel
        );
        Ok(summary)
    }
}

/// Message to show a user for `error`.
///
/// Protocol and process faults say nothing about the traced program, so they
/// collapse to [`TRACER_UNAVAILABLE`]; the detail stays in the log.
pub fn user_message(error: &Error) -> String {
    match error.kind() {
        FaultKind::Protocol | FaultKind::Process => TRACER_UNAVAILABLE.to_string(),
        _ => error.to_string(),
    }
}

/// Text of an `exception` result as reported by the tracer.
///
/// Prefers the tracer's traceback, then its cause. `None` for other kinds.
pub fn render_exception(result: &TraceResult) -> Option<String> {
    if !result.is_exception() {
        return None;
    }

    let traceback = result
        .payload
        .get("exception")
        .and_then(|exception| exception.get("traceback"))
        .and_then(Value::as_str);
    if let Some(traceback) = traceback {
        return Some(traceback.to_string());
    }

    Some(match result.cause() {
        Some(Value::String(cause)) => cause.clone(),
        Some(Value::Null) | None => "exception".to_string(),
        Some(other) => other.to_string(),
    })
}
