//! `stepwise run` - trace a program to its end in headless mode

use stepwise_app::config::Settings;
use stepwise_app::{session_for_command, HeadlessEvent, TraceLimits, TraceRunner, TracerRegistry};
use stepwise_core::prelude::*;
use stepwise_tracer::{LinePolicy, TracerSession};

/// Which tracer to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceTarget {
    /// A language from the config's `[tracers]` table
    Language(String),
    /// A shell command line given directly
    Command(String),
}

/// Overrides from the command line
#[derive(Debug, Clone, Default)]
pub struct TraceOptions {
    pub steps: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub lenient: bool,
    pub inputs: Vec<String>,
}

impl TraceOptions {
    /// Config limits with command-line overrides applied
    pub fn limits(&self, settings: &Settings) -> TraceLimits {
        let mut limits = TraceLimits::from(&settings.limits);
        if let Some(steps) = self.steps {
            limits.steps = steps;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            limits.timeout = std::time::Duration::from_millis(timeout_ms);
        }
        limits
    }
}

/// Build an unstarted session for `target`.
///
/// `--lenient` only ever relaxes the configured policy.
pub fn open_session(
    settings: &Settings,
    target: &TraceTarget,
    lenient: bool,
) -> Result<TracerSession> {
    let session = match target {
        TraceTarget::Language(language) => {
            TracerRegistry::from_settings(settings).session(language)?
        }
        TraceTarget::Command(command) => session_for_command(
            command,
            LinePolicy::Strict,
            settings.limits.shutdown_grace(),
        ),
    };

    Ok(if lenient {
        session.with_policy(LinePolicy::Lenient)
    } else {
        session
    })
}

fn language_of(target: &TraceTarget) -> Option<&str> {
    match target {
        TraceTarget::Language(language) => Some(language),
        TraceTarget::Command(_) => None,
    }
}

/// Run one trace to completion, emitting NDJSON events.
///
/// Returns `Ok(false)` when the trace ended in a fault; the fault has
/// already been reported on stdout.
pub async fn run_trace(
    settings: &Settings,
    target: &TraceTarget,
    options: &TraceOptions,
) -> Result<bool> {
    let session = open_session(settings, target, options.lenient)?;
    let runner = TraceRunner::new(options.limits(settings));
    let verbose = settings.output.verbose;

    info!("Tracing with '{}' ({:?})", session.command(), runner.limits());
    HeadlessEvent::session_started(session.command(), language_of(target)).emit();

    let outcome = runner
        .run_with_input(&session, &options.inputs, |command, batch| {
            if verbose {
                if let Ok(json) = serde_json::to_string(batch).context("Failed to log batch") {
                    debug!("{} -> {}", command, json);
                }
            }
            HeadlessEvent::batch(command, session.state(), batch).emit();
            if let Some(event) = HeadlessEvent::exception(batch) {
                event.emit();
            }
        })
        .await;

    HeadlessEvent::session_stopped().emit();

    match outcome {
        Ok(summary) => {
            HeadlessEvent::summary(&summary).emit();
            Ok(true)
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("Trace failed: {}", e);
            HeadlessEvent::fault(&e).emit();
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_app::config::TracerConfig;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.tracers.insert(
            "python".to_string(),
            TracerConfig {
                command: "python3 tracer.py".to_string(),
                policy: Default::default(),
            },
        );
        settings
    }

    #[test]
    fn test_options_override_limits() {
        let options = TraceOptions {
            steps: Some(3),
            timeout_ms: Some(20),
            ..Default::default()
        };
        let limits = options.limits(&settings());

        assert_eq!(limits.steps, 3);
        assert_eq!(limits.timeout, std::time::Duration::from_millis(20));
    }

    #[test]
    fn test_options_default_to_config() {
        let limits = TraceOptions::default().limits(&settings());
        assert_eq!(limits, TraceLimits::default());
    }

    #[test]
    fn test_open_session_by_language() {
        let target = TraceTarget::Language("python".to_string());
        let session = open_session(&settings(), &target, false).unwrap();
        assert_eq!(session.command(), "python3 tracer.py");
        assert_eq!(session.policy(), LinePolicy::Strict);
    }

    #[test]
    fn test_open_session_lenient_override() {
        let target = TraceTarget::Command("./tracer".to_string());
        let session = open_session(&settings(), &target, true).unwrap();
        assert_eq!(session.command(), "./tracer");
        assert_eq!(session.policy(), LinePolicy::Lenient);
    }

    #[test]
    fn test_open_session_unknown_language() {
        let target = TraceTarget::Language("ruby".to_string());
        let err = open_session(&settings(), &target, false).err().unwrap();
        assert!(matches!(err, Error::UnknownLanguage { .. }));
    }
}
