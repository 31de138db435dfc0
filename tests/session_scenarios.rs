//! End-to-end scenarios against real tracer processes
//!
//! Each tracer is a small `sh` script that reads commands from stdin and
//! answers with canned batches.

#![cfg(unix)]

use std::time::Duration;

use stepwise::{open_session, TraceTarget};
use stepwise_app::config::load_settings_strict;
use stepwise_app::{TraceLimits, TraceRunner, TracerRegistry};
use stepwise_core::{Error, ResultKind, Sentinel, SessionState};
use stepwise_tracer::{LinePolicy, TracerSession};

const STEP_THEN_COMPLETE: &str = r#"
read cmd; [ "$cmd" = start ] && echo '[{"kind":"step","line":1}]'
read cmd; [ "$cmd" = step ] && echo '[{"kind":"completed"}]'
read cmd
"#;

const EXCEPTION_ON_START: &str = r#"
read cmd; echo '[{"kind":"exception","cause":"boom"}]'
read cmd
"#;

const STEPS_FOREVER: &str = r#"
while read cmd; do
  [ "$cmd" = stop ] && exit 0
  echo '[{"kind":"step","line":1}]'
done
"#;

/// Whether `pid` is still running. Zombies count as gone.
fn is_alive(pid: i32) -> bool {
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        return !stat
            .rsplit(") ")
            .next()
            .is_some_and(|rest| rest.starts_with('Z'));
    }
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
}

fn session(script: &str) -> TracerSession {
    TracerSession::new(script)
}

async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("scenario timed out")
}

#[tokio::test]
async fn test_start_step_complete() {
    let session = session(STEP_THEN_COMPLETE);

    let batch = within(session.start()).await.unwrap();
    assert_eq!(session.state(), SessionState::Started);
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.last().kind, ResultKind::Step);
    assert_eq!(batch.last().line(), Some(1));

    let batch = within(session.step()).await.unwrap();
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.last().kind, ResultKind::Completed);

    let err = within(session.step()).await.unwrap_err();
    assert!(matches!(err, Error::InvalidState { .. }));
}

#[tokio::test]
async fn test_exception_on_start_stops_session() {
    let session = session(EXCEPTION_ON_START);
    let mut states = session.subscribe_state();

    let batch = within(session.start()).await.unwrap();

    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(batch.sentinel(), Sentinel::Exception);
    assert_eq!(batch.last().cause().and_then(|c| c.as_str()), Some("boom"));
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), SessionState::Stopped);
}

#[tokio::test]
async fn test_malformed_output_is_protocol_fault() {
    let session = session("read cmd; echo 'not json'; read cmd");

    let err = within(session.start()).await.unwrap_err();

    assert!(err.is_protocol_fault());
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_banner_accepted_when_lenient() {
    let session = session(r#"echo '## tracer ready'; read cmd; echo '[{"kind":"completed"}]'"#)
        .with_policy(LinePolicy::Lenient);

    let batch = within(session.start()).await.unwrap();

    assert_eq!(batch.sentinel(), Sentinel::Completed);
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_stderr_is_protocol_fault() {
    let session = session("read cmd; echo 'Traceback' >&2; sleep 5");

    let err = within(session.start()).await.unwrap_err();

    assert!(matches!(err, Error::Stderr { ref line } if line == "Traceback"));
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_tracer_exit_is_process_fault() {
    let session = session("read cmd; exit 3");

    let err = within(session.start()).await.unwrap_err();

    assert!(err.is_process_fault());
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_second_start_rejected() {
    let session = session(STEPS_FOREVER);

    within(session.start()).await.unwrap();
    let err = within(session.start()).await.unwrap_err();

    assert!(matches!(err, Error::InvalidState { .. }));
    assert_eq!(session.state(), SessionState::Started);

    within(session.step()).await.unwrap();
    within(session.stop()).await;
    within(session.stop()).await;
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_input_reaches_tracer() {
    let script = r#"
read cmd; echo '[{"kind":"step","line":1}]'
read cmd; value=${cmd#input }
read cmd; echo "[{\"kind\":\"print\",\"text\":\"$value\"},{\"kind\":\"completed\"}]"
read cmd
"#;
    let session = session(script);

    within(session.start()).await.unwrap();
    within(session.provide_input("hello world")).await.unwrap();
    let batch = within(session.step()).await.unwrap();

    assert_eq!(batch.results()[0].text(), Some("hello world"));
    assert_eq!(batch.sentinel(), Sentinel::Completed);
}

#[tokio::test]
async fn test_runner_enforces_step_limit() {
    let session = session(STEPS_FOREVER);
    let runner = TraceRunner::new(TraceLimits {
        steps: 5,
        timeout: Duration::from_secs(5),
    });

    let mut batches = 0;
    let err = within(runner.run_to_end(&session, |_, _| batches += 1))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StepLimit { steps: 5 }));
    assert_eq!(batches, 6);
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_runner_times_out_silent_tracer() {
    let session = session("read cmd; sleep 30");
    let runner = TraceRunner::new(TraceLimits {
        steps: 5,
        timeout: Duration::from_millis(200),
    });

    let err = within(runner.run_to_end(&session, |_, _| {}))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout { after_ms: 200 }));
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_configured_language_runs() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("stepwise.toml");
    std::fs::write(
        &path,
        r#"
[tracers.shell]
command = "read cmd; echo '[{\"kind\":\"completed\"}]'; read cmd"
"#,
    )
    .unwrap();

    let settings = load_settings_strict(&path).unwrap();
    assert_eq!(TracerRegistry::from_settings(&settings).languages(), vec!["shell"]);

    let session =
        open_session(&settings, &TraceTarget::Language("shell".to_string()), false).unwrap();
    let summary = within(TraceRunner::default().run_to_end(&session, |_, _| {}))
        .await
        .unwrap();

    assert_eq!(summary.batches, 1);
    assert_eq!(summary.sentinel, Sentinel::Completed);
}

#[tokio::test]
async fn test_stop_leaves_no_forked_processes() {
    let session = session(
        r#"read cmd; sleep 31337 & echo "[{\"kind\":\"step\",\"line\":$!}]"; wait; true"#,
    );

    let batch = within(session.start()).await.unwrap();
    let child = batch.last().line().unwrap() as i32;
    assert!(is_alive(child));

    within(session.stop()).await;

    let mut gone = false;
    for _ in 0..100 {
        if !is_alive(child) {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone, "tracer child {} survived stop()", child);
}
