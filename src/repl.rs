//! `stepwise repl` - drive a session one command at a time from stdin

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use stepwise_app::{HeadlessEvent, TraceRunner};
use stepwise_core::prelude::*;
use stepwise_core::{ResultBatch, SessionState};
use stepwise_tracer::{Launcher, TracerCommand, TracerSession};

/// Parse one line typed at the prompt.
///
/// `quit` and `exit` are accepted for `stop`. `input` keeps everything after
/// the first space verbatim.
pub fn parse_command(line: &str) -> Result<TracerCommand> {
    let line = line.trim_end_matches(['\r', '\n']);
    match line.trim() {
        "start" => return Ok(TracerCommand::Start),
        "step" => return Ok(TracerCommand::Step),
        "stop" | "quit" | "exit" => return Ok(TracerCommand::Stop),
        _ => {}
    }

    match line.trim_start().strip_prefix("input") {
        Some("") => TracerCommand::input(""),
        Some(rest) if rest.starts_with(' ') => TracerCommand::input(&rest[1..]),
        _ => Err(Error::invalid_input(format!(
            "unknown command '{}', expected start, step, input <value> or stop",
            line.trim()
        ))),
    }
}

/// Read commands from `reader` until `stop` or end of input.
///
/// Every outcome is reported as a headless event; faults do not end the loop,
/// so the user can see that later commands are rejected.
pub async fn run_repl<L, R>(
    session: &TracerSession<L>,
    runner: &TraceRunner,
    reader: R,
) -> Result<()>
where
    L: Launcher,
    R: AsyncBufRead + Unpin,
{
    HeadlessEvent::session_started(session.command(), None).emit();

    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                HeadlessEvent::fault(&e).emit();
                continue;
            }
        };

        debug!("repl: {}", command);
        let was_stopped = session.state().is_stopped();
        match execute(session, runner, &command).await {
            Ok(Some(batch)) => {
                HeadlessEvent::batch(command.name(), session.state(), &batch).emit();
                if let Some(event) = HeadlessEvent::exception(&batch) {
                    event.emit();
                }
            }
            Ok(None) => {}
            Err(e) => HeadlessEvent::fault(&e).emit(),
        }

        if !was_stopped && session.state().is_stopped() {
            HeadlessEvent::session_stopped().emit();
        }

        if command == TracerCommand::Stop {
            break;
        }
    }

    let was_stopped = session.state() == SessionState::Stopped;
    session.stop().await;
    if !was_stopped {
        HeadlessEvent::session_stopped().emit();
    }
    Ok(())
}

async fn execute<L: Launcher>(
    session: &TracerSession<L>,
    runner: &TraceRunner,
    command: &TracerCommand,
) -> Result<Option<ResultBatch>> {
    match command {
        TracerCommand::Start => runner.start(session).await.map(Some),
        TracerCommand::Step => runner.step(session).await.map(Some),
        TracerCommand::Input(value) => session.provide_input(value).await.map(|()| None),
        TracerCommand::Stop => {
            session.stop().await;
            Ok(None)
        }
    }
}
