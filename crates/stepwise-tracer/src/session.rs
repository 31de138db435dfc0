//! Tracer session: command lifecycle over one tracer process
//!
//! A [`TracerSession`] owns at most one transport and moves through
//! `Created → Started → Stopped`. The line protocol has no request IDs, so
//! commands are strictly serialized: the transport lives inside an async
//! mutex whose FIFO lock is the command queue. A command issued while another
//! is pending waits its turn.
//!
//! Every command checks the state twice: when called (`InvalidState` if the
//! command is not allowed) and again when it reaches the head of the queue
//! (`SessionStopped` if the session was stopped in the meantime).
//!
//! State is published through a `watch` channel so that `stop()` can wake a
//! command blocked on the tracer; that command resolves with
//! [`Error::SessionStopped`].

use std::collections::VecDeque;

use tokio::sync::{watch, Mutex};

use stepwise_core::events::{Line, StreamOrigin, TracerEvent};
use stepwise_core::prelude::*;
use stepwise_core::{ResultBatch, SessionState};

use crate::process::ProcessLauncher;
use crate::protocol::{BatchParser, LinePolicy, TracerCommand};
use crate::transport::{Launcher, Transport};

/// A live transport plus stdout lines picked up between commands.
struct Pipeline<T> {
    transport: T,
    backlog: VecDeque<Line>,
}

impl<T: Transport> Pipeline<T> {
    fn new(transport: T) -> Self {
        Self {
            transport,
            backlog: VecDeque::new(),
        }
    }

    /// Look at events delivered while no command was pending.
    ///
    /// Stderr output and process exit fail the upcoming command; stdout lines
    /// are kept for it in order.
    fn drain_pending(&mut self) -> Result<()> {
        while let Some(event) = self.transport.try_next_event() {
            match event {
                TracerEvent::Line(line) if line.origin == StreamOrigin::Stderr => {
                    return Err(Error::stderr(line.text.trim_end()));
                }
                TracerEvent::Line(line) => self.backlog.push_back(line),
                TracerEvent::Exited { code } => return Err(Error::ProcessExit { code }),
            }
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TracerEvent> {
        match self.backlog.pop_front() {
            Some(line) => Some(TracerEvent::Line(line)),
            None => self.transport.next_event().await,
        }
    }
}

/// One tracer process, driven command by command.
pub struct TracerSession<L: Launcher = ProcessLauncher> {
    command: String,
    launcher: L,
    parser: BatchParser,
    state_tx: watch::Sender<SessionState>,
    exchange: Mutex<Option<Pipeline<L::Transport>>>,
}

impl TracerSession {
    /// Session that spawns `command` through the shell on `start()`.
    pub fn new(command: impl Into<String>) -> Self {
        Self::with_launcher(command, ProcessLauncher::default())
    }
}

impl<L: Launcher> TracerSession<L> {
    pub fn with_launcher(command: impl Into<String>, launcher: L) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Created);
        Self {
            command: command.into(),
            launcher,
            parser: BatchParser::default(),
            state_tx,
            exchange: Mutex::new(None),
        }
    }

    /// Set how non-batch stdout lines are treated (strict by default).
    pub fn with_policy(mut self, policy: LinePolicy) -> Self {
        self.parser = BatchParser::new(policy);
        self
    }

    /// The shell command this session spawns
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn policy(&self) -> LinePolicy {
        self.parser.policy()
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Observe state transitions, including auto-stops.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Spawn the tracer, send `start` and return its first batch.
    ///
    /// Valid only in `Created`. Ends in `Started`, or in `Stopped` when the
    /// batch ends with a `completed` or `exception` result. Faults also end
    /// in `Stopped`.
    pub async fn start(&self) -> Result<ResultBatch> {
        self.require_state(SessionState::Created)?;
        let mut slot = self.exchange.lock().await;
        self.require_queued_state(SessionState::Created)?;

        match self.launcher.launch(&self.command) {
            Ok(transport) => *slot = Some(Pipeline::new(transport)),
            Err(e) => {
                warn!("Failed to launch tracer '{}': {}", self.command, e);
                self.shutdown(&mut slot).await;
                return Err(e);
            }
        }

        self.run_command(&mut slot, TracerCommand::Start).await
    }

    /// Send `step` and return the resulting batch. Valid only in `Started`.
    pub async fn step(&self) -> Result<ResultBatch> {
        self.require_state(SessionState::Started)?;
        let mut slot = self.exchange.lock().await;
        self.require_queued_state(SessionState::Started)?;

        self.run_command(&mut slot, TracerCommand::Step).await
    }

    /// Send `input <value>` without waiting for a reply. Valid only in `Started`.
    ///
    /// `value` must not contain line breaks; such values are rejected with
    /// `InvalidInput` and nothing is written.
    pub async fn provide_input(&self, value: &str) -> Result<()> {
        self.require_state(SessionState::Started)?;
        let command = TracerCommand::input(value)?;
        let mut slot = self.exchange.lock().await;
        self.require_queued_state(SessionState::Started)?;

        let Some(pipeline) = slot.as_mut() else {
            return Err(Error::SessionStopped);
        };

        let written = match pipeline.drain_pending() {
            Ok(()) => pipeline.transport.write_line(&command.to_line()).await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            warn!("Tracer fault during input: {}", e);
            self.shutdown(&mut slot).await;
            return Err(e);
        }
        Ok(())
    }

    /// Stop the session and release the tracer. Idempotent.
    ///
    /// Wakes a pending command first (it fails with `SessionStopped`), then
    /// writes `stop` on a best-effort basis, closes stdin and reaps the
    /// process. Safe to call from any state.
    pub async fn stop(&self) {
        let previous = self.state_tx.send_replace(SessionState::Stopped);
        if !previous.is_stopped() {
            info!("Stopping tracer session ({} -> stopped)", previous);
        }

        let mut slot = self.exchange.lock().await;
        self.shutdown(&mut slot).await;
    }

    fn require_state(&self, expected: SessionState) -> Result<()> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(Error::invalid_state(state, expected.as_str()))
        }
    }

    /// State check for a command that waited in the queue.
    fn require_queued_state(&self, expected: SessionState) -> Result<()> {
        match self.state() {
            state if state == expected => Ok(()),
            SessionState::Stopped => Err(Error::SessionStopped),
            state => Err(Error::invalid_state(state, expected.as_str())),
        }
    }

    /// Write one command, await its batch and apply the sentinel rule.
    async fn run_command(
        &self,
        slot: &mut Option<Pipeline<L::Transport>>,
        command: TracerCommand,
    ) -> Result<ResultBatch> {
        let Some(pipeline) = slot.as_mut() else {
            return Err(Error::SessionStopped);
        };

        let abandoned = AbandonGuard::new(&self.state_tx, command.name());
        let outcome = self.exchange_batch(pipeline, &command).await;
        abandoned.disarm();

        match outcome {
            Ok(batch) => {
                debug!(
                    "Tracer answered {} with {} result(s), last: {}",
                    command.name(),
                    batch.len(),
                    batch.last().kind
                );
                if command == TracerCommand::Start {
                    self.transition(SessionState::Started);
                }
                let sentinel = batch.sentinel();
                if sentinel.is_terminal() {
                    info!(
                        "Tracer finished after {} ({:?}), stopping session",
                        command.name(),
                        sentinel
                    );
                    self.shutdown(slot).await;
                }
                Ok(batch)
            }
            // stop() is waiting for the lock and owns the teardown.
            Err(Error::SessionStopped) => Err(Error::SessionStopped),
            Err(e) => {
                warn!("Tracer fault during {}: {}", command.name(), e);
                self.shutdown(slot).await;
                Err(e)
            }
        }
    }

    async fn exchange_batch(
        &self,
        pipeline: &mut Pipeline<L::Transport>,
        command: &TracerCommand,
    ) -> Result<ResultBatch> {
        pipeline.drain_pending()?;
        pipeline.transport.write_line(&command.to_line()).await?;

        loop {
            let event = tokio::select! {
                biased;
                _ = until_stopped(self.state_tx.subscribe()) => return Err(Error::SessionStopped),
                event = pipeline.next_event() => event,
            };

            match event {
                Some(TracerEvent::Line(line)) => {
                    if let Some(batch) = self.parser.accept(&line)? {
                        return Ok(batch);
                    }
                }
                Some(TracerEvent::Exited { code }) => return Err(Error::ProcessExit { code }),
                None => return Err(Error::ProcessExit { code: None }),
            }
        }
    }

    /// Move forward to `to`. `Stopped` is terminal and never left.
    fn transition(&self, to: SessionState) {
        self.state_tx.send_if_modified(|state| {
            if state.is_stopped() || *state == to {
                return false;
            }
            debug!("Tracer session {} -> {}", state, to);
            *state = to;
            true
        });
    }

    /// Enter `Stopped` and release the pipeline, if any.
    async fn shutdown(&self, slot: &mut Option<Pipeline<L::Transport>>) {
        self.transition(SessionState::Stopped);

        if let Some(mut pipeline) = slot.take() {
            if let Err(e) = pipeline.transport.write_line(&TracerCommand::Stop.to_line()).await {
                debug!("Ignoring failed stop write: {}", e);
            }
            pipeline.transport.close().await;
            if !pipeline.backlog.is_empty() {
                debug!(
                    "Discarded {} unread tracer line(s) on shutdown",
                    pipeline.backlog.len()
                );
            }
        }
    }
}

/// Marks the session `Stopped` if a command future is dropped mid-exchange.
///
/// The tracer's reply to an abandoned command would otherwise be taken as the
/// reply to the next one. The transport itself is released by `stop()` or
/// when the session is dropped.
struct AbandonGuard<'a> {
    state_tx: &'a watch::Sender<SessionState>,
    command: &'static str,
    armed: bool,
}

impl<'a> AbandonGuard<'a> {
    fn new(state_tx: &'a watch::Sender<SessionState>, command: &'static str) -> Self {
        Self {
            state_tx,
            command,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(
                "Pending {} abandoned before the tracer answered, session stopped",
                self.command
            );
            self.state_tx.send_replace(SessionState::Stopped);
        }
    }
}

async fn until_stopped(mut state_rx: watch::Receiver<SessionState>) {
    let _ = state_rx.wait_for(|state| state.is_stopped()).await;
}
