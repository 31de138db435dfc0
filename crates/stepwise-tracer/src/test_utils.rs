//! Test utilities for driving sessions without processes
//!
//! [`scripted_pair`] returns a [`ScriptedTransport`] for the session side and a
//! [`ScriptedTracer`] that plays the tracer: it receives command lines and
//! emits [`TracerEvent`]s. Works at the channel level, so no process, pipe or
//! shell is involved.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use stepwise_core::events::TracerEvent;
use stepwise_core::prelude::*;

use crate::transport::{Launcher, Transport};

/// Session side of a scripted connection.
pub struct ScriptedTransport {
    commands_tx: Option<mpsc::UnboundedSender<String>>,
    events_rx: mpsc::UnboundedReceiver<TracerEvent>,
    closed: Arc<AtomicBool>,
}

/// Tracer side of a scripted connection.
pub struct ScriptedTracer {
    commands_rx: mpsc::UnboundedReceiver<String>,
    events_tx: mpsc::UnboundedSender<TracerEvent>,
    closed: Arc<AtomicBool>,
}

/// One expected command and the events sent back for it.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub expect: String,
    pub reply: Vec<TracerEvent>,
}

impl Exchange {
    pub fn new(expect: &str, reply: Vec<TracerEvent>) -> Self {
        Self {
            expect: expect.to_string(),
            reply,
        }
    }

    /// Answer `expect` with a single stdout line
    pub fn stdout(expect: &str, line: &str) -> Self {
        Self::new(expect, vec![TracerEvent::stdout(line)])
    }

    /// Expect a command that gets no reply (`input`, `stop`)
    pub fn silent(expect: &str) -> Self {
        Self::new(expect, Vec::new())
    }
}

pub fn scripted_pair() -> (ScriptedTransport, ScriptedTracer) {
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));

    (
        ScriptedTransport {
            commands_tx: Some(commands_tx),
            events_rx,
            closed: Arc::clone(&closed),
        },
        ScriptedTracer {
            commands_rx,
            events_tx,
            closed,
        },
    )
}

impl Transport for ScriptedTransport {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        let tx = self
            .commands_tx
            .as_ref()
            .ok_or_else(|| Error::process_write("stdin already closed"))?;
        tx.send(line.to_string())
            .map_err(|_| Error::process_write("tracer went away"))
    }

    async fn next_event(&mut self) -> Option<TracerEvent> {
        self.events_rx.recv().await
    }

    fn try_next_event(&mut self) -> Option<TracerEvent> {
        self.events_rx.try_recv().ok()
    }

    async fn close(&mut self) {
        self.commands_tx.take();
        self.events_rx.close();
        self.closed.store(true, Ordering::Release);
    }
}

impl ScriptedTracer {
    /// Next command line written by the session, `None` once input is closed.
    pub async fn recv_command(&mut self) -> Option<String> {
        self.commands_rx.recv().await
    }

    /// Commands already written, without waiting.
    pub fn drain_commands(&mut self) -> Vec<String> {
        let mut commands = Vec::new();
        while let Ok(command) = self.commands_rx.try_recv() {
            commands.push(command);
        }
        commands
    }

    pub fn emit(&self, event: TracerEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn emit_stdout(&self, line: &str) {
        self.emit(TracerEvent::stdout(line));
    }

    pub fn emit_stderr(&self, line: &str) {
        self.emit(TracerEvent::stderr(line));
    }

    pub fn exit(&self, code: Option<i32>) {
        self.emit(TracerEvent::Exited { code });
    }

    /// Whether the session released the transport
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Play `script` in the background, panicking on an unexpected command.
    ///
    /// The task hands the tracer back once the script is exhausted, so tests
    /// can inspect what else was written.
    pub fn serve(mut self, script: Vec<Exchange>) -> JoinHandle<ScriptedTracer> {
        tokio::spawn(async move {
            for exchange in script {
                let command = self.recv_command().await;
                assert_eq!(command.as_deref(), Some(exchange.expect.as_str()));
                for event in exchange.reply {
                    self.emit(event);
                }
            }
            self
        })
    }
}

/// Launcher that hands out one prepared transport.
pub struct ScriptedLauncher {
    transport: Mutex<Option<ScriptedTransport>>,
    launches: AtomicUsize,
    fail_with: Option<String>,
}

impl ScriptedLauncher {
    pub fn new(transport: ScriptedTransport) -> Self {
        Self {
            transport: Mutex::new(Some(transport)),
            launches: AtomicUsize::new(0),
            fail_with: None,
        }
    }

    /// A launcher whose spawn always fails
    pub fn failing(reason: &str) -> Self {
        Self {
            transport: Mutex::new(None),
            launches: AtomicUsize::new(0),
            fail_with: Some(reason.to_string()),
        }
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl Launcher for ScriptedLauncher {
    type Transport = ScriptedTransport;

    fn launch(&self, _command: &str) -> Result<ScriptedTransport> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.fail_with {
            return Err(Error::ProcessSpawn {
                reason: reason.clone(),
            });
        }
        self.transport
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| Error::ProcessSpawn {
                reason: "scripted transport already launched".to_string(),
            })
    }
}
