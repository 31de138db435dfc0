//! Tracer process management

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

use stepwise_core::events::{StreamOrigin, TracerEvent};
use stepwise_core::prelude::*;

use crate::demux::LineDemultiplexer;
use crate::transport::{Launcher, Transport};

/// Default time a tracer gets to exit on its own after its stdin is closed.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

const EVENT_CHANNEL_CAPACITY: usize = 256;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Spawns tracer commands through the platform shell.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    shutdown_grace: Duration,
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self {
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl ProcessLauncher {
    pub fn new(shutdown_grace: Duration) -> Self {
        Self { shutdown_grace }
    }
}

impl Launcher for ProcessLauncher {
    type Transport = ProcessTransport;

    fn launch(&self, command: &str) -> Result<ProcessTransport> {
        ProcessTransport::spawn(command, self.shutdown_grace)
    }
}

/// A running tracer process.
///
/// The `Child` handle is moved into a dedicated `wait_for_exit` task, which
/// reports the exit code to the output pump. The pump reads stdout and stderr
/// in raw chunks, reassembles lines and emits [`TracerEvent::Exited`] only after
/// both streams hit EOF, so no line is ever delivered after the exit event.
pub struct ProcessTransport {
    /// Direct handle on the tracer's stdin; `None` once closed.
    stdin: Option<ChildStdin>,
    /// Lines and the final exit event, in delivery order.
    events_rx: mpsc::Receiver<TracerEvent>,
    /// Process ID for logging
    pid: Option<u32>,
    /// Tells the wait task to force-kill the process. Consumed on first use.
    kill_tx: Option<oneshot::Sender<()>>,
    /// Set by the wait task once the child has exited.
    exited: Arc<AtomicBool>,
    /// Notified by the wait task immediately after the child exits.
    exit_notify: Arc<Notify>,
    pump: JoinHandle<()>,
    shutdown_grace: Duration,
}

impl ProcessTransport {
    /// Spawn `command` through the shell with all three stdio streams piped.
    pub fn spawn(command: &str, shutdown_grace: Duration) -> Result<Self> {
        info!("Spawning tracer: {}", command);

        let mut child = shell_command(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ProcessSpawn {
                reason: e.to_string(),
            })?;

        let pid = child.id();
        info!("Tracer process started with PID: {:?}", pid);

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| Error::ProcessSpawn {
            reason: "stdout was not captured".to_string(),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| Error::ProcessSpawn {
            reason: "stderr was not captured".to_string(),
        })?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();
        let pump = tokio::spawn(pump_output(stdout, stderr, exit_rx, events_tx));

        let exited = Arc::new(AtomicBool::new(false));
        let exit_notify = Arc::new(Notify::new());
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(wait_for_exit(
            child,
            kill_rx,
            exit_tx,
            Arc::clone(&exited),
            Arc::clone(&exit_notify),
        ));

        Ok(Self {
            stdin,
            events_rx,
            pid,
            kill_tx: Some(kill_tx),
            exited,
            exit_notify,
            pump,
            shutdown_grace,
        })
    }

    /// Get the process ID
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking check backed by the wait task's flag
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    fn force_kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            warn!("Force killing tracer process {:?}", self.pid);
            kill_process_group(self.pid);
            // The wait task may have already finished naturally.
            let _ = tx.send(());
        }
    }
}

impl Transport for ProcessTransport {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::process_write("stdin already closed"))?;

        debug!("Sending to tracer: {}", line);
        let mut framed = String::with_capacity(line.len() + 1);
        framed.push_str(line);
        framed.push('\n');

        stdin
            .write_all(framed.as_bytes())
            .await
            .map_err(|e| Error::process_write(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::process_write(e.to_string()))
    }

    async fn next_event(&mut self) -> Option<TracerEvent> {
        self.events_rx.recv().await
    }

    fn try_next_event(&mut self) -> Option<TracerEvent> {
        self.events_rx.try_recv().ok()
    }

    /// Close stdin, give the tracer `shutdown_grace` to exit, then kill it.
    async fn close(&mut self) {
        if self.stdin.take().is_some() {
            debug!("Closed tracer stdin");
        }

        // Register for the notification before checking the flag so an exit
        // between the check and the await is not missed.
        let exit_notify = Arc::clone(&self.exit_notify);
        let notified = exit_notify.notified();
        if !self.has_exited() {
            match tokio::time::timeout(self.shutdown_grace, notified).await {
                Ok(()) => {
                    info!("Tracer process exited gracefully");
                    // Background jobs the shell left behind share its group.
                    kill_process_group(self.pid);
                }
                Err(_) => {
                    warn!(
                        "Tracer did not exit within {:?}, killing",
                        self.shutdown_grace
                    );
                    self.force_kill();
                }
            }
        }

        self.pump.abort();
        self.events_rx.close();
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        if !self.has_exited() {
            warn!("ProcessTransport dropped while tracer may still be running");
            self.force_kill();
        } else if self.kill_tx.is_some() {
            kill_process_group(self.pid);
        }
        self.pump.abort();
        // kill_on_drop(true) on the Child is the final safety net.
        debug!("ProcessTransport dropped");
    }
}

/// The shell leads a new process group, so everything it forks can be
/// signalled together.
#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).process_group(0);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// SIGKILL every process in the tracer's group. The group id is the shell's
/// PID; an already empty group is not an error.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => debug!("Killed tracer process group {}", pid),
        Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill tracer process group {}: {}", pid, e),
    }
}

#[cfg(windows)]
fn kill_process_group(_pid: Option<u32>) {}

/// Background task: owns `child`, waits for it to exit, reports the code.
///
/// Ends either when the tracer exits on its own or when `kill_rx` fires, in
/// which case the child is killed and then reaped.
async fn wait_for_exit(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: oneshot::Sender<Option<i32>>,
    exited: Arc<AtomicBool>,
    exit_notify: Arc<Notify>,
) {
    let code: Option<i32> = tokio::select! {
        result = child.wait() => {
            match result {
                Ok(status) => {
                    info!("Tracer process exited with status: {:?}", status);
                    status.code()
                }
                Err(e) => {
                    error!("Error waiting for tracer process: {}", e);
                    None
                }
            }
        }
        _ = kill_rx => {
            if let Err(e) = child.kill().await {
                error!("Failed to kill tracer process: {}", e);
            }
            match child.wait().await {
                Ok(status) => {
                    info!("Tracer process killed, exit status: {:?}", status);
                    status.code()
                }
                Err(e) => {
                    error!("Error waiting after kill: {}", e);
                    None
                }
            }
        }
    };

    // Flag first so `has_exited()` is true before anyone observes the event.
    exited.store(true, Ordering::Release);
    exit_notify.notify_waiters();
    let _ = exit_tx.send(code);
}

/// Read both output streams, reassemble lines and forward them in order.
///
/// After both streams reach EOF, waits for the exit code and sends a single
/// [`TracerEvent::Exited`].
pub(crate) async fn pump_output<O, E>(
    mut stdout: O,
    mut stderr: E,
    exit_rx: oneshot::Receiver<Option<i32>>,
    tx: mpsc::Sender<TracerEvent>,
) where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut demux = LineDemultiplexer::new();
    let mut out_buf = vec![0u8; READ_CHUNK_SIZE];
    let mut err_buf = vec![0u8; READ_CHUNK_SIZE];
    let mut out_open = true;
    let mut err_open = true;

    while out_open || err_open {
        let (origin, read) = tokio::select! {
            read = stdout.read(&mut out_buf), if out_open => (StreamOrigin::Stdout, read),
            read = stderr.read(&mut err_buf), if err_open => (StreamOrigin::Stderr, read),
        };

        let read = read.unwrap_or_else(|e| {
            warn!("Error reading tracer {}: {}", origin, e);
            0
        });

        let lines = match read {
            0 => {
                match origin {
                    StreamOrigin::Stdout => out_open = false,
                    StreamOrigin::Stderr => err_open = false,
                }
                let tail = demux.finish(origin);
                if let Some(line) = &tail {
                    warn!(
                        "Tracer {} ended without a final newline, delivering partial line: {}",
                        origin, line.text
                    );
                }
                tail.into_iter().collect()
            }
            n => {
                let chunk = match origin {
                    StreamOrigin::Stdout => &out_buf[..n],
                    StreamOrigin::Stderr => &err_buf[..n],
                };
                demux.push(origin, chunk)
            }
        };

        for line in lines {
            trace!("{}: {}", line.origin, line.text);
            if tx.send(TracerEvent::Line(line)).await.is_err() {
                debug!("Tracer event channel closed");
                return;
            }
        }
    }

    debug!("Tracer output streams closed");
    let code = exit_rx.await.unwrap_or(None);
    let _ = tx.send(TracerEvent::Exited { code }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::events::Line;
    use tokio_test::io::Builder;

    async fn collect(mut rx: mpsc::Receiver<TracerEvent>) -> Vec<TracerEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_secs(5), rx.recv()).await
        {
            let done = matches!(event, TracerEvent::Exited { .. });
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn test_pump_reassembles_chunked_stdout() {
        let stdout = Builder::new()
            .read(b"[{\"kind\":\"st")
            .read(b"ep\",\"line\":1}]\n[{\"kind\"")
            .read(b":\"completed\"}]\n")
            .build();
        let stderr = Builder::new().build();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(16);
        exit_tx.send(Some(0)).unwrap();

        pump_output(stdout, stderr, exit_rx, tx).await;

        assert_eq!(
            collect(rx).await,
            vec![
                TracerEvent::stdout(r#"[{"kind":"step","line":1}]"#),
                TracerEvent::stdout(r#"[{"kind":"completed"}]"#),
                TracerEvent::Exited { code: Some(0) },
            ]
        );
    }

    #[tokio::test]
    async fn test_pump_tags_stderr_lines() {
        let stdout = Builder::new().build();
        let stderr = Builder::new().read(b"Traceback\n  boom\n").build();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(16);
        exit_tx.send(Some(1)).unwrap();

        pump_output(stdout, stderr, exit_rx, tx).await;

        assert_eq!(
            collect(rx).await,
            vec![
                TracerEvent::stderr("Traceback"),
                TracerEvent::stderr("  boom"),
                TracerEvent::Exited { code: Some(1) },
            ]
        );
    }

    #[tokio::test]
    async fn test_pump_flushes_unterminated_tail() {
        let stdout = Builder::new().read(b"[{\"kind\":\"completed\"}]").build();
        let stderr = Builder::new().build();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (tx, rx) = mpsc::channel(16);
        exit_tx.send(None).unwrap();

        pump_output(stdout, stderr, exit_rx, tx).await;

        let events = collect(rx).await;
        assert_eq!(
            events[0],
            TracerEvent::Line(Line {
                origin: StreamOrigin::Stdout,
                text: r#"[{"kind":"completed"}]"#.to_string(),
                terminated: false,
            })
        );
        assert_eq!(events[1], TracerEvent::Exited { code: None });
    }

    #[cfg(unix)]
    async fn next_line(transport: &mut ProcessTransport) -> Option<TracerEvent> {
        tokio::time::timeout(Duration::from_secs(5), transport.next_event())
            .await
            .ok()
            .flatten()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawned_process_round_trip() {
        let mut transport = ProcessTransport::spawn(
            r#"read cmd; echo "[{\"kind\":\"step\",\"echo\":\"$cmd\"}]""#,
            DEFAULT_SHUTDOWN_GRACE,
        )
        .expect("sh must be available");
        assert!(transport.id().is_some());

        transport.write_line("start").await.unwrap();
        assert_eq!(
            next_line(&mut transport).await,
            Some(TracerEvent::stdout(r#"[{"kind":"step","echo":"start"}]"#))
        );
        assert_eq!(
            next_line(&mut transport).await,
            Some(TracerEvent::Exited { code: Some(0) })
        );
        assert!(transport.has_exited());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_captured() {
        let mut transport =
            ProcessTransport::spawn("exit 42", DEFAULT_SHUTDOWN_GRACE).expect("spawn");
        assert_eq!(
            next_line(&mut transport).await,
            Some(TracerEvent::Exited { code: Some(42) })
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_kills_process_ignoring_stdin() {
        let mut transport =
            ProcessTransport::spawn("sleep 60", Duration::from_millis(100)).expect("spawn");
        assert!(!transport.has_exited());

        let started = std::time::Instant::now();
        transport.close().await;
        assert!(started.elapsed() < Duration::from_secs(5));

        for _ in 0..50 {
            if transport.has_exited() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(transport.has_exited());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_lets_process_exit_on_eof() {
        let mut transport =
            ProcessTransport::spawn("cat > /dev/null", Duration::from_secs(5)).expect("spawn");
        transport.close().await;
        assert!(transport.has_exited());
    }

    /// Zombies count as gone: they only wait for init to reap them.
    #[cfg(unix)]
    fn is_alive(pid: i32) -> bool {
        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            return !stat
                .rsplit(") ")
                .next()
                .is_some_and(|rest| rest.starts_with('Z'));
        }
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
    }

    #[cfg(unix)]
    async fn wait_until_gone(pid: i32) -> bool {
        for _ in 0..100 {
            if !is_alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    /// Starts a `sleep` in the background and reports its PID as `line`.
    #[cfg(unix)]
    const FORKING_TRACER: &str =
        r#"read cmd; sleep 31337 & echo "[{\"kind\":\"step\",\"line\":$!}]"; wait"#;

    #[cfg(unix)]
    async fn spawn_forking_tracer() -> (ProcessTransport, i32) {
        let mut transport =
            ProcessTransport::spawn(FORKING_TRACER, Duration::from_millis(100)).expect("spawn");
        transport.write_line("start").await.unwrap();

        let Some(TracerEvent::Line(line)) = next_line(&mut transport).await else {
            panic!("tracer did not report its child");
        };
        let batch = crate::protocol::parse_batch(&line.text).unwrap();
        let child = batch.last().line().unwrap() as i32;
        assert!(is_alive(child));
        (transport, child)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_kills_forked_children() {
        let (mut transport, child) = spawn_forking_tracer().await;

        transport.close().await;

        assert!(wait_until_gone(child).await, "child {} outlived close()", child);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drop_kills_forked_children() {
        let (transport, child) = spawn_forking_tracer().await;

        drop(transport);

        assert!(wait_until_gone(child).await, "child {} outlived drop", child);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_after_close_fails() {
        let mut transport =
            ProcessTransport::spawn("cat > /dev/null", Duration::from_secs(5)).expect("spawn");
        transport.close().await;
        let err = transport.write_line("step").await.unwrap_err();
        assert!(err.is_process_fault());
    }
}
