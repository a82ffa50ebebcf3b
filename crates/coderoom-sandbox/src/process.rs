//! Running commands inside the sandbox directory.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::SandboxError;

const OUTPUT_BUFFER: usize = 1024;

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of process output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

/// A started process began listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReady {
    pub port: u16,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessState {
    Running,
    Exited(Option<i32>),
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\]):(\d{2,5})")
            .expect("static url pattern is valid")
    })
}

fn port_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(?:listening|running|started|server).*?\bport\s*:?\s*(\d{2,5})")
            .expect("static port pattern is valid")
    })
}

/// Recognize lines like `Server running at http://localhost:3000` or
/// `listening on port 8080`.
pub fn detect_server_ready(line: &str) -> Option<ServerReady> {
    if let Some(caps) = url_pattern().captures(line) {
        let port = caps[1].parse().ok()?;
        return Some(ServerReady {
            port,
            url: format!("http://localhost:{port}"),
        });
    }
    let caps = port_pattern().captures(line)?;
    let port = caps[1].parse().ok()?;
    Some(ServerReady {
        port,
        url: format!("http://localhost:{port}"),
    })
}

/// Cloneable handle that can stop a process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    kill: mpsc::Sender<()>,
}

impl ProcessHandle {
    /// Ask the process to stop. Does nothing if it already exited.
    pub fn kill(&self) {
        let _ = self.kill.try_send(());
    }
}

/// A spawned command.
///
/// The process is killed once this value and every [`ProcessHandle`] cloned
/// from it are dropped.
pub struct RunningProcess {
    program: String,
    pid: Option<u32>,
    output: mpsc::Receiver<OutputLine>,
    state: watch::Receiver<ProcessState>,
    handle: ProcessHandle,
}

impl std::fmt::Debug for RunningProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningProcess")
            .field("program", &self.program)
            .field("pid", &self.pid)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl RunningProcess {
    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Next line of merged stdout/stderr, or `None` once both pipes closed.
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        self.output.recv().await
    }

    /// Wait for the process to exit and return its exit code.
    /// `None` means it was killed or terminated by a signal.
    pub async fn wait(&mut self) -> Option<i32> {
        match self
            .state
            .wait_for(|s| *s != ProcessState::Running)
            .await
        {
            Ok(state) => match *state {
                ProcessState::Exited(code) => code,
                ProcessState::Running => None,
            },
            Err(_) => None,
        }
    }

    /// Drain all output, then wait for the exit code.
    pub async fn wait_with_output(mut self) -> (Vec<OutputLine>, Option<i32>) {
        let mut lines = Vec::new();
        while let Some(line) = self.output.recv().await {
            lines.push(line);
        }
        let code = self.wait().await;
        (lines, code)
    }

    pub fn is_running(&self) -> bool {
        *self.state.borrow() == ProcessState::Running
    }

    pub fn kill(&self) {
        self.handle.kill();
    }

    pub fn handle(&self) -> ProcessHandle {
        self.handle.clone()
    }
}

/// Spawns commands in a fixed working directory.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    cwd: PathBuf,
    ready: broadcast::Sender<ServerReady>,
}

impl ProcessRunner {
    pub fn new(cwd: impl Into<PathBuf>, ready: broadcast::Sender<ServerReady>) -> Self {
        ProcessRunner {
            cwd: cwd.into(),
            ready,
        }
    }

    /// Start `program` with `args`.
    pub fn spawn(&self, program: &str, args: &[String]) -> Result<RunningProcess, SandboxError> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let pid = child.id();
        info!(program, ?args, pid, cwd = %self.cwd.display(), "process started");

        let (out_tx, out_rx) = mpsc::channel(OUTPUT_BUFFER);
        let announced = Arc::new(AtomicBool::new(false));
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, OutputStream::Stdout, out_tx.clone(), self.ready.clone(), announced.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, OutputStream::Stderr, out_tx, self.ready.clone(), announced);
        }

        let (state_tx, state_rx) = watch::channel(ProcessState::Running);
        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
        let name = program.to_string();
        tokio::spawn(async move {
            let code = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => status.code(),
                    Err(e) => {
                        warn!(program = %name, error = %e, "failed to wait for process");
                        None
                    }
                },
                _ = kill_rx.recv() => {
                    if let Err(e) = child.kill().await {
                        warn!(program = %name, error = %e, "failed to kill process");
                    }
                    debug!(program = %name, "process killed");
                    None
                }
            };
            info!(program = %name, code, "process exited");
            let _ = state_tx.send(ProcessState::Exited(code));
        });

        Ok(RunningProcess {
            program: program.to_string(),
            pid,
            output: out_rx,
            state: state_rx,
            handle: ProcessHandle { kill: kill_tx },
        })
    }
}

fn forward_lines<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::Sender<OutputLine>,
    ready: broadcast::Sender<ServerReady>,
    announced: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if !announced.load(Ordering::Relaxed) {
                        if let Some(event) = detect_server_ready(&line) {
                            announced.store(true, Ordering::Relaxed);
                            info!(port = event.port, url = %event.url, "server ready");
                            let _ = ready.send(event);
                        }
                    }
                    // A closed receiver just means nobody is watching output.
                    let _ = tx.send(OutputLine { stream, line }).await;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "failed to read process output");
                    break;
                }
            }
        }
    });
}
