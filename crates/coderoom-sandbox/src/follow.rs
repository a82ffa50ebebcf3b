//! Mirror a live room into a sandbox.
//!
//! The follower joins a room over the session channel, mounts the tree it
//! receives on join and then applies every `file-tree-updated` patch as a
//! delta. Those patches are exactly what the server merged, so the sandbox
//! never holds files the project does not.
//!
//! Build/start runs requested by assistant replies go to a separate worker so
//! a slow `npm install` never stalls the socket reader.

use coderoom_config::CommandConfig;
use coderoom_core::tree::codec::to_nested;
use coderoom_core::wire::{Handshake, ServerEvent};
use coderoom_core::{interpret, PatchEnvelope};
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::error::SandboxError;
use crate::mount::MountReport;
use crate::{command_from_spec, RunningProcess, Sandbox};

/// Counters for a follow session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FollowStats {
    pub joined: bool,
    pub deltas: usize,
    pub files_written: usize,
    pub failures: usize,
    /// Run requests queued for the worker.
    pub run_requests: usize,
    /// Runs the worker actually started.
    pub runs: usize,
}

impl FollowStats {
    fn record(&mut self, report: &MountReport) {
        self.files_written += report.files_written;
        self.failures += report.failures.len();
    }
}

/// Build and start commands to run after an assistant change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub build: CommandConfig,
    pub start: CommandConfig,
}

/// Latest-wins queue between a [`Follower`] and [`run_worker`].
pub type RunSender = watch::Sender<Option<RunRequest>>;
pub type RunReceiver = watch::Receiver<Option<RunRequest>>;

pub fn run_queue() -> (RunSender, RunReceiver) {
    watch::channel(None)
}

/// Applies server events to a sandbox.
pub struct Follower<'a> {
    sandbox: &'a Sandbox,
    runs: Option<RunSender>,
    stats: FollowStats,
}

impl<'a> Follower<'a> {
    pub fn new(sandbox: &'a Sandbox) -> Self {
        Follower {
            sandbox,
            runs: None,
            stats: FollowStats::default(),
        }
    }

    /// Queue a rebuild on `runs` whenever the assistant sends a patch.
    pub fn request_runs(mut self, runs: RunSender) -> Self {
        self.runs = Some(runs);
        self
    }

    pub fn stats(&self) -> &FollowStats {
        &self.stats
    }

    pub fn into_stats(self) -> FollowStats {
        self.stats
    }

    /// Handle one event. Errors only for a rejected join or an event that
    /// arrives before the join completed. Never waits on a running command.
    pub async fn handle(&mut self, event: ServerEvent) -> Result<(), SandboxError> {
        match event {
            ServerEvent::JoinError { reason } => Err(SandboxError::JoinRejected(reason)),
            ServerEvent::Joined(joined) => {
                info!(
                    project_id = %joined.project_id,
                    connection_id = %joined.connection_id,
                    entries = joined.file_tree.len(),
                    "joined room"
                );
                let report = self.sandbox.mount(&to_nested(&joined.file_tree)).await;
                self.stats.joined = true;
                self.stats.record(&report);
                Ok(())
            }
            _ if !self.stats.joined => Err(SandboxError::Protocol(format!(
                "'{}' received before join",
                event.name()
            ))),
            ServerEvent::FileTreeUpdated(update) => {
                debug!(
                    project_id = %update.project_id,
                    origin = %update.origin.id,
                    entries = update.patch.len(),
                    "tree updated"
                );
                let report = self.sandbox.apply_delta(&update.patch).await;
                self.stats.deltas += 1;
                self.stats.record(&report);
                Ok(())
            }
            ServerEvent::ProjectMessage(message) if message.sender.is_ai() => {
                // The tree itself arrives as file-tree-updated; only the
                // command hints are taken from the reply.
                if let PatchEnvelope::Structured {
                    build_command,
                    start_command,
                    ..
                } = interpret(&message.body)
                {
                    self.queue_run(build_command.as_ref(), start_command.as_ref());
                }
                Ok(())
            }
            ServerEvent::ProjectMessage(_) | ServerEvent::Presence(_) => Ok(()),
            ServerEvent::Error { message } => {
                warn!(%message, "server reported an error");
                Ok(())
            }
        }
    }

    fn queue_run(
        &mut self,
        build: Option<&coderoom_core::CommandSpec>,
        start: Option<&coderoom_core::CommandSpec>,
    ) {
        let Some(runs) = &self.runs else {
            return;
        };
        let request = RunRequest {
            build: build
                .map(command_from_spec)
                .unwrap_or_else(|| self.sandbox.build_command().clone()),
            start: start
                .map(command_from_spec)
                .unwrap_or_else(|| self.sandbox.start_command().clone()),
        };
        debug!(build = %request.build.program, start = %request.start.program, "run requested");
        runs.send_replace(Some(request));
        self.stats.run_requests += 1;
    }
}

/// Run queued requests until every [`RunSender`] is dropped. Requests that
/// arrive while a build is in progress collapse into the latest one.
/// Returns how many runs were started.
pub async fn run_worker(sandbox: &Sandbox, mut requests: RunReceiver) -> usize {
    let mut runs = 0;
    while requests.changed().await.is_ok() {
        let Some(request) = requests.borrow_and_update().clone() else {
            continue;
        };
        match sandbox.run(&request.build, &request.start).await {
            Ok(process) => {
                runs += 1;
                tokio::spawn(log_output(process));
            }
            Err(e) => warn!(error = %e, "failed to run sandbox commands"),
        }
    }
    runs
}

async fn log_output(mut process: RunningProcess) {
    while let Some(line) = process.next_line().await {
        info!(program = %process.program(), line = %line.line, "output");
    }
}

async fn read_frames<S>(mut rx: S, mut follower: Follower<'_>) -> Result<FollowStats, SandboxError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = rx.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let event: ServerEvent = match serde_json::from_str(&text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable frame");
                continue;
            }
        };
        follower.handle(event).await?;
    }
    Ok(follower.into_stats())
}

/// Join the room at `url` and mirror it into `sandbox` until the server
/// closes the connection. With `run_commands`, assistant patches also
/// rebuild and restart the sandbox; the last run finishes before returning.
pub async fn follow(
    sandbox: &Sandbox,
    url: &str,
    handshake: &Handshake,
    run_commands: bool,
) -> Result<FollowStats, SandboxError> {
    let (socket, _) = tokio_tungstenite::connect_async(url).await?;
    let (mut tx, rx) = socket.split();
    info!(%url, "connected");

    let hello = serde_json::to_string(handshake)
        .map_err(|e| SandboxError::Protocol(e.to_string()))?;
    tx.send(Message::Text(hello)).await?;

    let (stats, runs) = if run_commands {
        let (runs_tx, runs_rx) = run_queue();
        let follower = Follower::new(sandbox).request_runs(runs_tx);
        tokio::join!(read_frames(rx, follower), run_worker(sandbox, runs_rx))
    } else {
        (read_frames(rx, Follower::new(sandbox)).await, 0)
    };

    let mut stats = stats?;
    stats.runs = runs;
    if !stats.joined {
        return Err(SandboxError::Protocol(
            "connection closed before join".to_string(),
        ));
    }
    info!(deltas = stats.deltas, files = stats.files_written, runs = stats.runs, "follow finished");
    Ok(stats)
}
