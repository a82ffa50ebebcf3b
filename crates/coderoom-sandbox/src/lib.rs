//! Local execution sandbox for coderoom projects.
//!
//! A [`Sandbox`] mirrors a project's file tree into a directory through the
//! [`SandboxFs`] trait and runs build/start commands there. [`follow`] keeps
//! a sandbox in sync with a live room.

mod error;
pub mod follow;
pub mod fs;
pub mod mount;
pub mod process;

use std::path::Path;
use std::sync::{Arc, Mutex};

use coderoom_config::{CommandConfig, SandboxConfig};
use coderoom_core::{CommandSpec, FlatTree, NestedTree};
use tokio::sync::broadcast;
use tracing::{info, warn};

pub use error::SandboxError;
pub use follow::{follow, run_queue, run_worker, FollowStats, Follower, RunRequest};
pub use fs::{LocalSandbox, MemorySandbox, SandboxFs};
pub use mount::{MountFailure, MountReport};
pub use process::{
    OutputLine, OutputStream, ProcessHandle, ProcessRunner, RunningProcess, ServerReady,
};

const READY_CHANNEL: usize = 16;

/// Convert an assistant command hint into a runnable command.
pub fn command_from_spec(spec: &CommandSpec) -> CommandConfig {
    CommandConfig {
        program: spec.main_item.clone(),
        args: spec.commands.clone(),
    }
}

/// A sandbox directory plus the process currently serving from it.
pub struct Sandbox {
    fs: Arc<dyn SandboxFs>,
    build: CommandConfig,
    start: CommandConfig,
    ready: broadcast::Sender<ServerReady>,
    current: Mutex<Option<ProcessHandle>>,
}

impl Sandbox {
    /// Wrap a filesystem with the default `npm install` / `npm start` commands.
    pub fn new(fs: Arc<dyn SandboxFs>) -> Self {
        let defaults = SandboxConfig::default();
        let (ready, _) = broadcast::channel(READY_CHANNEL);
        Sandbox {
            fs,
            build: defaults.build,
            start: defaults.start,
            ready,
            current: Mutex::new(None),
        }
    }

    /// Local sandbox as described by the `sandbox` config section.
    pub fn from_config(config: &SandboxConfig) -> Result<Self, SandboxError> {
        let fs = LocalSandbox::new(&config.root)?;
        info!(root = %config.root, "sandbox opened");
        Ok(Sandbox::new(Arc::new(fs)).with_commands(config.build.clone(), config.start.clone()))
    }

    pub fn with_commands(mut self, build: CommandConfig, start: CommandConfig) -> Self {
        self.build = build;
        self.start = start;
        self
    }

    pub fn fs(&self) -> &dyn SandboxFs {
        self.fs.as_ref()
    }

    pub fn root(&self) -> Option<&Path> {
        self.fs.root()
    }

    pub fn build_command(&self) -> &CommandConfig {
        &self.build
    }

    pub fn start_command(&self) -> &CommandConfig {
        &self.start
    }

    pub async fn mount(&self, tree: &NestedTree) -> MountReport {
        mount::mount(self.fs.as_ref(), tree).await
    }

    pub async fn apply_delta(&self, patch: &FlatTree) -> MountReport {
        mount::apply_delta(self.fs.as_ref(), patch).await
    }

    /// Notifications for started processes that begin listening.
    pub fn subscribe_ready(&self) -> broadcast::Receiver<ServerReady> {
        self.ready.subscribe()
    }

    /// Process runner working in the sandbox directory.
    pub fn runner(&self) -> Result<ProcessRunner, SandboxError> {
        let root = self
            .fs
            .root()
            .ok_or_else(|| SandboxError::Other("sandbox has no host directory".to_string()))?;
        Ok(ProcessRunner::new(root, self.ready.clone()))
    }

    /// Run `build` to completion, then replace the serving process with `start`.
    ///
    /// A failing build leaves the previous start process running.
    pub async fn run(
        &self,
        build: &CommandConfig,
        start: &CommandConfig,
    ) -> Result<RunningProcess, SandboxError> {
        let runner = self.runner()?;

        let mut build_process = runner.spawn(&build.program, &build.args)?;
        while let Some(line) = build_process.next_line().await {
            info!(program = %build.program, line = %line.line, "build");
        }
        let code = build_process.wait().await;
        if code != Some(0) {
            warn!(program = %build.program, ?code, "build failed");
            return Err(SandboxError::CommandFailed {
                program: build.program.clone(),
                code,
            });
        }

        self.stop();
        let process = runner.spawn(&start.program, &start.args)?;
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(process.handle());
        Ok(process)
    }

    /// [`Sandbox::run`] with the configured commands.
    pub async fn run_default(&self) -> Result<RunningProcess, SandboxError> {
        self.run(&self.build, &self.start).await
    }

    /// Kill the serving process, if any.
    pub fn stop(&self) {
        if let Some(previous) = self.current.lock().unwrap_or_else(|e| e.into_inner()).take() {
            info!("stopping previous process");
            previous.kill();
        }
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderoom_core::tree::codec::to_nested;

    fn sh(script: &str) -> CommandConfig {
        CommandConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        }
    }

    #[test]
    fn test_command_from_spec() {
        let spec = CommandSpec {
            main_item: "npm".to_string(),
            commands: vec!["run".to_string(), "dev".to_string()],
        };
        let command = command_from_spec(&spec);
        assert_eq!(command.program, "npm");
        assert_eq!(command.args, vec!["run", "dev"]);
    }

    #[test]
    fn test_default_commands() {
        let sandbox = Sandbox::new(Arc::new(MemorySandbox::new()));
        assert_eq!(sandbox.build_command().program, "npm");
        assert_eq!(sandbox.build_command().args, vec!["install"]);
        assert_eq!(sandbox.start_command().args, vec!["start"]);
    }

    #[tokio::test]
    async fn test_run_needs_host_directory() {
        let sandbox = Sandbox::new(Arc::new(MemorySandbox::new()));
        let err = sandbox.run_default().await.unwrap_err();
        assert!(matches!(err, SandboxError::Other(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_sees_mounted_files() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(Arc::new(LocalSandbox::new(dir.path()).unwrap()));

        let mut tree = FlatTree::new();
        tree.insert_file("app/main.txt", "hello");
        assert!(sandbox.mount(&to_nested(&tree)).await.is_clean());

        let process = sandbox
            .run(&sh("test -f app/main.txt"), &sh("cat app/main.txt"))
            .await
            .unwrap();
        let (lines, code) = process.wait_with_output().await;
        assert_eq!(code, Some(0));
        assert_eq!(lines[0].line, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_build_skips_start() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(Arc::new(LocalSandbox::new(dir.path()).unwrap()));

        let err = sandbox
            .run(&sh("exit 2"), &sh("touch started"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SandboxError::CommandFailed { code: Some(2), .. }
        ));
        assert!(!dir.path().join("started").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_replaces_previous_process() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(Arc::new(LocalSandbox::new(dir.path()).unwrap()));

        let mut first = sandbox.run(&sh("true"), &sh("sleep 30")).await.unwrap();
        let _second = sandbox.run(&sh("true"), &sh("sleep 30")).await.unwrap();

        assert_eq!(first.wait().await, None);
    }
}
