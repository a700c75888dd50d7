//! Server & client subprocess supervision.
//!
//! Follows `kimberlite-cluster::node::NodeProcess` for the subprocess
//! lifecycle: `tokio::process::Command` with file-redirected stdio,
//! non-blocking `Child::try_wait()` polling rather than a blocking
//! `Child::wait()`, so the orchestrator's step loop and a supervisor's
//! liveness check never contend for the same await point. Generalized to
//! the two state machines `spec.md` §4.3 asks for: servers (which can
//! crash and restart) and clients (one-shot).

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tracing::warn;

use crate::schedule::NodeId;

/// Lifecycle state of a supervised subprocess, per `spec.md` §4.3's state
/// diagram: `Init -> Running -[kill]-> Crashed -[restart]-> Running
/// -[close]-> Done`, with a parallel `Error` state reachable from `Running`
/// on an unclean exit or a stuck process hitting its wait deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Init,
    Running,
    Crashed,
    Error,
    Done,
}

/// One server subprocess under fuzzer control.
///
/// `restart` respawns with an extra `restart_flag` CLI argument so the
/// target resumes from its on-disk state rather than bootstrapping — see
/// `spec.md` §4.3 and §6.
pub struct ServerSupervisor {
    node: NodeId,
    target_path: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    child: Option<Child>,
    started_at: Option<Instant>,
    state: SupervisorState,
    error_flg: bool,
    returncode: Option<i32>,
}

impl ServerSupervisor {
    /// `args` are the positional CLI args shared by a fresh start and a
    /// restart: `run_id fuzzer_port listener_port peer_index
    /// peer_addresses group_id` — the trailing `restart_flag` is appended
    /// by [`Self::spawn`] itself.
    pub fn new(
        node: NodeId,
        target_path: PathBuf,
        args: Vec<String>,
        timeout: Duration,
        stdout_path: PathBuf,
        stderr_path: PathBuf,
    ) -> Self {
        Self {
            node,
            target_path,
            args,
            timeout,
            stdout_path,
            stderr_path,
            child: None,
            started_at: None,
            state: SupervisorState::Init,
            error_flg: false,
            returncode: None,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn has_errored(&self) -> bool {
        self.error_flg
    }

    pub fn returncode(&self) -> Option<i32> {
        self.returncode
    }

    fn spawn(&mut self, restart: bool) -> std::io::Result<()> {
        let stdout = std::fs::File::create(&self.stdout_path)?;
        let stderr = std::fs::File::create(&self.stderr_path)?;

        let mut args = self.args.clone();
        args.push(if restart { "1".to_string() } else { "0".to_string() });

        let child = Command::new(&self.target_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()?;

        self.child = Some(child);
        self.started_at = Some(Instant::now());
        self.state = SupervisorState::Running;
        Ok(())
    }

    pub async fn start(&mut self) -> std::io::Result<()> {
        self.spawn(false)
    }

    /// Non-blocking liveness check: classifies a just-observed exit, or
    /// kills and marks `Error` a server that has outlived `timeout + 10s`
    /// without exiting (the Rust realization of the original's blocking
    /// `asyncio.wait_for(process.wait(), timeout+10)` deadline, made
    /// non-blocking so the orchestrator's step loop can call this between
    /// every step instead of dedicating a thread to it).
    pub async fn poll(&mut self) {
        if self.state != SupervisorState::Running {
            return;
        }
        let Some(child) = self.child.as_mut() else { return };
        match child.try_wait() {
            Ok(Some(status)) => self.classify_exit(status),
            Ok(None) => {
                let deadline = self.timeout + Duration::from_secs(10);
                if self.started_at.map(|t| t.elapsed() > deadline).unwrap_or(false) {
                    warn!(node = self.node, "server exceeded {deadline:?} wait deadline");
                    let _ = child.kill().await;
                    self.returncode = Some(-1);
                    self.error_flg = true;
                    self.state = SupervisorState::Error;
                }
            }
            Err(e) => {
                warn!(node = self.node, "try_wait failed: {e}");
                self.error_flg = true;
                self.state = SupervisorState::Error;
            }
        }
    }

    fn classify_exit(&mut self, status: ExitStatus) {
        #[cfg(unix)]
        let killed = {
            use std::os::unix::process::ExitStatusExt;
            status.signal() == Some(9)
        };
        #[cfg(not(unix))]
        let killed = false;

        self.returncode = status.code();
        if status.success() || killed {
            self.state = SupervisorState::Done;
        } else {
            self.error_flg = true;
            self.state = SupervisorState::Error;
        }
    }

    /// SIGKILLs the subprocess and marks it restart-pending, per `spec.md`
    /// §4.3's `crash` transition. `returncode=-9` mirrors the original's
    /// `-9`-means-fuzzer-initiated-kill convention.
    pub async fn crash(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill().await;
        }
        if !self.error_flg {
            self.returncode = Some(-9);
        }
        self.state = SupervisorState::Crashed;
    }

    /// Respawns with `restart_flag=1`. A no-op if the supervisor isn't
    /// currently crashed.
    pub async fn restart(&mut self) -> std::io::Result<()> {
        if self.state != SupervisorState::Crashed {
            return Ok(());
        }
        self.spawn(true)
    }

    /// Idempotent teardown: kills the process if still alive and releases
    /// the handle.
    pub async fn close(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill().await;
        }
        self.child = None;
        if self.state != SupervisorState::Error {
            self.state = SupervisorState::Done;
        }
    }

    pub fn read_stdout(&self) -> String {
        std::fs::read_to_string(&self.stdout_path).unwrap_or_default()
    }

    pub fn read_stderr(&self) -> String {
        std::fs::read_to_string(&self.stderr_path).unwrap_or_default()
    }
}

/// One client subprocess: runs to completion once and never restarts, per
/// `spec.md` §4.3.
pub struct ClientSupervisor {
    request_id: usize,
    target_path: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    error_flg: bool,
    returncode: Option<i32>,
}

impl ClientSupervisor {
    pub fn new(
        request_id: usize,
        target_path: PathBuf,
        args: Vec<String>,
        timeout: Duration,
        stdout_path: PathBuf,
        stderr_path: PathBuf,
    ) -> Self {
        Self {
            request_id,
            target_path,
            args,
            timeout,
            stdout_path,
            stderr_path,
            error_flg: false,
            returncode: None,
        }
    }

    pub fn request_id(&self) -> usize {
        self.request_id
    }

    pub fn has_errored(&self) -> bool {
        self.error_flg
    }

    pub fn returncode(&self) -> Option<i32> {
        self.returncode
    }

    /// Spawns the client and awaits completion directly — clients are
    /// one-shot and short-lived, so (unlike the server) there's no value
    /// in a separate poll phase.
    pub async fn run(&mut self) -> std::io::Result<()> {
        let stdout = std::fs::File::create(&self.stdout_path)?;
        let stderr = std::fs::File::create(&self.stderr_path)?;

        let mut child = Command::new(&self.target_path)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()?;

        let deadline = self.timeout + Duration::from_secs(10);
        match tokio::time::timeout(deadline, child.wait()).await {
            Ok(Ok(status)) => {
                #[cfg(unix)]
                let killed = {
                    use std::os::unix::process::ExitStatusExt;
                    status.signal() == Some(9)
                };
                #[cfg(not(unix))]
                let killed = false;
                self.returncode = status.code();
                if !status.success() && !killed {
                    self.error_flg = true;
                }
            }
            Ok(Err(_)) => {
                self.returncode = Some(-1);
                self.error_flg = true;
            }
            Err(_) => {
                let _ = child.kill().await;
                self.returncode = Some(-1);
                self.error_flg = true;
            }
        }
        Ok(())
    }

    pub fn read_stdout(&self) -> String {
        std::fs::read_to_string(&self.stdout_path).unwrap_or_default()
    }

    pub fn read_stderr(&self) -> String {
        std::fs::read_to_string(&self.stderr_path).unwrap_or_default()
    }
}

pub fn log_paths(scratch_dir: &Path, node: NodeId) -> (PathBuf, PathBuf) {
    (
        scratch_dir.join(format!("stdout_{node}.log")),
        scratch_dir.join(format!("stderr_{node}.log")),
    )
}

pub fn client_log_paths(scratch_dir: &Path, request_id: usize) -> (PathBuf, PathBuf) {
    (
        scratch_dir.join(format!("client_stdout_{request_id}.log")),
        scratch_dir.join(format!("client_stderr_{request_id}.log")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_supervisor_reports_clean_exit() {
        let dir = tempfile::tempdir().unwrap();
        let (stdout, stderr) = log_paths(dir.path(), 1);
        let mut supervisor = ServerSupervisor::new(
            1,
            PathBuf::from("true"),
            vec![],
            Duration::from_secs(2),
            stdout,
            stderr,
        );
        supervisor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        supervisor.poll().await;
        assert_eq!(supervisor.state(), SupervisorState::Done);
        assert!(!supervisor.has_errored());
    }

    #[tokio::test]
    async fn server_supervisor_reports_nonzero_exit_as_error() {
        let dir = tempfile::tempdir().unwrap();
        let (stdout, stderr) = log_paths(dir.path(), 2);
        let mut supervisor = ServerSupervisor::new(
            2,
            PathBuf::from("false"),
            vec![],
            Duration::from_secs(2),
            stdout,
            stderr,
        );
        supervisor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        supervisor.poll().await;
        assert_eq!(supervisor.state(), SupervisorState::Error);
        assert!(supervisor.has_errored());
    }

    #[tokio::test]
    async fn crash_then_restart_round_trips_through_crashed() {
        let dir = tempfile::tempdir().unwrap();
        let (stdout, stderr) = log_paths(dir.path(), 3);
        let mut supervisor = ServerSupervisor::new(
            3,
            PathBuf::from("sleep"),
            vec!["5".to_string()],
            Duration::from_secs(10),
            stdout,
            stderr,
        );
        supervisor.start().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Running);
        supervisor.crash().await;
        assert_eq!(supervisor.state(), SupervisorState::Crashed);
        assert_eq!(supervisor.returncode(), Some(-9));
        supervisor.close().await;
    }

    #[tokio::test]
    async fn client_supervisor_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let (stdout, stderr) = client_log_paths(dir.path(), 1);
        let mut client = ClientSupervisor::new(
            1,
            PathBuf::from("true"),
            vec![],
            Duration::from_secs(2),
            stdout,
            stderr,
        );
        client.run().await.unwrap();
        assert!(!client.has_errored());
    }
}
