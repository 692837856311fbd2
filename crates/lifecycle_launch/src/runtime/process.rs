//! Process launching: the launcher interface and its OS implementation

use crate::lifecycle::{TransitionKind, TransitionReply};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Environment variable carrying the qualified entity name
pub const NAME_ENV: &str = "LIFECYCLE_LAUNCH_NAME";
/// Environment variable carrying the entity namespace
pub const NAMESPACE_ENV: &str = "LIFECYCLE_LAUNCH_NAMESPACE";

/// Opaque reference to what gets executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutableRef {
    /// Direct executable path
    Path(String),
    /// Cargo binary, found under `target/release` of the project root
    Package { package: String, binary: String },
}

impl fmt::Display for ExecutableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutableRef::Path(path) => write!(f, "{}", path),
            ExecutableRef::Package { package, binary } => write!(f, "{}::{}", package, binary),
        }
    }
}

/// How a managed process answers transition requests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleProtocol {
    /// `lifecycle <transition>` on stdin, `lifecycle ok|failed <transition>` on stdout
    #[default]
    Stdio,
    /// A running process is assumed to accept every transition
    Implicit,
}

/// Process status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Process is running
    Running,
    /// Process has stopped with exit code
    Stopped(Option<i32>),
}

impl ProcessStatus {
    /// Check if process is running
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }

    /// Check if process has stopped
    pub fn is_stopped(&self) -> bool {
        matches!(self, ProcessStatus::Stopped(_))
    }
}

/// Configuration for spawning a process
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Qualified entity name (for logging)
    pub name: String,
    /// What to execute
    pub executable: ExecutableRef,
    /// Command line arguments
    pub args: Vec<String>,
    /// Environment variables
    pub env: IndexMap<String, String>,
    /// Working directory
    pub working_dir: Option<PathBuf>,
    pub namespace: Option<String>,
    /// Set for lifecycle-managed processes
    pub lifecycle: Option<LifecycleProtocol>,
}

impl ProcessConfig {
    pub fn new(name: impl Into<String>, executable: ExecutableRef) -> Self {
        Self {
            name: name.into(),
            executable,
            args: Vec::new(),
            env: IndexMap::new(),
            working_dir: None,
            namespace: None,
            lifecycle: None,
        }
    }
}

/// Identifies one started process within its launcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessHandle {
    pub id: u64,
    pub pid: Option<u32>,
}

/// Asynchronous report from a running process, keyed by entity name on the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Process output line (stdout or stderr)
    Output { line: String, is_stderr: bool },
    /// Answer to a transition that was left pending
    TransitionReply {
        transition: TransitionKind,
        outcome: Result<(), String>,
    },
}

/// Sender half of the process event channel
pub type ProcessEventSender = mpsc::UnboundedSender<(String, ProcessEvent)>;

/// Starts, drives and stops external processes
#[async_trait]
pub trait ProcessLauncher: Send {
    /// Where asynchronous process events go
    fn set_event_sender(&mut self, tx: ProcessEventSender);

    /// Start a process; does not wait for it to become ready
    fn start(&mut self, config: &ProcessConfig) -> Result<ProcessHandle, ProcessError>;

    /// Ask a managed process to perform a transition
    fn request_transition(
        &mut self,
        handle: ProcessHandle,
        transition: TransitionKind,
    ) -> TransitionReply;

    /// Current status; an exited process is reaped
    fn poll_exit(&mut self, handle: ProcessHandle) -> ProcessStatus;

    /// Stop the process gracefully, forcing it after `timeout`
    async fn stop(
        &mut self,
        handle: ProcessHandle,
        timeout: Duration,
    ) -> Result<Option<i32>, ProcessError>;
}

/// Parse a `lifecycle ok <transition>` / `lifecycle failed <transition> [reason]` line
pub fn parse_reply(line: &str) -> Option<(TransitionKind, Result<(), String>)> {
    let rest = line.trim().strip_prefix("lifecycle ")?;
    let mut parts = rest.splitn(3, ' ');
    let verdict = parts.next()?;
    let transition = TransitionKind::parse(parts.next()?.trim())?;
    match verdict {
        "ok" => Some((transition, Ok(()))),
        "failed" => {
            let reason = parts
                .next()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .unwrap_or("reported failure");
            Some((transition, Err(reason.to_string())))
        }
        _ => None,
    }
}

struct ChildProcess {
    name: String,
    child: Child,
    pid: Option<u32>,
    protocol: Option<LifecycleProtocol>,
    /// Lines written to the child's stdin by a writer task
    stdin_tx: Option<mpsc::UnboundedSender<String>>,
    status: ProcessStatus,
}

/// Launches real OS processes with tokio
pub struct OsProcessLauncher {
    /// Project root directory, used for package binaries
    project_root: PathBuf,
    processes: HashMap<u64, ChildProcess>,
    next_id: u64,
    event_tx: Option<ProcessEventSender>,
}

impl OsProcessLauncher {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            processes: HashMap::new(),
            next_id: 0,
            event_tx: None,
        }
    }

    fn resolve_executable(&self, executable: &ExecutableRef) -> PathBuf {
        match executable {
            ExecutableRef::Path(path) => PathBuf::from(path),
            ExecutableRef::Package { binary, .. } => {
                self.project_root.join("target/release").join(binary)
            }
        }
    }

    fn spawn_output_reader<R>(&self, name: String, stream: R, is_stderr: bool, parse_replies: bool)
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let reader = BufReader::new(stream);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let event = match parse_replies.then(|| parse_reply(&line)).flatten() {
                    Some((transition, outcome)) => ProcessEvent::TransitionReply {
                        transition,
                        outcome,
                    },
                    None => ProcessEvent::Output { line, is_stderr },
                };
                if let Some(tx) = &tx {
                    let _ = tx.send((name.clone(), event));
                }
            }
        });
    }

    fn refresh(process: &mut ChildProcess) -> ProcessStatus {
        if process.status.is_running() {
            match process.child.try_wait() {
                Ok(Some(status)) => {
                    process.status = ProcessStatus::Stopped(status.code());
                    process.pid = None;
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!("[{}] Error checking process status: {}", process.name, e);
                }
            }
        }
        process.status
    }
}

impl Default for OsProcessLauncher {
    fn default() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

#[async_trait]
impl ProcessLauncher for OsProcessLauncher {
    fn set_event_sender(&mut self, tx: ProcessEventSender) {
        self.event_tx = Some(tx);
    }

    fn start(&mut self, config: &ProcessConfig) -> Result<ProcessHandle, ProcessError> {
        let executable = self.resolve_executable(&config.executable);
        log::info!(
            "[{}] Starting: {} {}",
            config.name,
            executable.display(),
            config.args.join(" ")
        );

        let speaks_stdio = config.lifecycle == Some(LifecycleProtocol::Stdio);

        let mut cmd = Command::new(&executable);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(if speaks_stdio {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| ProcessError::SpawnFailed {
            name: config.name.clone(),
            source: e,
        })?;
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            self.spawn_output_reader(config.name.clone(), stdout, false, speaks_stdio);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_output_reader(config.name.clone(), stderr, true, false);
        }

        let stdin_tx = child.stdin.take().map(|mut stdin| {
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();
            let name = config.name.clone();
            tokio::spawn(async move {
                while let Some(line) = rx.recv().await {
                    let written = async {
                        stdin.write_all(line.as_bytes()).await?;
                        stdin.write_all(b"\n").await?;
                        stdin.flush().await
                    };
                    if let Err(e) = written.await {
                        log::warn!("[{}] Cannot write to stdin: {}", name, e);
                        break;
                    }
                }
            });
            tx
        });

        let id = self.next_id;
        self.next_id += 1;
        self.processes.insert(
            id,
            ChildProcess {
                name: config.name.clone(),
                child,
                pid,
                protocol: config.lifecycle,
                stdin_tx,
                status: ProcessStatus::Running,
            },
        );

        Ok(ProcessHandle { id, pid })
    }

    fn request_transition(
        &mut self,
        handle: ProcessHandle,
        transition: TransitionKind,
    ) -> TransitionReply {
        let Some(process) = self.processes.get_mut(&handle.id) else {
            return TransitionReply::Failed("process is not running".to_string());
        };
        if Self::refresh(process).is_stopped() {
            return TransitionReply::Failed("process has exited".to_string());
        }

        match (process.protocol, &process.stdin_tx) {
            (Some(LifecycleProtocol::Stdio), Some(tx)) => {
                match tx.send(format!("lifecycle {}", transition)) {
                    Ok(()) => TransitionReply::Pending,
                    Err(_) => TransitionReply::Failed("stdin is closed".to_string()),
                }
            }
            (Some(LifecycleProtocol::Stdio), None) => {
                TransitionReply::Failed("stdin is not connected".to_string())
            }
            _ => TransitionReply::Succeeded,
        }
    }

    fn poll_exit(&mut self, handle: ProcessHandle) -> ProcessStatus {
        let Some(process) = self.processes.get_mut(&handle.id) else {
            return ProcessStatus::Stopped(None);
        };
        let status = Self::refresh(process);
        if status.is_stopped() {
            // Reaped: the exit is reported once and the child is forgotten
            self.processes.remove(&handle.id);
        }
        status
    }

    async fn stop(
        &mut self,
        handle: ProcessHandle,
        timeout: Duration,
    ) -> Result<Option<i32>, ProcessError> {
        let Some(mut process) = self.processes.remove(&handle.id) else {
            return Err(ProcessError::NotRunning(format!("#{}", handle.id)));
        };
        if let ProcessStatus::Stopped(code) = Self::refresh(&mut process) {
            return Ok(code);
        }

        log::info!("[{}] Stopping process...", process.name);
        // Closing stdin lets well-behaved children notice the launcher is gone
        process.stdin_tx = None;

        // Try graceful shutdown first (SIGTERM on Unix)
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = process.pid {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            }
        }

        #[cfg(not(unix))]
        {
            // On non-Unix, just kill immediately
            let _ = process.child.start_kill();
        }

        match tokio::time::timeout(timeout, process.child.wait()).await {
            Ok(Ok(status)) => {
                log::info!("[{}] Process exited with code: {:?}", process.name, status.code());
                Ok(status.code())
            }
            Ok(Err(e)) => Err(ProcessError::Wait {
                name: process.name,
                source: e,
            }),
            Err(_) => {
                log::warn!(
                    "[{}] Process did not exit gracefully, forcing kill",
                    process.name
                );
                process.child.kill().await.map_err(|e| ProcessError::Wait {
                    name: process.name.clone(),
                    source: e,
                })?;
                Ok(None)
            }
        }
    }
}

/// Errors that can occur with launched processes
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn process '{name}': {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process '{name}' refused to start: {reason}")]
    StartRefused { name: String, reason: String },

    #[error("Error waiting for process '{name}': {source}")]
    Wait {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process '{0}' is not running")]
    NotRunning(String),
}
