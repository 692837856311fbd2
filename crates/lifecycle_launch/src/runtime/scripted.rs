//! In-memory launcher with scripted behavior
//!
//! Starts no OS processes. Used by `--simulate` and by tests to drive the
//! orchestrator through start failures, failed or hanging transitions and
//! process exits.

use crate::lifecycle::{TransitionKind, TransitionReply};
use crate::runtime::process::{
    ProcessConfig, ProcessError, ProcessEvent, ProcessEventSender, ProcessHandle,
    ProcessLauncher, ProcessStatus,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug)]
struct ScriptedProcess {
    name: String,
    status: ProcessStatus,
}

/// Launcher whose processes exist only as table entries
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    refuse_start: HashMap<String, String>,
    replies: HashMap<(String, TransitionKind), TransitionReply>,
    processes: Vec<ScriptedProcess>,
    started: Vec<String>,
    stopped: Vec<String>,
    requests: Vec<(String, TransitionKind)>,
    event_tx: Option<ProcessEventSender>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make starting `name` fail
    pub fn fail_start(mut self, name: impl Into<String>, reason: impl Into<String>) -> Self {
        self.refuse_start.insert(name.into(), reason.into());
        self
    }

    /// Answer `transition` of `name` with `reply` (the default is `Succeeded`)
    pub fn reply(
        mut self,
        name: impl Into<String>,
        transition: TransitionKind,
        reply: TransitionReply,
    ) -> Self {
        self.replies.insert((name.into(), transition), reply);
        self
    }

    /// Mark a running process as exited; picked up by the next `poll_exit`
    pub fn exit(&mut self, name: &str, code: Option<i32>) {
        for process in self.processes.iter_mut().filter(|p| p.name == name) {
            process.status = ProcessStatus::Stopped(code);
        }
    }

    /// Deliver a late transition reply, as a stdio process would
    pub fn send_reply(&self, name: &str, transition: TransitionKind, outcome: Result<(), String>) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send((
                name.to_string(),
                ProcessEvent::TransitionReply {
                    transition,
                    outcome,
                },
            ));
        }
    }

    /// Names of started processes, in start order
    pub fn started(&self) -> &[String] {
        &self.started
    }

    /// Names of stopped processes, in stop order
    pub fn stopped(&self) -> &[String] {
        &self.stopped
    }

    /// Every transition the launcher was asked to perform
    pub fn requests(&self) -> &[(String, TransitionKind)] {
        &self.requests
    }

    /// Processes that are still running
    pub fn running(&self) -> HashSet<&str> {
        self.processes
            .iter()
            .filter(|p| p.status.is_running())
            .map(|p| p.name.as_str())
            .collect()
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    fn set_event_sender(&mut self, tx: ProcessEventSender) {
        self.event_tx = Some(tx);
    }

    fn start(&mut self, config: &ProcessConfig) -> Result<ProcessHandle, ProcessError> {
        if let Some(reason) = self.refuse_start.get(&config.name) {
            return Err(ProcessError::StartRefused {
                name: config.name.clone(),
                reason: reason.clone(),
            });
        }
        log::info!("[{}] Simulated start: {}", config.name, config.executable);

        let id = self.processes.len() as u64;
        self.processes.push(ScriptedProcess {
            name: config.name.clone(),
            status: ProcessStatus::Running,
        });
        self.started.push(config.name.clone());
        Ok(ProcessHandle {
            id,
            pid: None,
        })
    }

    fn request_transition(
        &mut self,
        handle: ProcessHandle,
        transition: TransitionKind,
    ) -> TransitionReply {
        let Some(process) = self.processes.get(handle.id as usize) else {
            return TransitionReply::Failed("process is not running".to_string());
        };
        if process.status.is_stopped() {
            return TransitionReply::Failed("process has exited".to_string());
        }
        self.requests.push((process.name.clone(), transition));
        self.replies
            .get(&(process.name.clone(), transition))
            .cloned()
            .unwrap_or(TransitionReply::Succeeded)
    }

    fn poll_exit(&mut self, handle: ProcessHandle) -> ProcessStatus {
        self.processes
            .get(handle.id as usize)
            .map(|p| p.status)
            .unwrap_or(ProcessStatus::Stopped(None))
    }

    async fn stop(
        &mut self,
        handle: ProcessHandle,
        _timeout: Duration,
    ) -> Result<Option<i32>, ProcessError> {
        let process = self
            .processes
            .get_mut(handle.id as usize)
            .ok_or_else(|| ProcessError::NotRunning(format!("#{}", handle.id)))?;
        if let ProcessStatus::Stopped(code) = process.status {
            return Ok(code);
        }
        process.status = ProcessStatus::Stopped(Some(0));
        self.stopped.push(process.name.clone());
        Ok(Some(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::process::ExecutableRef;

    fn config(name: &str) -> ProcessConfig {
        ProcessConfig::new(name, ExecutableRef::Path(format!("bin/{}", name)))
    }

    #[test]
    fn test_scripted_replies() {
        let mut launcher = ScriptedLauncher::new()
            .reply("driver", TransitionKind::Activate, TransitionReply::Pending);
        let handle = launcher.start(&config("driver")).unwrap();

        assert_eq!(
            launcher.request_transition(handle, TransitionKind::Configure),
            TransitionReply::Succeeded
        );
        assert_eq!(
            launcher.request_transition(handle, TransitionKind::Activate),
            TransitionReply::Pending
        );
        assert_eq!(launcher.requests().len(), 2);
    }

    #[test]
    fn test_refused_start() {
        let mut launcher = ScriptedLauncher::new().fail_start("driver", "no device");
        assert!(matches!(
            launcher.start(&config("driver")),
            Err(ProcessError::StartRefused { .. })
        ));
        assert!(launcher.started().is_empty());
    }

    #[tokio::test]
    async fn test_exit_and_stop() {
        let mut launcher = ScriptedLauncher::new();
        let a = launcher.start(&config("a")).unwrap();
        let b = launcher.start(&config("b")).unwrap();

        launcher.exit("a", Some(2));
        assert_eq!(launcher.poll_exit(a), ProcessStatus::Stopped(Some(2)));
        assert_eq!(launcher.poll_exit(b), ProcessStatus::Running);

        assert_eq!(launcher.stop(b, Duration::from_secs(1)).await.unwrap(), Some(0));
        // Already exited, nothing to stop
        assert_eq!(launcher.stop(a, Duration::from_secs(1)).await.unwrap(), Some(2));
        assert_eq!(launcher.stopped(), ["b".to_string()]);
        assert!(launcher.running().is_empty());
    }
}
