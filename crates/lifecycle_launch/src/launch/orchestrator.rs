//! Launch orchestrator - executes a plan and drives its processes
//!
//! All orchestrator state lives in [`LaunchState`], which is only touched
//! from inside bus dispatch. Process output, transition replies, exits,
//! deadlines and OS signals reach it as events from [`Orchestrator::run`].

use crate::events::{DispatchError, EventBus, EventSink, LaunchEvent, RegistryError, StartupStep};
use crate::launch::composition::CompositionError;
use crate::launch::plan::LaunchPlan;
use crate::lifecycle::{LifecycleController, LifecycleState, TransitionKind, TransitionReply};
use crate::runtime::{ProcessEvent, ProcessHandle, ProcessLauncher, ProcessStatus, ShutdownSignal};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline of a transition awaiting a reply
    pub transition_timeout: Duration,
    /// Default shutdown timeout per process
    pub shutdown_timeout: Duration,
    /// Bound on re-entrant publishes
    pub max_dispatch_depth: usize,
    /// How often exits and deadlines are checked
    pub poll_interval: Duration,
    /// Number of journal entries kept by the bus
    pub journal_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            transition_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            max_dispatch_depth: crate::events::DEFAULT_MAX_DEPTH,
            poll_interval: Duration::from_millis(200),
            journal_capacity: crate::events::DEFAULT_JOURNAL_CAPACITY,
        }
    }
}

#[derive(Debug)]
struct ProcessEntry {
    managed: bool,
    transition_timeout: Duration,
    /// Missing when the process failed to start
    handle: Option<ProcessHandle>,
    start_error: Option<String>,
    controller: Option<LifecycleController>,
    /// Last lifecycle state, kept once the controller is gone
    final_state: Option<LifecycleState>,
    exited: bool,
}

/// Process table and lifecycle controllers; the bus's built-in consumer
struct LaunchState<L> {
    config: OrchestratorConfig,
    launcher: L,
    plan: LaunchPlan,
    /// Started processes, in start order
    processes: IndexMap<String, ProcessEntry>,
    /// Scopes whose rules are evaluated
    active_scopes: HashSet<String>,
    shutdown_reason: Option<String>,
}

impl<L: ProcessLauncher> LaunchState<L> {
    /// Mark a scope (and its non-deferred descendants) active; returns its startup steps
    fn activate(&mut self, name: &str) -> Result<Vec<StartupStep>, DispatchError> {
        let scope = self
            .plan
            .scope(name)
            .ok_or_else(|| DispatchError::UnknownSubPlan(name.to_string()))?;
        self.active_scopes.extend(scope.scope_names());
        Ok(scope.startup_steps())
    }

    fn transition(&mut self, entity: &str, transition: TransitionKind) -> Vec<LaunchEvent> {
        let Some(entry) = self.processes.get_mut(entity) else {
            log::warn!("Ignoring {} for '{}': not running", transition, entity);
            return Vec::new();
        };
        let handle = entry.handle;
        let start_error = entry.start_error.clone();
        let Some(controller) = entry.controller.as_mut() else {
            if entry.managed {
                log::warn!("Ignoring {} for '{}': process has exited", transition, entity);
            } else {
                log::warn!("Ignoring {} for '{}': not lifecycle managed", transition, entity);
            }
            return Vec::new();
        };

        let launcher = &mut self.launcher;
        let mut port = |_: &str, kind: TransitionKind| match handle {
            Some(handle) => launcher.request_transition(handle, kind),
            None => TransitionReply::Failed(
                start_error
                    .clone()
                    .unwrap_or_else(|| "process is not running".to_string()),
            ),
        };

        controller
            .request(transition, &mut port, Instant::now(), entry.transition_timeout)
            .into_iter()
            .map(LaunchEvent::StateTransition)
            .collect()
    }

    /// Record an exit; an attempt still awaiting its reply fails with it
    fn mark_exited(&mut self, entity: &str, code: Option<i32>) -> Vec<LaunchEvent> {
        let Some(entry) = self.processes.get_mut(entity) else {
            return Vec::new();
        };
        match code {
            Some(0) => log::info!("[{}] Process exited", entity),
            _ => log::warn!("[{}] Process exited with code: {:?}", entity, code),
        }
        entry.exited = true;

        let Some(mut controller) = entry.controller.take() else {
            return Vec::new();
        };
        let failed = controller.pending().and_then(|transition| {
            let reason = match code {
                Some(code) => format!("process exited with code {}", code),
                None => "process exited".to_string(),
            };
            controller.complete(transition, Err(reason))
        });
        entry.final_state = Some(controller.state());
        failed.into_iter().map(LaunchEvent::StateTransition).collect()
    }

    fn state(&self, entity: &str) -> Option<LifecycleState> {
        let entry = self.processes.get(entity)?;
        entry
            .controller
            .as_ref()
            .map(LifecycleController::state)
            .or(entry.final_state)
    }
}

impl<L: ProcessLauncher> EventSink for LaunchState<L> {
    fn admit(&mut self, event: &LaunchEvent) -> bool {
        if let LaunchEvent::Shutdown { reason } = event {
            if self.shutdown_reason.is_some() {
                return false;
            }
            self.shutdown_reason = Some(reason.clone());
        }
        true
    }

    fn deliver(&mut self, event: &LaunchEvent) -> Result<Vec<LaunchEvent>, DispatchError> {
        match event {
            LaunchEvent::TransitionRequested(request) => {
                return Ok(self.transition(&request.entity, request.transition));
            }
            LaunchEvent::StateTransition(t) if t.succeeded => {
                log::info!("[{}] {} -> {}", t.entity, t.from, t.to);
            }
            LaunchEvent::StateTransition(t) => match &t.error {
                Some(error) => log::warn!("[{}] {} (now {})", t.entity, error, t.to),
                None => log::warn!("[{}] {} failed (now {})", t.entity, t.transition, t.to),
            },
            LaunchEvent::ProcessStarted { entity, pid } => match pid {
                Some(pid) => log::info!("[{}] Process started with PID: {}", entity, pid),
                None => log::info!("[{}] Process started", entity),
            },
            LaunchEvent::ProcessExited { entity, code } => {
                return Ok(self.mark_exited(entity, *code));
            }
            LaunchEvent::Shutdown { reason } => {
                log::info!("Shutdown: {}", reason);
            }
        }
        Ok(Vec::new())
    }

    fn live_managed(&self) -> Vec<String> {
        self.processes
            .iter()
            .filter(|(_, entry)| !entry.exited)
            .filter(|(_, entry)| {
                entry
                    .controller
                    .as_ref()
                    .is_some_and(|c| !c.state().is_terminal())
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn scope_active(&self, scope: &str) -> bool {
        self.active_scopes.contains(scope)
    }

    fn include(&mut self, plan: &str) -> Result<Vec<StartupStep>, DispatchError> {
        if self.active_scopes.contains(plan) {
            log::warn!("Sub-plan '{}' is already running", plan);
            return Ok(Vec::new());
        }
        if self.plan.root.is_disabled(plan) {
            log::warn!("Sub-plan '{}' is disabled", plan);
            return Ok(Vec::new());
        }
        self.activate(plan)
    }

    fn start(&mut self, entity: &str) -> Result<Vec<LaunchEvent>, DispatchError> {
        if self.processes.contains_key(entity) {
            log::debug!("'{}' already started", entity);
            return Ok(Vec::new());
        }
        let Some(planned) = self.plan.process(entity) else {
            log::warn!("'{}' is not part of the plan", entity);
            return Ok(Vec::new());
        };
        let managed = planned.is_managed();
        let transition_timeout = planned
            .transition_timeout
            .unwrap_or(self.config.transition_timeout);

        let (handle, start_error) = match self.launcher.start(&planned.config) {
            Ok(handle) => (Some(handle), None),
            // A managed process that cannot start fails its first transition instead
            Err(e) if managed => {
                log::error!("[{}] {}", entity, e);
                (None, Some(e.to_string()))
            }
            Err(e) => {
                return Err(DispatchError::ExternalProcessStartFailure {
                    entity: entity.to_string(),
                    source: e,
                })
            }
        };

        self.processes.insert(
            entity.to_string(),
            ProcessEntry {
                managed,
                transition_timeout,
                handle,
                start_error,
                controller: managed.then(|| LifecycleController::new(entity)),
                final_state: None,
                exited: false,
            },
        );

        Ok(match handle {
            Some(handle) => vec![LaunchEvent::ProcessStarted {
                entity: entity.to_string(),
                pid: handle.pid,
            }],
            None => Vec::new(),
        })
    }
}

/// Executes a [`LaunchPlan`] with a [`ProcessLauncher`]
pub struct Orchestrator<L: ProcessLauncher> {
    bus: EventBus,
    state: LaunchState<L>,
    process_rx: mpsc::UnboundedReceiver<(String, ProcessEvent)>,
    executed: bool,
}

impl<L: ProcessLauncher> Orchestrator<L> {
    /// Register every rule of the plan and seal the registry
    pub fn new(plan: LaunchPlan, mut launcher: L, config: OrchestratorConfig) -> Result<Self, LaunchError> {
        let mut bus = EventBus::new(plan.identity())
            .with_max_depth(config.max_dispatch_depth)
            .with_journal_capacity(config.journal_capacity);
        for scope in plan.root.scopes() {
            for rule in &scope.rules {
                bus.subscribe(scope.name.clone(), rule.clone())?;
            }
        }
        bus.seal();

        let (tx, process_rx) = mpsc::unbounded_channel();
        launcher.set_event_sender(tx);

        Ok(Self {
            bus,
            state: LaunchState {
                config,
                launcher,
                plan,
                processes: IndexMap::new(),
                active_scopes: HashSet::new(),
                shutdown_reason: None,
            },
            process_rx,
            executed: false,
        })
    }

    /// Start non-deferred sub-plans, then top-level entities, then run the
    /// startup actions
    pub fn execute(&mut self) -> Result<(), LaunchError> {
        if self.executed {
            return Ok(());
        }
        self.executed = true;

        let steps = self.state.activate("")?;
        log::info!(
            "[{}] Launching {} processes...",
            self.bus.identity(),
            steps
                .iter()
                .filter(|s| matches!(s, StartupStep::Start(_)))
                .count()
        );
        self.bus.run_startup(&steps, &mut self.state)?;
        Ok(())
    }

    /// Publish an event on the bus
    pub fn publish(&mut self, event: LaunchEvent) -> Result<(), LaunchError> {
        self.bus.publish(event, &mut self.state)?;
        Ok(())
    }

    /// Publish the shutdown signal; returns `false` if it was already published
    pub fn request_shutdown(&mut self, reason: impl Into<String>) -> Result<bool, LaunchError> {
        if self.is_shutting_down() {
            return Ok(false);
        }
        self.publish(LaunchEvent::Shutdown {
            reason: reason.into(),
        })?;
        Ok(true)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.shutdown_reason.is_some()
    }

    /// Feed one asynchronous process report into the bus
    pub fn handle_process_event(&mut self, entity: &str, event: ProcessEvent) -> Result<(), LaunchError> {
        match event {
            ProcessEvent::Output { line, is_stderr } => {
                if is_stderr {
                    log::warn!("[{}] {}", entity, line);
                } else {
                    log::info!("[{}] {}", entity, line);
                }
            }
            ProcessEvent::TransitionReply { transition, outcome } => {
                let completed = self
                    .state
                    .processes
                    .get_mut(entity)
                    .and_then(|entry| entry.controller.as_mut())
                    .and_then(|controller| controller.complete(transition, outcome));
                if let Some(event) = completed {
                    self.publish(LaunchEvent::StateTransition(event))?;
                }
            }
        }
        Ok(())
    }

    /// Fail every pending transition whose deadline has passed
    pub fn expire_transitions(&mut self, now: Instant) -> Result<(), LaunchError> {
        let expired: Vec<_> = self
            .state
            .processes
            .values_mut()
            .filter_map(|entry| entry.controller.as_mut()?.expire(now))
            .collect();
        for event in expired {
            self.publish(LaunchEvent::StateTransition(event))?;
        }
        Ok(())
    }

    /// Publish an exit event for every process that stopped on its own
    pub fn poll_processes(&mut self) -> Result<(), LaunchError> {
        let mut exits = Vec::new();
        for (name, entry) in &self.state.processes {
            if entry.exited {
                continue;
            }
            if let Some(handle) = entry.handle {
                if let ProcessStatus::Stopped(code) = self.state.launcher.poll_exit(handle) {
                    exits.push((name.clone(), code));
                }
            }
        }
        for (entity, code) in exits {
            self.publish(LaunchEvent::ProcessExited { entity, code })?;
        }
        Ok(())
    }

    /// True once no started process is left running
    pub fn all_exited(&self) -> bool {
        self.state
            .processes
            .values()
            .all(|entry| entry.exited || entry.handle.is_none())
    }

    /// Execute the plan and dispatch until shutdown, then tear down
    pub async fn run(&mut self, signal: ShutdownSignal) -> Result<(), LaunchError> {
        let result = self.drive(&signal).await;
        if let Err(e) = &result {
            log::error!("Launch failed: {}", e);
            // Shutdown handlers still run before the processes are stopped
            if let Err(e) = self.request_shutdown("launch failed") {
                log::error!("Shutdown handlers failed: {}", e);
            }
        }
        self.teardown().await;
        result
    }

    async fn drive(&mut self, signal: &ShutdownSignal) -> Result<(), LaunchError> {
        self.execute()?;

        let mut ticker = tokio::time::interval(self.state.config.poll_interval);
        while !self.is_shutting_down() {
            tokio::select! {
                _ = signal.wait() => {
                    self.request_shutdown("signal received")?;
                }
                Some((entity, event)) = self.process_rx.recv() => {
                    self.handle_process_event(&entity, event)?;
                }
                _ = ticker.tick() => {
                    self.expire_transitions(Instant::now())?;
                    self.poll_processes()?;
                    if self.all_exited() {
                        self.request_shutdown("all processes exited")?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Stop every running process in reverse start order
    pub async fn teardown(&mut self) {
        log::info!("Shutting down all processes...");

        let names: Vec<String> = self.state.processes.keys().cloned().collect();
        for name in names.into_iter().rev() {
            let Some(entry) = self.state.processes.get(&name) else {
                continue;
            };
            let Some(handle) = entry.handle.filter(|_| !entry.exited) else {
                continue;
            };
            let timeout = self.state.config.shutdown_timeout;
            match self.state.launcher.stop(handle, timeout).await {
                Ok(code) => {
                    let event = LaunchEvent::ProcessExited {
                        entity: name.clone(),
                        code,
                    };
                    if let Err(e) = self.publish(event) {
                        log::error!("[{}] {}", name, e);
                    }
                }
                Err(e) => log::error!("[{}] Error stopping process: {}", name, e),
            }
        }

        log::info!("All processes shut down");
    }

    /// Lifecycle state of a managed process (its last state once exited)
    pub fn state(&self, entity: &str) -> Option<LifecycleState> {
        self.state.state(entity)
    }

    /// Names of started processes, in start order
    pub fn started(&self) -> Vec<&str> {
        self.state.processes.keys().map(String::as_str).collect()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn plan(&self) -> &LaunchPlan {
        &self.state.plan
    }

    pub fn launcher(&self) -> &L {
        &self.state.launcher
    }

    pub fn launcher_mut(&mut self) -> &mut L {
        &mut self.state.launcher
    }
}

/// Errors that end a launch
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error(transparent)]
    Composition(#[from] CompositionError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
