//! Synchronous in-process event bus
//!
//! `publish` runs every matching handler rule in registration order, then
//! hands the event to the built-in consumer ([`EventSink`]). Events emitted
//! along the way are published re-entrantly before `publish` returns, so
//! observers see transitions in the exact order they were attempted.

use crate::events::event::{LaunchEvent, TransitionRequest};
use crate::events::handler::{
    Action, EntitySelector, EventHandlerRule, EventTemplate, HandlerRegistry, RegistryError,
};
use crate::runtime::ProcessError;
use std::collections::VecDeque;

/// Default bound on re-entrant publishes
pub const DEFAULT_MAX_DEPTH: usize = 64;

pub const DEFAULT_JOURNAL_CAPACITY: usize = 4096;

/// Something the bus recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Event(LaunchEvent),
    Log(String),
}

/// One step of bringing a (sub-)plan up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupStep {
    /// Start the named process
    Start(String),
    /// Run the startup actions of a scope
    Actions(Vec<Action>),
}

/// Built-in consumer of bus events (lifecycle controllers and the process table)
pub trait EventSink {
    /// Decide whether an event is dispatched at all
    fn admit(&mut self, event: &LaunchEvent) -> bool {
        let _ = event;
        true
    }

    /// Consume an event after the handler rules ran; returns follow-up events
    fn deliver(&mut self, event: &LaunchEvent) -> Result<Vec<LaunchEvent>, DispatchError>;

    /// Managed processes that have not exited yet
    fn live_managed(&self) -> Vec<String>;

    /// Whether rules declared in `scope` are evaluated
    fn scope_active(&self, scope: &str) -> bool;

    /// Activate a deferred sub-plan; returns the steps that bring it up
    fn include(&mut self, plan: &str) -> Result<Vec<StartupStep>, DispatchError>;

    /// Start one process; returns the events its start produced
    fn start(&mut self, entity: &str) -> Result<Vec<LaunchEvent>, DispatchError>;
}

/// Event bus owning the handler registry
#[derive(Debug)]
pub struct EventBus {
    /// Prefix for Log actions
    identity: String,
    registry: HandlerRegistry,
    max_depth: usize,
    /// Events currently being dispatched, outermost first
    chain: Vec<String>,
    journal: VecDeque<JournalEntry>,
    journal_capacity: usize,
}

impl EventBus {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            registry: HandlerRegistry::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            chain: Vec::new(),
            journal: VecDeque::new(),
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_journal_capacity(mut self, capacity: usize) -> Self {
        self.journal_capacity = capacity;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Register a rule; only valid until the first publish
    pub fn subscribe(
        &mut self,
        scope: impl Into<String>,
        rule: EventHandlerRule,
    ) -> Result<(), RegistryError> {
        self.registry.register(scope, rule)
    }

    pub fn seal(&mut self) {
        self.registry.seal();
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Dispatch `event` and everything it causes
    pub fn publish(
        &mut self,
        event: LaunchEvent,
        sink: &mut dyn EventSink,
    ) -> Result<(), DispatchError> {
        self.registry.seal();

        if self.chain.len() >= self.max_depth {
            let mut chain = self.chain.clone();
            chain.push(event.to_string());
            return Err(DispatchError::HandlerCycleDetected { chain });
        }

        if !sink.admit(&event) {
            log::debug!("Dropping {}", event);
            return Ok(());
        }

        self.chain.push(event.to_string());
        let result = self.dispatch(&event, sink);
        self.chain.pop();
        result
    }

    /// Run actions outside of any rule (startup actions)
    pub fn run_actions(
        &mut self,
        actions: &[Action],
        sink: &mut dyn EventSink,
    ) -> Result<(), DispatchError> {
        for action in actions {
            self.run_action(action, sink)?;
        }
        Ok(())
    }

    /// Walk startup steps in order, publishing what each one produces
    pub fn run_startup(
        &mut self,
        steps: &[StartupStep],
        sink: &mut dyn EventSink,
    ) -> Result<(), DispatchError> {
        for step in steps {
            match step {
                StartupStep::Start(entity) => {
                    for event in sink.start(entity)? {
                        self.publish(event, sink)?;
                    }
                }
                StartupStep::Actions(actions) => self.run_actions(actions, sink)?,
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, event: &LaunchEvent, sink: &mut dyn EventSink) -> Result<(), DispatchError> {
        log::trace!("Dispatching {} (depth {})", event, self.chain.len());
        self.record(JournalEntry::Event(event.clone()));

        let actions = self.registry.evaluate(event, |scope| sink.scope_active(scope));
        for action in &actions {
            self.run_action(action, sink)?;
        }

        for follow_up in sink.deliver(event)? {
            self.publish(follow_up, sink)?;
        }
        Ok(())
    }

    fn run_action(&mut self, action: &Action, sink: &mut dyn EventSink) -> Result<(), DispatchError> {
        match action {
            Action::Emit(EventTemplate::ChangeState { target, transition }) => {
                let targets = match target {
                    EntitySelector::Named(name) => vec![name.clone()],
                    EntitySelector::AllManaged => sink.live_managed(),
                };
                for entity in targets {
                    let request = TransitionRequest::new(entity, *transition);
                    self.publish(LaunchEvent::TransitionRequested(request), sink)?;
                }
            }
            Action::Emit(EventTemplate::Shutdown { reason }) => {
                let reason = reason
                    .clone()
                    .unwrap_or_else(|| "requested by handler".to_string());
                self.publish(LaunchEvent::Shutdown { reason }, sink)?;
            }
            Action::Log(message) => {
                log::info!("[{}] {}", self.identity, message);
                self.record(JournalEntry::Log(message.clone()));
            }
            Action::Include(plan) => {
                log::info!("[{}] Including '{}'", self.identity, plan);
                let steps = sink.include(plan)?;
                self.run_startup(&steps, sink)?;
            }
        }
        Ok(())
    }

    fn record(&mut self, entry: JournalEntry) {
        if self.journal_capacity == 0 {
            return;
        }
        if self.journal.len() == self.journal_capacity {
            self.journal.pop_front();
        }
        self.journal.push_back(entry);
    }

    /// Recent events and Log actions, oldest first
    pub fn journal(&self) -> impl Iterator<Item = &JournalEntry> {
        self.journal.iter()
    }

    /// Published events, oldest first
    pub fn events(&self) -> impl Iterator<Item = &LaunchEvent> {
        self.journal.iter().filter_map(|entry| match entry {
            JournalEntry::Event(event) => Some(event),
            JournalEntry::Log(_) => None,
        })
    }

    /// Messages of executed Log actions, oldest first
    pub fn logs(&self) -> impl Iterator<Item = &str> {
        self.journal.iter().filter_map(|entry| match entry {
            JournalEntry::Log(message) => Some(message.as_str()),
            JournalEntry::Event(_) => None,
        })
    }
}

/// Errors that abort dispatch
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Handler cycle detected: {}", .chain.join(" -> "))]
    HandlerCycleDetected { chain: Vec<String> },

    #[error("Unknown sub-plan '{0}'")]
    UnknownSubPlan(String),

    #[error("Failed to start '{entity}': {source}")]
    ExternalProcessStartFailure {
        entity: String,
        #[source]
        source: ProcessError,
    },
}
