//! Declarative event handler rules and their registry

use crate::events::event::LaunchEvent;
use crate::launch::qualified_name;
use crate::lifecycle::{LifecycleState, TransitionKind};
use serde::{Deserialize, Serialize};

/// Predicate over bus events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventMatcher {
    /// Every event
    Any,
    /// The process-group shutdown signal
    Shutdown,
    /// A completed transition attempt
    StateTransition {
        #[serde(default)]
        entity: Option<String>,
        #[serde(default)]
        goal_state: Option<LifecycleState>,
        #[serde(default)]
        transition: Option<TransitionKind>,
        /// `None` matches successful and failed attempts alike
        #[serde(default = "only_succeeded")]
        succeeded: Option<bool>,
    },
    TransitionRequest {
        #[serde(default)]
        entity: Option<String>,
        #[serde(default)]
        transition: Option<TransitionKind>,
    },
    ProcessStart {
        #[serde(default)]
        entity: Option<String>,
    },
    ProcessExit {
        #[serde(default)]
        entity: Option<String>,
    },
}

fn only_succeeded() -> Option<bool> {
    Some(true)
}

fn field_matches<T: PartialEq>(expected: &Option<T>, actual: &T) -> bool {
    expected.as_ref().is_none_or(|e| e == actual)
}

impl EventMatcher {
    /// Successful arrival of `entity` in `goal_state`
    pub fn on_state(entity: impl Into<String>, goal_state: LifecycleState) -> Self {
        EventMatcher::StateTransition {
            entity: Some(entity.into()),
            goal_state: Some(goal_state),
            transition: None,
            succeeded: only_succeeded(),
        }
    }

    pub fn matches(&self, event: &LaunchEvent) -> bool {
        match (self, event) {
            (EventMatcher::Any, _) => true,
            (EventMatcher::Shutdown, LaunchEvent::Shutdown { .. }) => true,
            (
                EventMatcher::StateTransition {
                    entity,
                    goal_state,
                    transition,
                    succeeded,
                },
                LaunchEvent::StateTransition(t),
            ) => {
                entity.as_deref().is_none_or(|e| e == t.entity)
                    && field_matches(goal_state, &t.to)
                    && field_matches(transition, &t.transition)
                    && field_matches(succeeded, &t.succeeded)
            }
            (
                EventMatcher::TransitionRequest { entity, transition },
                LaunchEvent::TransitionRequested(r),
            ) => {
                entity.as_deref().is_none_or(|e| e == r.entity)
                    && field_matches(transition, &r.transition)
            }
            (EventMatcher::ProcessStart { entity }, LaunchEvent::ProcessStarted { entity: e, .. })
            | (EventMatcher::ProcessExit { entity }, LaunchEvent::ProcessExited { entity: e, .. }) => {
                entity.as_deref().is_none_or(|name| name == e.as_str())
            }
            _ => false,
        }
    }

    /// Entity named by the matcher, if any
    pub fn entity(&self) -> Option<&str> {
        match self {
            EventMatcher::StateTransition { entity, .. }
            | EventMatcher::TransitionRequest { entity, .. }
            | EventMatcher::ProcessStart { entity }
            | EventMatcher::ProcessExit { entity } => entity.as_deref(),
            EventMatcher::Any | EventMatcher::Shutdown => None,
        }
    }

    /// Rewrite entity names relative to a sub-plan scope
    pub fn qualified(&self, scope: &str) -> Self {
        let mut matcher = self.clone();
        match &mut matcher {
            EventMatcher::StateTransition { entity, .. }
            | EventMatcher::TransitionRequest { entity, .. }
            | EventMatcher::ProcessStart { entity }
            | EventMatcher::ProcessExit { entity } => {
                if let Some(name) = entity {
                    *name = qualified_name(scope, name);
                }
            }
            EventMatcher::Any | EventMatcher::Shutdown => {}
        }
        matcher
    }
}

/// Which managed processes an emitted transition targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntitySelector {
    Named(String),
    /// Every managed process that has not exited
    AllManaged,
}

impl From<String> for EntitySelector {
    fn from(s: String) -> Self {
        if s == "*" {
            EntitySelector::AllManaged
        } else {
            EntitySelector::Named(s)
        }
    }
}

impl From<EntitySelector> for String {
    fn from(selector: EntitySelector) -> Self {
        match selector {
            EntitySelector::Named(name) => name,
            EntitySelector::AllManaged => "*".to_string(),
        }
    }
}

/// Event produced by an `emit` action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTemplate {
    ChangeState {
        target: EntitySelector,
        transition: TransitionKind,
    },
    Shutdown {
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Side effect run when a rule matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Emit(EventTemplate),
    Log(String),
    /// Execute a deferred sub-plan
    Include(String),
}

impl Action {
    pub fn change_state(target: impl Into<String>, transition: TransitionKind) -> Self {
        Action::Emit(EventTemplate::ChangeState {
            target: EntitySelector::from(target.into()),
            transition,
        })
    }

    pub fn log(message: impl Into<String>) -> Self {
        Action::Log(message.into())
    }

    /// Rewrite entity and sub-plan names relative to a sub-plan scope
    pub fn qualified(&self, scope: &str) -> Self {
        match self {
            Action::Emit(EventTemplate::ChangeState {
                target: EntitySelector::Named(name),
                transition,
            }) => Action::Emit(EventTemplate::ChangeState {
                target: EntitySelector::Named(qualified_name(scope, name)),
                transition: *transition,
            }),
            Action::Include(name) => Action::Include(qualified_name(scope, name)),
            other => other.clone(),
        }
    }
}

/// "When an event matching `matcher` occurs, run `actions`"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHandlerRule {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "on")]
    pub matcher: EventMatcher,
    pub actions: Vec<Action>,
}

impl EventHandlerRule {
    pub fn new(matcher: EventMatcher, actions: Vec<Action>) -> Self {
        Self {
            name: None,
            matcher,
            actions,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Request `Activate` once `entity` reaches `Inactive`
    pub fn activate_on_inactive(entity: impl Into<String>) -> Self {
        let entity = entity.into();
        Self::new(
            EventMatcher::on_state(entity.clone(), LifecycleState::Inactive),
            vec![Action::change_state(entity, TransitionKind::Activate)],
        )
    }

    /// Shut down every live managed process when the group goes down, then log
    pub fn shutdown_on_signal(message: impl Into<String>) -> Self {
        Self::new(
            EventMatcher::Shutdown,
            vec![
                Action::Emit(EventTemplate::ChangeState {
                    target: EntitySelector::AllManaged,
                    transition: TransitionKind::Shutdown,
                }),
                Action::log(message),
            ],
        )
    }

    pub fn qualified(&self, scope: &str) -> Self {
        Self {
            name: self.name.clone(),
            matcher: self.matcher.qualified(scope),
            actions: self.actions.iter().map(|a| a.qualified(scope)).collect(),
        }
    }
}

#[derive(Debug)]
struct RegisteredRule {
    scope: String,
    rule: EventHandlerRule,
}

/// Ordered set of handler rules consulted on every publish
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    rules: Vec<RegisteredRule>,
    sealed: bool,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule declared in `scope` (the qualified sub-plan name, empty for the root)
    pub fn register(
        &mut self,
        scope: impl Into<String>,
        rule: EventHandlerRule,
    ) -> Result<(), RegistryError> {
        if self.sealed {
            return Err(RegistryError::Sealed);
        }
        self.rules.push(RegisteredRule {
            scope: scope.into(),
            rule,
        });
        Ok(())
    }

    /// Freeze the rule set; called when execution starts
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Actions of every matching rule, in registration order.
    ///
    /// Rules whose scope is not active yet are skipped.
    pub fn evaluate(&self, event: &LaunchEvent, scope_active: impl Fn(&str) -> bool) -> Vec<Action> {
        self.rules
            .iter()
            .filter(|r| scope_active(&r.scope) && r.rule.matcher.matches(event))
            .flat_map(|r| {
                if let Some(name) = &r.rule.name {
                    log::trace!("Rule '{}' matched {}", name, event);
                }
                r.rule.actions.iter().cloned()
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Handler rules cannot be registered after execution started")]
    Sealed,
}
