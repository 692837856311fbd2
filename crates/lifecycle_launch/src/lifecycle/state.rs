//! Lifecycle states, transitions and the legal-transition graph

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a managed process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unconfigured,
    Configuring,
    Inactive,
    Activating,
    Active,
    Deactivating,
    ShuttingDown,
    Finalized,
    ErrorProcessing,
}

impl LifecycleState {
    /// No request is accepted once this state is reached
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Finalized)
    }

    /// States held only while a transition is in flight
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            LifecycleState::Configuring
                | LifecycleState::Activating
                | LifecycleState::Deactivating
                | LifecycleState::ShuttingDown
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Unconfigured => "unconfigured",
            LifecycleState::Configuring => "configuring",
            LifecycleState::Inactive => "inactive",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
            LifecycleState::Deactivating => "deactivating",
            LifecycleState::ShuttingDown => "shutting_down",
            LifecycleState::Finalized => "finalized",
            LifecycleState::ErrorProcessing => "error_processing",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transition that can be requested for a managed process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Configure,
    Activate,
    Deactivate,
    #[serde(rename = "cleanup", alias = "clean_up")]
    CleanUp,
    Shutdown,
    Destroy,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Configure => "configure",
            TransitionKind::Activate => "activate",
            TransitionKind::Deactivate => "deactivate",
            TransitionKind::CleanUp => "cleanup",
            TransitionKind::Shutdown => "shutdown",
            TransitionKind::Destroy => "destroy",
        }
    }

    /// Parse the wire name used by the stdio lifecycle protocol
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "configure" => Some(TransitionKind::Configure),
            "activate" => Some(TransitionKind::Activate),
            "deactivate" => Some(TransitionKind::Deactivate),
            "cleanup" | "clean_up" => Some(TransitionKind::CleanUp),
            "shutdown" => Some(TransitionKind::Shutdown),
            "destroy" => Some(TransitionKind::Destroy),
            _ => None,
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One edge of the lifecycle graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionEdge {
    pub transition: TransitionKind,
    pub from: LifecycleState,
    /// Intermediate state held while the process works on the transition
    pub via: Option<LifecycleState>,
    pub on_success: LifecycleState,
    /// `None` when the edge cannot fail
    pub on_failure: Option<LifecycleState>,
}

impl TransitionEdge {
    /// Whether the outcome depends on the process answering
    pub fn awaits_reply(&self) -> bool {
        self.on_failure.is_some()
    }
}

use LifecycleState as S;
use TransitionKind as T;

const fn edge(
    transition: TransitionKind,
    from: LifecycleState,
    via: Option<LifecycleState>,
    on_success: LifecycleState,
    on_failure: Option<LifecycleState>,
) -> TransitionEdge {
    TransitionEdge {
        transition,
        from,
        via,
        on_success,
        on_failure,
    }
}

static GRAPH: [TransitionEdge; 10] = [
    edge(T::Configure, S::Unconfigured, Some(S::Configuring), S::Inactive, Some(S::ErrorProcessing)),
    edge(T::Activate, S::Inactive, Some(S::Activating), S::Active, Some(S::ErrorProcessing)),
    edge(T::CleanUp, S::Inactive, None, S::Unconfigured, None),
    edge(T::Deactivate, S::Active, Some(S::Deactivating), S::Inactive, Some(S::ErrorProcessing)),
    edge(T::Shutdown, S::Unconfigured, Some(S::ShuttingDown), S::Finalized, None),
    edge(T::Shutdown, S::Inactive, Some(S::ShuttingDown), S::Finalized, None),
    edge(T::Shutdown, S::Active, Some(S::ShuttingDown), S::Finalized, None),
    edge(T::Shutdown, S::ErrorProcessing, Some(S::ShuttingDown), S::Finalized, None),
    edge(T::Destroy, S::Unconfigured, None, S::Finalized, None),
    edge(T::Destroy, S::ErrorProcessing, None, S::Finalized, None),
];

/// All edges of the lifecycle graph
pub fn transition_graph() -> &'static [TransitionEdge] {
    &GRAPH
}

/// Find the edge taken by `transition` out of `from`
pub fn find_edge(from: LifecycleState, transition: TransitionKind) -> Option<&'static TransitionEdge> {
    transition_graph()
        .iter()
        .find(|e| e.from == from && e.transition == transition)
}

/// Whether a single observed state change is a step of the graph
pub fn is_legal_step(from: LifecycleState, to: LifecycleState) -> bool {
    // A pending attempt cancelled by Shutdown fails into ErrorProcessing
    let cancelled = from.is_transitional() && to == S::ErrorProcessing;
    cancelled
        || GRAPH.iter().any(|e| match e.via {
            Some(via) => {
                (e.from == from && via == to)
                    || (via == from && (e.on_success == to || e.on_failure == Some(to)))
            }
            None => e.from == from && e.on_success == to,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_edge() {
        let e = find_edge(S::Unconfigured, T::Configure).unwrap();
        assert_eq!(e.via, Some(S::Configuring));
        assert_eq!(e.on_success, S::Inactive);
        assert_eq!(e.on_failure, Some(S::ErrorProcessing));
        assert!(e.awaits_reply());
    }

    #[test]
    fn test_no_direct_jump_to_active() {
        assert!(find_edge(S::Unconfigured, T::Activate).is_none());
        assert!(!is_legal_step(S::Unconfigured, S::Active));
        assert!(!is_legal_step(S::Unconfigured, S::Inactive));
        assert!(is_legal_step(S::Unconfigured, S::Configuring));
        assert!(is_legal_step(S::Configuring, S::Inactive));
    }

    #[test]
    fn test_shutdown_from_every_stable_state() {
        for from in [S::Unconfigured, S::Inactive, S::Active, S::ErrorProcessing] {
            let e = find_edge(from, T::Shutdown).unwrap();
            assert_eq!(e.on_success, S::Finalized);
            assert!(!e.awaits_reply());
        }
        assert!(find_edge(S::Finalized, T::Shutdown).is_none());
    }

    #[test]
    fn test_finalized_has_no_outgoing_edges() {
        assert!(transition_graph().iter().all(|e| e.from != S::Finalized));
        assert!(S::Finalized.is_terminal());
    }

    #[test]
    fn test_cleanup_cannot_fail() {
        let e = find_edge(S::Inactive, T::CleanUp).unwrap();
        assert_eq!(e.via, None);
        assert_eq!(e.on_failure, None);
    }

    #[test]
    fn test_transition_kind_yaml_names() {
        let kind: TransitionKind = serde_yaml::from_str("cleanup").unwrap();
        assert_eq!(kind, T::CleanUp);
        let state: LifecycleState = serde_yaml::from_str("error_processing").unwrap();
        assert_eq!(state, S::ErrorProcessing);
        assert_eq!(TransitionKind::parse("activate"), Some(T::Activate));
        assert_eq!(TransitionKind::parse("bogus"), None);
    }
}
