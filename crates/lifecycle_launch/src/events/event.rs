//! Events carried by the bus

use crate::lifecycle::{LifecycleState, TransitionError, TransitionKind};
use std::fmt;

/// Request to move a managed process along one lifecycle edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub entity: String,
    pub transition: TransitionKind,
}

impl TransitionRequest {
    pub fn new(entity: impl Into<String>, transition: TransitionKind) -> Self {
        Self {
            entity: entity.into(),
            transition,
        }
    }
}

/// Outcome of one transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionEvent {
    pub entity: String,
    pub transition: TransitionKind,
    pub from: LifecycleState,
    /// Intermediate state the attempt passed through
    pub via: Option<LifecycleState>,
    pub to: LifecycleState,
    pub succeeded: bool,
    pub error: Option<TransitionError>,
}

/// Everything that can be published on the event bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchEvent {
    TransitionRequested(TransitionRequest),
    StateTransition(TransitionEvent),
    ProcessStarted { entity: String, pid: Option<u32> },
    ProcessExited { entity: String, code: Option<i32> },
    /// The process group is going down
    Shutdown { reason: String },
}

impl LaunchEvent {
    /// Entity the event is about, if any
    pub fn entity(&self) -> Option<&str> {
        match self {
            LaunchEvent::TransitionRequested(r) => Some(&r.entity),
            LaunchEvent::StateTransition(t) => Some(&t.entity),
            LaunchEvent::ProcessStarted { entity, .. } | LaunchEvent::ProcessExited { entity, .. } => {
                Some(entity)
            }
            LaunchEvent::Shutdown { .. } => None,
        }
    }
}

impl fmt::Display for LaunchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchEvent::TransitionRequested(r) => {
                write!(f, "request({}, {})", r.entity, r.transition)
            }
            LaunchEvent::StateTransition(t) => {
                write!(f, "transition({}, {}", t.entity, t.from)?;
                if let Some(via) = t.via {
                    write!(f, " -> {}", via)?;
                }
                write!(
                    f,
                    " -> {}, {})",
                    t.to,
                    if t.succeeded { "ok" } else { "failed" }
                )
            }
            LaunchEvent::ProcessStarted { entity, .. } => write!(f, "started({})", entity),
            LaunchEvent::ProcessExited { entity, code } => {
                write!(f, "exited({}, {:?})", entity, code)
            }
            LaunchEvent::Shutdown { reason } => write!(f, "shutdown({})", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_transition() {
        let event = LaunchEvent::StateTransition(TransitionEvent {
            entity: "driver".into(),
            transition: TransitionKind::Configure,
            from: LifecycleState::Unconfigured,
            via: Some(LifecycleState::Configuring),
            to: LifecycleState::Inactive,
            succeeded: true,
            error: None,
        });
        assert_eq!(
            event.to_string(),
            "transition(driver, unconfigured -> configuring -> inactive, ok)"
        );
        assert_eq!(event.entity(), Some("driver"));
    }

    #[test]
    fn test_shutdown_has_no_entity() {
        let event = LaunchEvent::Shutdown {
            reason: "signal".into(),
        };
        assert_eq!(event.entity(), None);
        assert_eq!(event.to_string(), "shutdown(signal)");
    }
}
