//! Per-process lifecycle state machine
//!
//! A [`LifecycleController`] owns the current state of one managed process.
//! It never moves on its own: every change starts from a transition request
//! and ends in exactly one [`TransitionEvent`] describing the attempt.

use crate::events::TransitionEvent;
use crate::lifecycle::state::{find_edge, LifecycleState, TransitionEdge, TransitionKind};
use std::time::{Duration, Instant};

/// Answer from the process side to a transition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionReply {
    Succeeded,
    Failed(String),
    /// The answer arrives later as a process event
    Pending,
}

/// Process side of a transition attempt
pub trait TransitionPort {
    fn notify(&mut self, entity: &str, transition: TransitionKind) -> TransitionReply;
}

impl<F> TransitionPort for F
where
    F: FnMut(&str, TransitionKind) -> TransitionReply,
{
    fn notify(&mut self, entity: &str, transition: TransitionKind) -> TransitionReply {
        self(entity, transition)
    }
}

/// Why a transition attempt did not succeed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Transition '{transition}' is not legal from state '{state}' of '{entity}'")]
    IllegalTransition {
        entity: String,
        state: LifecycleState,
        transition: TransitionKind,
    },

    #[error("'{entity}' is finalized and accepts no further transitions")]
    TerminalState { entity: String },

    #[error("Transition '{transition}' of '{entity}' timed out after {timeout:?}")]
    TransitionTimeout {
        entity: String,
        transition: TransitionKind,
        timeout: Duration,
    },

    #[error("Transition '{transition}' of '{entity}' failed: {reason}")]
    Failed {
        entity: String,
        transition: TransitionKind,
        reason: String,
    },

    #[error("Transition '{transition}' of '{entity}' was cancelled by shutdown")]
    Cancelled {
        entity: String,
        transition: TransitionKind,
    },
}

#[derive(Debug, Clone, Copy)]
struct PendingTransition {
    edge: &'static TransitionEdge,
    deadline: Instant,
    timeout: Duration,
}

/// Authoritative lifecycle state of one managed process
#[derive(Debug)]
pub struct LifecycleController {
    entity: String,
    state: LifecycleState,
    pending: Option<PendingTransition>,
}

impl LifecycleController {
    /// Create a controller in `Unconfigured`
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            state: LifecycleState::Unconfigured,
            pending: None,
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Transition currently waiting for a reply
    pub fn pending(&self) -> Option<TransitionKind> {
        self.pending.map(|p| p.edge.transition)
    }

    /// Handle one transition request.
    ///
    /// Returns the events produced, in order. An empty result means the
    /// attempt is waiting for a reply (see [`Self::complete`]).
    pub fn request(
        &mut self,
        transition: TransitionKind,
        port: &mut dyn TransitionPort,
        now: Instant,
        timeout: Duration,
    ) -> Vec<TransitionEvent> {
        if self.state.is_terminal() {
            let error = TransitionError::TerminalState {
                entity: self.entity.clone(),
            };
            return vec![self.rejected(transition, error)];
        }

        let mut events = Vec::new();

        if let Some(pending) = self.pending {
            if transition != TransitionKind::Shutdown {
                let error = TransitionError::IllegalTransition {
                    entity: self.entity.clone(),
                    state: self.state,
                    transition,
                };
                return vec![self.rejected(transition, error)];
            }
            // Shutdown wins over the attempt in flight
            let error = TransitionError::Cancelled {
                entity: self.entity.clone(),
                transition: pending.edge.transition,
            };
            events.extend(self.finish(Err(error)));
        }

        let Some(edge) = find_edge(self.state, transition) else {
            let error = TransitionError::IllegalTransition {
                entity: self.entity.clone(),
                state: self.state,
                transition,
            };
            events.push(self.rejected(transition, error));
            return events;
        };

        if let Some(via) = edge.via {
            self.state = via;
        }

        let reply = port.notify(&self.entity, transition);
        if !edge.awaits_reply() {
            if let TransitionReply::Failed(reason) = &reply {
                log::warn!(
                    "[{}] {} reported failure, completing anyway: {}",
                    self.entity,
                    transition,
                    reason
                );
            }
            self.pending = Some(PendingTransition {
                edge,
                deadline: now,
                timeout,
            });
            events.extend(self.finish(Ok(())));
            return events;
        }

        self.pending = Some(PendingTransition {
            edge,
            deadline: now + timeout,
            timeout,
        });

        match reply {
            TransitionReply::Succeeded => events.extend(self.finish(Ok(()))),
            TransitionReply::Failed(reason) => {
                let error = TransitionError::Failed {
                    entity: self.entity.clone(),
                    transition,
                    reason,
                };
                events.extend(self.finish(Err(error)));
            }
            TransitionReply::Pending => {
                log::debug!(
                    "[{}] {} pending, deadline in {:?}",
                    self.entity,
                    transition,
                    timeout
                );
            }
        }

        events
    }

    /// Apply a late reply for the attempt in flight.
    ///
    /// Replies that do not match the pending transition are ignored.
    pub fn complete(
        &mut self,
        transition: TransitionKind,
        outcome: Result<(), String>,
    ) -> Option<TransitionEvent> {
        match self.pending {
            Some(p) if p.edge.transition == transition => {}
            _ => {
                log::debug!(
                    "[{}] Ignoring late '{}' reply, nothing pending",
                    self.entity,
                    transition
                );
                return None;
            }
        }

        let outcome = outcome.map_err(|reason| TransitionError::Failed {
            entity: self.entity.clone(),
            transition,
            reason,
        });
        self.finish(outcome)
    }

    /// Fail the attempt in flight if its deadline has passed
    pub fn expire(&mut self, now: Instant) -> Option<TransitionEvent> {
        let pending = self.pending?;
        if now < pending.deadline {
            return None;
        }
        let error = TransitionError::TransitionTimeout {
            entity: self.entity.clone(),
            transition: pending.edge.transition,
            timeout: pending.timeout,
        };
        self.finish(Err(error))
    }

    fn finish(&mut self, outcome: Result<(), TransitionError>) -> Option<TransitionEvent> {
        let pending = self.pending.take()?;
        let edge = pending.edge;

        let (to, error) = match outcome {
            Ok(()) => (edge.on_success, None),
            // Edges that cannot fail still complete
            Err(e) => (edge.on_failure.unwrap_or(edge.on_success), Some(e)),
        };

        self.state = to;
        Some(TransitionEvent {
            entity: self.entity.clone(),
            transition: edge.transition,
            from: edge.from,
            via: edge.via,
            to,
            succeeded: error.is_none(),
            error,
        })
    }

    fn rejected(&self, transition: TransitionKind, error: TransitionError) -> TransitionEvent {
        TransitionEvent {
            entity: self.entity.clone(),
            transition,
            from: self.state,
            via: None,
            to: self.state,
            succeeded: false,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::state::is_legal_step;
    use LifecycleState as S;

    fn ok(_: &str, _: TransitionKind) -> TransitionReply {
        TransitionReply::Succeeded
    }

    fn pending(_: &str, _: TransitionKind) -> TransitionReply {
        TransitionReply::Pending
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_configure_then_activate() {
        let mut ctl = LifecycleController::new("driver");
        let now = Instant::now();

        let events = ctl.request(TransitionKind::Configure, &mut ok, now, TIMEOUT);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].from, S::Unconfigured);
        assert_eq!(events[0].via, Some(S::Configuring));
        assert_eq!(events[0].to, S::Inactive);
        assert!(events[0].succeeded);

        let events = ctl.request(TransitionKind::Activate, &mut ok, now, TIMEOUT);
        assert_eq!(events[0].to, S::Active);
        assert_eq!(ctl.state(), S::Active);
    }

    #[test]
    fn test_activate_from_unconfigured_is_illegal() {
        let mut ctl = LifecycleController::new("driver");
        let events = ctl.request(TransitionKind::Activate, &mut ok, Instant::now(), TIMEOUT);

        assert_eq!(events.len(), 1);
        assert!(!events[0].succeeded);
        assert!(matches!(
            events[0].error,
            Some(TransitionError::IllegalTransition { .. })
        ));
        assert_eq!(ctl.state(), S::Unconfigured);
    }

    #[test]
    fn test_failed_configure_enters_error_processing() {
        let mut ctl = LifecycleController::new("driver");
        let mut fail = |_: &str, _: TransitionKind| TransitionReply::Failed("no device".into());
        let events = ctl.request(TransitionKind::Configure, &mut fail, Instant::now(), TIMEOUT);

        assert_eq!(events[0].to, S::ErrorProcessing);
        assert!(matches!(events[0].error, Some(TransitionError::Failed { .. })));
    }

    #[test]
    fn test_pending_reply_then_complete() {
        let mut ctl = LifecycleController::new("driver");
        let events = ctl.request(TransitionKind::Configure, &mut pending, Instant::now(), TIMEOUT);

        assert!(events.is_empty());
        assert_eq!(ctl.state(), S::Configuring);
        assert_eq!(ctl.pending(), Some(TransitionKind::Configure));

        // A reply for another transition is ignored
        assert!(ctl.complete(TransitionKind::Activate, Ok(())).is_none());

        let event = ctl.complete(TransitionKind::Configure, Ok(())).unwrap();
        assert_eq!(event.to, S::Inactive);
        assert!(ctl.pending().is_none());
    }

    #[test]
    fn test_pending_transition_times_out() {
        let mut ctl = LifecycleController::new("driver");
        let start = Instant::now();
        ctl.request(TransitionKind::Configure, &mut pending, start, TIMEOUT);

        assert!(ctl.expire(start + Duration::from_secs(1)).is_none());
        let event = ctl.expire(start + TIMEOUT).unwrap();
        assert_eq!(event.to, S::ErrorProcessing);
        assert!(matches!(
            event.error,
            Some(TransitionError::TransitionTimeout { .. })
        ));
    }

    #[test]
    fn test_requests_while_pending_are_rejected() {
        let mut ctl = LifecycleController::new("driver");
        ctl.request(TransitionKind::Configure, &mut pending, Instant::now(), TIMEOUT);

        let events = ctl.request(TransitionKind::Activate, &mut ok, Instant::now(), TIMEOUT);
        assert!(!events[0].succeeded);
        assert_eq!(ctl.state(), S::Configuring);
    }

    #[test]
    fn test_shutdown_cancels_pending_attempt() {
        let mut ctl = LifecycleController::new("driver");
        ctl.request(TransitionKind::Configure, &mut pending, Instant::now(), TIMEOUT);

        let events = ctl.request(TransitionKind::Shutdown, &mut ok, Instant::now(), TIMEOUT);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].error, Some(TransitionError::Cancelled { .. })));
        assert_eq!(events[0].to, S::ErrorProcessing);
        assert_eq!(events[1].from, S::ErrorProcessing);
        assert_eq!(events[1].to, S::Finalized);
        assert!(events[1].succeeded);

        // The late reply can no longer revive the process
        assert!(ctl.complete(TransitionKind::Configure, Ok(())).is_none());
        assert_eq!(ctl.state(), S::Finalized);
    }

    #[test]
    fn test_finalized_is_terminal() {
        let mut ctl = LifecycleController::new("driver");
        ctl.request(TransitionKind::Shutdown, &mut ok, Instant::now(), TIMEOUT);
        assert_eq!(ctl.state(), S::Finalized);

        for kind in [
            TransitionKind::Configure,
            TransitionKind::Activate,
            TransitionKind::Shutdown,
            TransitionKind::Destroy,
        ] {
            let events = ctl.request(kind, &mut ok, Instant::now(), TIMEOUT);
            assert!(matches!(
                events[0].error,
                Some(TransitionError::TerminalState { .. })
            ));
            assert_eq!(ctl.state(), S::Finalized);
        }
    }

    #[test]
    fn test_shutdown_completes_even_if_process_fails() {
        let mut ctl = LifecycleController::new("driver");
        let mut fail = |_: &str, _: TransitionKind| TransitionReply::Failed("gone".into());
        let events = ctl.request(TransitionKind::Shutdown, &mut fail, Instant::now(), TIMEOUT);

        assert_eq!(events[0].to, S::Finalized);
        assert!(events[0].succeeded);
    }

    #[test]
    fn test_every_observed_step_is_legal() {
        let mut ctl = LifecycleController::new("driver");
        let now = Instant::now();
        let script = [
            TransitionKind::Configure,
            TransitionKind::Activate,
            TransitionKind::Deactivate,
            TransitionKind::CleanUp,
            TransitionKind::Activate,
            TransitionKind::Configure,
            TransitionKind::Shutdown,
        ];

        let mut walk = vec![ctl.state()];
        for kind in script {
            for event in ctl.request(kind, &mut ok, now, TIMEOUT) {
                if let Some(via) = event.via {
                    walk.push(via);
                }
                if event.to != *walk.last().unwrap() {
                    walk.push(event.to);
                }
            }
        }

        assert_eq!(*walk.last().unwrap(), S::Finalized);
        for pair in walk.windows(2) {
            assert!(is_legal_step(pair[0], pair[1]), "{:?}", pair);
        }
    }
}
