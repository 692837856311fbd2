//! Test helpers for orchestrator scenarios

#![allow(dead_code)]

use lifecycle_launch::events::JournalEntry;
use lifecycle_launch::lifecycle::is_legal_step;
use lifecycle_launch::{
    Composition, LaunchEvent, LifecycleState, Orchestrator, OrchestratorConfig, ScriptedLauncher,
    TransitionEvent, TransitionKind, YamlParameterFiles,
};
use std::collections::HashMap;
use tempfile::TempDir;

/// Resolve `composition` without overrides and wrap it in an orchestrator
pub fn orchestrator(
    composition: Composition,
    launcher: ScriptedLauncher,
) -> Orchestrator<ScriptedLauncher> {
    orchestrator_with(composition, launcher, OrchestratorConfig::default())
}

pub fn orchestrator_with(
    composition: Composition,
    launcher: ScriptedLauncher,
    config: OrchestratorConfig,
) -> Orchestrator<ScriptedLauncher> {
    let plan = composition
        .resolve(&HashMap::new(), &YamlParameterFiles::new())
        .expect("plan resolves");
    Orchestrator::new(plan, launcher, config).expect("orchestrator builds")
}

/// Transition events of `entity`, oldest first
pub fn transitions<'a>(
    orchestrator: &'a Orchestrator<ScriptedLauncher>,
    entity: &str,
) -> Vec<&'a TransitionEvent> {
    orchestrator
        .bus()
        .events()
        .filter_map(|event| match event {
            LaunchEvent::StateTransition(t) if t.entity == entity => Some(t),
            _ => None,
        })
        .collect()
}

/// Published transition requests, oldest first
pub fn requests(orchestrator: &Orchestrator<ScriptedLauncher>) -> Vec<(String, TransitionKind)> {
    orchestrator
        .bus()
        .events()
        .filter_map(|event| match event {
            LaunchEvent::TransitionRequested(r) => Some((r.entity.clone(), r.transition)),
            _ => None,
        })
        .collect()
}

pub fn logs(orchestrator: &Orchestrator<ScriptedLauncher>) -> Vec<String> {
    orchestrator.bus().logs().map(str::to_string).collect()
}

/// Journal rendered as strings, for order checks
pub fn journal(orchestrator: &Orchestrator<ScriptedLauncher>) -> Vec<String> {
    orchestrator
        .bus()
        .journal()
        .map(|entry| match entry {
            JournalEntry::Event(event) => event.to_string(),
            JournalEntry::Log(message) => format!("log({})", message),
        })
        .collect()
}

/// States `entity` went through, starting at Unconfigured
pub fn state_walk(orchestrator: &Orchestrator<ScriptedLauncher>, entity: &str) -> Vec<LifecycleState> {
    let mut walk = vec![LifecycleState::Unconfigured];
    for t in transitions(orchestrator, entity) {
        for state in t.via.into_iter().chain(std::iter::once(t.to)) {
            if walk.last() != Some(&state) {
                walk.push(state);
            }
        }
    }
    walk
}

/// Every consecutive pair of the walk is an edge of the lifecycle graph
pub fn assert_legal_walk(walk: &[LifecycleState]) {
    for pair in walk.windows(2) {
        assert!(
            is_legal_step(pair[0], pair[1]),
            "illegal step {} -> {} in {:?}",
            pair[0],
            pair[1],
            walk
        );
    }
}

/// Fresh scratch directory for launch files, removed on drop
pub fn scratch_dir(test: &str) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("lifecycle_launch_{}_", test))
        .tempdir()
        .expect("scratch dir")
}
