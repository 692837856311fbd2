//! Fully resolved launch plan

use crate::config::{ParameterMap, ResolvedArguments};
use crate::events::{Action, EventHandlerRule, StartupStep};
use crate::runtime::ProcessConfig;
use indexmap::IndexMap;
use std::fmt;
use std::time::Duration;

/// A process ready to be started
#[derive(Debug, Clone)]
pub struct PlannedProcess {
    pub config: ProcessConfig,
    /// Parameters from files and inline values, as passed on the command line
    pub parameters: ParameterMap,
    /// Overrides the orchestrator-wide transition timeout
    pub transition_timeout: Option<Duration>,
}

impl PlannedProcess {
    /// Qualified entity name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_managed(&self) -> bool {
        self.config.lifecycle.is_some()
    }
}

/// Resolved form of one composition
#[derive(Debug, Clone, Default)]
pub struct PlannedScope {
    /// Qualified sub-plan name, empty for the root
    pub name: String,
    /// Prefix of Log actions
    pub identity: String,
    /// Waits for an `include` action naming it
    pub deferred: bool,
    pub arguments: ResolvedArguments,
    pub env: IndexMap<String, String>,
    /// Nested sub-plans, executed before this scope's processes
    pub children: Vec<PlannedScope>,
    /// Processes in declaration order
    pub processes: Vec<PlannedProcess>,
    /// Handler rules with qualified entity names
    pub rules: Vec<EventHandlerRule>,
    pub on_start: Vec<Action>,
    /// Qualified names of entities and sub-plans switched off by `enabled`
    pub disabled: Vec<String>,
}

impl PlannedScope {
    /// Scope named `name`, searching this scope and its descendants
    pub fn find(&self, name: &str) -> Option<&PlannedScope> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    /// This scope and every descendant, parents first
    pub fn scopes(&self) -> Vec<&PlannedScope> {
        let mut scopes = vec![self];
        for child in &self.children {
            scopes.extend(child.scopes());
        }
        scopes
    }

    /// Every process of this scope and its descendants, in start order
    pub fn all_processes(&self) -> Vec<&PlannedProcess> {
        let mut processes = Vec::new();
        for child in &self.children {
            processes.extend(child.all_processes());
        }
        processes.extend(self.processes.iter());
        processes
    }

    /// Non-deferred sub-plans first, then own processes, then startup actions
    pub fn startup_steps(&self) -> Vec<StartupStep> {
        let mut steps = Vec::new();
        for child in self.children.iter().filter(|c| !c.deferred) {
            steps.extend(child.startup_steps());
        }
        steps.extend(
            self.processes
                .iter()
                .map(|p| StartupStep::Start(p.name().to_string())),
        );
        if !self.on_start.is_empty() {
            steps.push(StartupStep::Actions(self.on_start.clone()));
        }
        steps
    }

    /// Sub-plans that only start together with this one
    pub fn scope_names(&self) -> Vec<String> {
        let mut names = vec![self.name.clone()];
        for child in self.children.iter().filter(|c| !c.deferred) {
            names.extend(child.scope_names());
        }
        names
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.iter().any(|d| d == name) || self.children.iter().any(|c| c.is_disabled(name))
    }

    fn write_tree(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = " ".repeat(indent);

        if !self.arguments.is_empty() {
            writeln!(f, "{}Arguments:", pad)?;
            for (key, value) in self.arguments.iter() {
                writeln!(f, "{}  {}: {}", pad, key, value)?;
            }
            writeln!(f)?;
        }

        if !self.env.is_empty() {
            writeln!(f, "{}Environment:", pad)?;
            for (key, value) in &self.env {
                writeln!(f, "{}  {}={}", pad, key, value)?;
            }
            writeln!(f)?;
        }

        for child in &self.children {
            writeln!(
                f,
                "{}Sub-plan '{}'{}",
                pad,
                child.name,
                if child.deferred { " (deferred)" } else { "" }
            )?;
            child.write_tree(f, indent + 2)?;
        }

        if !self.processes.is_empty() {
            writeln!(f, "{}Nodes (in launch order):", pad)?;
        }
        for (i, process) in self.processes.iter().enumerate() {
            let config = &process.config;
            writeln!(f)?;
            writeln!(
                f,
                "{}  {}. {} {}",
                pad,
                i + 1,
                config.name,
                match config.lifecycle {
                    Some(protocol) => format!("[managed, {:?}]", protocol).to_lowercase(),
                    None => "[plain]".to_string(),
                }
            )?;
            writeln!(f, "{}     Command: {} {}", pad, config.executable, config.args.join(" "))?;
            if let Some(ns) = &config.namespace {
                writeln!(f, "{}     Namespace: {}", pad, ns)?;
            }
            if !process.parameters.is_empty() {
                writeln!(f, "{}     Parameters: {}", pad, process.parameters.len())?;
            }
        }

        if !self.disabled.is_empty() {
            writeln!(f)?;
            writeln!(f, "{}Disabled: {}", pad, self.disabled.join(", "))?;
        }

        if !self.rules.is_empty() || !self.on_start.is_empty() {
            writeln!(f)?;
            writeln!(
                f,
                "{}Handlers: {} rule(s), {} startup action(s)",
                pad,
                self.rules.len(),
                self.on_start.len()
            )?;
        }
        writeln!(f)
    }
}

/// Everything a launch needs, resolved before any process starts
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub root: PlannedScope,
}

impl LaunchPlan {
    pub fn identity(&self) -> &str {
        &self.root.identity
    }

    /// Scope by qualified name; the empty name is the root
    pub fn scope(&self, name: &str) -> Option<&PlannedScope> {
        self.root.find(name)
    }

    pub fn processes(&self) -> Vec<&PlannedProcess> {
        self.root.all_processes()
    }

    pub fn process(&self, name: &str) -> Option<&PlannedProcess> {
        self.processes().into_iter().find(|p| p.name() == name)
    }
}

/// Display the launch plan in a human-readable format
impl fmt::Display for LaunchPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Launch Plan: {}", self.identity())?;
        writeln!(f, "===========")?;
        writeln!(f)?;
        self.root.write_tree(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ExecutableRef;

    fn process(name: &str) -> PlannedProcess {
        PlannedProcess {
            config: ProcessConfig::new(name, ExecutableRef::Path(format!("bin/{}", name))),
            parameters: ParameterMap::new(),
            transition_timeout: None,
        }
    }

    fn scope(name: &str, deferred: bool, processes: &[&str], children: Vec<PlannedScope>) -> PlannedScope {
        PlannedScope {
            name: name.to_string(),
            identity: name.to_string(),
            deferred,
            processes: processes.iter().map(|p| process(p)).collect(),
            children,
            ..Default::default()
        }
    }

    fn started(steps: &[StartupStep]) -> Vec<&str> {
        steps
            .iter()
            .filter_map(|s| match s {
                StartupStep::Start(name) => Some(name.as_str()),
                StartupStep::Actions(_) => None,
            })
            .collect()
    }

    fn tree() -> PlannedScope {
        let inner = scope("vision/inner", false, &["vision/inner/tracker"], vec![]);
        let vision = scope("vision", true, &["vision/cam"], vec![inner]);
        let lidar = scope("lidar", false, &["lidar/driver"], vec![]);
        let mut root = scope("", false, &["imu"], vec![lidar, vision]);
        root.on_start.push(Action::log("up"));
        root
    }

    #[test]
    fn test_startup_skips_deferred_sub_plans() {
        let root = tree();
        let steps = root.startup_steps();
        assert_eq!(started(&steps), ["lidar/driver", "imu"]);
        assert!(matches!(steps.last(), Some(StartupStep::Actions(_))));
        assert_eq!(root.scope_names(), ["", "lidar"]);
    }

    #[test]
    fn test_included_sub_plan_starts_its_own_children() {
        let root = tree();
        let vision = root.find("vision").unwrap();
        assert_eq!(
            started(&vision.startup_steps()),
            ["vision/inner/tracker", "vision/cam"]
        );
        assert_eq!(vision.scope_names(), ["vision", "vision/inner"]);
    }

    #[test]
    fn test_processes_listed_children_first() {
        let root = tree();
        let names: Vec<_> = root.all_processes().iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            ["lidar/driver", "vision/inner/tracker", "vision/cam", "imu"]
        );
        assert!(root.find("vision/inner").is_some());
        assert!(root.find("radar").is_none());
    }
}
