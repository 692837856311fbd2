//! Lifecycle Launch System
//!
//! A declarative process orchestrator in the style of ROS 2 launch files.
//!
//! # Overview
//!
//! The launch system allows you to:
//! - Declare plain and lifecycle-managed processes in YAML files
//! - Nest launch files as sub-plans with explicit argument bindings
//! - React to lifecycle transitions with declarative handler rules
//! - Shut managed processes down cleanly before the process group is stopped
//! - Override arguments at launch time
//!
//! A [`Composition`] is resolved into a [`LaunchPlan`] before anything starts,
//! so argument, substitution and parameter errors never leave a partial
//! launch behind. The [`Orchestrator`] then executes the plan: every bus event
//! is matched against the handler rules and handed to the lifecycle
//! controllers synchronously.
//!
//! # Example Launch File
//!
//! ```yaml
//! version: "1.0"
//! name: sensor
//!
//! args:
//!   params_file:
//!     default: "$(dirname)/params/driver.yaml"
//!
//! nodes:
//!   ouster_driver:
//!     executable: "bin/ouster_driver"
//!     lifecycle: {}
//!     parameter_files: ["$(arg params_file)"]
//!
//! handlers:
//!   - on:
//!       state_transition: { entity: ouster_driver, goal_state: inactive }
//!     actions:
//!       - log: "Ouster driver node is activating."
//!       - emit: { change_state: { target: ouster_driver, transition: activate } }
//!   - on: shutdown
//!     actions:
//!       - emit: { change_state: { target: "*", transition: shutdown } }
//!       - log: "Ouster driver node is exiting."
//!
//! on_start:
//!   - emit: { change_state: { target: ouster_driver, transition: configure } }
//! ```

pub mod cli;
pub mod config;
pub mod events;
pub mod launch;
pub mod lifecycle;
pub mod runtime;

pub use cli::LaunchArgs;
pub use config::{
    ArgumentError, ArgumentResolver, LaunchArgument, LaunchFile, LaunchFileError,
    ParameterLoadError, ParameterSource, ResolvedArguments, SubstitutionContext,
    SubstitutionError, YamlParameterFiles,
};
pub use events::{
    Action, DispatchError, EventBus, EventHandlerRule, EventMatcher, LaunchEvent,
    TransitionEvent, TransitionRequest,
};
pub use launch::{
    Composition, CompositionBuilder, CompositionError, LaunchEntity, LaunchError, LaunchPlan,
    Orchestrator, OrchestratorConfig, ProcessEntity, SubPlan,
};
pub use lifecycle::{LifecycleController, LifecycleState, TransitionError, TransitionKind};
pub use runtime::{
    OsProcessLauncher, ProcessConfig, ProcessError, ProcessEvent, ProcessLauncher,
    ProcessStatus, ScriptedLauncher, ShutdownSignal,
};
