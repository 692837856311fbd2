//! Compositions: the declarative launch description and its resolution

use crate::config::{
    ArgumentError, ArgumentResolver, EnabledValue, LaunchArgument, LaunchFile, LaunchFileError,
    LifecycleConfig, ParameterLoadError, ParameterMap, ParameterSource, SubstitutionContext,
    SubstitutionError,
};
use crate::events::{Action, EntitySelector, EventHandlerRule, EventTemplate};
use crate::launch::entity::{
    qualified_name, LaunchEntity, ManagedEntity, ProcessEntity, SubPlan,
};
use crate::launch::plan::{LaunchPlan, PlannedProcess, PlannedScope};
use crate::runtime::{ExecutableRef, ProcessConfig, NAMESPACE_ENV, NAME_ENV};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Nested includes deeper than this are treated as a loop
const MAX_INCLUDE_DEPTH: usize = 32;

/// Immutable launch description: arguments, entities, rules and startup actions
#[derive(Debug, Clone)]
pub struct Composition {
    identity: String,
    dirname: Option<String>,
    arguments: Vec<LaunchArgument>,
    env: IndexMap<String, String>,
    entities: Vec<LaunchEntity>,
    rules: Vec<EventHandlerRule>,
    on_start: Vec<Action>,
}

/// Assembles a [`Composition`]
#[derive(Debug, Default)]
pub struct CompositionBuilder {
    identity: String,
    dirname: Option<String>,
    arguments: Vec<LaunchArgument>,
    env: IndexMap<String, String>,
    entities: Vec<LaunchEntity>,
    rules: Vec<EventHandlerRule>,
    on_start: Vec<Action>,
}

impl CompositionBuilder {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            ..Default::default()
        }
    }

    /// Directory used by `$(dirname)` and for relative parameter files
    pub fn dirname(mut self, dirname: impl Into<String>) -> Self {
        self.dirname = Some(dirname.into());
        self
    }

    pub fn argument(mut self, argument: LaunchArgument) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn entity(mut self, entity: LaunchEntity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn plain(self, process: ProcessEntity) -> Self {
        self.entity(LaunchEntity::plain(process))
    }

    pub fn managed(self, process: ProcessEntity) -> Self {
        self.entity(LaunchEntity::managed(process))
    }

    pub fn sub_plan(self, sub_plan: SubPlan) -> Self {
        self.entity(LaunchEntity::SubPlan(sub_plan))
    }

    pub fn rule(mut self, rule: EventHandlerRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Action run once every entity of the composition has started
    pub fn on_start(mut self, action: Action) -> Self {
        self.on_start.push(action);
        self
    }

    pub fn build(self) -> Result<Composition, CompositionError> {
        let mut seen = HashSet::new();
        for argument in &self.arguments {
            if !seen.insert(argument.name.as_str()) {
                return Err(CompositionError::DuplicateArgument(argument.name.clone()));
            }
        }

        let mut seen = HashSet::new();
        for entity in &self.entities {
            let name = entity.name();
            if name.is_empty() || name.contains('/') || name == "*" {
                return Err(CompositionError::InvalidEntityName(name.to_string()));
            }
            if !seen.insert(name) {
                return Err(CompositionError::DuplicateEntityName(name.to_string()));
            }
        }

        let composition = Composition {
            identity: self.identity,
            dirname: self.dirname,
            arguments: self.arguments,
            env: self.env,
            entities: self.entities,
            rules: self.rules,
            on_start: self.on_start,
        };
        composition.check_references()?;
        Ok(composition)
    }
}

impl Composition {
    pub fn builder(identity: impl Into<String>) -> CompositionBuilder {
        CompositionBuilder::new(identity)
    }

    /// Load a launch file and, recursively, the files it includes
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CompositionError> {
        Self::load(path.as_ref(), 0)
    }

    fn load(path: &Path, depth: usize) -> Result<Self, CompositionError> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(CompositionError::IncludeDepth(path.display().to_string()));
        }

        let launch_file = LaunchFile::from_file(&path.to_string_lossy())?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let identity = launch_file
            .name
            .clone()
            .unwrap_or_else(|| file_identity(path));

        Self::from_launch_file(launch_file, identity, dir, depth)
    }

    fn from_launch_file(
        launch_file: LaunchFile,
        identity: String,
        dir: &Path,
        depth: usize,
    ) -> Result<Self, CompositionError> {
        let mut builder = CompositionBuilder::new(identity).dirname(dir.to_string_lossy());

        for (name, def) in &launch_file.args {
            builder = builder.argument(LaunchArgument {
                name: name.clone(),
                default: def.default.as_ref().map(|v| v.as_str()),
                description: def.description.clone().unwrap_or_default(),
            });
        }
        for (key, value) in &launch_file.env {
            builder = builder.env(key.clone(), value.clone());
        }

        for (name, node) in &launch_file.nodes {
            let process = ProcessEntity::from_node(name, node);
            builder = builder.entity(match &node.lifecycle {
                Some(lifecycle) => LaunchEntity::Managed(ManagedEntity {
                    process,
                    lifecycle: lifecycle.clone(),
                }),
                None => LaunchEntity::Plain(process),
            });
        }

        // Include paths only see the environment and the including file's directory
        let path_ctx = SubstitutionContext::new()
            .with_envs(launch_file.env.clone())
            .with_dirname(dir.to_string_lossy());
        for (name, include) in &launch_file.includes {
            let file = path_ctx
                .substitute(&include.file)
                .map_err(substitution_error(format!("path of include '{}'", name)))?;
            let file = PathBuf::from(file);
            let file = if file.is_relative() { dir.join(file) } else { file };
            log::debug!("Including '{}' from {}", name, file.display());

            let mut sub_plan = SubPlan::new(name.clone(), Self::load(&file, depth + 1)?);
            sub_plan.bindings = include
                .args
                .iter()
                .map(|(k, v)| (k.clone(), v.as_str()))
                .collect();
            sub_plan.deferred = include.deferred;
            sub_plan.enabled = include.enabled.clone();
            builder = builder.sub_plan(sub_plan);
        }

        for rule in launch_file.handlers {
            builder = builder.rule(rule);
        }
        for action in launch_file.on_start {
            builder = builder.on_start(action);
        }
        builder.build()
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn arguments(&self) -> &[LaunchArgument] {
        &self.arguments
    }

    pub fn entities(&self) -> &[LaunchEntity] {
        &self.entities
    }

    pub fn entity(&self, name: &str) -> Option<&LaunchEntity> {
        self.entities.iter().find(|e| e.name() == name)
    }

    pub fn rules(&self) -> &[EventHandlerRule] {
        &self.rules
    }

    pub fn on_start(&self) -> &[Action] {
        &self.on_start
    }

    /// Process names of the whole tree relative to this composition, with
    /// whether each one is managed
    fn process_names(&self, scope: &str, out: &mut HashMap<String, bool>) {
        for entity in &self.entities {
            match entity {
                LaunchEntity::SubPlan(sub) => sub
                    .composition
                    .process_names(&qualified_name(scope, &sub.name), out),
                other => {
                    out.insert(qualified_name(scope, other.name()), other.lifecycle().is_some());
                }
            }
        }
    }

    fn sub_plan_names(&self, scope: &str, out: &mut HashSet<String>) {
        for entity in &self.entities {
            if let LaunchEntity::SubPlan(sub) = entity {
                let name = qualified_name(scope, &sub.name);
                sub.composition.sub_plan_names(&name, out);
                out.insert(name);
            }
        }
    }

    /// Every name a rule or startup action mentions must exist in this tree
    fn check_references(&self) -> Result<(), CompositionError> {
        let mut processes = HashMap::new();
        self.process_names("", &mut processes);
        let mut sub_plans = HashSet::new();
        self.sub_plan_names("", &mut sub_plans);

        let unknown = |name: &str| CompositionError::UnknownEntity {
            name: name.to_string(),
            composition: self.identity.clone(),
        };

        let matchers = self.rules.iter().filter_map(|r| r.matcher.entity());
        for name in matchers {
            if !processes.contains_key(name) {
                return Err(unknown(name));
            }
        }

        let actions = self
            .rules
            .iter()
            .flat_map(|r| r.actions.iter())
            .chain(self.on_start.iter());
        for action in actions {
            match action {
                Action::Emit(EventTemplate::ChangeState {
                    target: EntitySelector::Named(name),
                    ..
                }) => match processes.get(name) {
                    None => return Err(unknown(name)),
                    Some(false) => return Err(CompositionError::NotManaged(name.clone())),
                    Some(true) => {}
                },
                Action::Include(name) if !sub_plans.contains(name) => {
                    return Err(CompositionError::UnknownSubPlan(name.clone()));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Resolve arguments, substitutions, parameters and sub-plans into a plan.
    ///
    /// Nothing is started; any error here aborts the launch as a whole.
    pub fn resolve(
        &self,
        overrides: &HashMap<String, String>,
        parameters: &dyn ParameterSource,
    ) -> Result<LaunchPlan, CompositionError> {
        let root = self.resolve_scope("", overrides, false, parameters)?;
        Ok(LaunchPlan { root })
    }

    fn resolve_scope(
        &self,
        scope: &str,
        overrides: &HashMap<String, String>,
        deferred: bool,
        parameters: &dyn ParameterSource,
    ) -> Result<PlannedScope, CompositionError> {
        let mut base = SubstitutionContext::new().with_envs(self.env.clone());
        if let Some(dir) = &self.dirname {
            base = base.with_dirname(dir.clone());
        }

        let arguments = ArgumentResolver::new(&self.arguments)
            .resolve_all(overrides, &base)
            .map_err(substitution_error(format!("arguments of '{}'", self.identity)))?;
        let mut ctx = base.with_args(&arguments);

        let mut env = IndexMap::new();
        for (key, value) in &self.env {
            let resolved = ctx
                .substitute(value)
                .map_err(substitution_error(format!("env '{}' of '{}'", key, self.identity)))?;
            env.insert(key.clone(), resolved);
        }
        ctx.env.extend(env.clone());

        let mut planned = PlannedScope {
            name: scope.to_string(),
            identity: self.identity.clone(),
            deferred,
            arguments,
            env,
            rules: self.rules.iter().map(|r| r.qualified(scope)).collect(),
            on_start: self.on_start.iter().map(|a| a.qualified(scope)).collect(),
            ..Default::default()
        };

        for entity in &self.entities {
            let name = qualified_name(scope, entity.name());
            let enabled = match entity {
                LaunchEntity::Plain(p) => &p.enabled,
                LaunchEntity::Managed(m) => &m.process.enabled,
                LaunchEntity::SubPlan(s) => &s.enabled,
            };
            if !is_enabled(enabled, &ctx, &name)? {
                log::debug!("'{}' is disabled", name);
                planned.disabled.push(name);
                continue;
            }

            match entity {
                LaunchEntity::Plain(process) => {
                    let process = self.plan_process(&name, process, None, &ctx, &planned.env, parameters)?;
                    planned.processes.push(process);
                }
                LaunchEntity::Managed(managed) => {
                    let process = self.plan_process(
                        &name,
                        &managed.process,
                        Some(&managed.lifecycle),
                        &ctx,
                        &planned.env,
                        parameters,
                    )?;
                    planned.processes.push(process);
                }
                LaunchEntity::SubPlan(sub) => {
                    let mut child_overrides = HashMap::new();
                    for (child_arg, expression) in &sub.bindings {
                        let value = ctx.substitute(expression).map_err(substitution_error(
                            format!("binding '{}' of sub-plan '{}'", child_arg, name),
                        ))?;
                        child_overrides.insert(child_arg.clone(), value);
                    }
                    let child = sub.composition.resolve_scope(
                        &name,
                        &child_overrides,
                        sub.deferred,
                        parameters,
                    )?;
                    planned.children.push(child);
                }
            }
        }

        Ok(planned)
    }

    fn plan_process(
        &self,
        name: &str,
        process: &ProcessEntity,
        lifecycle: Option<&LifecycleConfig>,
        ctx: &SubstitutionContext,
        scope_env: &IndexMap<String, String>,
        source: &dyn ParameterSource,
    ) -> Result<PlannedProcess, CompositionError> {
        let subst = |what: &str, value: &str| {
            ctx.substitute(value)
                .map_err(substitution_error(format!("{} of '{}'", what, name)))
        };

        let executable = match &process.executable {
            ExecutableRef::Path(path) => ExecutableRef::Path(subst("executable", path)?),
            package => package.clone(),
        };

        let mut args = Vec::new();

        // Add raw args first
        for arg in &process.raw_args {
            args.push(subst("raw_args", arg)?);
        }

        // Add named args
        for (key, value) in &process.args {
            args.push(format!("--{}", key));
            args.push(subst(&format!("args.{}", key), value)?);
        }

        // Parameter files first, inline values override them
        let mut parameters = ParameterMap::new();
        for file in &process.parameter_files {
            let path = PathBuf::from(subst("parameter_files", file)?);
            let path = match &self.dirname {
                Some(dir) if path.is_relative() => Path::new(dir).join(path),
                _ => path,
            };
            let loaded = source
                .load_parameters(&path)
                .map_err(|e| CompositionError::ParameterLoad {
                    entity: name.to_string(),
                    source: e,
                })?;
            parameters.extend(loaded);
        }
        for (key, value) in &process.parameters {
            parameters.insert(key.clone(), subst(&format!("parameters.{}", key), value)?);
        }
        for (key, value) in &parameters {
            args.push("--param".to_string());
            args.push(format!("{}:={}", key, value));
        }

        let namespace = process
            .namespace
            .as_deref()
            .map(|ns| subst("namespace", ns))
            .transpose()?;

        let mut env = scope_env.clone();
        for (key, value) in &process.env {
            env.insert(key.clone(), subst(&format!("env '{}'", key), value)?);
        }
        env.insert(NAME_ENV.to_string(), name.to_string());
        if let Some(ns) = &namespace {
            env.insert(NAMESPACE_ENV.to_string(), ns.clone());
        }

        let working_dir = process
            .working_dir
            .as_deref()
            .map(|dir| subst("working_dir", dir).map(PathBuf::from))
            .transpose()?;

        Ok(PlannedProcess {
            config: ProcessConfig {
                name: name.to_string(),
                executable,
                args,
                env,
                working_dir,
                namespace,
                lifecycle: lifecycle.map(|l| l.protocol),
            },
            parameters,
            transition_timeout: lifecycle
                .and_then(|l| l.transition_timeout_ms)
                .map(Duration::from_millis),
        })
    }
}

fn is_enabled(
    enabled: &EnabledValue,
    ctx: &SubstitutionContext,
    name: &str,
) -> Result<bool, CompositionError> {
    match enabled {
        EnabledValue::Bool(b) => Ok(*b),
        EnabledValue::String(condition) => {
            let resolved = ctx
                .substitute(condition)
                .map_err(substitution_error(format!("enabled field of '{}'", name)))?;
            Ok(enabled.is_enabled(Some(&resolved)))
        }
    }
}

/// `sensor.launch.yaml` -> `sensor`
fn file_identity(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .and_then(|n| n.split('.').next().map(str::to_string))
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "launch".to_string())
}

fn substitution_error(context: String) -> impl FnOnce(SubstitutionError) -> CompositionError {
    move |e| match e {
        SubstitutionError::Argument(source) => CompositionError::Argument { context, source },
        source => CompositionError::Substitution { context, source },
    }
}

/// Errors that abort a launch before anything starts
#[derive(Debug, thiserror::Error)]
pub enum CompositionError {
    #[error("Duplicate entity name '{0}'")]
    DuplicateEntityName(String),

    #[error("Duplicate argument '{0}'")]
    DuplicateArgument(String),

    #[error("'{0}' is not a valid entity name")]
    InvalidEntityName(String),

    #[error("Unknown sub-plan '{0}'")]
    UnknownSubPlan(String),

    #[error("Unknown entity '{name}' referenced by '{composition}'")]
    UnknownEntity { name: String, composition: String },

    #[error("'{0}' is not lifecycle managed and cannot change state")]
    NotManaged(String),

    #[error("Argument error in {context}: {source}")]
    Argument {
        context: String,
        #[source]
        source: ArgumentError,
    },

    #[error("Substitution failed in {context}: {source}")]
    Substitution {
        context: String,
        #[source]
        source: SubstitutionError,
    },

    #[error("Cannot load parameters of '{entity}': {source}")]
    ParameterLoad {
        entity: String,
        #[source]
        source: ParameterLoadError,
    },

    #[error(transparent)]
    LaunchFile(#[from] LaunchFileError),

    #[error("Includes nested too deeply at '{0}'")]
    IncludeDepth(String),
}
