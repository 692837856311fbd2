//! Launch entities: plain processes, managed processes and sub-plans

use crate::config::{ArgValue, EnabledValue, LifecycleConfig, NodeConfig};
use crate::launch::composition::Composition;
use crate::runtime::ExecutableRef;
use indexmap::IndexMap;

/// Name of `name` as seen from the root of the plan
pub fn qualified_name(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", scope, name)
    }
}

/// An external process as declared; strings may still hold substitutions
#[derive(Debug, Clone)]
pub struct ProcessEntity {
    pub name: String,
    pub executable: ExecutableRef,
    pub namespace: Option<String>,
    /// Inline parameters, applied after parameter files
    pub parameters: IndexMap<String, String>,
    pub parameter_files: Vec<String>,
    /// Named arguments (converted to --key value)
    pub args: IndexMap<String, String>,
    pub raw_args: Vec<String>,
    pub env: IndexMap<String, String>,
    pub working_dir: Option<String>,
    pub enabled: EnabledValue,
}

impl ProcessEntity {
    pub fn new(name: impl Into<String>, executable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            executable: ExecutableRef::Path(executable.into()),
            namespace: None,
            parameters: IndexMap::new(),
            parameter_files: Vec::new(),
            args: IndexMap::new(),
            raw_args: Vec::new(),
            env: IndexMap::new(),
            working_dir: None,
            enabled: EnabledValue::Bool(true),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_parameter_file(mut self, path: impl Into<String>) -> Self {
        self.parameter_files.push(path.into());
        self
    }

    pub fn with_raw_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raw_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Start only when `condition` substitutes to a truthy value
    pub fn enabled_if(mut self, condition: impl Into<String>) -> Self {
        self.enabled = EnabledValue::String(condition.into());
        self
    }

    /// Convert a node of a launch file
    pub fn from_node(name: &str, node: &NodeConfig) -> Self {
        let executable = match (&node.executable, &node.package, &node.binary) {
            (Some(path), _, _) => ExecutableRef::Path(path.clone()),
            (None, Some(package), Some(binary)) => ExecutableRef::Package {
                package: package.clone(),
                binary: binary.clone(),
            },
            // Rejected by launch file validation
            _ => ExecutableRef::Path(String::new()),
        };
        let render = |values: &IndexMap<String, ArgValue>| {
            values
                .iter()
                .map(|(k, v)| (k.clone(), v.as_str()))
                .collect::<IndexMap<_, _>>()
        };

        Self {
            name: name.to_string(),
            executable,
            namespace: node.namespace.clone(),
            parameters: render(&node.parameters),
            parameter_files: node.parameter_files.clone(),
            args: render(&node.args),
            raw_args: node.raw_args.clone(),
            env: node.env.clone(),
            working_dir: node.working_dir.clone(),
            enabled: node.enabled.clone(),
        }
    }
}

/// A lifecycle-aware process
#[derive(Debug, Clone)]
pub struct ManagedEntity {
    pub process: ProcessEntity,
    pub lifecycle: LifecycleConfig,
}

/// A nested composition with its argument bindings
#[derive(Debug, Clone)]
pub struct SubPlan {
    pub name: String,
    pub composition: Composition,
    /// Child argument to expression evaluated in the parent scope
    pub bindings: IndexMap<String, String>,
    /// Only executed by an `include` action
    pub deferred: bool,
    pub enabled: EnabledValue,
}

impl SubPlan {
    pub fn new(name: impl Into<String>, composition: Composition) -> Self {
        Self {
            name: name.into(),
            composition,
            bindings: IndexMap::new(),
            deferred: false,
            enabled: EnabledValue::Bool(true),
        }
    }

    /// Bind child argument `child_arg` to `expression`
    pub fn bind(mut self, child_arg: impl Into<String>, expression: impl Into<String>) -> Self {
        self.bindings.insert(child_arg.into(), expression.into());
        self
    }

    pub fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    pub fn enabled_if(mut self, condition: impl Into<String>) -> Self {
        self.enabled = EnabledValue::String(condition.into());
        self
    }
}

/// Something a composition launches
#[derive(Debug, Clone)]
pub enum LaunchEntity {
    Plain(ProcessEntity),
    Managed(ManagedEntity),
    SubPlan(SubPlan),
}

impl LaunchEntity {
    pub fn plain(process: ProcessEntity) -> Self {
        LaunchEntity::Plain(process)
    }

    /// Managed process speaking the default protocol
    pub fn managed(process: ProcessEntity) -> Self {
        LaunchEntity::Managed(ManagedEntity {
            process,
            lifecycle: LifecycleConfig::default(),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            LaunchEntity::Plain(p) => &p.name,
            LaunchEntity::Managed(m) => &m.process.name,
            LaunchEntity::SubPlan(s) => &s.name,
        }
    }

    /// Lifecycle capability, present for managed processes only
    pub fn lifecycle(&self) -> Option<&LifecycleConfig> {
        match self {
            LaunchEntity::Managed(m) => Some(&m.lifecycle),
            LaunchEntity::Plain(_) | LaunchEntity::SubPlan(_) => None,
        }
    }

    /// Process part of plain and managed entities
    pub fn process(&self) -> Option<&ProcessEntity> {
        match self {
            LaunchEntity::Plain(p) => Some(p),
            LaunchEntity::Managed(m) => Some(&m.process),
            LaunchEntity::SubPlan(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaunchFile;

    #[test]
    fn test_qualified_name() {
        assert_eq!(qualified_name("", "driver"), "driver");
        assert_eq!(qualified_name("sensors", "driver"), "sensors/driver");
        assert_eq!(qualified_name("a/b", "c"), "a/b/c");
    }

    #[test]
    fn test_variant_capabilities() {
        let plain = LaunchEntity::plain(ProcessEntity::new("imu", "bin/imu"));
        let managed = LaunchEntity::managed(ProcessEntity::new("driver", "bin/driver"));

        assert_eq!(plain.name(), "imu");
        assert!(plain.lifecycle().is_none());
        assert!(managed.lifecycle().is_some());
        assert_eq!(managed.process().map(|p| p.name.as_str()), Some("driver"));
    }

    #[test]
    fn test_from_node_renders_values() {
        let yaml = r#"
nodes:
  imu:
    package: imu_pub
    binary: imu_node
    parameters:
      rate: 100
      frame_id: imu_link
    args:
      verbose: true
"#;
        let launch_file = LaunchFile::from_yaml(yaml).unwrap();
        let entity = ProcessEntity::from_node("imu", &launch_file.nodes["imu"]);

        assert_eq!(
            entity.executable,
            ExecutableRef::Package {
                package: "imu_pub".into(),
                binary: "imu_node".into()
            }
        );
        assert_eq!(entity.parameters["rate"], "100");
        assert_eq!(entity.parameters["frame_id"], "imu_link");
        assert_eq!(entity.args["verbose"], "true");
    }
}
