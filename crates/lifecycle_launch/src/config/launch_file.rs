//! Launch file YAML schema definitions

use crate::events::{Action, EventHandlerRule};
use crate::runtime::LifecycleProtocol;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Root launch file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchFile {
    /// Launch file format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Identity used to tag Log actions (defaults to the file stem)
    #[serde(default)]
    pub name: Option<String>,

    /// Argument declarations, in declaration order
    #[serde(default)]
    pub args: IndexMap<String, ArgDefinition>,

    /// Environment variables (applied to every node of this file)
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Node definitions (ordered map for deterministic launch order)
    #[serde(default)]
    pub nodes: IndexMap<String, NodeConfig>,

    /// Nested launch files
    #[serde(default)]
    pub includes: IndexMap<String, IncludeConfig>,

    /// Event handler rules, in registration order
    #[serde(default)]
    pub handlers: Vec<EventHandlerRule>,

    /// Actions run once every entity has started
    #[serde(default)]
    pub on_start: Vec<Action>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Argument declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArgDefinition {
    /// Default value; arguments without one must be overridden
    #[serde(default)]
    pub default: Option<ArgValue>,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

/// Argument values can be strings, booleans, or numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ArgValue {
    /// Convert to string representation
    pub fn as_str(&self) -> String {
        match self {
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Int(i) => i.to_string(),
            ArgValue::Float(f) => f.to_string(),
            ArgValue::String(s) => s.clone(),
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Self {
        // Try parsing as bool first
        if s.eq_ignore_ascii_case("true") {
            return ArgValue::Bool(true);
        }
        if s.eq_ignore_ascii_case("false") {
            return ArgValue::Bool(false);
        }
        // Try parsing as integer
        if let Ok(i) = s.parse::<i64>() {
            return ArgValue::Int(i);
        }
        // Try parsing as float
        if let Ok(f) = s.parse::<f64>() {
            return ArgValue::Float(f);
        }
        // Default to string
        ArgValue::String(s.to_string())
    }

    /// Check if value is truthy
    pub fn is_truthy(&self) -> bool {
        match self {
            ArgValue::Bool(b) => *b,
            ArgValue::Int(i) => *i != 0,
            ArgValue::Float(f) => *f != 0.0,
            ArgValue::String(s) => {
                !s.is_empty()
                    && !s.eq_ignore_ascii_case("false")
                    && !s.eq_ignore_ascii_case("0")
                    && !s.eq_ignore_ascii_case("no")
            }
        }
    }
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Package name (cargo workspace member)
    /// Mutually exclusive with `executable`
    #[serde(default)]
    pub package: Option<String>,

    /// Binary name within the package
    /// Required if `package` is set
    #[serde(default)]
    pub binary: Option<String>,

    /// Direct executable path (for non-cargo binaries)
    /// Mutually exclusive with `package`
    #[serde(default)]
    pub executable: Option<String>,

    /// Namespace the process runs in
    #[serde(default)]
    pub namespace: Option<String>,

    /// Raw arguments passed directly to the executable
    #[serde(default)]
    pub raw_args: Vec<String>,

    /// Named arguments (converted to --key value)
    #[serde(default)]
    pub args: IndexMap<String, ArgValue>,

    /// Inline parameters (passed as --param key:=value)
    #[serde(default)]
    pub parameters: IndexMap<String, ArgValue>,

    /// Parameter files, loaded when the plan is resolved
    #[serde(default)]
    pub parameter_files: Vec<String>,

    /// Environment variables specific to this node
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Working directory for the process
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Whether the node is enabled
    /// Can be a boolean or a string like "$(arg use_rviz)"
    #[serde(default = "default_enabled")]
    pub enabled: EnabledValue,

    /// Present for lifecycle-managed nodes
    #[serde(default)]
    pub lifecycle: Option<LifecycleConfig>,
}

/// Lifecycle options of a managed node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default)]
    pub protocol: LifecycleProtocol,

    /// Overrides the launcher-wide transition timeout
    #[serde(default)]
    pub transition_timeout_ms: Option<u64>,
}

/// Nested launch file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncludeConfig {
    /// Path of the nested launch file; relative paths resolve against this file
    pub file: String,

    /// Child argument bindings, evaluated in this file's scope
    #[serde(default)]
    pub args: IndexMap<String, ArgValue>,

    /// Only executed by an `include` action
    #[serde(default)]
    pub deferred: bool,

    #[serde(default = "default_enabled")]
    pub enabled: EnabledValue,
}

fn default_enabled() -> EnabledValue {
    EnabledValue::Bool(true)
}

/// Enabled value can be a direct boolean or a substitution string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnabledValue {
    Bool(bool),
    String(String),
}

impl EnabledValue {
    /// Resolve the enabled value after substitution
    pub fn is_enabled(&self, resolved: Option<&str>) -> bool {
        match self {
            EnabledValue::Bool(b) => *b,
            EnabledValue::String(s) => ArgValue::parse(resolved.unwrap_or(s)).is_truthy(),
        }
    }
}

impl LaunchFile {
    /// Load launch file from a YAML file
    pub fn from_file(path: &str) -> Result<Self, LaunchFileError> {
        let content = std::fs::read_to_string(path).map_err(|e| LaunchFileError::Io {
            path: path.to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse launch file from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, LaunchFileError> {
        let launch_file: LaunchFile =
            serde_yaml::from_str(content).map_err(LaunchFileError::Parse)?;
        launch_file.validate()?;
        Ok(launch_file)
    }

    /// Validate the launch file configuration
    pub fn validate(&self) -> Result<(), LaunchFileError> {
        let names = self.nodes.keys().chain(self.includes.keys());
        for name in names {
            if name.is_empty() || name.contains('/') || name == "*" {
                return Err(LaunchFileError::Validation(format!(
                    "'{}' is not a valid entity name",
                    name
                )));
            }
        }

        for (name, node) in &self.nodes {
            // Check that either package+binary or executable is specified
            match (&node.package, &node.binary, &node.executable) {
                (Some(_), Some(_), None) => {} // package + binary: OK
                (None, None, Some(_)) => {}    // executable: OK
                (Some(_), None, None) => {
                    return Err(LaunchFileError::Validation(format!(
                        "Node '{}': 'package' requires 'binary' to be specified",
                        name
                    )));
                }
                (None, Some(_), None) => {
                    return Err(LaunchFileError::Validation(format!(
                        "Node '{}': 'binary' requires 'package' to be specified",
                        name
                    )));
                }
                (Some(_), _, Some(_)) | (_, Some(_), Some(_)) => {
                    return Err(LaunchFileError::Validation(format!(
                        "Node '{}': cannot specify both 'package'/'binary' and 'executable'",
                        name
                    )));
                }
                (None, None, None) => {
                    return Err(LaunchFileError::Validation(format!(
                        "Node '{}': must specify either 'package'+'binary' or 'executable'",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Names of the lifecycle-managed nodes
    pub fn managed_nodes(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.lifecycle.is_some())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Errors that can occur when loading a launch file
#[derive(Debug, thiserror::Error)]
pub enum LaunchFileError {
    #[error("Failed to read launch file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse launch file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}
