//! Parameter files handed to launched processes

use indexmap::IndexMap;
use serde_yaml::Value;
use std::path::{Path, PathBuf};

/// Flat parameter mapping: dotted key to rendered value
pub type ParameterMap = IndexMap<String, String>;

/// Source of parameter files
pub trait ParameterSource {
    fn load_parameters(&self, path: &Path) -> Result<ParameterMap, ParameterLoadError>;
}

/// Reads YAML parameter files from disk.
///
/// Nested mappings are flattened into dotted keys, scalars are rendered as
/// strings and sequences as JSON arrays.
#[derive(Debug, Clone, Default)]
pub struct YamlParameterFiles {
    /// Base for relative paths
    base_dir: Option<PathBuf>,
}

impl YamlParameterFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    fn full_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

impl ParameterSource for YamlParameterFiles {
    fn load_parameters(&self, path: &Path) -> Result<ParameterMap, ParameterLoadError> {
        let path = self.full_path(path);
        let content = std::fs::read_to_string(&path).map_err(|e| ParameterLoadError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        parse_parameters(&content).map_err(|e| e.at(&path))
    }
}

/// Parse a YAML parameter document into a flat mapping
pub fn parse_parameters(content: &str) -> Result<ParameterMap, ParameterLoadError> {
    let value: Value = serde_yaml::from_str(content).map_err(|e| ParameterLoadError::Parse {
        path: String::new(),
        source: e,
    })?;

    let mut params = ParameterMap::new();
    match value {
        Value::Mapping(_) => flatten("", &value, &mut params)?,
        Value::Null => {}
        _ => {
            return Err(ParameterLoadError::NotAMapping {
                path: String::new(),
            })
        }
    }
    Ok(params)
}

fn flatten(prefix: &str, value: &Value, out: &mut ParameterMap) -> Result<(), ParameterLoadError> {
    match value {
        Value::Mapping(map) => {
            for (key, child) in map {
                let key = scalar_to_string(key).ok_or_else(|| ParameterLoadError::InvalidKey {
                    path: String::new(),
                    key: format!("{:?}", key),
                })?;
                let full_key = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&full_key, child, out)?;
            }
        }
        Value::Tagged(tagged) => flatten(prefix, &tagged.value, out)?,
        other => {
            let rendered = match scalar_to_string(other) {
                Some(s) => s,
                None => serde_json::to_string(other).map_err(|e| ParameterLoadError::Render {
                    key: prefix.to_string(),
                    source: e,
                })?,
            };
            out.insert(prefix.to_string(), rendered);
        }
    }
    Ok(())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

/// Errors that can occur when loading a parameter file
#[derive(Debug, thiserror::Error)]
pub enum ParameterLoadError {
    #[error("Failed to read parameter file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse parameter file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Parameter file '{path}' is not a mapping")]
    NotAMapping { path: String },

    #[error("Parameter file '{path}' has a non-scalar key {key}")]
    InvalidKey { path: String, key: String },

    #[error("Cannot render parameter '{key}': {source}")]
    Render {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ParameterLoadError {
    /// Attach the file path to an error raised while parsing its content
    fn at(self, file: &Path) -> Self {
        let file = file.display().to_string();
        match self {
            ParameterLoadError::Parse { source, .. } => ParameterLoadError::Parse { path: file, source },
            ParameterLoadError::NotAMapping { .. } => ParameterLoadError::NotAMapping { path: file },
            ParameterLoadError::InvalidKey { key, .. } => ParameterLoadError::InvalidKey { path: file, key },
            other => other,
        }
    }
}
