//! Launch argument declarations and their resolution

use crate::config::substitution::{SubstitutionContext, SubstitutionError};
use indexmap::IndexMap;
use std::collections::HashMap;

/// A declared launch argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchArgument {
    pub name: String,
    pub default: Option<String>,
    pub description: String,
}

impl LaunchArgument {
    /// Argument that must be supplied by an override
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            description: String::new(),
        }
    }

    pub fn with_default(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: Some(default.into()),
            description: String::new(),
        }
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Looks up argument values within one composition scope
#[derive(Debug, Clone, Copy)]
pub struct ArgumentResolver<'a> {
    declarations: &'a [LaunchArgument],
}

impl<'a> ArgumentResolver<'a> {
    pub fn new(declarations: &'a [LaunchArgument]) -> Self {
        Self { declarations }
    }

    /// Raw value of `name`: the override if present, otherwise the default
    pub fn resolve(
        &self,
        name: &str,
        overrides: &HashMap<String, String>,
    ) -> Result<String, ArgumentError> {
        let declaration = self
            .declarations
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| ArgumentError::UnknownArgument(name.to_string()))?;

        overrides
            .get(name)
            .or(declaration.default.as_ref())
            .cloned()
            .ok_or_else(|| ArgumentError::MissingArgumentValue(name.to_string()))
    }

    /// Resolve every declared argument once.
    ///
    /// Defaults may refer to earlier arguments with `$(arg ...)` and to the
    /// environment; override values are taken literally.
    pub fn resolve_all(
        &self,
        overrides: &HashMap<String, String>,
        base: &SubstitutionContext,
    ) -> Result<ResolvedArguments, SubstitutionError> {
        for key in overrides.keys() {
            if !self.declarations.iter().any(|d| &d.name == key) {
                log::debug!("Ignoring override for undeclared argument '{}'", key);
            }
        }

        let mut ctx = base.clone();
        let mut values = IndexMap::new();

        for declaration in self.declarations {
            let raw = self.resolve(&declaration.name, overrides)?;
            let value = if overrides.contains_key(&declaration.name) {
                raw
            } else {
                ctx.substitute(&raw)?
            };
            ctx.args.insert(declaration.name.clone(), value.clone());
            values.insert(declaration.name.clone(), value);
        }

        Ok(ResolvedArguments { values })
    }
}

/// Immutable argument values of one scope for the lifetime of a launch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedArguments {
    values: IndexMap<String, String>,
}

impl ResolvedArguments {
    pub fn get(&self, name: &str) -> Result<&str, ArgumentError> {
        self.values
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| ArgumentError::UnknownArgument(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Errors that can occur when resolving arguments
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArgumentError {
    #[error("Unknown argument: {0}")]
    UnknownArgument(String),

    #[error("No value for argument '{0}': it has no default and was not overridden")]
    MissingArgumentValue(String),
}
