//! Substitution engine for $(arg), $(env) and $(dirname) patterns

use crate::config::arguments::{ArgumentError, ResolvedArguments};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Regex for matching substitution patterns: $(type value)
static SUBSTITUTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\((\w+)\s+([^)]+)\)|\$\((\w+)\)").unwrap());

/// Substitution context containing all available variables
#[derive(Debug, Clone, Default)]
pub struct SubstitutionContext {
    /// Launch arguments of the current scope
    pub args: HashMap<String, String>,
    /// Additional environment variables
    pub env: HashMap<String, String>,
    /// Directory of the launch file being resolved
    pub dirname: Option<String>,
}

impl SubstitutionContext {
    /// Create a new substitution context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Add every resolved argument of a scope
    pub fn with_args(mut self, args: &ResolvedArguments) -> Self {
        self.args
            .extend(args.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    /// Add an environment variable
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Add multiple environment variables
    pub fn with_envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(envs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_dirname(mut self, dirname: impl Into<String>) -> Self {
        self.dirname = Some(dirname.into());
        self
    }

    /// Substitute every pattern of `input` in one pass.
    ///
    /// Substituted values are not scanned again: argument and environment
    /// values holding `$(...)` are inserted as they are.
    pub fn substitute(&self, input: &str) -> Result<String, SubstitutionError> {
        let mut output = String::with_capacity(input.len());
        let mut copied = 0;
        for caps in SUBSTITUTION_PATTERN.captures_iter(input) {
            let Some(pattern) = caps.get(0) else {
                continue;
            };
            output.push_str(&input[copied..pattern.start()]);
            output.push_str(&self.resolve_capture(&caps)?);
            copied = pattern.end();
        }
        output.push_str(&input[copied..]);
        Ok(output)
    }

    /// `$(type value)` or `$(type)`
    fn resolve_capture(&self, caps: &Captures) -> Result<String, SubstitutionError> {
        match (caps.get(1), caps.get(2), caps.get(3)) {
            (Some(kind), Some(value), _) => self.resolve_typed(kind.as_str(), value.as_str().trim()),
            (_, _, Some(kind)) => self.resolve_typed(kind.as_str(), ""),
            _ => Err(SubstitutionError::InvalidPattern(
                caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default(),
            )),
        }
    }

    /// Resolve a typed substitution
    fn resolve_typed(&self, subst_type: &str, value: &str) -> Result<String, SubstitutionError> {
        match subst_type {
            "arg" => self.resolve_arg(value),
            "env" => self.resolve_env(value),
            "dirname" => self
                .dirname
                .clone()
                .ok_or(SubstitutionError::NoDirname),
            _ => Err(SubstitutionError::UnknownType(subst_type.to_string())),
        }
    }

    /// Resolve an argument reference
    fn resolve_arg(&self, name: &str) -> Result<String, SubstitutionError> {
        self.args
            .get(name)
            .cloned()
            .ok_or_else(|| ArgumentError::UnknownArgument(name.to_string()).into())
    }

    /// Resolve an environment variable reference
    fn resolve_env(&self, name: &str) -> Result<String, SubstitutionError> {
        // First check our local env overrides
        if let Some(value) = self.env.get(name) {
            return Ok(value.clone());
        }

        // Then check system environment
        std::env::var(name).map_err(|_| SubstitutionError::UndefinedEnv(name.to_string()))
    }
}

/// Errors that can occur during substitution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubstitutionError {
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error("Unknown substitution type: {0}")]
    UnknownType(String),

    #[error("Undefined environment variable: {0}")]
    UndefinedEnv(String),

    #[error("$(dirname) used outside of a launch file")]
    NoDirname,

    #[error("Invalid substitution pattern: {0}")]
    InvalidPattern(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_substitution() {
        let ctx = SubstitutionContext::new().with_arg("params_file", "driver.yaml");

        let result = ctx.substitute("$(arg params_file)").unwrap();
        assert_eq!(result, "driver.yaml");
    }

    #[test]
    fn test_env_substitution() {
        let ctx = SubstitutionContext::new().with_env("MY_VAR", "my_value");

        let result = ctx.substitute("$(env MY_VAR)").unwrap();
        assert_eq!(result, "my_value");
    }

    #[test]
    fn test_dirname_substitution() {
        let ctx = SubstitutionContext::new().with_dirname("/opt/launch");

        let result = ctx.substitute("$(dirname)/params.yaml").unwrap();
        assert_eq!(result, "/opt/launch/params.yaml");

        let result = SubstitutionContext::new().substitute("$(dirname)");
        assert_eq!(result, Err(SubstitutionError::NoDirname));
    }

    #[test]
    fn test_multiple_substitutions() {
        let ctx = SubstitutionContext::new()
            .with_arg("prefix", "data")
            .with_env("SUFFIX", "log");

        let result = ctx.substitute("$(arg prefix)_$(env SUFFIX)").unwrap();
        assert_eq!(result, "data_log");
    }

    #[test]
    fn test_undefined_arg_error() {
        let ctx = SubstitutionContext::new();

        let result = ctx.substitute("$(arg undefined)");
        assert_eq!(
            result,
            Err(SubstitutionError::Argument(ArgumentError::UnknownArgument(
                "undefined".into()
            )))
        );
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let ctx = SubstitutionContext::new()
            .with_arg("outer", "$(arg inner)")
            .with_arg("inner", "resolved");

        let result = ctx.substitute("$(arg outer)/x").unwrap();
        assert_eq!(result, "$(arg inner)/x");
    }

    #[test]
    fn test_no_substitution_needed() {
        let ctx = SubstitutionContext::new();

        let result = ctx.substitute("plain string").unwrap();
        assert_eq!(result, "plain string");
    }
}
