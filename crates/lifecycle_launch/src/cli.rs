//! Command-line interface for lifecycle_launch

use argh::FromArgs;
use std::collections::HashMap;
use std::time::Duration;

/// Launch processes and drive lifecycle-managed ones through their states
#[derive(FromArgs, Debug)]
pub struct LaunchArgs {
    /// path to the launch file (default: launch/default.launch.yaml)
    #[argh(positional, default = "String::from(\"launch/default.launch.yaml\")")]
    pub launch_file: String,

    /// override launch arguments (format: key:=value)
    #[argh(option, short = 'a', from_str_fn(parse_arg_override))]
    pub arg: Vec<(String, String)>,

    /// show launch plan without executing
    #[argh(switch)]
    pub dry_run: bool,

    /// validate launch file and exit
    #[argh(switch)]
    pub validate: bool,

    /// run the plan without starting OS processes
    #[argh(switch)]
    pub simulate: bool,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,

    /// deadline for a lifecycle transition in milliseconds (default: 10000)
    #[argh(option, default = "10_000")]
    pub transition_timeout_ms: u64,

    /// time a process gets to exit before it is killed, in milliseconds (default: 5000)
    #[argh(option, default = "5_000")]
    pub shutdown_timeout_ms: u64,
}

/// Parse argument override in format "key:=value"
fn parse_arg_override(s: &str) -> Result<(String, String), String> {
    match s.split_once(":=") {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!(
            "Invalid argument format '{}'. Expected 'key:=value'",
            s
        )),
    }
}

impl LaunchArgs {
    /// Convert argument overrides to a HashMap
    pub fn arg_overrides(&self) -> HashMap<String, String> {
        self.arg.iter().cloned().collect()
    }

    pub fn transition_timeout(&self) -> Duration {
        Duration::from_millis(self.transition_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Filter for env_logger; unknown levels fall back to info
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "info" => "info",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arg_override() {
        let result = parse_arg_override("params_file:=/a/b.yaml");
        assert_eq!(result, Ok(("params_file".to_string(), "/a/b.yaml".to_string())));
    }

    #[test]
    fn test_parse_arg_override_with_separator_in_value() {
        let result = parse_arg_override("url:=http://localhost:8080?a:=b");
        assert_eq!(
            result,
            Ok(("url".to_string(), "http://localhost:8080?a:=b".to_string()))
        );
    }

    #[test]
    fn test_parse_arg_override_invalid() {
        assert!(parse_arg_override("invalid").is_err());
        assert!(parse_arg_override(":=value").is_err());
    }

    #[test]
    fn test_from_args() {
        let args = LaunchArgs::from_args(
            &["lifecycle_launch"],
            &[
                "sensor.launch.yaml",
                "-a",
                "use_rviz:=false",
                "--simulate",
                "-l",
                "DEBUG",
                "--transition-timeout-ms",
                "250",
            ],
        )
        .unwrap();

        assert_eq!(args.launch_file, "sensor.launch.yaml");
        assert_eq!(args.arg_overrides()["use_rviz"], "false");
        assert!(args.simulate);
        assert!(!args.dry_run);
        assert_eq!(args.log_filter(), "debug");
        assert_eq!(args.transition_timeout(), Duration::from_millis(250));
        assert_eq!(args.shutdown_timeout(), Duration::from_secs(5));
    }
}
