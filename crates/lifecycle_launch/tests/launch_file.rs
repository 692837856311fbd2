//! Launch files on disk: includes, bindings, plans and execution

mod common;

use common::{logs, orchestrator, scratch_dir};
use lifecycle_launch::{
    ArgumentError, Composition, CompositionError, LifecycleState, ScriptedLauncher,
    YamlParameterFiles,
};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const ROBOT: &str = r#"
version: "1.0"
args:
  robot:
    default: "rover"
    description: "Robot model"
  use_camera:
    default: false

includes:
  sensor:
    file: "sensor.launch.yaml"
    args:
      params_file: "$(dirname)/params/$(arg robot).yaml"
  camera:
    file: "camera.launch.yaml"
    enabled: "$(arg use_camera)"

nodes:
  imu:
    executable: "bin/imu"
    args:
      rate: 100
"#;

const SENSOR: &str = r#"
name: sensor
args:
  params_file: {}

nodes:
  ouster_driver:
    executable: "bin/ouster_driver"
    namespace: "lidar"
    lifecycle: {}
    parameter_files: ["$(arg params_file)"]
    parameters:
      frame_id: "os_sensor"

handlers:
  - on:
      state_transition: { entity: ouster_driver, goal_state: inactive }
    actions:
      - log: "Ouster driver node is activating."
      - emit: { change_state: { target: ouster_driver, transition: activate } }
  - on: shutdown
    actions:
      - emit: { change_state: { target: "*", transition: shutdown } }
      - log: "Ouster driver node is exiting."

on_start:
  - emit: { change_state: { target: ouster_driver, transition: configure } }
"#;

const CAMERA: &str = r#"
nodes:
  cam:
    executable: "bin/cam"
"#;

const ROVER_PARAMS: &str = r#"
lidar:
  mode: "1024x10"
  range_max: 120.5
"#;

fn write(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn robot_dir(test: &str) -> TempDir {
    let dir = scratch_dir(test);
    write(dir.path(), "robot.launch.yaml", ROBOT);
    write(dir.path(), "sensor.launch.yaml", SENSOR);
    write(dir.path(), "camera.launch.yaml", CAMERA);
    write(dir.path(), "params/rover.yaml", ROVER_PARAMS);
    dir
}

#[test]
fn test_binding_is_evaluated_in_parent_scope() {
    let dir = robot_dir("binding");
    let composition = Composition::from_file(dir.path().join("robot.launch.yaml")).unwrap();
    assert_eq!(composition.identity(), "robot");

    let plan = composition
        .resolve(&HashMap::new(), &YamlParameterFiles::new())
        .unwrap();
    let sensor = plan.scope("sensor").unwrap();
    let expected = format!("{}/params/rover.yaml", dir.path().display());
    assert_eq!(sensor.arguments.get("params_file").unwrap(), expected);
    // The parent's own arguments do not leak into the child
    assert!(sensor.arguments.get("robot").is_err());

    let driver = plan.process("sensor/ouster_driver").unwrap();
    assert!(driver.is_managed());
    assert_eq!(driver.parameters["lidar.mode"], "1024x10");
    assert_eq!(driver.parameters["lidar.range_max"], "120.5");
    assert_eq!(driver.parameters["frame_id"], "os_sensor");
    assert_eq!(driver.config.namespace.as_deref(), Some("lidar"));
    assert!(driver
        .config
        .args
        .windows(2)
        .any(|w| w[0] == "--param" && w[1] == "lidar.mode:=1024x10"));

    let imu = plan.process("imu").unwrap();
    assert_eq!(imu.config.args, ["--rate", "100"]);
}

#[test]
fn test_override_changes_bound_value() {
    let dir = robot_dir("override");
    write(dir.path(), "params/crawler.yaml", "lidar:\n  mode: \"512x20\"\n");
    let composition = Composition::from_file(dir.path().join("robot.launch.yaml")).unwrap();

    let overrides = HashMap::from([("robot".to_string(), "crawler".to_string())]);
    let plan = composition
        .resolve(&overrides, &YamlParameterFiles::new())
        .unwrap();
    let driver = plan.process("sensor/ouster_driver").unwrap();
    assert_eq!(driver.parameters["lidar.mode"], "512x20");
}

#[test]
fn test_missing_parameter_file_aborts_resolution() {
    let dir = robot_dir("missing_params");
    let composition = Composition::from_file(dir.path().join("robot.launch.yaml")).unwrap();

    let overrides = HashMap::from([("robot".to_string(), "hexapod".to_string())]);
    let result = composition.resolve(&overrides, &YamlParameterFiles::new());
    assert!(matches!(
        result,
        Err(CompositionError::ParameterLoad { ref entity, .. }) if entity == "sensor/ouster_driver"
    ));
}

#[test]
fn test_child_without_binding_misses_argument() {
    let dir = scratch_dir("unbound");
    write(
        dir.path(),
        "robot.launch.yaml",
        "includes:\n  sensor:\n    file: sensor.launch.yaml\n",
    );
    write(dir.path(), "sensor.launch.yaml", SENSOR);
    let composition = Composition::from_file(dir.path().join("robot.launch.yaml")).unwrap();

    let result = composition.resolve(&HashMap::new(), &YamlParameterFiles::new());
    assert!(matches!(
        result,
        Err(CompositionError::Argument {
            source: ArgumentError::MissingArgumentValue(ref name),
            ..
        }) if name == "params_file"
    ));
}

#[test]
fn test_disabled_include_is_skipped() {
    let dir = robot_dir("disabled");
    let composition = Composition::from_file(dir.path().join("robot.launch.yaml")).unwrap();

    let plan = composition
        .resolve(&HashMap::new(), &YamlParameterFiles::new())
        .unwrap();
    assert!(plan.scope("camera").is_none());
    assert!(plan.process("camera/cam").is_none());

    let overrides = HashMap::from([("use_camera".to_string(), "true".to_string())]);
    let plan = composition
        .resolve(&overrides, &YamlParameterFiles::new())
        .unwrap();
    assert!(plan.process("camera/cam").is_some());
}

#[test]
fn test_dry_run_output() {
    let dir = robot_dir("dry_run");
    let composition = Composition::from_file(dir.path().join("robot.launch.yaml")).unwrap();
    let plan = composition
        .resolve(&HashMap::new(), &YamlParameterFiles::new())
        .unwrap();

    let output = plan.to_string();
    assert!(output.starts_with("Launch Plan: robot"));
    assert!(output.contains("Sub-plan 'sensor'"));
    assert!(output.contains("sensor/ouster_driver [managed, stdio]"));
    assert!(output.contains("imu [plain]"));
    assert!(output.contains("Disabled: camera"));
}

#[test]
fn test_unknown_rule_target_is_rejected_on_load() {
    let dir = scratch_dir("unknown_target");
    write(
        dir.path(),
        "bad.launch.yaml",
        r#"
nodes:
  imu:
    executable: "bin/imu"
on_start:
  - emit: { change_state: { target: lidar, transition: configure } }
"#,
    );
    let result = Composition::from_file(dir.path().join("bad.launch.yaml"));
    assert!(matches!(
        result,
        Err(CompositionError::UnknownEntity { ref name, .. }) if name == "lidar"
    ));
}

#[test]
fn test_missing_include_file() {
    let dir = scratch_dir("missing_include");
    write(
        dir.path(),
        "robot.launch.yaml",
        "includes:\n  sensor:\n    file: nowhere.launch.yaml\n",
    );
    let result = Composition::from_file(dir.path().join("robot.launch.yaml"));
    assert!(matches!(result, Err(CompositionError::LaunchFile(_))));
}

#[test]
fn test_rules_from_file_drive_the_sub_plan() {
    let dir = robot_dir("rules");
    let composition = Composition::from_file(dir.path().join("robot.launch.yaml")).unwrap();
    let mut orch = orchestrator(composition, ScriptedLauncher::new());
    orch.execute().unwrap();

    assert_eq!(orch.started(), ["sensor/ouster_driver", "imu"]);
    assert_eq!(orch.state("sensor/ouster_driver"), Some(LifecycleState::Active));

    orch.request_shutdown("signal received").unwrap();
    assert_eq!(
        orch.state("sensor/ouster_driver"),
        Some(LifecycleState::Finalized)
    );
    assert_eq!(
        logs(&orch),
        vec![
            "Ouster driver node is activating.",
            "Ouster driver node is exiting."
        ]
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_os_processes_speak_stdio_protocol() {
    use lifecycle_launch::{OrchestratorConfig, Orchestrator, OsProcessLauncher, ShutdownSignal};
    use std::time::Duration;

    let dir = scratch_dir("stdio");
    write(
        dir.path(),
        "echo.launch.yaml",
        r#"
nodes:
  driver:
    executable: "/bin/sh"
    raw_args: ["-c", "while read -r kind t; do echo \"lifecycle ok $t\"; done"]
    lifecycle: {}

handlers:
  - on:
      state_transition: { entity: driver, goal_state: inactive }
    actions:
      - emit: { change_state: { target: driver, transition: activate } }
  - on:
      state_transition: { entity: driver, goal_state: active }
    actions:
      - log: "driver is active"
      - emit: { shutdown: { reason: "driver is active" } }
  - on: shutdown
    actions:
      - emit: { change_state: { target: "*", transition: shutdown } }

on_start:
  - emit: { change_state: { target: driver, transition: configure } }
"#,
    );

    let plan = Composition::from_file(dir.path().join("echo.launch.yaml"))
        .unwrap()
        .resolve(&HashMap::new(), &YamlParameterFiles::new())
        .unwrap();
    let config = OrchestratorConfig {
        poll_interval: Duration::from_millis(20),
        shutdown_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let mut orch = Orchestrator::new(plan, OsProcessLauncher::new(dir.path()), config).unwrap();

    tokio::time::timeout(Duration::from_secs(10), orch.run(ShutdownSignal::new()))
        .await
        .expect("run finishes")
        .unwrap();

    assert_eq!(orch.state("driver"), Some(LifecycleState::Finalized));
    assert!(orch.bus().logs().any(|m| m == "driver is active"));
    assert!(orch.all_exited());
}
