//! lifecycle_launch CLI
//!
//! Usage:
//!   lifecycle_launch launch/sensor.launch.yaml
//!   lifecycle_launch launch/sensor.launch.yaml -a params_file:=/a/b.yaml
//!   lifecycle_launch launch/sensor.launch.yaml --dry-run
//!   lifecycle_launch launch/sensor.launch.yaml --simulate

use lifecycle_launch::{
    Composition, LaunchArgs, LaunchError, LaunchPlan, OrchestratorConfig, Orchestrator,
    OsProcessLauncher, ProcessLauncher, ScriptedLauncher, ShutdownSignal, YamlParameterFiles,
};
use std::error::Error;

#[tokio::main]
async fn main() {
    let args: LaunchArgs = argh::from_env();

    // Initialize logging
    let env = env_logger::Env::default().default_filter_or(args.log_filter());
    env_logger::init_from_env(env);

    // Load launch file
    log::info!("Loading launch file: {}", args.launch_file);
    let composition = match Composition::from_file(&args.launch_file) {
        Ok(c) => c,
        Err(e) => fail("Failed to load launch file", &e),
    };

    // Validate only mode
    if args.validate {
        let managed = composition
            .entities()
            .iter()
            .filter(|e| e.lifecycle().is_some())
            .count();
        println!("Launch file '{}' is valid", args.launch_file);
        println!("  Identity: {}", composition.identity());
        println!("  Args: {}", composition.arguments().len());
        println!("  Entities: {} ({} managed)", composition.entities().len(), managed);
        println!("  Handlers: {}", composition.rules().len());
        return;
    }

    let plan = match composition.resolve(&args.arg_overrides(), &YamlParameterFiles::new()) {
        Ok(plan) => plan,
        Err(e) => fail("Failed to resolve launch plan", &e),
    };

    // Dry run mode
    if args.dry_run {
        println!("{}", plan);
        return;
    }

    let signal = ShutdownSignal::new();
    if let Err(e) = signal.install_ctrlc() {
        fail("Error setting Ctrl+C handler", &e);
    }

    let config = OrchestratorConfig {
        transition_timeout: args.transition_timeout(),
        shutdown_timeout: args.shutdown_timeout(),
        ..Default::default()
    };

    let result = if args.simulate {
        log::info!("Simulating: no processes will be started");
        run(plan, ScriptedLauncher::new(), config, signal).await
    } else {
        run(plan, OsProcessLauncher::default(), config, signal).await
    };

    if let Err(e) = result {
        fail("Launch failed", &e);
    }
    log::info!("lifecycle_launch exiting");
}

async fn run<L: ProcessLauncher>(
    plan: LaunchPlan,
    launcher: L,
    config: OrchestratorConfig,
    signal: ShutdownSignal,
) -> Result<(), LaunchError> {
    let mut orchestrator = Orchestrator::new(plan, launcher, config)?;
    orchestrator.run(signal).await
}

/// Log the error with its causes and exit with status 1
fn fail(context: &str, error: &dyn Error) -> ! {
    log::error!("{}: {}", context, error);
    let mut source = error.source();
    while let Some(cause) = source {
        log::error!("  caused by: {}", cause);
        source = cause.source();
    }
    std::process::exit(1);
}
