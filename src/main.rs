use std::{io::Write, process};

use mapcache::{
    application::{
        error::AppError,
        simulate::{self, SimulationPlan},
    },
    config,
    infra::{error::InfraError, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args.command.unwrap_or(config::Command::Describe);

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Describe => run_describe(&settings),
        config::Command::Simulate(args) => run_simulate(&settings, &args),
    }
}

fn run_describe(settings: &config::Settings) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(&settings.caches)
        .map_err(|err| AppError::unexpected(format!("failed to render definitions: {err}")))?;
    write_stdout(&rendered)
}

fn run_simulate(settings: &config::Settings, args: &config::SimulateArgs) -> Result<(), AppError> {
    let plan = SimulationPlan::from_args(args)?;
    let report = simulate::run(&settings.caches, &plan)?;

    info!(
        target = "mapcache::simulate",
        commits = report.commits,
        rollbacks = report.rollbacks,
        lock_timeouts = report.lock_timeouts,
        suppressed_releases = report.suppressed_releases,
        "Simulation completed"
    );

    let rendered = serde_json::to_string_pretty(&report)
        .map_err(|err| AppError::unexpected(format!("failed to render report: {err}")))?;
    write_stdout(&rendered)
}

fn write_stdout(rendered: &str) -> Result<(), AppError> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{rendered}").map_err(InfraError::from)?;
    Ok(())
}
