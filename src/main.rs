use anyhow::{Context, Result};
use clap::Parser;
use dirsort::cli::{Cli, CommandReport, OrganizeCommand, run_cli};
use dirsort::config::OrganizerConfig;
use dirsort::logging::setup_logging;
use dirsort::output::ConsoleReporter;
use dirsort::watch::ShutdownSignal;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(&cli) {
        Ok(report) if report.has_failures() => ExitCode::from(2),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "aborted");
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> Result<CommandReport> {
    let config = OrganizerConfig::load(cli.config.as_deref())
        .context("Failed to load configuration")?
        .compile()
        .context("Invalid configuration")?;

    let command = cli.selected_command();
    let shutdown = ShutdownSignal::new();
    if matches!(command, OrganizeCommand::Watch { .. }) {
        let signal = shutdown.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutdown requested");
            signal.trigger();
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    let reporter = ConsoleReporter::new(cli.verbose);
    let report = run_cli(command, &config, &reporter, shutdown)?;
    Ok(report)
}
