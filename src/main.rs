use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use imbi_automations::cli::Cli;
use imbi_automations::{Automation, Configuration, Error, RunOptions, Workflow, VERSION};

fn configure_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        // HTTP stack internals are noisy at debug.
        .filter_module("hyper", log::LevelFilter::Warn)
        .filter_module("hyper_util", log::LevelFilter::Warn)
        .filter_module("reqwest", log::LevelFilter::Warn)
        .filter_module("rustls", log::LevelFilter::Warn)
        .init();
}

fn exit_code_for(error: &Error) -> ExitCode {
    match error {
        Error::Config(_) | Error::NotImplemented(_) => ExitCode::from(2),
        _ => ExitCode::from(1),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    configure_logging(cli.verbose);

    let mut configuration = match Configuration::load(&cli.config) {
        Ok(configuration) => configuration,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::from(2);
        }
    };
    if cli.preserve_on_error {
        configuration.preserve_on_error = true;
    }
    if let Some(error_dir) = &cli.error_dir {
        configuration.error_dir = error_dir.clone();
    }

    if !cli.workflow.is_dir() || !cli.workflow.join("config.toml").is_file() {
        log::error!("Invalid workflow path: {}", cli.workflow.display());
        return ExitCode::from(2);
    }
    let workflow = match Workflow::load(&cli.workflow) {
        Ok(workflow) => workflow,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::from(2);
        }
    };

    let automation = match Automation::new(
        Arc::new(configuration),
        Arc::new(workflow),
        RunOptions {
            target: cli.target.target(),
            max_concurrency: cli.max_concurrency,
            exit_on_error: cli.exit_on_error,
            start_from_project: cli.start_from_project.clone(),
        },
    ) {
        Ok(automation) => automation,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::from(2);
        }
    };

    log::info!("Imbi Automations v{VERSION} starting");
    tokio::select! {
        result = automation.run() => match result {
            Ok(summary) => {
                log::info!(
                    "Completed: {} succeeded, {} skipped, {} failed",
                    summary.succeeded,
                    summary.skipped,
                    summary.failed
                );
                if summary.success() {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::from(1)
                }
            }
            Err(err) => {
                log::error!("{err}");
                exit_code_for(&err)
            }
        },
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted, exiting");
            ExitCode::from(1)
        }
    }
}
