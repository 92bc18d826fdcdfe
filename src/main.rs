mod cli_logger;

use anyhow::Result;
use clap::Parser;
use perfscope::{Config, ProfileCommand, ProfileResponse, profile_command};
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::process::ExitCode;

use cli_logger::CliLogger;

#[derive(Debug, Parser)]
#[command(name = "perfscope", version, about = "Profile a running process with perf")]
struct Cli {
    /// Path to the config file.
    #[arg(long, global = true, default_value = "perfscope.toml")]
    config: PathBuf,

    /// Emit compact JSON instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: ProfileCommand,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let logger = CliLogger::new(cli.json, cli.no_color);
    match run(&cli, &logger) {
        Ok(code) => code,
        Err(err) => {
            logger.print_error(&format!("{err:#}"));
            ExitCode::from(2)
        }
    }
}

fn run(cli: &Cli, logger: &CliLogger) -> Result<ExitCode> {
    let config = Config::load_optional(&cli.config);
    let out = profile_command(&config, &cli.command)?;

    match cli.command {
        ProfileCommand::Profile { .. } => {
            let resp: ProfileResponse = serde_json::from_value(out)?;
            logger.print_profile(&resp)?;
            if !resp.success {
                return Ok(ExitCode::FAILURE);
            }
        }
        ProfileCommand::Parse { .. } => logger.print_report(&out)?,
        ProfileCommand::Env => logger.print_env(&out)?,
    }
    Ok(ExitCode::SUCCESS)
}
