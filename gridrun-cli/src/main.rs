mod commands;
mod logging;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;

/// Run GitHub Actions-style matrix workflows locally
#[derive(Parser, Debug)]
#[command(name = "gridrun", version, about, long_about = None)]
struct Cli {
    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `GRIDRUN_LOG` or `warn` is used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every matrix instance the event triggers
    Run(commands::run::RunArgs),

    /// List the instances a run would start
    Plan(commands::plan::PlanArgs),

    /// Check a workflow file and print lint findings
    Validate(commands::validate::ValidateArgs),
}

/// Log level as exposed on the CLI
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    logging::init_logging(cli.log_level)?;

    match cli.command {
        Command::Run(args) => commands::run::execute(args).await,
        Command::Plan(args) => commands::plan::execute(args),
        Command::Validate(args) => commands::validate::execute(args),
    }
}
