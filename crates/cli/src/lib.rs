pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use adpilot_core::config::{AppConfig, LoadOptions, LogFormat};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "adpilot",
    about = "Adpilot operator CLI",
    long_about = "Operate the guarded execution pipeline: run candidate-action batches, \
        rollback sweeps, migrations, and readiness checks.",
    after_help = "Examples:\n  adpilot execute --input actions.json --policy policy.json\n  adpilot execute --input actions.json --policy policy.json --live\n  adpilot sweep --policy policy.json --metrics metrics.json\n  adpilot doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run a guarded batch of candidate actions in dry-run or live mode")]
    Execute {
        #[arg(long, help = "Path to a JSON array of candidate actions")]
        input: PathBuf,
        #[arg(long, default_value = "policy.json", help = "Path to the client policy JSON")]
        policy: PathBuf,
        #[arg(long, help = "Apply mutations instead of simulating them")]
        live: bool,
    },
    #[command(about = "Run a rollback monitoring sweep against a performance metrics snapshot")]
    Sweep {
        #[arg(long, default_value = "policy.json", help = "Path to the client policy JSON")]
        policy: PathBuf,
        #[arg(long, help = "Path to a JSON metrics snapshot backing the performance store")]
        metrics: Option<PathBuf>,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load deterministic demo ledger fixtures")]
    Seed,
    #[command(about = "Validate config, ledger connectivity, and mutation-client readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
}

pub fn run() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Execute { input, policy, live } => commands::execute::run(&input, &policy, live),
        Command::Sweep { policy, metrics } => commands::sweep::run(&policy, metrics.as_deref()),
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

fn init_tracing() {
    let (level, format) = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => (config.logging.level, config.logging.format),
        Err(_) => ("info".to_string(), LogFormat::Compact),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let initialized = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    // A second init (tests, embedding) is fine to ignore.
    let _ = initialized;
}
