use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "chronicle", version, about = "Chronicle audit trail CLI")]
struct Cli {
    /// Configuration file.
    #[arg(
        short,
        long,
        global = true,
        env = "CHRONICLE_CONFIG",
        default_value = "chronicle.yaml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration file (schema, mappings, policy/sink combinations).
    Check,

    /// Replay a JSON change-set through one audit scope.
    Replay {
        /// Change-set file: {"context": "...", "entries": [...]}
        changes: PathBuf,

        /// Operation name used in the event type label.
        #[arg(long, default_value = "replay")]
        operation: String,

        /// Print the final event as JSON instead of a log line.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Check => commands::check::run(&cli.config)?,

        Command::Replay {
            changes,
            operation,
            json,
        } => {
            commands::check::run_quiet(&cli.config).and_then(|results| {
                if results.has_errors() {
                    anyhow::bail!(
                        "Configuration has {} error(s). Run `chronicle check` for details.",
                        results.error_count()
                    );
                }
                Ok(())
            })?;

            commands::replay::run(commands::replay::ReplayOptions {
                config_path: &cli.config,
                changes_path: &changes,
                operation: &operation,
                json,
            })
            .await?
        }
    }

    Ok(())
}
