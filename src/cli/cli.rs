use super::migrate_cmd::MigrateCmd;
use super::run_cmd::RunCmd;
use crate::common::consts;
use clap::{Parser, Subcommand};

/// Top-level relay CLI.
#[derive(Parser, Debug)]
#[command(name = "relay", version = consts::CLI_VERSION, about = "Shugur Nostr relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Subcommands, matching spec §6.5: `start`, `migrate`, `version`.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the relay server.
    Start(RunCmd),

    /// Run database migrations and exit.
    Migrate(MigrateCmd),

    /// Print the relay version and exit.
    Version,
}

/// CLI entry point. Returns the process exit code (spec §6.5: 0 on success,
/// non-zero on config validation failure or bind failure).
pub async fn handle_cli() -> i32 {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Start(cmd)) => cmd.run().await,
        Some(Commands::Migrate(cmd)) => cmd.run().await,
        Some(Commands::Version) => {
            println!("{} {}", consts::SOFTWARE_NAME, consts::CLI_VERSION);
            0
        }
        None => {
            eprintln!("need a subcommand: start, migrate, or version (use --help)");
            2
        }
    }
}
