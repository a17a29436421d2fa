//! `relay migrate` subcommand: applies the event-table schema to a
//! CockroachDB/PostgreSQL-compatible target, given either `--db-url` or
//! `--config-file`.

use crate::common::config;
use crate::db;
use clap::{ArgGroup, Parser};

#[derive(Debug, Clone, Parser)]
#[command(group(ArgGroup::new("exclusive").required(true).args(&["db_url", "config_file"])))]
pub struct MigrateCmd {
    #[arg(short, long)]
    db_url: Option<String>,

    #[arg(short, long)]
    config_file: Option<String>,
}

impl MigrateCmd {
    /// Handles the execution of the migrate subcommand. Returns the process exit code.
    pub async fn run(&self) -> i32 {
        let url = if let Some(db_url) = &self.db_url {
            db_url.clone()
        } else if let Some(config_file) = &self.config_file {
            match config::Config::load_config(config_file.into()) {
                Ok(config) => match config.database.resolved_url() {
                    Ok(url) => url,
                    Err(e) => {
                        eprintln!("config error: {e}");
                        return 1;
                    }
                },
                Err(e) => {
                    eprintln!("config error: {e}");
                    return 1;
                }
            }
        } else {
            unreachable!("clap enforces db_url xor config_file");
        };

        match db::run_migrations(&url).await {
            Ok(()) => {
                println!("migrations applied");
                0
            }
            Err(e) => {
                eprintln!("migration failed: {e}");
                1
            }
        }
    }
}
