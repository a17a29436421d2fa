//! `relay start` subcommand: loads config, starts logging, builds the
//! composition root, and runs the relay server until shutdown.

use crate::common::config;
use crate::node::Node;
use clap::Parser;

#[derive(Debug, Clone, Parser)]
pub struct RunCmd {
    /// Path to the YAML configuration file.
    #[arg(short, long, value_name = "FILE", required = true)]
    config_file: String,

    /// Overrides `logging.level` from the config file.
    #[arg(long = "log-level")]
    log_level: Option<String>,
}

impl RunCmd {
    /// Runs the relay. Returns the process exit code.
    pub async fn run(&self) -> i32 {
        let mut config = match config::Config::load_config(self.config_file.clone().into()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("config error: {e}");
                return 1;
            }
        };

        if let Some(level) = &self.log_level {
            config.logging.level = match level.to_lowercase().as_str() {
                "debug" => config::LogLevel::Debug,
                "warn" => config::LogLevel::Warn,
                "error" => config::LogLevel::Error,
                "fatal" => config::LogLevel::Fatal,
                _ => config::LogLevel::Info,
            };
        }

        if let Err(e) = crate::common::logging::logging_init(&config.logging) {
            eprintln!("failed to initialize logging: {e}");
            return 1;
        }

        let node = match Node::new(config).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "failed to build relay node");
                return 1;
            }
        };

        match node.run().await {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!(error = %e, "relay server exited with an error");
                1
            }
        }
    }
}
