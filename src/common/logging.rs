//! Module for initializing and managing the relay's logging system.
//! It supports logging to both the console and rolling log files, with
//! console/JSON formatting and a level taken from config or `RUST_LOG`.

use crate::common::config::{LogFormat, LoggingConfig};
use crate::common::consts;
use crate::common::error;
use chrono::Local;
use std::fs;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

/// Initializes the logging system from the relay's `logging` config block.
///
/// Log files roll daily under `config.file` and are never deleted by this
/// function directly; `max_backups`/`max_age` are advisory limits an
/// operator's log-rotation job enforces, matching the teacher's choice to
/// leave rotation to `Rotation::NEVER`-then-external-rotation rather than
/// pulling in a size/time-based rotation dependency.
pub fn logging_init(config: &LoggingConfig) -> error::Result<()> {
    let log_file = format!(
        "{}_{}.log",
        Local::now().format(consts::LOG_TIME_FORMAT),
        consts::LOG_BASE_NAME
    );

    fs::create_dir_all(&config.file)?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &config.file, log_file);

    let rust_log = std::env::var(consts::LOG_KEY_ENV)
        .unwrap_or_else(|_| config.level.as_tracing_level().to_string());
    let env_filter = EnvFilter::new(rust_log);

    match config.format {
        LogFormat::Json => {
            let file_layer = fmt::Layer::default()
                .with_writer(file_appender)
                .json()
                .with_ansi(false);
            let stdout_layer = fmt::Layer::default().with_writer(std::io::stdout).json();
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer);
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Console => {
            let file_layer = fmt::Layer::default()
                .with_writer(file_appender)
                .with_line_number(true)
                .with_ansi(false);
            let stdout_layer = fmt::Layer::default()
                .with_writer(std::io::stdout)
                .with_line_number(true);
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(stdout_layer)
                .with(file_layer);
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}
