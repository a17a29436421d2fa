//! Command-line entry point: `relay start|migrate|version` (spec §6.5).

mod cli;
mod migrate_cmd;
mod run_cmd;

pub use cli::handle_cli;
