pub mod database;
pub mod entities;
pub mod migration;

pub use database::{run_migrations, ClusterHealth, InsertOutcome, Store};
