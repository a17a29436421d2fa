//! # Constants Module
//!
//! This module defines all application-wide constants used throughout the project.
//! Keeping constants centralized in this module promotes reusability, maintainability,
//! and avoids magic numbers or hardcoded strings scattered across the codebase.

/// Format string for timestamp used in log file names.
pub const LOG_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Log dir for log files.
pub const LOG_PATH: &str = "logs";

/// Base name for log files.
pub const LOG_BASE_NAME: &str = "relay";

/// Environment variable key to override the default logging level.
pub const LOG_KEY_ENV: &str = "RUST_LOG";

/// Default logging level if `RUST_LOG` environment variable is not set.
pub const LOG_DEFAULT_LEVEL: &str = "info";

/// CLI version string.
pub const CLI_VERSION: &str = "1.0";

/// Default bounded queue depth for the event processor (spec §4.2).
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;

/// Local broadcast channel capacity feeding the dispatcher (spec §4.3).
pub const DISPATCHER_INPUT_CAPACITY: usize = 1_000;

/// Per-subscriber outbound channel capacity (spec §4.3).
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 100;

/// Dispatcher batching flush interval (spec §4.3).
pub const DISPATCH_FLUSH_INTERVAL_MS: u64 = 10;

/// Cross-node polling interval (spec §4.3).
pub const CROSS_NODE_POLL_INTERVAL_SECS: u64 = 2;

/// How long a polled remote event id is remembered to suppress re-publishing
/// it on a later poll tick (spec §4.3). Independent of the long-lived bloom
/// filter, which tracks local inserts for duplicate-insert detection only.
pub const CROSS_NODE_DEDUP_TTL_SECS: u64 = 30;

/// Default backlog/result limit applied to a filter when none is given (spec §4.1).
pub const DEFAULT_QUERY_LIMIT: usize = 500;

/// Expired-event sweep interval (spec §4.1).
pub const EXPIRED_SWEEP_INTERVAL_SECS: u64 = 3_600;

/// Ban sweeper interval (spec §4.6).
pub const BAN_SWEEP_INTERVAL_SECS: u64 = 30;

/// SQL read deadline (spec §5).
pub const SQL_READ_TIMEOUT_SECS: u64 = 5;

/// SQL ingestion-insert deadline (spec §5).
pub const SQL_WRITE_TIMEOUT_SECS: u64 = 3;

/// Pooled connection max lifetime (spec §4.1: "Connections have a max
/// lifetime and max idle time.").
pub const DB_CONN_MAX_LIFETIME_SECS: u64 = 1_800;

/// Pooled connection max idle time before it is closed (spec §4.1).
pub const DB_CONN_IDLE_TIMEOUT_SECS: u64 = 600;

/// Graceful-shutdown HTTP drain window (spec §5).
pub const SHUTDOWN_DRAIN_SECS: u64 = 30;

/// Bloom filter sizing target: expected entries.
pub const BLOOM_EXPECTED_ITEMS: usize = 10_000_000;

/// Bloom filter sizing target: false-positive rate.
pub const BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;

/// Relay software identifier advertised in NIP-11 and version output.
pub const SOFTWARE_NAME: &str = "shugur-relay";

/// Identity key file, relative to the operator's home directory.
pub const IDENTITY_KEY_PATH: &str = ".shugur/relay_id.key";

/// Worker insert retry attempts (spec §4.2).
pub const INSERT_RETRY_ATTEMPTS: u32 = 3;

/// Worker insert retry base backoff in milliseconds (spec §4.2: `50ms * 2^attempt`).
pub const INSERT_RETRY_BASE_MS: u64 = 50;
