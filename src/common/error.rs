//! Module defining common error types and error handling utilities for the relay.
//!
//! This module provides a standardized way to handle errors using the `thiserror` crate.
//! It defines a custom `Error` enum for every fallible internal operation and a
//! `Result` type alias used throughout the crate. Nothing here is ever shown
//! verbatim to a connected client: `Error::client_category` collapses every
//! variant to one of the wire-protocol categories in spec §7.

use std::path::PathBuf;
use thiserror::Error;

/// A convenient type alias for results used throughout the relay.
pub type Result<T> = std::result::Result<T, Error>;

/// Enumeration of possible errors in the relay.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing config file at the specified path.
    #[error("no config found at this path: {0}")]
    ConfigMissing(PathBuf),

    #[error("config deserialization error: {0}")]
    SerializationError(#[from] serde_yaml::Error),

    /// Config loaded but failed a cross-field invariant (§6.4).
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// I/O error encountered during operations.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error encountered while setting up the tracing system.
    #[error("tracing error: {0}")]
    TracingError(#[from] tracing::dispatcher::SetGlobalDefaultError),

    /// Custom error with a descriptive string message.
    #[error("{0}")]
    CustomError(String),

    /// secp256k1 key or signature error (event id/sig verification, AUTH challenges).
    #[error(transparent)]
    Secp256k1Error(#[from] secp256k1::Error),

    /// Ed25519 key or signature error (relay identity keypair).
    #[error(transparent)]
    Ed25519Error(#[from] ed25519_dalek::SignatureError),

    /// Sea-ORM database error.
    #[error(transparent)]
    SeaOrmDBError(#[from] sea_orm::DbErr),

    /// JSON (de)serialization error.
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    /// Hex decoding error (ids, pubkeys, signatures).
    #[error(transparent)]
    HexError(#[from] hex::FromHexError),

    /// Axum / WebSocket transport error.
    #[error(transparent)]
    WebSocketError(#[from] axum::Error),

    /// A request rejected by the validator pipeline.
    #[error("{0}")]
    Rejected(RejectReason),

    /// A SQL call exceeded its per-call deadline (§5).
    #[error("database operation timed out")]
    DbTimeout,
}

/// Reason an event or filter was rejected, tagged with the wire category
/// it maps to (spec §7).
#[derive(Debug, Clone)]
pub struct RejectReason {
    pub category: &'static str,
    pub message: String,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

impl RejectReason {
    pub fn new(category: &'static str, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new("invalid", message)
    }

    pub fn pow(message: impl Into<String>) -> Self {
        Self::new("pow", message)
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self::new("blocked", message)
    }

    pub fn auth_required(message: impl Into<String>) -> Self {
        Self::new("auth-required", message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new("rate-limited", message)
    }
}

impl Error {
    pub fn custom(msg: impl Into<String>) -> Self {
        Error::CustomError(msg.into())
    }

    /// Maps an internal error to the `OK`/`NOTICE` category prefix of §7.
    /// Internal detail (DB errors, transport errors, ...) collapses to
    /// `error: internal` so nothing leaks to the client.
    pub fn client_category(&self) -> &'static str {
        match self {
            Error::Rejected(r) => r.category,
            _ => "error",
        }
    }

    /// The message shown to the client for this error, scrubbed of
    /// internal detail unless the error already came from the validator.
    pub fn client_message(&self) -> String {
        match self {
            Error::Rejected(r) => r.message.clone(),
            other => {
                tracing::error!(error = %other, "internal error surfaced to client as generic failure");
                "internal error".to_string()
            }
        }
    }
}
