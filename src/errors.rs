//! Module for errors.
use crate::models::ArtifactKey;
use std::fmt;
use thiserror::Error;

/// Why a single artifact could not be resolved during a fan-out.
#[derive(Debug, Clone, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ArtifactFailure {
    /// The remote service does not publish this artifact (yet).
    NotAvailable,
    /// Network, timeout or server side failure, after retries.
    Transient(String),
    /// The run was cancelled before this artifact was attempted.
    Cancelled,
}

impl ArtifactFailure {
    /// A short, stable name for the kind of failure, suitable for structured logs.
    pub fn kind(&self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for ArtifactFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ArtifactFailure::NotAvailable => write!(f, "not available from the remote service"),
            ArtifactFailure::Transient(msg) => write!(f, "transient failure: {}", msg),
            ArtifactFailure::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Error from the archive interface.
#[derive(Debug, Error)]
pub enum GribArchiveErr {
    // Inherited errors from std
    /// Error forwarded from std
    #[error("std lib io error: {0}")]
    IO(#[from] std::io::Error),

    // Other forwarded errors
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Error parsing the configuration file.
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
    /// Error building the http client.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    // My own errors from this crate
    /// Configuration that parsed, but makes no sense.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// A cycle string that is not 10 digits or is not a real date and hour.
    #[error("invalid cycle: {0}")]
    InvalidCycle(String),
    /// An ensemble member number that is neither the control nor a positive integer.
    #[error("invalid ensemble member: {0}")]
    InvalidMember(i64),
    /// Model not present in the configuration.
    #[error("invalid model name: {0}")]
    InvalidModelName(String),
    /// The database structure is wrong.
    #[error("invalid index format")]
    InvalidSchema,
    /// File not found in the index.
    #[error("no match in the index")]
    NotInIndex,
    /// Attempt to index a key that is already indexed.
    #[error("duplicate key in index: {0}")]
    DuplicateKey(ArtifactKey),
    /// A fan-out stopped at this artifact.
    #[error("failed to fetch {key}: {cause}")]
    ArtifactFailed {
        /// The artifact that stopped the fan-out.
        key: ArtifactKey,
        /// Why it failed.
        cause: ArtifactFailure,
    },
    /// There was an internal logic error.
    #[error("internal logic error: {0}")]
    LogicError(&'static str),
}
