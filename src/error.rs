//! Crate-wide error type.
//!
//! Only failures that are fatal to a run belong here: configuration loading,
//! port/path setup, and cluster provisioning. Target misbehavior, oracle
//! outages, and malformed network traffic are *data* (an
//! [`crate::bug::ErrorRecord`] or zero coverage), never a [`FuzzerError`].

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FuzzerError {
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to bind interception network on port {port}: {source}")]
    NetworkBind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, FuzzerError>;
