//! Error taxonomy shared across the workspace.

use std::path::PathBuf;
use thiserror::Error;

pub type DatavaultResult<T> = Result<T, DatavaultError>;

/// Failures surfaced by configuration, provisioning, and provider code.
///
/// Nothing here is retried or downgraded; every variant propagates up to
/// the binary's single termination point.
#[derive(Debug, Error)]
pub enum DatavaultError {
    /// A provisioning precondition failed before any mutation happened.
    #[error("{0}")]
    Precondition(String),

    /// An external tool invocation failed (non-zero exit, timeout, spawn
    /// failure) or reported an inconsistent result.
    #[error("{0}")]
    Provider(String),

    /// Configuration could not be loaded, validated, or resolved.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The operator key file exists but could not be used.
    #[error("invalid key file {path}: {reason}")]
    InvalidKeyFile { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML configuration: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("failed to serialize TOML configuration: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("failed to process YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
