//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating bridge settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The settings file is not valid JSON.
    #[error("malformed settings file {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// The merged document does not fit the settings schema.
    #[error("settings do not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;
