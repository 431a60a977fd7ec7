use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the segmentation pipeline and its storage.
#[derive(Debug, Error)]
pub enum Error {
    /// An image file could not be decoded, or its channels disagree.
    #[error("Failed to load image '{path}': {reason}")]
    ImageFormat { path: PathBuf, reason: String },

    /// The result store could not be read or written.
    #[error("Data store access failed at '{path}': {reason}")]
    Connector { path: PathBuf, reason: String },

    /// Stored data was produced with a different feature set.
    #[error("Feature schema mismatch: expected [{}], found [{}]", expected.join(", "), found.join(", "))]
    ConfigurationMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The well is already checked out by a running batch.
    #[error("Well {0} is already being processed")]
    WellBusy(String),

    #[error("A batch run is already in progress")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn image_format(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ImageFormat {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn connector(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Connector {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
