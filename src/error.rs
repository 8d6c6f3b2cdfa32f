//! Error types for the wafer monitor

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for monitoring operations
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("File watching error: {0}")]
    FileWatcher(#[from] notify::Error),

    #[error("Invalid routing pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Image decoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("PDF error: {0}")]
    Lopdf(#[from] lopdf::Error),

    #[error("PDF rendering error: {message}")]
    Pdf { message: String },

    #[error("Watched root does not exist: {}", path.display())]
    WatchRootMissing { path: PathBuf },

    #[error("Watch subscription failed for {}: {message}", root.display())]
    WatchFailed { root: PathBuf, message: String },

    #[error("Work queue is closed")]
    QueueClosed,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl MonitorError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Subscription failures are the only errors that end a monitoring session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::WatchRootMissing { .. } | Self::WatchFailed { .. })
    }
}

/// Result type alias for monitoring operations
pub type MonitorResult<T> = Result<T, MonitorError>;
