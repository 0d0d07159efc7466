//! Error types for process launching and stream syncing

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::stream::StreamKind;

/// Unified error type for launching and syncing processes
#[derive(Error, Debug)]
pub enum Error {
    /// The command line had no program in it
    #[error("command line is empty")]
    EmptyCommand,

    /// Failed to spawn a process
    #[error("failed to spawn process: {reason}")]
    SpawnFailed {
        /// The reason for the spawn failure
        reason: String,
    },

    /// Command not found
    #[error("command not found: {command}")]
    CommandNotFound {
        /// The command that was not found
        command: String,
    },

    /// A redirect was used on a stream it cannot apply to
    #[error("redirect {redirect} cannot be used for {stream}")]
    InvalidRedirect {
        /// The stream the redirect was set on
        stream: StreamKind,
        /// Short description of the redirect
        redirect: String,
    },

    /// A redirect file could not be opened
    #[error("failed to open redirect file {}: {source}", path.display())]
    RedirectFile {
        /// The file that could not be opened
        path: PathBuf,
        /// The underlying I/O error
        source: std::io::Error,
    },

    /// The host cannot do what was asked
    #[error("unsupported on this platform: {feature}")]
    Unsupported {
        /// The feature that is not available
        feature: String,
    },

    /// No encoding is registered under this label
    #[error("unknown character encoding: {label}")]
    UnknownEncoding {
        /// The label that failed to resolve
        label: String,
    },

    /// The worker pool refused a job
    #[error("worker pool rejected task {task}: {reason}")]
    PoolRejected {
        /// The name of the rejected task
        task: String,
        /// Why the pool refused it
        reason: String,
    },

    /// A pool task panicked before producing a result
    #[error("task {task} panicked")]
    TaskPanicked {
        /// The name of the task
        task: String,
    },

    /// Waiting for something took longer than allowed
    #[error("timed out after {after:?} waiting for {operation}")]
    Timeout {
        /// What was being waited on
        operation: String,
        /// The timeout that elapsed
        after: Duration,
    },

    /// A stream drain task failed
    #[error("failed to drain {stream}: {source}")]
    Drain {
        /// The stream being drained
        stream: StreamKind,
        /// The underlying I/O error
        source: std::io::Error,
    },

    /// Failed to send signal to process
    #[error("failed to send signal {signal}: {reason}")]
    SignalFailed {
        /// The signal number that failed to send
        signal: i32,
        /// The reason for the signal failure
        reason: String,
    },

    /// Sync options could not be parsed
    #[error("invalid sync options: {0}")]
    Config(#[from] serde_yaml::Error),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Nix error (Unix signal handling and pipes)
    #[cfg(unix)]
    #[error(transparent)]
    Nix(#[from] nix::Error),
}

impl Error {
    /// Create a spawn failed error
    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            reason: reason.into(),
        }
    }

    /// Create a signal failed error
    pub fn signal_failed(signal: i32, reason: impl Into<String>) -> Self {
        Self::SignalFailed {
            signal,
            reason: reason.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Create a pool rejection error
    pub fn pool_rejected(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PoolRejected {
            task: task.into(),
            reason: reason.into(),
        }
    }

    /// Create an unsupported feature error
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
        }
    }

    /// Returns true if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
