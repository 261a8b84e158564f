// src/errors.rs

//! Crate-wide error type, aliases and helpers.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Job '{job}' timed out after {elapsed:?}")]
    Timeout { job: String, elapsed: Duration },

    #[error("Failed to spawn worker {slot}: {reason}")]
    Spawn { slot: usize, reason: String },

    #[error("{0}")]
    WorkerCrash(String),

    #[error("Worker aborted with exit code {code}: {message}")]
    WorkerAbort { code: i32, message: String },

    #[error("Result sink error: {0}")]
    Sink(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse classification used by the run-level error slot and by tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Io,
    Serialization,
    Protocol,
    ChannelClosed,
    Timeout,
    Spawn,
    WorkerCrash,
    Sink,
    Cancelled,
    Other,
}

impl FleetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FleetError::ConfigError(_) => ErrorKind::Config,
            FleetError::IoError(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                ErrorKind::ChannelClosed
            }
            FleetError::IoError(_) => ErrorKind::Io,
            FleetError::TomlError(_) | FleetError::JsonError(_) => ErrorKind::Serialization,
            FleetError::Protocol(_) => ErrorKind::Protocol,
            FleetError::ChannelClosed(_) => ErrorKind::ChannelClosed,
            FleetError::Timeout { .. } => ErrorKind::Timeout,
            FleetError::Spawn { .. } => ErrorKind::Spawn,
            FleetError::WorkerCrash(_) | FleetError::WorkerAbort { .. } => ErrorKind::WorkerCrash,
            FleetError::Sink(_) => ErrorKind::Sink,
            FleetError::Cancelled => ErrorKind::Cancelled,
            FleetError::Other(_) => ErrorKind::Other,
        }
    }

    /// True when the peer went away (EOF or broken pipe) rather than
    /// sending something malformed.
    pub fn is_disconnect(&self) -> bool {
        self.kind() == ErrorKind::ChannelClosed
    }
}

/// A cloneable snapshot of a fatal error, as stored in the run's error slot
/// and reported on run completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl RunFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&FleetError> for RunFailure {
    fn from(err: &FleetError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RunFailure {}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_pipe_counts_as_disconnect() {
        let err = FleetError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(err.is_disconnect());
        assert_eq!(err.kind(), ErrorKind::ChannelClosed);

        let err = FleetError::from(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(!err.is_disconnect());
    }

    #[test]
    fn run_failure_keeps_message_and_kind() {
        let err = FleetError::Protocol("unexpected progress_report".into());
        let failure = RunFailure::from(&err);
        assert_eq!(failure.kind, ErrorKind::Protocol);
        assert!(failure.message.contains("unexpected progress_report"));
    }
}
