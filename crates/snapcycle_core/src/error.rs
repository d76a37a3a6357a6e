//! Error types for snapcycle.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for snapcycle operations.
pub type SnapResult<T> = Result<T, SnapError>;

/// Errors that can occur while validating settings or rotating snapshots.
#[derive(Debug, Error)]
pub enum SnapError {
    /// A required setting was not supplied.
    #[error("{name} is required")]
    MissingSetting {
        /// Name of the missing setting.
        name: &'static str,
    },

    /// A setting was supplied but cannot be used.
    #[error("invalid setting {name}: {message}")]
    InvalidSetting {
        /// Name of the offending setting.
        name: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Source or destination does not exist or is not a directory.
    #[error("missing folder: {}", .path.display())]
    MissingFolder {
        /// The path that was expected to be a directory.
        path: PathBuf,
    },

    /// A tier path exists but is not a directory.
    #[error("tier path exists and is not a directory: {}", .path.display())]
    TierPathConflict {
        /// The conflicting path.
        path: PathBuf,
    },

    /// The external sync tool exited unsuccessfully or could not be started.
    #[error("sync for tier {tier} failed ({program}, {}): {stderr}", describe_status(.status))]
    SyncFailed {
        /// Tier whose snapshot was being materialized.
        tier: String,
        /// Program that was invoked.
        program: String,
        /// Exit code, if the process exited normally.
        status: Option<i32>,
        /// Captured diagnostic output.
        stderr: String,
    },

    /// A snapshot directory could not be removed during retention purge.
    #[error("failed to purge {}: {source}", .path.display())]
    Purge {
        /// Snapshot directory being removed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Another run holds the lock for this destination.
    #[error("destination locked by another run: {}", .destination.display())]
    Locked {
        /// Destination whose lock is held.
        destination: PathBuf,
    },

    /// The persisted state file is not a key/value mapping.
    #[error("corrupt state file {}: {message}", .path.display())]
    CorruptState {
        /// Path of the state file.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

fn describe_status(status: &Option<i32>) -> String {
    match *status {
        Some(code) => format!("exit code {code}"),
        None => "no exit status".to_string(),
    }
}

impl SnapError {
    /// Creates a missing folder error.
    pub fn missing_folder(path: impl Into<PathBuf>) -> Self {
        Self::MissingFolder { path: path.into() }
    }

    /// Creates an invalid setting error.
    pub fn invalid_setting(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidSetting {
            name,
            message: message.into(),
        }
    }

    /// Creates a sync failure error.
    pub fn sync_failed(
        tier: impl Into<String>,
        program: impl Into<String>,
        status: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::SyncFailed {
            tier: tier.into(),
            program: program.into(),
            status,
            stderr: stderr.into(),
        }
    }

    /// Creates a purge failure error.
    pub fn purge(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Purge {
            path: path.into(),
            source,
        }
    }

    /// Creates a corrupt state error.
    pub fn corrupt_state(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::CorruptState {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error aborts the whole run.
    ///
    /// Sync failures are local to one tier; everything else is fatal.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::SyncFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_failures_are_not_fatal() {
        let err = SnapError::sync_failed("hourly", "rsync", Some(23), "partial transfer");
        assert!(!err.is_fatal());
        assert!(SnapError::missing_folder("/nope").is_fatal());
        assert!(SnapError::MissingSetting { name: "source" }.is_fatal());
    }

    #[test]
    fn error_display() {
        let err = SnapError::MissingSetting { name: "destination" };
        assert_eq!(err.to_string(), "destination is required");

        let err = SnapError::sync_failed("daily", "rsync", Some(12), "protocol error");
        let text = err.to_string();
        assert!(text.contains("daily"));
        assert!(text.contains("exit code 12"));

        let err = SnapError::sync_failed("daily", "rsync", None, "");
        assert!(err.to_string().contains("no exit status"));

        let err = SnapError::missing_folder("/srv/missing");
        assert!(err.to_string().contains("/srv/missing"));
    }
}
