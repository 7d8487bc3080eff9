use std::time::Duration;

use thiserror::Error;

use crate::metrics::ErrorCode;

/// Errors from running an external VCS command.
///
/// Failures are classified from the command's stderr so callers can tell
/// infrastructure problems (disk, network, permissions) from plain failures.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("No space left on device while running `{command}`")]
    DiskSpace { command: String, stderr: String },

    #[error("Network error while running `{command}`: {stderr}")]
    Network { command: String, stderr: String },

    #[error("Permission denied while running `{command}`: {stderr}")]
    Permission { command: String, stderr: String },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("`{command}` failed ({status}): {stderr}")]
    Execution {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("I/O error running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

const DISK_SPACE_MARKERS: &[&str] = &["No space left on device"];

const NETWORK_MARKERS: &[&str] = &[
    "Network is unreachable",
    "Connection refused",
    "Connection timed out",
    "Could not resolve host",
];

const PERMISSION_MARKERS: &[&str] = &["Permission denied"];

impl CommandError {
    /// Classify a failed command from its stderr.
    pub fn classify(command: String, status: String, stderr: String) -> Self {
        let stderr = stderr.trim().to_string();
        let has = |markers: &[&str]| markers.iter().any(|m| stderr.contains(m));

        if has(DISK_SPACE_MARKERS) {
            Self::DiskSpace { command, stderr }
        } else if has(NETWORK_MARKERS) {
            Self::Network { command, stderr }
        } else if has(PERMISSION_MARKERS) {
            Self::Permission { command, stderr }
        } else {
            Self::Execution {
                command,
                status,
                stderr,
            }
        }
    }

    /// Metrics code for this failure.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::DiskSpace { .. } => ErrorCode::DiskSpace,
            Self::Network { .. } => ErrorCode::Network,
            Self::Permission { .. } => ErrorCode::Permission,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Execution { .. } | Self::Io { .. } => ErrorCode::CommandFailed,
        }
    }

    /// Whether running the same command again may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}
