//! Error types for registration runs.
//!
//! Every failure of a run maps onto one of these variants. Configuration
//! problems are detected before any external tool is started; external tool
//! failures carry the tool's exit status and captured stderr verbatim.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use regkit_core::{ImageError, TransformError};
use regkit_io::TransformFileError;
use thiserror::Error;

/// Main error type for registration operations.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// Missing input, violated co-occurrence constraint or invalid settings.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Decomposition, composition or flattening failed.
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// A transform file could not be read or written.
    #[error(transparent)]
    TransformFile(#[from] TransformFileError),

    /// An image filter failed.
    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    /// An external estimator or resampler failed to start or exited non-zero.
    #[error("{tool} failed ({status}): {stderr}")]
    ExternalTool {
        tool: String,
        status: ToolStatus,
        stderr: String,
    },

    /// A file or directory operation failed.
    #[error("File error on {path}: {message}")]
    FileIo { path: PathBuf, message: String },
}

/// How an external tool ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    /// The process could not be spawned.
    NotStarted,
    /// The process exited with this code.
    Exited(i32),
    /// The process was killed by a signal.
    Signaled,
}

impl From<ExitStatus> for ToolStatus {
    fn from(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => Self::Exited(code),
            None => Self::Signaled,
        }
    }
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Exited(code) => write!(f, "exit status {}", code),
            Self::Signaled => write!(f, "terminated by signal"),
        }
    }
}

/// Result type for registration operations.
pub type Result<T> = std::result::Result<T, RegistrationError>;

impl RegistrationError {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an external tool error.
    pub fn external_tool(tool: impl Into<String>, status: ToolStatus, stderr: impl Into<String>) -> Self {
        Self::ExternalTool {
            tool: tool.into(),
            status,
            stderr: stderr.into(),
        }
    }

    /// Create a file error; `cause` is rendered with its full context chain.
    pub fn file_io(path: &Path, cause: impl std::fmt::Display) -> Self {
        Self::FileIo {
            path: path.to_path_buf(),
            message: format!("{:#}", cause),
        }
    }
}
