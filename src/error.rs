//! Error types for the sandbox review runner.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for review runs.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to create a sandbox.
    #[error("failed to create sandbox: {0}")]
    SandboxCreation(String),

    /// Failed to tear down a sandbox.
    #[error("failed to clean up sandbox {id}: {reason}")]
    SandboxCleanup { id: String, reason: String },

    /// The sandbox outlived its configured timeout.
    #[error("sandbox {0} expired")]
    SandboxExpired(String),

    /// Git operation failed.
    #[error("git operation failed: {0}")]
    Git(String),

    /// A command inside the sandbox exited non-zero.
    #[error("command exited with code {exit_code}")]
    CommandExit {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// IO error during sandbox operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The sandbox path is not valid.
    #[error("invalid sandbox path: {0}")]
    InvalidPath(PathBuf),

    /// Transport-level HTTP failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The chat-completion call failed or returned something unusable.
    #[error("review generation failed: {0}")]
    Review(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns the exit code when this is a command exit failure.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::CommandExit { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

/// Result type alias for review operations.
pub type Result<T> = std::result::Result<T, Error>;
