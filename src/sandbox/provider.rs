//! Sandbox provider trait and types.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

use super::git::CloneOptions;

/// Parameters for provisioning a sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    /// Wall-clock lifetime. Operations after this point fail.
    pub timeout: Duration,
    /// Image or template to boot, for providers that have one.
    pub image: Option<String>,
}

impl SandboxSpec {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            image: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }
}

/// One line of output from a running command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Stdout(String),
    Stderr(String),
}

/// Options for [`Sandbox::run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Working directory inside the sandbox.
    pub cwd: Option<String>,
    /// Receives every output line as it is produced.
    pub output: Option<mpsc::Sender<OutputEvent>>,
}

impl RunOptions {
    /// Runs the command from `cwd`.
    pub fn in_dir(cwd: impl Into<String>) -> Self {
        Self {
            cwd: Some(cwd.into()),
            output: None,
        }
    }

    /// Streams output lines to `tx`.
    pub fn with_output(mut self, tx: mpsc::Sender<OutputEvent>) -> Self {
        self.output = Some(tx);
        self
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Process exit code; -1 when the process was killed by a signal.
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turns a non-zero exit into [`Error::CommandExit`].
    pub fn into_result(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::CommandExit {
                exit_code: self.exit_code,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// Point in time after which a sandbox refuses work.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            expires_at: Instant::now() + timeout,
        }
    }

    /// Time left before expiry, or [`Error::SandboxExpired`].
    pub fn remaining(&self, sandbox_id: &str) -> Result<Duration> {
        let left = self.expires_at.saturating_duration_since(Instant::now());
        if left.is_zero() {
            Err(Error::SandboxExpired(sandbox_id.to_string()))
        } else {
            Ok(left)
        }
    }
}

/// An active, isolated execution environment.
///
/// Paths passed to a sandbox are sandbox-absolute (e.g. `/home/user/repo`).
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Opaque identifier of this sandbox.
    fn id(&self) -> &str;

    /// Clones a repository into the sandbox filesystem.
    async fn git_clone(&self, url: &str, options: CloneOptions) -> Result<()>;

    /// Runs a shell command.
    ///
    /// A non-zero exit is reported as [`Error::CommandExit`].
    async fn run(&self, command: &str, options: RunOptions) -> Result<CommandOutput>;

    /// Tears the sandbox down. Consumes the handle so it cannot be reused.
    async fn kill(self: Box<Self>) -> Result<()>;
}

/// Provider for creating sandboxed environments.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Creates a new sandbox.
    async fn create(&self, spec: SandboxSpec) -> Result<Box<dyn Sandbox>>;

    /// Returns the name of this provider.
    fn name(&self) -> &str;
}
