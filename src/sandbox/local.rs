//! Host-directory sandbox implementation.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::secrets::Redactor;

use super::git::{clone_args, embeds_credentials, reset_origin_args, CloneOptions};
use super::process::run_streaming;
use super::provider::{CommandOutput, Deadline, RunOptions, Sandbox, SandboxProvider, SandboxSpec};

/// A sandbox rooted in a private scratch directory on the host.
///
/// Sandbox-absolute paths resolve under the root, so `/home/user/repo`
/// becomes `<root>/home/user/repo`. There is no process isolation beyond
/// that; use it for local runs and tests.
pub struct LocalSandbox {
    id: String,
    root: PathBuf,
    deadline: Deadline,
    redactor: Redactor,
    /// Whether the sandbox has been cleaned up.
    cleaned_up: bool,
}

impl LocalSandbox {
    /// Returns the host directory backing this sandbox.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a sandbox path onto the host, refusing `..` escapes.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(Error::InvalidPath(PathBuf::from(path)));
        }
        Ok(self.root.join(relative))
    }

    async fn run_bounded(&self, command: Command, options: RunOptions) -> Result<CommandOutput> {
        let remaining = self.deadline.remaining(&self.id)?;
        tokio::time::timeout(remaining, run_streaming(command, options.output, &self.redactor))
            .await
            .map_err(|_| Error::SandboxExpired(self.id.clone()))?
    }

    fn cleanup(&mut self) -> Result<()> {
        if self.cleaned_up {
            return Ok(());
        }

        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::SandboxCleanup {
                    id: self.id.clone(),
                    reason: e.to_string(),
                })
            }
        }

        self.cleaned_up = true;
        Ok(())
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn git_clone(&self, url: &str, options: CloneOptions) -> Result<()> {
        let dest = self.resolve(&options.path)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let dest_str = dest.to_string_lossy();
        let mut command = Command::new("git");
        command
            .args(clone_args(url, &dest_str, &options))
            .env("GIT_TERMINAL_PROMPT", "0");

        let output = self.run_bounded(command, RunOptions::default()).await?;
        if !output.success() {
            return Err(Error::Git(format!(
                "clone of branch '{}' failed: {}",
                options.branch,
                output.stderr.trim()
            )));
        }

        if embeds_credentials(url, &options) {
            let mut reset = Command::new("git");
            reset.args(reset_origin_args(&dest_str, url));
            let output = self.run_bounded(reset, RunOptions::default()).await?;
            if !output.success() {
                return Err(Error::Git(format!(
                    "failed to reset origin url: {}",
                    output.stderr.trim()
                )));
            }
        }

        tracing::debug!(sandbox_id = %self.id, dest = ?dest, "cloned repository");
        Ok(())
    }

    async fn run(&self, command: &str, options: RunOptions) -> Result<CommandOutput> {
        let cwd = match &options.cwd {
            Some(cwd) => self.resolve(cwd)?,
            None => self.root.clone(),
        };

        let mut child = Command::new("sh");
        child
            .arg("-c")
            .arg(command)
            .current_dir(&cwd)
            .env("HOME", &self.root);

        self.run_bounded(child, options).await?.into_result()
    }

    async fn kill(self: Box<Self>) -> Result<()> {
        let mut this = self;
        this.cleanup()?;
        tracing::info!(sandbox_id = %this.id, "removed local sandbox");
        Ok(())
    }
}

impl Drop for LocalSandbox {
    fn drop(&mut self) {
        if !self.cleaned_up {
            if let Err(e) = self.cleanup() {
                tracing::error!(error = %e, root = ?self.root, "failed to cleanup sandbox on drop");
            }
        }
    }
}

/// Provider that creates [`LocalSandbox`]es.
#[derive(Clone, Default)]
pub struct LocalSandboxProvider {
    /// Base directory for sandbox roots. If None, uses a temp directory.
    base_dir: Option<PathBuf>,
    redactor: Redactor,
}

impl LocalSandboxProvider {
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self {
            base_dir,
            redactor: Redactor::new(),
        }
    }

    /// Redacts these secrets from all command output.
    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    fn base(&self) -> PathBuf {
        match &self.base_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir().join("sandbox-review"),
        }
    }
}

#[async_trait]
impl SandboxProvider for LocalSandboxProvider {
    async fn create(&self, spec: SandboxSpec) -> Result<Box<dyn Sandbox>> {
        let id = format!("local-{}", uuid::Uuid::new_v4().simple());
        let root = self.base().join(&id);

        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| Error::SandboxCreation(format!("{}: {}", root.display(), e)))?;

        tracing::info!(
            sandbox_id = %id,
            root = ?root,
            timeout_secs = spec.timeout.as_secs(),
            "created local sandbox"
        );

        Ok(Box::new(LocalSandbox {
            id,
            root,
            deadline: Deadline::after(spec.timeout),
            redactor: self.redactor.clone(),
            cleaned_up: false,
        }))
    }

    fn name(&self) -> &str {
        "local"
    }
}
