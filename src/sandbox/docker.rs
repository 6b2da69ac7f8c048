//! Docker container sandbox implementation.
//!
//! Each sandbox is a detached container whose only process is
//! `sleep <timeout>`, so the container stops on its own once the timeout
//! passes even if this process dies. `--rm` makes the daemon delete it then.

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::secrets::Redactor;

use super::git::{clone_args, embeds_credentials, reset_origin_args, CloneOptions};
use super::process::run_streaming;
use super::provider::{CommandOutput, Deadline, RunOptions, Sandbox, SandboxProvider, SandboxSpec};

/// Prefix for sandbox containers: "review-sandbox-<uuid>".
pub const CONTAINER_PREFIX: &str = "review-sandbox-";

/// Label applied to every sandbox container, for manual sweeps.
pub const CONTAINER_LABEL: &str = "sandbox-review=1";

/// A running sandbox container.
pub struct DockerSandbox {
    /// Container name, also used as the sandbox id.
    name: String,
    docker: String,
    deadline: Deadline,
    redactor: Redactor,
    /// Whether removal has been attempted.
    cleaned_up: bool,
}

impl DockerSandbox {
    async fn docker_bounded(&self, args: Vec<String>, options: RunOptions) -> Result<CommandOutput> {
        let remaining = self.deadline.remaining(&self.name)?;
        let mut command = Command::new(&self.docker);
        command.args(&args);

        tokio::time::timeout(remaining, run_streaming(command, options.output, &self.redactor))
            .await
            .map_err(|_| Error::SandboxExpired(self.name.clone()))?
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn id(&self) -> &str {
        &self.name
    }

    async fn git_clone(&self, url: &str, options: CloneOptions) -> Result<()> {
        let mut args = vec![
            "exec".to_string(),
            "-e".to_string(),
            "GIT_TERMINAL_PROMPT=0".to_string(),
            self.name.clone(),
            "git".to_string(),
        ];
        args.extend(clone_args(url, &options.path, &options));

        let output = self.docker_bounded(args, RunOptions::default()).await?;
        if !output.success() {
            return Err(Error::Git(format!(
                "clone of branch '{}' failed: {}",
                options.branch,
                output.stderr.trim()
            )));
        }

        if embeds_credentials(url, &options) {
            let mut args = vec!["exec".to_string(), self.name.clone(), "git".to_string()];
            args.extend(reset_origin_args(&options.path, url));
            let output = self.docker_bounded(args, RunOptions::default()).await?;
            if !output.success() {
                return Err(Error::Git(format!(
                    "failed to reset origin url: {}",
                    output.stderr.trim()
                )));
            }
        }

        tracing::debug!(sandbox_id = %self.name, path = %options.path, "cloned repository");
        Ok(())
    }

    async fn run(&self, command: &str, options: RunOptions) -> Result<CommandOutput> {
        let args = exec_args(&self.name, options.cwd.as_deref(), command);
        self.docker_bounded(args, options).await?.into_result()
    }

    async fn kill(self: Box<Self>) -> Result<()> {
        let mut this = self;
        // One removal attempt only; a failed kill must not retry from Drop.
        this.cleaned_up = true;

        let output = Command::new(&this.docker)
            .args(["rm", "-f", &this.name])
            .output()
            .await
            .map_err(|e| Error::SandboxCleanup {
                id: this.name.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::SandboxCleanup {
                id: this.name.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tracing::info!(sandbox_id = %this.name, "removed sandbox container");
        Ok(())
    }
}

impl Drop for DockerSandbox {
    fn drop(&mut self) {
        if self.cleaned_up {
            return;
        }
        // Last resort; the async kill path is the normal one.
        match std::process::Command::new(&self.docker)
            .args(["rm", "-f", &self.name])
            .output()
        {
            Ok(output) if output.status.success() => {}
            Ok(output) => tracing::error!(
                container = %self.name,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "failed to remove sandbox container on drop"
            ),
            Err(e) => tracing::error!(
                error = %e,
                container = %self.name,
                "failed to remove sandbox container on drop"
            ),
        }
    }
}

/// Provider that starts [`DockerSandbox`] containers.
#[derive(Clone)]
pub struct DockerSandboxProvider {
    /// Image used when `SandboxSpec` does not name one.
    default_image: String,
    /// Path to the docker CLI binary.
    docker: String,
    redactor: Redactor,
}

impl DockerSandboxProvider {
    pub fn new(default_image: impl Into<String>) -> Self {
        Self {
            default_image: default_image.into(),
            docker: "docker".to_string(),
            redactor: Redactor::new(),
        }
    }

    /// Uses a custom docker CLI path (e.g. `podman`).
    pub fn with_cli_path(mut self, docker: impl Into<String>) -> Self {
        self.docker = docker.into();
        self
    }

    /// Redacts these secrets from all command output.
    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }
}

#[async_trait]
impl SandboxProvider for DockerSandboxProvider {
    async fn create(&self, spec: SandboxSpec) -> Result<Box<dyn Sandbox>> {
        let name = format!("{}{}", CONTAINER_PREFIX, uuid::Uuid::new_v4().simple());
        let image = spec.image.as_deref().unwrap_or(&self.default_image);
        let args = create_args(&name, image, spec.timeout.as_secs().max(1));

        let output = Command::new(&self.docker)
            .args(&args)
            .output()
            .await
            .map_err(|e| Error::SandboxCreation(format!("failed to run {}: {}", self.docker, e)))?;

        if !output.status.success() {
            return Err(Error::SandboxCreation(format!(
                "docker run failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        tracing::info!(
            sandbox_id = %name,
            image = %image,
            timeout_secs = spec.timeout.as_secs(),
            "created sandbox container"
        );

        Ok(Box::new(DockerSandbox {
            name,
            docker: self.docker.clone(),
            deadline: Deadline::after(spec.timeout),
            redactor: self.redactor.clone(),
            cleaned_up: false,
        }))
    }

    fn name(&self) -> &str {
        "docker"
    }
}

/// `docker run` arguments for a sandbox container that lives `timeout_secs`.
fn create_args(name: &str, image: &str, timeout_secs: u64) -> Vec<String> {
    vec![
        "run".to_string(),
        "-d".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        name.to_string(),
        "--label".to_string(),
        CONTAINER_LABEL.to_string(),
        "--entrypoint".to_string(),
        "sleep".to_string(),
        image.to_string(),
        timeout_secs.to_string(),
    ]
}

/// `docker exec` arguments that run `command` through `sh -c`.
fn exec_args(name: &str, cwd: Option<&str>, command: &str) -> Vec<String> {
    let mut args = vec!["exec".to_string()];
    if let Some(cwd) = cwd {
        args.push("-w".to_string());
        args.push(cwd.to_string());
    }
    args.extend([
        name.to_string(),
        "sh".to_string(),
        "-c".to_string(),
        command.to_string(),
    ]);
    args
}
