//! The review pipeline.
//!
//! Provision → clone → inspect → review → test → report → dispose, strictly
//! in that order. The sandbox is acquired in [`ReviewPipeline::run`] and
//! killed there exactly once, whatever the steps in between returned.

use tokio::sync::mpsc;

use crate::config::ReviewConfig;
use crate::error::{Error, Result};
use crate::github::{compose_comment, CommentOutcome, PrCommenter};
use crate::review::Reviewer;
use crate::sandbox::{
    CloneOptions, CommandOutput, OutputEvent, RunOptions, Sandbox, SandboxProvider, SandboxSpec,
};

/// Capacity of the streamed-output channel.
const OUTPUT_BUFFER: usize = 256;

/// Result of the install + test step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    /// The install or test command exited non-zero.
    Failed { exit_code: i32 },
}

/// How a run ended, when it did not end in an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Tests passed and the report step ran.
    Completed {
        sandbox_id: String,
        review: String,
        comment: CommentOutcome,
    },
    /// Tests failed; nothing was reported.
    TestsFailed { sandbox_id: String, exit_code: i32 },
}

impl PipelineOutcome {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineOutcome::Completed { .. } => 0,
            PipelineOutcome::TestsFailed { .. } => 1,
        }
    }
}

/// Runs one pull-request review in a fresh sandbox.
pub struct ReviewPipeline<P: SandboxProvider> {
    config: ReviewConfig,
    provider: P,
    reviewer: Reviewer,
    commenter: Option<PrCommenter>,
}

impl<P: SandboxProvider> ReviewPipeline<P> {
    pub fn new(
        config: ReviewConfig,
        provider: P,
        reviewer: Reviewer,
        commenter: Option<PrCommenter>,
    ) -> Self {
        Self {
            config,
            provider,
            reviewer,
            commenter,
        }
    }

    /// Wires the reviewer and commenter the configuration asks for.
    pub fn from_config(config: ReviewConfig, provider: P) -> Result<Self> {
        let reviewer = Reviewer::from_config(&config)?;
        let commenter = match config.comment_target() {
            Some((_, _, token)) => Some(PrCommenter::new(&config.github.api_url, token)?),
            None => None,
        };
        Ok(Self::new(config, provider, reviewer, commenter))
    }

    pub fn config(&self) -> &ReviewConfig {
        &self.config
    }

    /// Runs the whole pipeline.
    pub async fn run(&self) -> Result<PipelineOutcome> {
        tracing::info!(
            pr_number = ?self.config.pr_number,
            branch = %self.config.pr_branch,
            repo = %self.config.pr_repo,
            provider = %self.provider.name(),
            "reviewing pull request"
        );

        let spec = SandboxSpec::new(self.config.sandbox.timeout())
            .with_image(self.config.sandbox.image.clone());
        let sandbox = self.provider.create(spec).await?;
        tracing::info!(sandbox_id = %sandbox.id(), "sandbox created");

        let result = self.run_in_sandbox(sandbox.as_ref()).await;

        let sandbox_id = sandbox.id().to_string();
        match (result, sandbox.kill().await) {
            (result, Ok(())) => {
                tracing::info!(sandbox_id = %sandbox_id, "sandbox disposed");
                result
            }
            (Ok(_), Err(kill_err)) => {
                tracing::error!(sandbox_id = %sandbox_id, error = %kill_err, "failed to dispose sandbox");
                Err(kill_err)
            }
            (Err(e), Err(kill_err)) => {
                tracing::error!(sandbox_id = %sandbox_id, error = %kill_err, "failed to dispose sandbox");
                Err(e)
            }
        }
    }

    async fn run_in_sandbox(&self, sandbox: &dyn Sandbox) -> Result<PipelineOutcome> {
        let repo_path = &self.config.sandbox.repo_path;

        sandbox
            .git_clone(
                &self.config.clone_url(),
                CloneOptions::shallow(
                    repo_path.clone(),
                    self.config.pr_branch.clone(),
                    self.config.github_token.as_deref(),
                ),
            )
            .await?;
        tracing::info!(path = %repo_path, "repository cloned");

        let snapshot = sandbox
            .run(&self.config.commands.inspect, RunOptions::in_dir(repo_path.clone()))
            .await?;
        tracing::info!("repository snapshot:\n{}", snapshot.stdout);

        let review = self.reviewer.review(&snapshot.stdout).await?;

        tracing::info!("running tests");
        match self.run_tests(sandbox).await? {
            TestOutcome::Failed { exit_code } => {
                tracing::error!(exit_code, "tests failed");
                return Ok(PipelineOutcome::TestsFailed {
                    sandbox_id: sandbox.id().to_string(),
                    exit_code,
                });
            }
            TestOutcome::Passed => tracing::info!("all tests passed"),
        }

        let comment = self.report(&review, sandbox.id()).await?;

        Ok(PipelineOutcome::Completed {
            sandbox_id: sandbox.id().to_string(),
            review,
            comment,
        })
    }

    /// Installs dependencies and runs the test suite.
    ///
    /// A non-zero exit from either command is [`TestOutcome::Failed`];
    /// every other error propagates.
    pub async fn run_tests(&self, sandbox: &dyn Sandbox) -> Result<TestOutcome> {
        let commands = [&self.config.commands.install, &self.config.commands.test];

        for command in commands {
            if command.trim().is_empty() {
                continue;
            }
            match self.run_streamed(sandbox, command).await {
                Ok(_) => {}
                Err(Error::CommandExit { exit_code, .. }) => {
                    tracing::warn!(command = %command, exit_code, "command exited non-zero");
                    return Ok(TestOutcome::Failed { exit_code });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(TestOutcome::Passed)
    }

    /// Runs a command in the repository, logging its output as it arrives.
    async fn run_streamed(&self, sandbox: &dyn Sandbox, command: &str) -> Result<CommandOutput> {
        let (tx, mut rx) = mpsc::channel(OUTPUT_BUFFER);

        let logger = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    OutputEvent::Stdout(line) => tracing::info!(target: "sandbox_output", "{}", line),
                    OutputEvent::Stderr(line) => tracing::warn!(target: "sandbox_output", "{}", line),
                }
            }
        });

        let options = RunOptions::in_dir(self.config.sandbox.repo_path.clone()).with_output(tx);
        let result = sandbox.run(command, options).await;

        if let Err(e) = logger.await {
            tracing::warn!(error = %e, "output logger task failed");
        }

        result
    }

    async fn report(&self, review: &str, sandbox_id: &str) -> Result<CommentOutcome> {
        let (Some(commenter), Some((repo, number, _))) =
            (&self.commenter, self.config.comment_target())
        else {
            tracing::info!("GitHub token, repository or PR number missing; not posting a comment");
            return Ok(CommentOutcome::Skipped);
        };

        let body = compose_comment(
            review,
            &format!("All tests passed in sandbox `{}`.", sandbox_id),
        );

        let outcome = commenter.post(repo, number, &body).await?;
        match &outcome {
            CommentOutcome::Posted { url } => {
                tracing::info!(url = ?url, "posted review comment to PR")
            }
            CommentOutcome::Rejected { status, body } => {
                tracing::error!(status = *status, body = %body, "failed to post comment")
            }
            CommentOutcome::Skipped => {}
        }

        Ok(outcome)
    }
}
