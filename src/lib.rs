//! Sandbox Review - CI pull request review in ephemeral sandboxes
//!
//! This library clones a pull request branch into a throwaway sandbox, runs
//! its test suite there, optionally asks a chat model to review the branch,
//! and reports the result as a pull request comment.

pub mod config;
pub mod error;
pub mod github;
pub mod pipeline;
pub mod review;
pub mod sandbox;
pub mod secrets;

pub use config::{
    ProviderKind, ReviewConfig, Validate, ValidationResult, FALLBACK_REVIEW, GIT_TOKEN_USERNAME,
};
pub use error::{Error, Result};
pub use github::{compose_comment, CommentOutcome, PrCommenter, COMMENT_HEADER};
pub use pipeline::{PipelineOutcome, ReviewPipeline, TestOutcome};
pub use review::{ChatCompletionsClient, ReviewModel, Reviewer};
pub use sandbox::{
    CloneOptions, CommandOutput, DockerSandboxProvider, LocalSandboxProvider, OutputEvent,
    RunOptions, Sandbox, SandboxProvider, SandboxSpec,
};
pub use secrets::Redactor;
