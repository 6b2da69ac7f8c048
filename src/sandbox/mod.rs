//! Sandbox module for isolated review environments.
//!
//! This module provides the [`SandboxProvider`] and [`Sandbox`] traits plus
//! two implementations: [`LocalSandboxProvider`] (a scratch directory on the
//! host) and [`DockerSandboxProvider`] (a throwaway container).

mod docker;
pub mod git;
mod local;
pub mod process;
mod provider;

pub use docker::{DockerSandbox, DockerSandboxProvider};
pub use git::CloneOptions;
pub use local::{LocalSandbox, LocalSandboxProvider};
pub use provider::{
    CommandOutput, Deadline, OutputEvent, RunOptions, Sandbox, SandboxProvider, SandboxSpec,
};
