//! Run configuration.
//!
//! A [`ReviewConfig`] is assembled once at startup from the process
//! environment (and an optional TOML settings file) and then handed by
//! reference to every pipeline step. Nothing mutates it afterwards.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::secrets::Redactor;

/// Username GitHub expects when a token is used as a basic-auth password.
pub const GIT_TOKEN_USERNAME: &str = "x-access-token";

/// Text used instead of a model review when no model key is configured.
pub const FALLBACK_REVIEW: &str =
    "**AI Review (test run)**\n\nNo model API key configured, so no automated review was generated.";

/// Which sandbox backend to provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Scratch directory on the host.
    Local,
    /// Detached Docker container.
    #[default]
    Docker,
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ProviderKind::Local),
            "docker" => Ok(ProviderKind::Docker),
            other => Err(Error::Config(format!("unknown sandbox provider '{}'", other))),
        }
    }
}

/// Sandbox provisioning settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxSettings {
    #[serde(default)]
    pub provider: ProviderKind,

    /// Wall-clock lifetime of the sandbox, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Container image (docker provider only).
    #[serde(default = "default_image")]
    pub image: String,

    /// Where the PR branch is cloned inside the sandbox.
    #[serde(default = "default_repo_path")]
    pub repo_path: String,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_image() -> String {
    "node:20".to_string()
}

fn default_repo_path() -> String {
    "/home/user/repo".to_string()
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            timeout_secs: default_timeout_secs(),
            image: default_image(),
            repo_path: default_repo_path(),
        }
    }
}

impl SandboxSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Shell commands run inside the cloned repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSettings {
    /// Read-only diagnostic whose output is fed to the reviewer.
    #[serde(default = "default_inspect_command")]
    pub inspect: String,

    #[serde(default = "default_install_command")]
    pub install: String,

    #[serde(default = "default_test_command")]
    pub test: String,
}

fn default_inspect_command() -> String {
    // Depth-1 clones have no base commit, so a log plus listing stands in
    // for a real diff.
    r#"git log --oneline -3 && echo "---" && ls -la"#.to_string()
}

fn default_install_command() -> String {
    "npm install --silent".to_string()
}

fn default_test_command() -> String {
    "npm test".to_string()
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            inspect: default_inspect_command(),
            install: default_install_command(),
            test: default_test_command(),
        }
    }
}

/// Chat-completion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Diagnostic output beyond this many bytes is cut before prompting.
    #[serde(default = "default_max_diff_bytes")]
    pub max_diff_bytes: usize,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_system_prompt() -> String {
    "You are a senior code reviewer. You are given a snapshot of a pull request \
     branch (recent commits and a file listing). Point out likely bugs, risky \
     changes and missing tests. Be concise and answer in markdown."
        .to_string()
}

fn default_max_diff_bytes() -> usize {
    60_000
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_llm_base_url(),
            system_prompt: default_system_prompt(),
            max_diff_bytes: default_max_diff_bytes(),
        }
    }
}

/// GitHub REST settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitHubSettings {
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
        }
    }
}

/// Contents of the optional `REVIEW_CONFIG` TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileSettings {
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub commands: CommandSettings,
    #[serde(default)]
    pub review: ModelSettings,
    #[serde(default)]
    pub github: GitHubSettings,
}

impl FileSettings {
    /// Parses settings from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(format!("invalid settings file: {}", e)))
    }

    /// Reads and parses a settings file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read settings file {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }
}

/// Everything a single review run needs to know.
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    /// PR head repository slug, `owner/name`.
    pub pr_repo: String,
    /// PR head branch.
    pub pr_branch: String,
    pub pr_number: Option<u64>,
    /// Repository that receives the review comment.
    pub github_repository: Option<String>,
    pub github_token: Option<String>,
    pub llm_api_key: Option<String>,
    pub sandbox: SandboxSettings,
    pub commands: CommandSettings,
    pub review: ModelSettings,
    pub github: GitHubSettings,
}

impl ReviewConfig {
    /// Creates a configuration with default settings for the given PR head.
    pub fn new(pr_repo: impl Into<String>, pr_branch: impl Into<String>) -> Self {
        Self {
            pr_repo: pr_repo.into(),
            pr_branch: pr_branch.into(),
            pr_number: None,
            github_repository: None,
            github_token: None,
            llm_api_key: None,
            sandbox: SandboxSettings::default(),
            commands: CommandSettings::default(),
            review: ModelSettings::default(),
            github: GitHubSettings::default(),
        }
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let file = match get("REVIEW_CONFIG") {
            Some(path) => FileSettings::load(Path::new(&path))?,
            None => FileSettings::default(),
        };

        let pr_number = get("PR_NUMBER")
            .map(|n| {
                n.trim()
                    .parse::<u64>()
                    .map_err(|_| Error::Config(format!("PR_NUMBER '{}' is not a number", n)))
            })
            .transpose()?;

        let mut config = Self {
            pr_repo: get("PR_REPO").unwrap_or_default(),
            pr_branch: get("PR_BRANCH").unwrap_or_default(),
            pr_number,
            github_repository: get("GITHUB_REPOSITORY"),
            github_token: get("GITHUB_TOKEN"),
            llm_api_key: get("OPENAI_API_KEY"),
            sandbox: file.sandbox,
            commands: file.commands,
            review: file.review,
            github: file.github,
        };

        if let Some(provider) = get("SANDBOX_PROVIDER") {
            config.sandbox.provider = provider.parse()?;
        }
        if let Some(secs) = get("SANDBOX_TIMEOUT_SECS") {
            config.sandbox.timeout_secs = secs.trim().parse().map_err(|_| {
                Error::Config(format!("SANDBOX_TIMEOUT_SECS '{}' is not a number", secs))
            })?;
        }
        if let Some(url) = get("GITHUB_API_URL") {
            config.github.api_url = url;
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            config.review.base_url = url;
        }
        if let Some(model) = get("REVIEW_MODEL") {
            config.review.model = model;
        }

        Ok(config)
    }

    /// HTTPS clone URL of the PR head repository.
    pub fn clone_url(&self) -> String {
        format!("https://github.com/{}.git", self.pr_repo)
    }

    /// Repository, PR number and token, when all three are configured.
    pub fn comment_target(&self) -> Option<(&str, u64, &str)> {
        match (&self.github_repository, self.pr_number, &self.github_token) {
            (Some(repo), Some(number), Some(token)) => {
                Some((repo.as_str(), number, token.as_str()))
            }
            _ => None,
        }
    }

    /// A redactor that knows every secret in this configuration.
    pub fn redactor(&self) -> Redactor {
        Redactor::new()
            .with_secret("GITHUB_TOKEN", self.github_token.as_deref())
            .with_secret("OPENAI_API_KEY", self.llm_api_key.as_deref())
    }
}

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merges another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Config(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

impl Validate for ReviewConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.pr_repo.trim().is_empty() {
            result.add_error("PR_REPO is not set");
        } else if !is_repo_slug(&self.pr_repo) {
            result.add_error(format!("PR_REPO '{}' is not of the form owner/name", self.pr_repo));
        }

        if self.pr_branch.trim().is_empty() {
            result.add_error("PR_BRANCH is not set");
        }

        if let Some(repo) = &self.github_repository {
            if !is_repo_slug(repo) {
                result.add_error(format!(
                    "GITHUB_REPOSITORY '{}' is not of the form owner/name",
                    repo
                ));
            }
        }

        result.merge(self.sandbox.validate());

        if self.github_token.is_none() {
            result.add_warning(
                "GITHUB_TOKEN is not set; clone is anonymous and no comment will be posted",
            );
        } else if self.comment_target().is_none() {
            result.add_warning("GITHUB_REPOSITORY or PR_NUMBER missing; no comment will be posted");
        }

        if self.llm_api_key.is_none() {
            result.add_warning("OPENAI_API_KEY is not set; using the fallback review text");
        }

        result
    }
}

impl Validate for SandboxSettings {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.timeout_secs == 0 {
            result.add_error("sandbox timeout must be greater than zero");
        } else if self.timeout_secs > 3600 {
            result.add_warning("sandbox timeout over 1 hour may indicate a misconfiguration");
        }

        if !self.repo_path.starts_with('/') {
            result.add_error(format!("repo_path '{}' must be absolute", self.repo_path));
        }

        result
    }
}

fn is_repo_slug(slug: &str) -> bool {
    let mut parts = slug.split('/');
    matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
    )
}
