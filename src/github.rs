//! Pull request comments via the GitHub REST API.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::secrets::Redactor;

/// Header every review comment starts with.
pub const COMMENT_HEADER: &str = "## AI Code Review";

const API_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = concat!("sandbox-review/", env!("CARGO_PKG_VERSION"));

/// Builds the markdown body of the review comment.
pub fn compose_comment(review: &str, summary: &str) -> String {
    format!("{}\n\n{}\n\n---\n{}", COMMENT_HEADER, review.trim_end(), summary)
}

/// What happened to a comment post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentOutcome {
    /// GitHub accepted the comment.
    Posted { url: Option<String> },
    /// GitHub answered with a non-success status.
    Rejected { status: u16, body: String },
    /// Token, target repository or PR number was not configured.
    Skipped,
}

#[derive(Serialize)]
struct CreateCommentRequest<'a> {
    body: &'a str,
}

#[derive(Deserialize)]
struct CreateCommentResponse {
    html_url: Option<String>,
}

/// Posts issue comments on pull requests.
pub struct PrCommenter {
    client: reqwest::Client,
    api_url: String,
    token: String,
    redactor: Redactor,
}

impl PrCommenter {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()?;

        let token = token.into();
        let redactor = Redactor::new().with_secret("GITHUB_TOKEN", Some(token.as_str()));

        Ok(Self {
            client,
            api_url: api_url.into(),
            token,
            redactor,
        })
    }

    fn comments_url(&self, repo: &str, number: u64) -> String {
        format!(
            "{}/repos/{}/issues/{}/comments",
            self.api_url.trim_end_matches('/'),
            repo,
            number
        )
    }

    /// Posts `body` as a comment on PR `number` of `repo`.
    ///
    /// Transport failures are errors; a non-2xx answer is a
    /// [`CommentOutcome::Rejected`] so callers can log it and carry on.
    pub async fn post(&self, repo: &str, number: u64, body: &str) -> Result<CommentOutcome> {
        let response = self
            .client
            .post(self.comments_url(repo, number))
            .header("Accept", "application/vnd.github+json")
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", "2022-11-28")
            .json(&CreateCommentRequest { body })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let url = response
                .json::<CreateCommentResponse>()
                .await
                .ok()
                .and_then(|r| r.html_url);
            return Ok(CommentOutcome::Posted { url });
        }

        let text = response.text().await.unwrap_or_default();
        Ok(CommentOutcome::Rejected {
            status: status.as_u16(),
            body: self.redactor.redact(text.trim()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comment_starts_with_header_then_review() {
        let body = compose_comment("Looks good.\n", "Tests passed in sandbox `sb-1`.");
        assert_eq!(
            body,
            "## AI Code Review\n\nLooks good.\n\n---\nTests passed in sandbox `sb-1`."
        );
    }

    #[test]
    fn comments_url_targets_issue_comments() {
        let commenter = PrCommenter::new("https://api.github.com/", "t").unwrap();
        assert_eq!(
            commenter.comments_url("acme/widgets", 42),
            "https://api.github.com/repos/acme/widgets/issues/42/comments"
        );
    }

    #[test]
    fn create_comment_request_serialization() {
        let json = serde_json::to_string(&CreateCommentRequest {
            body: "## AI Code Review\n\n\"quoted\"",
        })
        .unwrap();
        assert_eq!(json, r###"{"body":"## AI Code Review\n\n\"quoted\""}"###);
    }
}
