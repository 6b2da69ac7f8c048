//! Model-generated code review.
//!
//! The [`Reviewer`] is optional by construction: without a model it returns
//! [`FALLBACK_REVIEW`] and never touches the network.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ModelSettings, ReviewConfig, FALLBACK_REVIEW};
use crate::error::{Error, Result};

/// Upper bound on a single completion request.
const COMPLETION_TIMEOUT_SECS: u64 = 120;

/// A chat model that answers one system + user exchange.
#[async_trait]
pub trait ReviewModel: Send + Sync {
    /// Returns the text of the first choice.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Returns the model identifier.
    fn model(&self) -> &str;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct ChatCompletionsClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(COMPLETION_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ReviewModel for ChatCompletionsClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Review(format!(
                "chat completion returned {}: {}",
                status,
                body.trim()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Review(format!("malformed chat completion response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| Error::Review("chat completion returned no choices".to_string()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Produces the review text for a PR snapshot.
pub struct Reviewer {
    model: Option<Box<dyn ReviewModel>>,
    system_prompt: String,
    max_input_bytes: usize,
}

impl Reviewer {
    /// A reviewer that always returns [`FALLBACK_REVIEW`].
    pub fn disabled() -> Self {
        let settings = ModelSettings::default();
        Self {
            model: None,
            system_prompt: settings.system_prompt,
            max_input_bytes: settings.max_diff_bytes,
        }
    }

    /// A reviewer backed by `model`.
    pub fn with_model(model: Box<dyn ReviewModel>, settings: &ModelSettings) -> Self {
        Self {
            model: Some(model),
            system_prompt: settings.system_prompt.clone(),
            max_input_bytes: settings.max_diff_bytes,
        }
    }

    /// Builds a chat-completions reviewer when an API key is configured.
    pub fn from_config(config: &ReviewConfig) -> Result<Self> {
        match &config.llm_api_key {
            Some(key) => {
                let client = ChatCompletionsClient::new(
                    &config.review.base_url,
                    key,
                    &config.review.model,
                )?;
                Ok(Self::with_model(Box::new(client), &config.review))
            }
            None => Ok(Self::disabled()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.model.is_some()
    }

    /// Reviews the captured diagnostic output.
    pub async fn review(&self, diagnostics: &str) -> Result<String> {
        let Some(model) = &self.model else {
            tracing::info!("no model API key configured, using fallback review");
            return Ok(FALLBACK_REVIEW.to_string());
        };

        let input = truncate_utf8(diagnostics, self.max_input_bytes);
        if input.len() < diagnostics.len() {
            tracing::warn!(
                original_bytes = diagnostics.len(),
                kept_bytes = input.len(),
                "diagnostic output truncated before review"
            );
        }

        tracing::info!(model = %model.model(), "requesting model review");
        let review = model.complete(&self.system_prompt, input).await?;
        tracing::info!(chars = review.len(), "received model review");
        Ok(review)
    }
}

/// Cuts `text` to at most `max_bytes`, backing off to a char boundary.
fn truncate_utf8(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
