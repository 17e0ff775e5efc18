//! Text-generation abstraction for model calls.
//!
//! The [`Generator`] trait decouples pipeline orchestration from the HTTP
//! backend (an OpenAI-compatible chat-completions API). Tests use scripted
//! generators that return predetermined replies without network access.

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::io::config::ApiConfig;

/// Abstraction over text-generation backends.
pub trait Generator {
    /// Send one prompt and return the raw reply text.
    fn generate(&self, prompt: &str) -> Result<String>;
}

/// Generator backed by `POST {base_url}/chat/completions`.
pub struct OpenAiGenerator {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiGenerator {
    pub fn new(api: &ApiConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(api.timeout())
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", api.base_url.trim_end_matches('/')),
            model: api.model.clone(),
            max_tokens: api.max_tokens,
        })
    }
}

impl Generator for OpenAiGenerator {
    #[instrument(skip_all, fields(model = %self.model, prompt_bytes = prompt.len()))]
    fn generate(&self, prompt: &str) -> Result<String> {
        info!(endpoint = %self.endpoint, "requesting completion");
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .context("send completion request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            warn!(%status, "completion request rejected");
            bail!("API error ({status}): {}", body.trim());
        }

        let body: ChatResponse = response.json().context("decode completion response")?;
        let text = first_choice_text(body)?;
        debug!(reply_bytes = text.len(), "completion received");
        Ok(text)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

fn first_choice_text(body: ChatResponse) -> Result<String> {
    body.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| anyhow!("completion response contained no text"))
}
