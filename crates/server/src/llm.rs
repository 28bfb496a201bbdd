//! Oracle clients over HTTP.
//!
//! OpenAI and Ollama share the chat-completions wire format and are asked for
//! `response_format: json_object`. Anthropic gets the instructions as its
//! `system` prompt. Both return the raw text; JSON extraction happens in the
//! agent.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use coachline_agent::llm::LlmClient;
use coachline_core::config::{LlmConfig, LlmProvider, OLLAMA_DEFAULT_BASE_URL};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub fn build_llm_client(config: &LlmConfig) -> Arc<dyn LlmClient> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.provider {
        LlmProvider::OpenAi => Arc::new(ChatCompletionsClient::new(
            format!("{}/chat/completions", base(config, OPENAI_BASE_URL)),
            config.api_key.clone(),
            config.model.clone(),
            config.max_tokens,
            timeout,
        )),
        LlmProvider::Ollama => Arc::new(ChatCompletionsClient::new(
            format!("{}/v1/chat/completions", base(config, OLLAMA_DEFAULT_BASE_URL)),
            config.api_key.clone(),
            config.model.clone(),
            config.max_tokens,
            timeout,
        )),
        LlmProvider::Anthropic => Arc::new(AnthropicClient::new(
            base(config, ANTHROPIC_BASE_URL),
            config.api_key.clone().unwrap_or_else(|| SecretString::from(String::new())),
            config.model.clone(),
            config.max_tokens,
            timeout,
        )),
    }
}

fn base(config: &LlmConfig, fallback: &str) -> String {
    config
        .base_url
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(fallback)
        .trim_end_matches('/')
        .to_string()
}

/// OpenAI-compatible `/chat/completions`.
pub struct ChatCompletionsClient {
    client: Client,
    url: String,
    api_key: Option<SecretString>,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl ChatCompletionsClient {
    pub fn new(
        url: String,
        api_key: Option<SecretString>,
        model: String,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self { client: Client::new(), url, api_key, model, max_tokens, timeout }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for ChatCompletionsClient {
    async fn complete(&self, prompt: &str, context: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": context},
                {"role": "user", "content": prompt},
            ],
            "temperature": 0,
            "max_tokens": self.max_tokens,
            "response_format": {"type": "json_object"},
        });

        let mut request = self.client.post(&self.url).json(&body).timeout(self.timeout);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }
        let response = request.send().await.context("oracle request failed")?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("oracle returned {status}: {}", truncate(&detail)));
        }

        let completion: ChatCompletion =
            response.json().await.context("failed to decode chat completion")?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("chat completion had no content"))
    }
}

/// Anthropic `/v1/messages`.
pub struct AnthropicClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl AnthropicClient {
    pub fn new(
        base_url: String,
        api_key: SecretString,
        model: String,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self { client: Client::new(), base_url, api_key, model, max_tokens, timeout }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicMessage {
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, prompt: &str, context: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": context,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .context("oracle request failed")?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("oracle returned {status}: {}", truncate(&detail)));
        }

        let message: AnthropicMessage =
            response.json().await.context("failed to decode anthropic message")?;
        let text = message
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(anyhow!("anthropic message had no text"));
        }
        Ok(text)
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(200).collect()
}
