//! Chat completion: the assistant's reply to a prompt given prior history.
//!
//! [`DirectChat`] calls an OpenAI-compatible `/chat/completions` endpoint
//! (DeepSeek by default) with the bearer credential. [`RelayChat`] posts
//! `{prompt, history}` to a relay that answers `{content}`. Both report a
//! missing credential as `VoiceError::Configuration` before any request.

use crate::config::{ChatBackend, ServiceSettings};
use crate::error::{Stage, VoiceError, VoiceResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use venom_core::HistoryMessage;

#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, prompt: &str, history: &[HistoryMessage]) -> VoiceResult<String>;
}

/// Builds the client selected by `settings.chat_backend`.
pub fn chat_from_settings(settings: &ServiceSettings) -> VoiceResult<Arc<dyn ChatCompletion>> {
    Ok(match settings.chat_backend {
        ChatBackend::Direct => Arc::new(DirectChat::from_settings(settings)?),
        ChatBackend::Relay => Arc::new(RelayChat::from_settings(settings)?),
    })
}

fn require_key(api_key: &Option<String>) -> VoiceResult<&str> {
    api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| VoiceError::Configuration("chat API key is not set".to_string()))
}

fn build_client(settings: &ServiceSettings) -> VoiceResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(settings.request_timeout())
        .build()
        .map_err(|e| VoiceError::network(Stage::Generation, e.to_string()))
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

async fn error_detail(res: reqwest::Response) -> String {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(env) => env.error.message,
        Err(_) => format!("chat API error {}: {}", status, body),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

/// OpenAI-compatible chat completion (DeepSeek `deepseek-chat` by default).
pub struct DirectChat {
    url: String,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
    history_limit: usize,
    client: reqwest::Client,
}

impl DirectChat {
    pub fn from_settings(settings: &ServiceSettings) -> VoiceResult<Self> {
        Ok(Self {
            url: settings.chat_url.clone(),
            api_key: settings.api_key.clone(),
            model: settings.chat_model.clone(),
            system_prompt: settings.system_prompt.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            history_limit: settings.history_limit,
            client: build_client(settings)?,
        })
    }

    fn messages<'a>(&'a self, prompt: &'a str, history: &'a [HistoryMessage]) -> Vec<ChatMessage<'a>> {
        let skip = history.len().saturating_sub(self.history_limit);
        let mut messages = Vec::with_capacity(history.len() - skip + 2);
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &self.system_prompt,
            });
        }
        messages.extend(history[skip..].iter().map(|m| ChatMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });
        messages
    }
}

#[async_trait]
impl ChatCompletion for DirectChat {
    async fn complete(&self, prompt: &str, history: &[HistoryMessage]) -> VoiceResult<String> {
        let key = require_key(&self.api_key)?;
        let body = ChatRequest {
            model: &self.model,
            messages: self.messages(prompt, history),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let res = self
            .client
            .post(&self.url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::network(Stage::Generation, e.to_string()))?;
        if !res.status().is_success() {
            return Err(VoiceError::network(Stage::Generation, error_detail(res).await));
        }
        let parsed: ChatResponse = res.json().await.map_err(|e| {
            VoiceError::network(Stage::Generation, format!("malformed chat response: {}", e))
        })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| VoiceError::network(Stage::Generation, "chat response had no choices"))?;
        debug!(model = %self.model, chars = content.len(), "chat completion received");
        Ok(content)
    }
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    prompt: &'a str,
    history: &'a [HistoryMessage],
}

#[derive(Deserialize)]
struct RelayResponse {
    content: String,
}

/// Chat relay speaking `{prompt, history}` → `{content}` with a bearer credential.
pub struct RelayChat {
    url: String,
    api_key: Option<String>,
    history_limit: usize,
    client: reqwest::Client,
}

impl RelayChat {
    pub fn from_settings(settings: &ServiceSettings) -> VoiceResult<Self> {
        Ok(Self {
            url: settings.chat_url.clone(),
            api_key: settings.api_key.clone(),
            history_limit: settings.history_limit,
            client: build_client(settings)?,
        })
    }
}

#[async_trait]
impl ChatCompletion for RelayChat {
    async fn complete(&self, prompt: &str, history: &[HistoryMessage]) -> VoiceResult<String> {
        let key = require_key(&self.api_key)?;
        let skip = history.len().saturating_sub(self.history_limit);
        let res = self
            .client
            .post(&self.url)
            .bearer_auth(key)
            .json(&RelayRequest {
                prompt,
                history: &history[skip..],
            })
            .send()
            .await
            .map_err(|e| VoiceError::network(Stage::Generation, e.to_string()))?;
        if !res.status().is_success() {
            return Err(VoiceError::network(Stage::Generation, error_detail(res).await));
        }
        let parsed: RelayResponse = res.json().await.map_err(|e| {
            VoiceError::network(Stage::Generation, format!("malformed chat response: {}", e))
        })?;
        Ok(parsed.content)
    }
}
