//! Language-model backends behind a single extraction trait.
//!
//! The backend is chosen once from the model name:
//!
//! | Prefix | Backend | Endpoint |
//! |---|---|---|
//! | `gpt-`, `text-` | [`OpenAiStyle`] | `POST {base}/chat/completions` |
//! | `gemini-` | [`GeminiStyle`] | `POST {base}/models/{model}:generateContent` |
//! | `ollama:` | [`LocalModelStyle`] | `POST {base}/api/generate` |

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::prompts::PromptStyle;
use crate::config::ExtractionSettings;
use crate::error::{HarvestError, Result};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Per-call limit unless the settings say otherwise.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Context window of `gpt-4o-mini`.
pub const LARGE_CONTEXT_WINDOW: usize = 128_000;
/// Context window assumed for every other model.
pub const DEFAULT_CONTEXT_WINDOW: usize = 16_385;

pub fn context_window_for(model: &str) -> usize {
    if model == "gpt-4o-mini" {
        LARGE_CONTEXT_WINDOW
    } else {
        DEFAULT_CONTEXT_WINDOW
    }
}

/// "Extract structured data from this text for this query."
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Token capacity of the underlying model.
    fn context_window(&self) -> usize;

    /// Raw model reply, expected to be a JSON array of objects.
    /// An empty `model_hint` means the backend's configured model.
    async fn deliver_extraction(&self, content: &str, query: &str, model_hint: &str)
        -> Result<String>;
}

fn pick_model<'a>(configured: &'a str, hint: &'a str) -> &'a str {
    if hint.trim().is_empty() {
        configured
    } else {
        hint
    }
}

async fn error_body(response: reqwest::Response, backend: &str) -> HarvestError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    HarvestError::Backend(format!("{backend} returned HTTP {status}: {text}"))
}

// ── OpenAI-compatible chat completions ──

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Clone)]
pub struct OpenAiStyle {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl OpenAiStyle {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ExtractionBackend for OpenAiStyle {
    fn name(&self) -> &str {
        "openai"
    }

    fn context_window(&self) -> usize {
        context_window_for(&self.model)
    }

    async fn deliver_extraction(
        &self,
        content: &str,
        query: &str,
        model_hint: &str,
    ) -> Result<String> {
        let request = ChatRequest {
            model: pick_model(&self.model, model_hint),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: PromptStyle::OpenAi.render(content, query),
            }],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_body(response, "OpenAI").await);
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| HarvestError::Backend("no choices in OpenAI response".into()))
    }
}

// ── Gemini generateContent ──

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Clone)]
pub struct GeminiStyle {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiStyle {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ExtractionBackend for GeminiStyle {
    fn name(&self) -> &str {
        "gemini"
    }

    fn context_window(&self) -> usize {
        context_window_for(&self.model)
    }

    async fn deliver_extraction(
        &self,
        content: &str,
        query: &str,
        model_hint: &str,
    ) -> Result<String> {
        let model = pick_model(&self.model, model_hint);
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": PromptStyle::Gemini.render(content, query) }] }],
            "generationConfig": { "temperature": 0.0 }
        });

        let response = self
            .client
            .post(format!("{}/models/{model}:generateContent", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_body(response, "Gemini").await);
        }

        let reply: GeminiResponse = response.json().await?;
        let candidate = reply
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| HarvestError::Backend("no candidates in Gemini response".into()))?;
        Ok(candidate
            .content
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

// ── Local models served by Ollama ──

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Clone)]
pub struct LocalModelStyle {
    client: Client,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl LocalModelStyle {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
            base_url: OLLAMA_BASE_URL.to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url
        } else {
            format!("http://{url}")
        };
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ExtractionBackend for LocalModelStyle {
    fn name(&self) -> &str {
        "ollama"
    }

    fn context_window(&self) -> usize {
        context_window_for(&self.model)
    }

    async fn deliver_extraction(
        &self,
        content: &str,
        query: &str,
        model_hint: &str,
    ) -> Result<String> {
        let request = GenerateRequest {
            model: pick_model(&self.model, model_hint),
            prompt: PromptStyle::Local.render(content, query),
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_body(response, "Ollama").await);
        }

        let reply: GenerateResponse = response.json().await?;
        Ok(reply.response)
    }
}

/// Choose a backend from the model name, reading keys from the environment.
pub fn select_backend(settings: &ExtractionSettings) -> Result<Arc<dyn ExtractionBackend>> {
    select_backend_with(settings, |key| std::env::var(key).ok())
}

/// As [`select_backend`], with an explicit variable lookup.
pub fn select_backend_with<F>(
    settings: &ExtractionSettings,
    lookup: F,
) -> Result<Arc<dyn ExtractionBackend>>
where
    F: Fn(&str) -> Option<String>,
{
    let model = settings.model.trim();
    let timeout = Duration::from_secs(settings.request_timeout_secs);
    let require = |key: &str| {
        lookup(key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| HarvestError::Config(format!("{key} is not set (model {model})")))
    };

    if let Some(local) = model.strip_prefix("ollama:") {
        if local.is_empty() {
            return Err(HarvestError::Config("ollama: prefix needs a model name".into()));
        }
        let mut backend = LocalModelStyle::new(local).with_timeout(timeout);
        if let Some(url) = &settings.ollama_base_url {
            backend = backend.with_base_url(url.clone());
        }
        tracing::debug!("using local model backend ({local})");
        return Ok(Arc::new(backend));
    }

    if model.starts_with("gemini-") {
        let mut backend = GeminiStyle::new(require("GOOGLE_API_KEY")?, model).with_timeout(timeout);
        if let Some(url) = &settings.gemini_base_url {
            backend = backend.with_base_url(url.clone());
        }
        tracing::debug!("using Gemini backend ({model})");
        return Ok(Arc::new(backend));
    }

    if model.starts_with("gpt-") || model.starts_with("text-") {
        let mut backend = OpenAiStyle::new(require("OPENAI_API_KEY")?, model).with_timeout(timeout);
        if let Some(url) = &settings.openai_base_url {
            backend = backend.with_base_url(url.clone());
        }
        tracing::debug!("using OpenAI backend ({model})");
        return Ok(Arc::new(backend));
    }

    Err(HarvestError::Config(format!(
        "unsupported model {model:?}: expected a gpt-, text-, gemini- or ollama: prefix"
    )))
}
