//! OpenAI-compatible chat-completions client, used for both the OpenRouter
//! primary and the Groq fallback.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use driftpage_common::doc::normalize_doc;
use driftpage_common::extract::json_from_text;
use driftpage_common::Doc;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, warn};

use crate::backoff::BackoffRegistry;
use crate::prompts::build_page_prompt;
use crate::provider::{PageProvider, ProviderId};
use crate::wire::{ChatRequest, ChatResponse, WireMessage};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";
const GROQ_API_URL: &str = "https://api.groq.com/openai/v1";

pub struct ChatCompletionsClient {
    id: ProviderId,
    api_key: String,
    model: String,
    fallback_model: Option<String>,
    base_url: String,
    http: reqwest::Client,
    backoff: Arc<BackoffRegistry>,
}

impl ChatCompletionsClient {
    pub fn openrouter(
        api_key: &str,
        model: &str,
        fallback_model: &str,
        timeout: Duration,
        backoff: Arc<BackoffRegistry>,
    ) -> Self {
        Self::new(
            ProviderId::OpenRouter,
            api_key,
            model,
            Some(fallback_model),
            OPENROUTER_API_URL,
            timeout,
            backoff,
        )
    }

    pub fn groq(
        api_key: &str,
        model: &str,
        timeout: Duration,
        backoff: Arc<BackoffRegistry>,
    ) -> Self {
        Self::new(
            ProviderId::Groq,
            api_key,
            model,
            None,
            GROQ_API_URL,
            timeout,
            backoff,
        )
    }

    fn new(
        id: ProviderId,
        api_key: &str,
        model: &str,
        fallback_model: Option<&str>,
        base_url: &str,
        timeout: Duration,
        backoff: Arc<BackoffRegistry>,
    ) -> Self {
        Self {
            id,
            api_key: api_key.to_string(),
            model: model.to_string(),
            fallback_model: fallback_model.map(str::to_string),
            base_url: base_url.to_string(),
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            backoff,
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.to_string();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn post_chat(&self, request: &ChatRequest) -> Result<(u16, String)> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(provider = %self.id, model = %request.model, "chat request");
        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }

    /// One chat call with the full failure ladder applied:
    /// json-mode retry on 400, backoff on 429/503, one fallback-model retry
    /// when the model itself is rejected.
    async fn chat_with_ladder(&self, messages: Vec<WireMessage>) -> Result<Option<String>> {
        let mut model = self.model.clone();
        let mut json_mode = true;
        let mut model_retry_left = self.fallback_model.is_some();

        loop {
            let mut request = ChatRequest::new(&model, messages.clone()).max_tokens_default();
            if json_mode {
                request = request.json_mode();
            }
            let (status, body) = self.post_chat(&request).await?;

            match status {
                200 => {
                    let parsed: ChatResponse = serde_json::from_str(&body)
                        .map_err(|e| anyhow!("bad chat response: {e}"))?;
                    return Ok(parsed.text());
                }
                400 if json_mode && body.to_lowercase().contains("json") => {
                    // e.g. "json mode is not enabled for this model"
                    debug!(provider = %self.id, "retrying without json mode");
                    json_mode = false;
                    continue;
                }
                429 | 503 => {
                    self.backoff.record(self.id.as_str());
                    return Ok(None);
                }
                _ => {
                    let lowered = body.to_lowercase();
                    let model_rejected = lowered.contains("model not found")
                        || lowered.contains("invalid model")
                        || lowered.contains("429");
                    if model_rejected && model_retry_left {
                        model = self.fallback_model.clone().unwrap();
                        model_retry_left = false;
                        warn!(provider = %self.id, fallback = %model, "model rejected, retrying with fallback model");
                        continue;
                    }
                    return Err(anyhow!(
                        "{} chat error ({status}): {}",
                        self.id,
                        driftpage_common::doc::truncate_to_char_boundary(&body, 300)
                    ));
                }
            }
        }
    }

    /// One-shot repair of malformed reviewer output: ask the model to emit
    /// `raw` again as JSON conforming to `schema`.
    pub async fn repair_to_schema(&self, raw: &str, schema: Value, name: &str) -> Option<Value> {
        let messages = vec![
            WireMessage::system(
                "You repair malformed JSON. Re-emit the following content as a single valid \
                 JSON object conforming to the provided schema. Preserve the original data; \
                 fill in required keys that are missing. Output JSON only.",
            ),
            WireMessage::user(format!("Schema:\n{schema}\n\nContent:\n{raw}")),
        ];
        let request = ChatRequest::new(&self.model, messages).json_schema(name, schema);
        match self.post_chat(&request).await {
            Ok((200, body)) => serde_json::from_str::<ChatResponse>(&body)
                .ok()
                .and_then(ChatResponse::text)
                .and_then(|text| json_from_text(&text).ok()),
            Ok((status, _)) => {
                if status == 429 || status == 503 {
                    self.backoff.record(self.id.as_str());
                }
                warn!(provider = %self.id, status, "JSON repair call failed");
                None
            }
            Err(e) => {
                warn!(provider = %self.id, error = %e, "JSON repair call failed");
                None
            }
        }
    }
}

impl ChatRequest {
    fn max_tokens_default(mut self) -> Self {
        self.max_tokens = Some(8192);
        self.temperature = Some(1.0);
        self
    }
}

#[async_trait]
impl PageProvider for ChatCompletionsClient {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn generate(&self, brief: &str, seed: u64, category_note: &str) -> Option<Doc> {
        let prompt = build_page_prompt(category_note, brief, seed);
        let messages = vec![WireMessage::user(prompt)];

        let text = match self.chat_with_ladder(messages).await {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                warn!(provider = %self.id, error = %e, "generation call failed");
                return None;
            }
        };

        let value = match json_from_text(&text) {
            Ok(value) => value,
            Err(e) => {
                warn!(provider = %self.id, error = %e, "unusable generation output");
                return None;
            }
        };
        match normalize_doc(&value) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(provider = %self.id, error = %e, "generation output failed normalization");
                None
            }
        }
    }
}
