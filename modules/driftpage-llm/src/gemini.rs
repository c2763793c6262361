//! Gemini client: burst streaming, single generation and schema-constrained
//! review calls.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use driftpage_common::doc::normalize_doc;
use driftpage_common::extract::{json_from_text, ArrayObjectScanner};
use driftpage_common::Doc;
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::backoff::BackoffRegistry;
use crate::prompts::{build_burst_prompt, build_page_prompt, gemini_burst_schema};
use crate::provider::{PageProvider, ProviderId};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Maximum documents drained from one burst stream.
pub const BURST_LIMIT: usize = 10;

#[derive(Clone)]
pub struct GeminiClient {
    api_key: String,
    generation_model: String,
    review_model: String,
    base_url: String,
    http: reqwest::Client,
    backoff: Arc<BackoffRegistry>,
}

impl GeminiClient {
    pub fn new(
        api_key: &str,
        generation_model: &str,
        review_model: &str,
        timeout: Duration,
        backoff: Arc<BackoffRegistry>,
    ) -> Self {
        Self {
            api_key: api_key.to_string(),
            generation_model: generation_model.to_string(),
            review_model: review_model.to_string(),
            base_url: GEMINI_API_URL.to_string(),
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

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.base_url, model, method, self.api_key
        )
    }

    fn request_body(prompt: &str, response_schema: Option<Value>) -> Value {
        let mut generation_config = json!({"responseMimeType": "application/json"});
        if let Some(schema) = response_schema {
            generation_config["responseSchema"] = schema;
        }
        json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": generation_config,
        })
    }

    /// Schema-constrained JSON call. `Ok(None)` means the provider was
    /// rate-limited or overloaded and a backoff was recorded.
    pub async fn generate_json(
        &self,
        model: &str,
        prompt: &str,
        response_schema: Option<Value>,
    ) -> Result<Option<String>> {
        let url = self.endpoint(model, "generateContent");
        debug!(model, "Gemini generateContent request");
        let response = self
            .http
            .post(&url)
            .json(&Self::request_body(prompt, response_schema))
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        match status {
            200 => {
                let value: Value =
                    serde_json::from_str(&body).map_err(|e| anyhow!("bad Gemini response: {e}"))?;
                extract_gemini_text(&value)
                    .map(Some)
                    .ok_or_else(|| anyhow!("no text in Gemini response"))
            }
            429 | 503 => {
                self.backoff.record(ProviderId::Gemini.as_str());
                Ok(None)
            }
            _ => Err(anyhow!(
                "Gemini error ({status}): {}",
                driftpage_common::doc::truncate_to_char_boundary(&body, 300)
            )),
        }
    }

    pub fn review_model(&self) -> &str {
        &self.review_model
    }

    /// Stream up to [`BURST_LIMIT`] documents from one request.
    ///
    /// The response body is a JSON array of response envelopes; the text
    /// fragments inside those envelopes concatenate into a second JSON array
    /// of documents. Both layers are parsed incrementally so each document is
    /// yielded the moment its closing brace arrives. A failed request or an
    /// empty stream simply ends the stream; the engine handles fallback.
    pub fn burst(
        &self,
        brief: &str,
        seed: u64,
        category_note: &str,
    ) -> impl Stream<Item = Doc> + Send + 'static {
        let client = self.clone();
        let prompt = build_burst_prompt(category_note, brief, seed, BURST_LIMIT);

        async_stream::stream! {
            let url = client.endpoint(&client.generation_model, "streamGenerateContent");
            let body = GeminiClient::request_body(&prompt, Some(gemini_burst_schema(BURST_LIMIT)));
            let response = match client.http.post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "Gemini burst request failed");
                    return;
                }
            };
            let status = response.status().as_u16();
            if status != 200 {
                if status == 429 || status == 503 {
                    client.backoff.record(ProviderId::Gemini.as_str());
                }
                warn!(status, "Gemini burst returned non-200");
                return;
            }

            let mut envelopes = ArrayObjectScanner::new();
            let mut docs = ArrayObjectScanner::new();
            let mut pending: Vec<u8> = Vec::new();
            let mut yielded = 0usize;
            let mut byte_stream = response.bytes_stream();

            'outer: while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "Gemini burst stream read failed");
                        break;
                    }
                };
                // Chunks can split multi-byte characters; only feed the valid
                // UTF-8 prefix and carry the remainder into the next chunk.
                pending.extend_from_slice(&chunk);
                let valid_len = match std::str::from_utf8(&pending) {
                    Ok(_) => pending.len(),
                    Err(e) => e.valid_up_to(),
                };
                let text = String::from_utf8_lossy(&pending[..valid_len]).into_owned();
                pending.drain(..valid_len);
                for envelope in envelopes.push(&text) {
                    let Some(fragment) = extract_gemini_text(&envelope) else {
                        continue;
                    };
                    for candidate in docs.push(&fragment) {
                        match normalize_doc(&candidate) {
                            Ok(doc) => {
                                yielded += 1;
                                yield doc;
                                if yielded >= BURST_LIMIT {
                                    break 'outer;
                                }
                            }
                            Err(e) => {
                                debug!(error = %e, "skipping unusable burst document");
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Concatenated text parts of the first candidate.
pub fn extract_gemini_text(envelope: &Value) -> Option<String> {
    let parts = envelope
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[async_trait]
impl PageProvider for GeminiClient {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    async fn generate(&self, brief: &str, seed: u64, category_note: &str) -> Option<Doc> {
        let prompt = build_page_prompt(category_note, brief, seed);
        let text = match self.generate_json(&self.generation_model, &prompt, None).await {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                warn!(provider = "gemini", error = %e, "generation call failed");
                return None;
            }
        };
        let value = json_from_text(&text).ok()?;
        match normalize_doc(&value) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(provider = "gemini", error = %e, "generation output failed normalization");
                None
            }
        }
    }
}
