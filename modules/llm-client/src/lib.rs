//! OpenAI-compatible LLM and embedding client.
//!
//! One client type covers every provider that speaks the OpenAI wire format
//! (OpenAI, Voyage for embeddings, most gateways) — the base URL and model
//! name select the provider. Structured extraction goes through the
//! provider's native `response_format: json_schema` API, so the reply is a
//! schema-valid object rather than prose to parse. Pipelines depend on the
//! [`ExtractAgent`] and [`EmbedAgent`] traits so tests can substitute
//! deterministic mocks.

pub mod error;
pub mod schema;
pub mod traits;
mod util;

pub use error::{LlmError, Result};
pub use schema::StructuredOutput;
pub use traits::{extract_typed, EmbedAgent, ExtractAgent};
pub use util::{strip_code_blocks, truncate_to_char_boundary};

use serde_json::json;
use tracing::debug;

/// Client for any OpenAI-compatible API.
#[derive(Clone)]
pub struct OpenAiCompatClient {
    api_key: String,
    base_url: String,
    chat_model: String,
    embedding_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(api_key: &str, chat_model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            chat_model: chat_model.to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_embedding_model(mut self, model: &str) -> Self {
        self.embedding_model = model.to_string();
        self
    }

    /// gpt-5 models reject an explicit temperature.
    fn temperature(&self) -> Option<f32> {
        if self.chat_model.starts_with("gpt-5") {
            None
        } else {
            Some(0.0)
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }

    fn reply_content(data: &serde_json::Value) -> Result<&str> {
        data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::Parse("missing choices[0].message.content".to_string()))
    }

    /// Send a chat completion and return the raw assistant text.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let mut body = json!({
            "model": self.chat_model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        if let Some(temperature) = self.temperature() {
            body["temperature"] = json!(temperature);
        }

        let data = self.post("/chat/completions", body).await?;
        Ok(Self::reply_content(&data)?.to_string())
    }

    /// Type-safe structured extraction via `response_format: json_schema`.
    pub async fn extract<T: StructuredOutput>(
        &self,
        instructions: &str,
        input: &str,
    ) -> Result<T> {
        let value = self
            .extract_with_schema(instructions, input, T::openai_schema())
            .await?;
        serde_json::from_value(value).map_err(|e| LlmError::Parse(format!("schema mismatch: {e}")))
    }

    /// Structured extraction against an explicit schema. The schema is
    /// enforced by the provider, not by prompt wording.
    pub async fn extract_with_schema(
        &self,
        instructions: &str,
        input: &str,
        schema: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut body = json!({
            "model": self.chat_model,
            "messages": [
                {"role": "system", "content": instructions},
                {"role": "user", "content": input},
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "structured_response",
                    "strict": true,
                    "schema": schema,
                },
            },
        });
        if let Some(temperature) = self.temperature() {
            body["temperature"] = json!(temperature);
        }

        let data = self.post("/chat/completions", body).await?;
        let reply = Self::reply_content(&data)?;
        // Gateways without strict enforcement occasionally fence the JSON.
        let cleaned = strip_code_blocks(reply);
        debug!(reply_len = cleaned.len(), "parsing structured extraction");
        serde_json::from_str(cleaned)
            .map_err(|e| LlmError::Parse(format!("invalid JSON reply: {e}: {cleaned}")))
    }

    /// Embed a single text.
    pub async fn embed(&self, text: String) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch(vec![text]).await?;
        batch
            .pop()
            .ok_or_else(|| LlmError::Parse("empty embedding response".to_string()))
    }

    /// Embed multiple texts in one call. Order matches the input.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let body = json!({
            "model": self.embedding_model,
            "input": texts,
        });

        let data = self.post("/embeddings", body).await?;
        let items = data["data"]
            .as_array()
            .ok_or_else(|| LlmError::Parse("missing data array".to_string()))?;

        let mut embeddings = Vec::with_capacity(items.len());
        for item in items {
            let vector = item["embedding"]
                .as_array()
                .ok_or_else(|| LlmError::Parse("missing embedding array".to_string()))?
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            embeddings.push(vector);
        }
        Ok(embeddings)
    }
}
