//! OpenAI-family provider client (spec.md §4.3): JSON-schema response
//! formatting via `response_format: {type: "json_schema", ...}`.
//!
//! Grounded on
//! `examples/tensorzero-tensorzero/gateway/src/inference/providers/openai.rs`'s
//! `OpenAIResponseFormat::JsonSchema` shape and chat-completions request
//! structure.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use evalengine_core::error::Result;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use crate::json_repair::parse_json_response;
use crate::provider::{upstream_error, GenerateJsonResult, GenerateOptions, GenerateResult, LlmProvider};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    client: reqwest::Client,
    model_name: String,
    api_key: SecretString,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(model_name: String, api_key: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            model_name,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    fn build_messages(system_prompt: Option<&str>, prompt: &str, audio: Option<(&[u8], &str)>) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }

        let user_content = match audio {
            None => json!(prompt),
            Some((bytes, mime_type)) => {
                let format = if mime_type.contains("mp3") { "mp3" } else { "wav" };
                json!([
                    {"type": "text", "text": prompt},
                    {
                        "type": "input_audio",
                        "input_audio": {
                            "data": base64::engine::general_purpose::STANDARD.encode(bytes),
                            "format": format,
                        }
                    }
                ])
            }
        };
        messages.push(json!({"role": "user", "content": user_content}));
        Value::Array(messages)
    }

    async fn call(&self, body: Value) -> Result<(String, Option<i32>, Option<i32>)> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| upstream_error("openai", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_error("openai", format!("HTTP {status}: {body}")));
        }

        let payload: Value = response.json().await.map_err(|e| upstream_error("openai", e))?;
        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| upstream_error("openai", "missing choices[0].message.content"))?
            .to_string();
        let tokens_in = payload["usage"]["prompt_tokens"].as_i64().map(|n| n as i32);
        let tokens_out = payload["usage"]["completion_tokens"].as_i64().map(|n| n as i32);
        Ok((text, tokens_in, tokens_out))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn generate(&self, system_prompt: Option<&str>, prompt: &str, options: &GenerateOptions) -> Result<GenerateResult> {
        let mut body = serde_json::Map::new();
        body.insert("model".to_string(), json!(self.model_name));
        body.insert("messages".to_string(), Self::build_messages(system_prompt, prompt, None));
        if let Some(temperature) = options.temperature {
            body.insert("temperature".to_string(), json!(temperature));
        }

        let (text, tokens_in, tokens_out) = self.call(Value::Object(body)).await?;
        Ok(GenerateResult { text, tokens_in, tokens_out })
    }

    async fn generate_json(
        &self,
        system_prompt: Option<&str>,
        prompt: &str,
        schema: &Value,
        options: &GenerateOptions,
    ) -> Result<GenerateJsonResult> {
        let mut body = serde_json::Map::new();
        body.insert("model".to_string(), json!(self.model_name));
        body.insert("messages".to_string(), Self::build_messages(system_prompt, prompt, None));
        if let Some(temperature) = options.temperature {
            body.insert("temperature".to_string(), json!(temperature));
        }
        body.insert(
            "response_format".to_string(),
            json!({"type": "json_schema", "json_schema": {"name": "response", "strict": true, "schema": schema}}),
        );

        let (text, tokens_in, tokens_out) = self.call(Value::Object(body)).await?;
        let repaired = parse_json_response(&text).map_err(|e| upstream_error("openai", e))?;
        Ok(GenerateJsonResult {
            value: repaired.value,
            was_repaired: repaired.was_repaired,
            raw_text: text,
            tokens_in,
            tokens_out,
        })
    }

    async fn generate_with_audio(
        &self,
        system_prompt: Option<&str>,
        prompt: &str,
        audio_bytes: &[u8],
        audio_mime_type: &str,
        schema: &Value,
        options: &GenerateOptions,
    ) -> Result<GenerateJsonResult> {
        let mut body = serde_json::Map::new();
        body.insert("model".to_string(), json!(self.model_name));
        body.insert(
            "messages".to_string(),
            Self::build_messages(system_prompt, prompt, Some((audio_bytes, audio_mime_type))),
        );
        if let Some(temperature) = options.temperature {
            body.insert("temperature".to_string(), json!(temperature));
        }
        body.insert(
            "response_format".to_string(),
            json!({"type": "json_schema", "json_schema": {"name": "response", "strict": true, "schema": schema}}),
        );

        let (text, tokens_in, tokens_out) = self.call(Value::Object(body)).await?;
        let repaired = parse_json_response(&text).map_err(|e| upstream_error("openai", e))?;
        Ok(GenerateJsonResult {
            value: repaired.value,
            was_repaired: repaired.was_repaired,
            raw_text: text,
            tokens_in,
            tokens_out,
        })
    }
}
