//! Google-family provider client (spec.md §4.3): supports either API-key
//! or service-account credentials, and accepts a `thinking_level` hint.
//!
//! Grounded on
//! `examples/tensorzero-tensorzero/gateway/src/inference/providers/google_ai_studio_gemini.rs`
//! for the request/URL shape and on `gcp_vertex_gemini.rs` for the
//! service-account credential variant.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use evalengine_core::error::Result;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use crate::json_repair::parse_json_response;
use crate::provider::{upstream_error, GenerateJsonResult, GenerateOptions, GenerateResult, LlmProvider, ThinkingLevel};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub enum GoogleCredentials {
    ApiKey(SecretString),
    ServiceAccount { access_token: SecretString },
}

pub struct GoogleProvider {
    client: reqwest::Client,
    model_name: String,
    credentials: GoogleCredentials,
    base_url: String,
}

impl GoogleProvider {
    pub fn new(model_name: String, credentials: GoogleCredentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            model_name,
            credentials,
            base_url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
        }
    }

    fn request_url(&self) -> String {
        match &self.credentials {
            GoogleCredentials::ApiKey(key) => format!(
                "{}/{}:generateContent?key={}",
                self.base_url,
                self.model_name,
                key.expose_secret()
            ),
            GoogleCredentials::ServiceAccount { .. } => {
                format!("{}/{}:generateContent", self.base_url, self.model_name)
            }
        }
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            GoogleCredentials::ApiKey(_) => builder,
            GoogleCredentials::ServiceAccount { access_token } => {
                builder.bearer_auth(access_token.expose_secret())
            }
        }
    }

    fn thinking_budget(level: ThinkingLevel) -> Option<i32> {
        match level {
            ThinkingLevel::None => Some(0),
            ThinkingLevel::Low => Some(1024),
            ThinkingLevel::Medium => Some(8192),
            ThinkingLevel::High => Some(24576),
        }
    }

    fn build_generation_config(options: &GenerateOptions, response_schema: Option<&Value>) -> Value {
        let mut config = serde_json::Map::new();
        if let Some(temperature) = options.temperature {
            config.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(level) = options.thinking_level {
            if let Some(budget) = Self::thinking_budget(level) {
                config.insert("thinkingConfig".to_string(), json!({"thinkingBudget": budget}));
            }
        }
        if let Some(schema) = response_schema {
            config.insert("responseMimeType".to_string(), json!("application/json"));
            config.insert("responseSchema".to_string(), schema.clone());
        }
        Value::Object(config)
    }

    async fn call(&self, body: Value) -> Result<(String, Option<i32>, Option<i32>)> {
        let request = self.authorize(self.client.post(self.request_url()).timeout(REQUEST_TIMEOUT).json(&body));
        let response = request.send().await.map_err(|e| upstream_error("google", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(upstream_error("google", format!("HTTP {status}: {body}")));
        }

        let payload: Value = response.json().await.map_err(|e| upstream_error("google", e))?;
        let text = payload["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| upstream_error("google", "missing candidates[0].content.parts[0].text"))?
            .to_string();
        let tokens_in = payload["usageMetadata"]["promptTokenCount"].as_i64().map(|n| n as i32);
        let tokens_out = payload["usageMetadata"]["candidatesTokenCount"].as_i64().map(|n| n as i32);
        Ok((text, tokens_in, tokens_out))
    }

    fn build_contents(prompt: &str, audio: Option<(&[u8], &str)>) -> Value {
        let mut parts = vec![json!({"text": prompt})];
        if let Some((bytes, mime_type)) = audio {
            parts.push(json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(bytes),
                }
            }));
        }
        json!([{"role": "user", "parts": parts}])
    }
}

#[async_trait]
impl LlmProvider for GoogleProvider {
    fn provider_name(&self) -> &str {
        "google"
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn generate(&self, system_prompt: Option<&str>, prompt: &str, options: &GenerateOptions) -> Result<GenerateResult> {
        let mut body = serde_json::Map::new();
        body.insert("contents".to_string(), Self::build_contents(prompt, None));
        if let Some(system) = system_prompt {
            body.insert("systemInstruction".to_string(), json!({"parts": [{"text": system}]}));
        }
        body.insert("generationConfig".to_string(), Self::build_generation_config(options, None));

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
        body.insert("contents".to_string(), Self::build_contents(prompt, None));
        if let Some(system) = system_prompt {
            body.insert("systemInstruction".to_string(), json!({"parts": [{"text": system}]}));
        }
        body.insert("generationConfig".to_string(), Self::build_generation_config(options, Some(schema)));

        let (text, tokens_in, tokens_out) = self.call(Value::Object(body)).await?;
        let repaired = parse_json_response(&text).map_err(|e| upstream_error("google", e))?;
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
        body.insert(
            "contents".to_string(),
            Self::build_contents(prompt, Some((audio_bytes, audio_mime_type))),
        );
        if let Some(system) = system_prompt {
            body.insert("systemInstruction".to_string(), json!({"parts": [{"text": system}]}));
        }
        body.insert("generationConfig".to_string(), Self::build_generation_config(options, Some(schema)));

        let (text, tokens_in, tokens_out) = self.call(Value::Object(body)).await?;
        let repaired = parse_json_response(&text).map_err(|e| upstream_error("google", e))?;
        Ok(GenerateJsonResult {
            value: repaired.value,
            was_repaired: repaired.was_repaired,
            raw_text: text,
            tokens_in,
            tokens_out,
        })
    }
}
