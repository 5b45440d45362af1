//! The Audit Wrapper (spec.md §4.3): wraps any [`LlmProvider`] and persists
//! one `api_logs` row per call, success or failure, without ever letting a
//! persistence failure break the call it is auditing.
//!
//! Grounded on the teacher's pattern of wrapping a provider with a
//! logging/metrics decorator at the call boundary (see
//! `examples/tensorzero-tensorzero/gateway/src/inference/providers/provider_trait.rs`
//! and its model-level retry/observability wrapper) rather than threading
//! logging calls through every call site.

use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use evalengine_core::error::Result;
use evalengine_core::models::{ApiLog, LlmMethod, API_LOG_SYSTEM_PROMPT_LIMIT, API_LOG_TEXT_LIMIT};
use evalengine_core::models::truncate_chars;
use evalengine_core::repository::Repository;
use serde_json::Value;
use uuid::Uuid;

use crate::provider::{GenerateJsonResult, GenerateOptions, GenerateResult, LlmProvider};

/// Mutable call context threaded through an audited provider. Wrapped in a
/// [`Mutex`] rather than `&mut self` because [`LlmProvider`] methods take
/// `&self` (judges hold a `Arc<dyn LlmProvider>` shared across concurrent
/// parallel-engine workers; only `run_id`/`thread_id` change between calls,
/// never the provider itself).
#[derive(Debug, Clone, Default)]
pub struct AuditContext {
    pub run_id: Option<Uuid>,
    pub thread_id: Option<String>,
}

pub struct AuditedProvider<P> {
    inner: P,
    repository: Repository,
    context: Mutex<AuditContext>,
}

impl<P: LlmProvider> AuditedProvider<P> {
    pub fn new(inner: P, repository: Repository) -> Self {
        Self {
            inner,
            repository,
            context: Mutex::new(AuditContext::default()),
        }
    }

    pub fn set_context(&self, context: AuditContext) {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.context.lock().unwrap();
        *guard = context;
    }

    fn current_context(&self) -> AuditContext {
        #[allow(clippy::unwrap_used)]
        self.context.lock().unwrap().clone()
    }

    async fn record(
        &self,
        method: LlmMethod,
        system_prompt: Option<&str>,
        prompt: &str,
        duration_ms: f64,
        response: Option<&str>,
        error: Option<&str>,
        tokens_in: Option<i32>,
        tokens_out: Option<i32>,
    ) {
        let context = self.current_context();
        let log = ApiLog {
            id: 0,
            run_id: context.run_id,
            thread_id: context.thread_id,
            provider: self.inner.provider_name().to_string(),
            model: self.inner.model_name().to_string(),
            method: method.as_str().to_string(),
            prompt: truncate_chars(prompt, API_LOG_TEXT_LIMIT),
            system_prompt: system_prompt.map(|s| truncate_chars(s, API_LOG_SYSTEM_PROMPT_LIMIT)),
            response: response.map(|r| truncate_chars(r, API_LOG_TEXT_LIMIT)),
            error: error.map(|e| truncate_chars(e, API_LOG_TEXT_LIMIT)),
            duration_ms,
            tokens_in,
            tokens_out,
            created_at: chrono::Utc::now(),
        };

        if let Err(e) = self.repository.insert_api_log(&log).await {
            tracing::warn!(error = %e, "failed to persist api log; continuing without audit record");
        }
    }
}

#[async_trait]
impl<P: LlmProvider> LlmProvider for AuditedProvider<P> {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn generate(&self, system_prompt: Option<&str>, prompt: &str, options: &GenerateOptions) -> Result<GenerateResult> {
        let start = Instant::now();
        let result = self.inner.generate(system_prompt, prompt, options).await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(r) => {
                self.record(LlmMethod::Generate, system_prompt, prompt, duration_ms, Some(&r.text), None, r.tokens_in, r.tokens_out)
                    .await
            }
            Err(e) => {
                self.record(LlmMethod::Generate, system_prompt, prompt, duration_ms, None, Some(&e.to_string()), None, None)
                    .await
            }
        }
        result
    }

    async fn generate_json(
        &self,
        system_prompt: Option<&str>,
        prompt: &str,
        schema: &Value,
        options: &GenerateOptions,
    ) -> Result<GenerateJsonResult> {
        let start = Instant::now();
        let result = self.inner.generate_json(system_prompt, prompt, schema, options).await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(r) => {
                self.record(
                    LlmMethod::GenerateJson,
                    system_prompt,
                    prompt,
                    duration_ms,
                    Some(&r.raw_text),
                    None,
                    r.tokens_in,
                    r.tokens_out,
                )
                .await
            }
            Err(e) => {
                self.record(LlmMethod::GenerateJson, system_prompt, prompt, duration_ms, None, Some(&e.to_string()), None, None)
                    .await
            }
        }
        result
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
        let start = Instant::now();
        let result = self
            .inner
            .generate_with_audio(system_prompt, prompt, audio_bytes, audio_mime_type, schema, options)
            .await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(r) => {
                self.record(
                    LlmMethod::GenerateWithAudio,
                    system_prompt,
                    prompt,
                    duration_ms,
                    Some(&r.raw_text),
                    None,
                    r.tokens_in,
                    r.tokens_out,
                )
                .await
            }
            Err(e) => {
                self.record(
                    LlmMethod::GenerateWithAudio,
                    system_prompt,
                    prompt,
                    duration_ms,
                    None,
                    Some(&e.to_string()),
                    None,
                    None,
                )
                .await
            }
        }
        result
    }
}
