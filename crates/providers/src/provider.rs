//! The LLM provider abstraction from spec.md §4.3.
//!
//! Shaped after the teacher's `InferenceProvider` trait (see
//! `examples/tensorzero-tensorzero/gateway/src/inference/providers/provider_trait.rs`),
//! collapsed to the three operations this engine actually calls instead of
//! streaming/batch/tool-calling, and expressed with `async_trait` rather
//! than return-position `impl Future` to match this crate's other traits
//! (`evalengine_core::parallel::CancellationProbe`).

use async_trait::async_trait;
use evalengine_core::error::{Error, Result};
use serde_json::Value;

/// A thinking-effort hint accepted by Google-family models (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingLevel {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub thinking_level: Option<ThinkingLevel>,
}

#[derive(Debug, Clone)]
pub struct GenerateJsonResult {
    pub value: Value,
    /// Set when the JSON had to be repaired beyond a direct parse (spec.md
    /// §4.3); callers may choose to flag downstream results as
    /// lower-confidence.
    pub was_repaired: bool,
    pub raw_text: String,
    pub tokens_in: Option<i32>,
    pub tokens_out: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct GenerateResult {
    pub text: String,
    pub tokens_in: Option<i32>,
    pub tokens_out: Option<i32>,
}

/// The three operations every provider family supports (spec.md §4.3).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_name(&self) -> &str;
    fn model_name(&self) -> &str;

    async fn generate(&self, system_prompt: Option<&str>, prompt: &str, options: &GenerateOptions) -> Result<GenerateResult>;

    async fn generate_json(
        &self,
        system_prompt: Option<&str>,
        prompt: &str,
        schema: &Value,
        options: &GenerateOptions,
    ) -> Result<GenerateJsonResult>;

    async fn generate_with_audio(
        &self,
        system_prompt: Option<&str>,
        prompt: &str,
        audio_bytes: &[u8],
        audio_mime_type: &str,
        schema: &Value,
        options: &GenerateOptions,
    ) -> Result<GenerateJsonResult>;
}

pub(crate) fn upstream_error(provider: &str, message: impl std::fmt::Display) -> Error {
    Error::upstream(format!("{provider}: {message}"))
}

/// Forwards through a boxed trait object so callers (e.g. the runner's
/// provider factory, which picks the concrete provider type at runtime) can
/// hand a `Box<dyn LlmProvider>` to anything generic over `P: LlmProvider`,
/// such as [`crate::audit::AuditedProvider`].
#[async_trait]
impl LlmProvider for Box<dyn LlmProvider> {
    fn provider_name(&self) -> &str {
        (**self).provider_name()
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    async fn generate(&self, system_prompt: Option<&str>, prompt: &str, options: &GenerateOptions) -> Result<GenerateResult> {
        (**self).generate(system_prompt, prompt, options).await
    }

    async fn generate_json(
        &self,
        system_prompt: Option<&str>,
        prompt: &str,
        schema: &Value,
        options: &GenerateOptions,
    ) -> Result<GenerateJsonResult> {
        (**self).generate_json(system_prompt, prompt, schema, options).await
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
        (**self).generate_with_audio(system_prompt, prompt, audio_bytes, audio_mime_type, schema, options).await
    }
}
