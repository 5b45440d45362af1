//! The `CustomEvaluator` adapter (spec.md §4.5, §4.9): resolves a
//! user-authored prompt template against a [`ResolverContext`], builds the
//! matching JSON schema from the evaluator's output-field definitions, and
//! calls the LLM — either the audio-aware path or the plain JSON path.
//!
//! Like [`crate::adversarial_judge::AdversarialJudge`], this is a pure
//! evaluation component: it has no opinion on where the resolved prompt or
//! parsed output gets persisted. That orchestration (loading the evaluator
//! definition, appending to `evaluator_runs`, writing a `History` row)
//! belongs to the runner.
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/custom_evaluator_runner.py`'s
//! LLM-call section.

use std::sync::Arc;

use evalengine_core::error::Result;
use evalengine_core::prompt_resolver::{resolve_prompt, ResolverContext};
use evalengine_core::schema_gen::{generate_json_schema, EvaluatorOutputField};
use evalengine_providers::{GenerateOptions, LlmProvider};

pub struct CustomEvaluatorOutput {
    /// The fully resolved prompt actually sent to the provider.
    pub prompt_text: String,
    pub output: serde_json::Value,
    pub raw_response: String,
}

pub struct CustomEvaluator {
    llm: Arc<dyn LlmProvider>,
}

impl CustomEvaluator {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    pub async fn evaluate(
        &self,
        prompt_template: &str,
        output_schema: &[EvaluatorOutputField],
        ctx: &ResolverContext,
        audio: Option<(&[u8], &str)>,
    ) -> Result<CustomEvaluatorOutput> {
        let resolved = resolve_prompt(prompt_template, ctx);
        // The literal token is always substituted with a placeholder at the
        // end, whether or not audio bytes actually ended up attached — this
        // mirrors the original's unconditional `.replace("{{audio}}", ...)`.
        let prompt_text = resolved.prompt.replace("{{audio}}", "[Audio file attached]");
        let has_audio = prompt_template.contains("{{audio}}") && audio.is_some();

        let schema = generate_json_schema(output_schema);
        let options = GenerateOptions {
            temperature: Some(0.2),
            thinking_level: None,
        };

        let result = match audio.filter(|_| has_audio) {
            Some((bytes, mime_type)) => self.llm.generate_with_audio(None, &prompt_text, bytes, mime_type, &schema, &options).await?,
            None => self.llm.generate_json(None, &prompt_text, &schema, &options).await?,
        };

        Ok(CustomEvaluatorOutput {
            prompt_text,
            output: result.value,
            raw_response: result.raw_text,
        })
    }
}
