//! Builds an audited LLM provider from a runner's resolved settings.
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/llm_base.py`'s
//! `create_llm_provider` factory function.

use std::sync::Arc;

use evalengine_core::error::{Error, Result};
use evalengine_core::repository::Repository;
use evalengine_providers::{AuditedProvider, GoogleCredentials, GoogleProvider, LlmProvider, OpenAiProvider};
use secrecy::SecretString;

const DEFAULT_GEMINI_MODEL: &str = "gemini-3-flash-preview";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Returns the concrete audited type (rather than `Arc<dyn LlmProvider>`) so
/// callers can still reach [`AuditedProvider::set_context`] to attach
/// `run_id`/`thread_id` before each call — an `Arc<dyn LlmProvider>` would
/// erase that. It still coerces to `Arc<dyn LlmProvider>` at any call site
/// that wants one (e.g. constructing a judge).
pub fn create_llm_provider(
    provider: &str,
    api_key: &str,
    model_name: &str,
    repository: Repository,
) -> Result<Arc<AuditedProvider<Box<dyn LlmProvider>>>> {
    let inner: Box<dyn LlmProvider> = match provider {
        "gemini" => {
            let model = if model_name.is_empty() { DEFAULT_GEMINI_MODEL } else { model_name };
            let credentials = GoogleCredentials::ApiKey(SecretString::from(api_key.to_string()));
            Box::new(GoogleProvider::new(model.to_string(), credentials))
        }
        "openai" => {
            let model = if model_name.is_empty() { DEFAULT_OPENAI_MODEL } else { model_name };
            Box::new(OpenAiProvider::new(model.to_string(), SecretString::from(api_key.to_string())))
        }
        other => return Err(Error::validation(format!("unknown LLM provider: {other}"))),
    };

    Ok(Arc::new(AuditedProvider::new(inner, repository)))
}
