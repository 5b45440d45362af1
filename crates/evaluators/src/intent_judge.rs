//! IntentJudge (spec.md §4.5): classifies the expected agent and query-type
//! per message and correctness-checks it against recorded ground truth.
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/intent_evaluator.py`.

use std::sync::Arc;

use evalengine_core::data_loader::ChatRecord;
use evalengine_core::error::Result;
use evalengine_providers::{GenerateOptions, LlmProvider, ThinkingLevel};
use serde_json::{json, Value};

use crate::types::IntentEvaluation;

fn intent_json_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "predicted_agent": {"type": "string"},
            "query_type": {"type": "string"},
            "confidence": {"type": "number"},
            "reasoning": {"type": "string"},
            "all_predictions": {"type": "object"},
        },
        "required": ["predicted_agent", "query_type", "confidence", "reasoning"],
    })
}

pub struct IntentJudge {
    llm: Arc<dyn LlmProvider>,
    system_prompt: String,
}

impl IntentJudge {
    pub fn new(llm: Arc<dyn LlmProvider>, system_prompt: String) -> Self {
        Self { llm, system_prompt }
    }

    fn history_block(history: &[ChatRecord]) -> String {
        if history.is_empty() {
            return String::new();
        }
        let mut block = String::from("Conversation History:\n");
        for (i, msg) in history.iter().rev().take(3).rev().enumerate() {
            let truncated: String = msg.final_response_message.chars().take(100).collect();
            block.push_str(&format!("Turn {}: User: {}\n", i + 1, msg.query_text));
            block.push_str(&format!("        Bot: {truncated}...\n\n"));
        }
        block
    }

    pub async fn evaluate_message(&self, message: &ChatRecord, history: &[ChatRecord]) -> Result<IntentEvaluation> {
        let eval_prompt = format!(
            "{}\nUser Query: \"{}\"\n\nClassify this query according to the system prompt. Return a JSON response with your independent classification — do NOT guess or assume what the production system chose.",
            Self::history_block(history),
            message.query_text,
        );

        let options = GenerateOptions {
            temperature: None,
            thinking_level: Some(ThinkingLevel::Low),
        };
        let result = self
            .llm
            .generate_json(Some(&self.system_prompt), &eval_prompt, &intent_json_schema(), &options)
            .await?;

        let predicted_intent = result.value["predicted_agent"].as_str().unwrap_or("Unknown").to_string();
        let predicted_query_type = result.value["query_type"].as_str().unwrap_or("unknown").to_string();
        let confidence = result.value["confidence"].as_f64().unwrap_or(0.0);
        let reasoning = result.value["reasoning"].as_str().unwrap_or("").to_string();
        let all_predictions = result.value.get("all_predictions").cloned().unwrap_or(Value::Object(Default::default()));

        Ok(IntentEvaluation {
            thread_id: message.thread_id.clone(),
            message_index: history.len(),
            is_correct_intent: predicted_intent == message.intent_detected,
            is_correct_query_type: message.intent_query_type == predicted_query_type,
            predicted_intent,
            predicted_query_type,
            confidence,
            reasoning,
            all_predictions,
        })
    }

    pub async fn evaluate_thread(&self, messages: &[ChatRecord]) -> Result<Vec<IntentEvaluation>> {
        let mut evaluations = Vec::with_capacity(messages.len());
        for i in 0..messages.len() {
            let history = &messages[..i];
            evaluations.push(self.evaluate_message(&messages[i], history).await?);
        }
        Ok(evaluations)
    }
}
