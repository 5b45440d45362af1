//! CorrectnessJudge (spec.md §4.5): evaluates a bot response on meal
//! summaries with calorie-sanity, arithmetic-consistency, and
//! quantity-coherence checks.
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/correctness_evaluator.py`.

use std::sync::Arc;

use evalengine_core::data_loader::ChatRecord;
use evalengine_core::error::Result;
use evalengine_core::models::{AdversarialConfig, RuleCompliance, Verdict};
use evalengine_core::rules::rules_for_correctness;
use evalengine_providers::{GenerateOptions, LlmProvider};
use serde_json::{json, Value};

use crate::types::CorrectnessEvaluation;

const CORRECTNESS_JUDGE_PROMPT: &str = r#"You are a strict nutritional accuracy auditor for a health chatbot.
You will receive a USER INPUT and the BOT RESPONSE.  Your job is to evaluate whether the
meal summary in the bot response is factually defensible.

## IMPORTANT: Image-based meals
When the user message is tagged with [IMAGE ATTACHED], the user sent a photo of their food.
The bot analyzed the image to identify foods and quantities — you do NOT have access to the
original image.  In these cases:
- You CANNOT verify food-quantity coherence (Check 3) because the ground truth is in the image, not in the text.
- You CANNOT flag food names as "hallucinated" or "mismatched" — the bot identified them from the image.
- You CAN still check calorie sanity (Check 1) and arithmetic consistency (Check 2).
- If the calories and arithmetic are plausible, verdict should be **PASS** even if the user text
  is vague (e.g. "Log this meal for me").
- Only fail image-based meals for genuinely implausible calorie values or broken arithmetic.

## Checks to perform

### 1. Calorie Sanity
- Is the **total calorie** value plausible for the foods and quantities described?
- A single food item should rarely exceed 2000 Kcal.
- A single meal total should rarely exceed 4000 Kcal.
- Values like 10,000+ Kcal for everyday foods are ALWAYS wrong.

### 2. Internal Arithmetic Consistency
- Do the **per-item calorie values add up** to the stated total? (tolerance ±15 Kcal or ±5%, whichever is larger)
- Do the **macros roughly account** for the calories?  Protein×4 + Carbs×4 + Fat×9 ≈ Total Calories (tolerance ±20%).

### 3. Food-Quantity Coherence
- Does the **quantity shown in the response** match what the user stated?
- **SKIP this check if the user message has [IMAGE ATTACHED]** — food names come from the image, not text.

## Verdict (pick exactly one)
- **PASS** — All applicable checks pass.
- **SOFT_FAIL** — Minor issues.
- **HARD_FAIL** — Clear nutritional inaccuracy.
- **CRITICAL** — Order-of-magnitude calorie error or dangerous mis-statement.
- **NOT_APPLICABLE** — The bot response is NOT a meal summary.

## Production prompt rules
Evaluate whether the bot response follows the specific production prompt rules listed below.

## JSON output schema
Return ONLY valid JSON:
{
  "verdict": "PASS | SOFT_FAIL | HARD_FAIL | CRITICAL | NOT_APPLICABLE",
  "calorie_sanity": {"plausible": true/false, "stated_total_kcal": <number or null>, "expected_range_low": <number or null>, "expected_range_high": <number or null>, "reason": "<brief>"},
  "arithmetic_consistency": {"consistent": true/false, "items_sum_kcal": <number or null>, "stated_total_kcal": <number or null>, "macro_calories_estimate": <number or null>, "reason": "<brief>"},
  "quantity_coherence": {"coherent": true/false, "mismatches": ["<description>"]},
  "reasoning": "<2-3 sentence overall assessment>",
  "rule_compliance": [{"rule_id": "<exact rule_id>", "followed": true | false, "evidence": "<1 sentence>"}]
}"#;

fn correctness_json_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "verdict": {"type": "string", "enum": ["PASS", "SOFT_FAIL", "HARD_FAIL", "CRITICAL", "NOT_APPLICABLE"]},
            "calorie_sanity": {
                "type": "object",
                "properties": {
                    "plausible": {"type": "boolean"}, "stated_total_kcal": {"type": "number"},
                    "expected_range_low": {"type": "number"}, "expected_range_high": {"type": "number"},
                    "reason": {"type": "string"},
                },
                "required": ["plausible", "reason"],
            },
            "arithmetic_consistency": {
                "type": "object",
                "properties": {
                    "consistent": {"type": "boolean"}, "items_sum_kcal": {"type": "number"},
                    "stated_total_kcal": {"type": "number"}, "macro_calories_estimate": {"type": "number"},
                    "reason": {"type": "string"},
                },
                "required": ["consistent", "reason"],
            },
            "quantity_coherence": {
                "type": "object",
                "properties": {"coherent": {"type": "boolean"}, "mismatches": {"type": "array", "items": {"type": "string"}}},
                "required": ["coherent", "mismatches"],
            },
            "reasoning": {"type": "string"},
            "rule_compliance": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {"rule_id": {"type": "string"}, "followed": {"type": "boolean"}, "evidence": {"type": "string"}},
                    "required": ["rule_id", "followed", "evidence"],
                },
            },
        },
        "required": ["verdict", "calorie_sanity", "arithmetic_consistency", "quantity_coherence", "reasoning", "rule_compliance"],
    })
}

pub struct CorrectnessJudge {
    llm: Arc<dyn LlmProvider>,
    config: AdversarialConfig,
}

impl CorrectnessJudge {
    pub fn new(llm: Arc<dyn LlmProvider>, config: AdversarialConfig) -> Self {
        Self { llm, config }
    }

    fn history_block(history: &[ChatRecord]) -> String {
        let mut block = String::new();
        for (i, msg) in history.iter().rev().take(4).rev().enumerate() {
            let tag = if msg.has_image { " [IMAGE ATTACHED]" } else { "" };
            let truncated: String = msg.final_response_message.chars().take(300).collect();
            block.push_str(&format!("Turn {} — User: {}{tag}\nBot: {truncated}\n\n", i + 1, msg.query_text));
        }
        block
    }

    fn format_rules(rules: &[&evalengine_core::models::AdversarialRule]) -> String {
        if rules.is_empty() {
            return String::new();
        }
        let mut lines = vec![
            "### Production prompt rules to evaluate".to_string(),
            "For EACH rule, include a rule_compliance entry.\n".to_string(),
        ];
        for (i, rule) in rules.iter().enumerate() {
            lines.push(format!("{}. **{}** [{}]\n   {}", i + 1, rule.rule_id, rule.section, rule.rule_text));
        }
        lines.join("\n")
    }

    pub async fn evaluate_message(&self, message: &ChatRecord, history: &[ChatRecord]) -> Result<CorrectnessEvaluation> {
        let message_index = history.len();
        if !message.is_meal_summary() {
            return Ok(CorrectnessEvaluation {
                thread_id: message.thread_id.clone(),
                message_index,
                verdict: Verdict::NotApplicable,
                calorie_sanity: Value::Null,
                arithmetic_consistency: Value::Null,
                quantity_coherence: Value::Null,
                reasoning: "Response is not a meal summary.".to_string(),
                has_image_context: false,
                rule_compliance: Vec::new(),
            });
        }

        let mut has_image_context = message.has_image;
        if !has_image_context {
            for m in history.iter().rev().take(2) {
                if m.has_image {
                    has_image_context = true;
                    break;
                }
            }
        }

        let img_tag = if message.has_image { " [IMAGE ATTACHED]" } else { "" };
        let image_note = if has_image_context {
            "\n**NOTE:** This meal was identified from a user-uploaded image. Only check calorie sanity and arithmetic.\n"
        } else {
            ""
        };

        let rules = rules_for_correctness(&self.config);
        let rules_block = Self::format_rules(&rules);

        let eval_prompt = format!(
            "### Conversation history (for context)\n{}\n### Current turn\n**User input:** {}{img_tag}\n\n**Bot response:**\n{}\n\n{image_note}{rules_block}\nEvaluate the bot response now. Check EACH rule above.",
            Self::history_block(history),
            message.query_text,
            message.final_response_message,
        );

        let options = GenerateOptions::default();
        let result = self
            .llm
            .generate_json(Some(CORRECTNESS_JUDGE_PROMPT), &eval_prompt, &correctness_json_schema(), &options)
            .await?;

        Ok(Self::parse_result(message, message_index, &result.value, has_image_context, &rules))
    }

    pub async fn evaluate_thread(&self, messages: &[ChatRecord]) -> Result<Vec<CorrectnessEvaluation>> {
        let mut results = Vec::with_capacity(messages.len());
        for i in 0..messages.len() {
            results.push(self.evaluate_message(&messages[i], &messages[..i]).await?);
        }
        Ok(results)
    }

    fn parse_rule_compliance(
        raw: &[Value],
        rules: &[&evalengine_core::models::AdversarialRule],
    ) -> Vec<RuleCompliance> {
        let section_of = |rule_id: &str| rules.iter().find(|r| r.rule_id == rule_id).map(|r| r.section.clone()).unwrap_or_default();
        let mut compliance: Vec<RuleCompliance> = raw
            .iter()
            .filter_map(|item| item.as_object())
            .map(|item| {
                let rule_id = item.get("rule_id").and_then(Value::as_str).unwrap_or_default().to_string();
                RuleCompliance {
                    section: section_of(&rule_id),
                    rule_id,
                    followed: item.get("followed").and_then(Value::as_bool).unwrap_or(true),
                    evidence: item.get("evidence").and_then(Value::as_str).unwrap_or_default().to_string(),
                }
            })
            .collect();

        let catalog_ids: Vec<String> = rules.iter().map(|r| r.rule_id.clone()).collect();
        evalengine_core::rules::fill_missing_rule_coverage(&catalog_ids, &mut compliance);
        compliance
    }

    fn parse_result(
        _message: &ChatRecord,
        message_index: usize,
        raw: &Value,
        has_image_context: bool,
        rules: &[&evalengine_core::models::AdversarialRule],
    ) -> CorrectnessEvaluation {
        let raw_verdict = raw["verdict"].as_str().unwrap_or("SOFT_FAIL").replace('_', " ");
        let mut verdict = match raw_verdict.as_str() {
            "PASS" => Verdict::Pass,
            "SOFT FAIL" => Verdict::SoftFail,
            "HARD FAIL" => Verdict::HardFail,
            "CRITICAL" => Verdict::Critical,
            "NOT APPLICABLE" => Verdict::NotApplicable,
            _ => Verdict::SoftFail,
        };

        let mut reasoning = raw["reasoning"].as_str().unwrap_or_default().to_string();

        if has_image_context && matches!(verdict, Verdict::HardFail | Verdict::Critical) {
            let coherent = raw["quantity_coherence"]["coherent"].as_bool().unwrap_or(true);
            if !coherent {
                let calorie_ok = raw["calorie_sanity"]["plausible"].as_bool().unwrap_or(true);
                let arithmetic_ok = raw["arithmetic_consistency"]["consistent"].as_bool().unwrap_or(true);
                if calorie_ok && arithmetic_ok {
                    verdict = Verdict::Pass;
                    reasoning = format!("[Image-based meal — quantity coherence check skipped] {reasoning}");
                }
            }
        }

        let empty = Vec::new();
        let raw_compliance = raw["rule_compliance"].as_array().unwrap_or(&empty);
        let rule_compliance = Self::parse_rule_compliance(raw_compliance, rules);

        CorrectnessEvaluation {
            thread_id: _message.thread_id.clone(),
            message_index,
            verdict,
            calorie_sanity: raw.get("calorie_sanity").cloned().unwrap_or(Value::Null),
            arithmetic_consistency: raw.get("arithmetic_consistency").cloned().unwrap_or(Value::Null),
            quantity_coherence: raw.get("quantity_coherence").cloned().unwrap_or(Value::Null),
            reasoning,
            has_image_context,
            rule_compliance,
        }
    }
}
