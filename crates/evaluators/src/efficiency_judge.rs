//! EfficiencyJudge (spec.md §4.5): evaluates an entire conversation thread
//! for task completion, friction, and recovery quality.
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/efficiency_evaluator.py`.

use std::sync::Arc;

use evalengine_core::data_loader::ConversationThread;
use evalengine_core::models::{AdversarialConfig, EfficiencyVerdict, RuleCompliance};
use evalengine_core::rules::rules_for_efficiency;
use evalengine_providers::{GenerateOptions, LlmProvider};
use serde_json::{json, Value};

use crate::types::{EfficiencyEvaluation, FrictionCause, FrictionTurn, RecoveryQuality};

const EFFICIENCY_JUDGE_PROMPT: &str = r#"You are an expert conversation-quality auditor for a health-assistant chatbot
that logs meals.  You will receive a COMPLETE conversation thread (all turns, in order).

## Context about this chatbot
- The ideal meal-logging flow is **2 turns**: user describes food → bot shows summary + confirm chip → done.
- Extra turns may happen because:
  (a) The user genuinely didn't provide required info (time, quantity) — this is ACCEPTABLE friction.
  (b) The bot failed to parse the user's input correctly — this is BOT friction.
  (c) The bot produced wrong calorie / nutrition values and the user corrected it — this is BOT friction.
  (d) The bot showed wrong foods, wrong quantities, or duplicated items — this is BOT friction.

## Production rules — CORRECT vs INCORRECT bot behaviors

**CORRECT behaviors (NOT friction — do NOT penalize these):**
- Bot asking for meal TIME when user didn't provide it
- Bot asking for QUANTITY when ambiguous
- Bot rejecting future times
- Bot asking what FOOD when user only provides quantity or time
- Bot treating composite dishes as single items
- Bot asking for confirmation before logging

**BOT ERRORS (these ARE friction — penalize these):**
- Bot asking for time/quantity that was ALREADY provided
- Bot accepting future times without questioning
- Bot assuming/guessing food when user only gave quantity or time
- Bot splitting composite dishes into separate items
- Bot showing wrong calorie values or wrong food extraction
- Bot ignoring user corrections or repeating the same error

## Your evaluation tasks

### 1. Task Completion
Did the user achieve what they wanted?

### 2. Friction Analysis
For each turn beyond the first two, determine: user caused or bot caused?

### 3. Recovery Quality
When the user corrected the bot, did it fix the issue?

### 4. Abandonment Root Cause
If conversation ended WITHOUT successful logging, why?

## Verdict
- **EFFICIENT** — ≤2 turns, clean completion.
- **ACCEPTABLE** — Extra turns, but ALL caused by genuinely missing user info.
- **FRICTION** — At least one extra turn caused by bot error.
- **BROKEN** — User correction wasn't applied, or abandoned due to bot failure.

## JSON output
Return ONLY valid JSON:
{
  "verdict": "EFFICIENT | ACCEPTABLE | FRICTION | BROKEN",
  "task_completed": true/false,
  "friction_turns": [{"turn": <number>, "cause": "user | bot", "description": "<1 sentence>"}],
  "recovery_quality": "good | partial | failed | not_needed",
  "abandonment_reason": "<empty string if completed>",
  "reasoning": "<2-3 sentence assessment>",
  "rule_compliance": [{"rule_id": "<exact rule_id>", "followed": true | false, "evidence": "<1 sentence>"}]
}"#;

fn efficiency_json_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "verdict": {"type": "string", "enum": ["EFFICIENT", "ACCEPTABLE", "FRICTION", "BROKEN"]},
            "task_completed": {"type": "boolean"},
            "friction_turns": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "turn": {"type": "integer"},
                        "cause": {"type": "string", "enum": ["user", "bot"]},
                        "description": {"type": "string"},
                    },
                    "required": ["turn", "cause", "description"],
                },
            },
            "recovery_quality": {"type": "string", "enum": ["good", "partial", "failed", "not_needed"]},
            "abandonment_reason": {"type": "string"},
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
        "required": ["verdict", "task_completed", "friction_turns", "recovery_quality", "abandonment_reason", "reasoning", "rule_compliance"],
    })
}

pub struct EfficiencyJudge {
    llm: Arc<dyn LlmProvider>,
    config: AdversarialConfig,
}

impl EfficiencyJudge {
    pub fn new(llm: Arc<dyn LlmProvider>, config: AdversarialConfig) -> Self {
        Self { llm, config }
    }

    fn format_transcript(thread: &ConversationThread) -> String {
        let mut lines = Vec::with_capacity(thread.messages.len());
        for (i, msg) in thread.messages.iter().enumerate() {
            let ts = msg.timestamp.format("%H:%M:%S");
            let img_tag = if msg.has_image { " [image attached]" } else { "" };
            let truncated: String = msg.final_response_message.chars().take(1200).collect();
            let ellipsis = if msg.final_response_message.chars().count() > 1200 { "..." } else { "" };
            lines.push(format!(
                "**Turn {}** ({ts}) [{}/{}]\n  User: {}{img_tag}\n  Bot: {truncated}{ellipsis}",
                i + 1,
                msg.intent_detected,
                msg.intent_query_type,
                msg.query_text,
            ));
        }
        lines.join("\n\n")
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

    /// Runs the judge. The upstream evaluator swallows LLM failures into a
    /// degraded FRICTION verdict rather than propagating (spec.md §4.9 batch
    /// runner: per-thread exceptions are counted, never abort the run).
    pub async fn evaluate_thread(&self, thread: &ConversationThread) -> EfficiencyEvaluation {
        let rules = rules_for_efficiency(&self.config);
        let rules_block = Self::format_rules(&rules);

        let eval_prompt = format!(
            "### Conversation thread ({} turns, {:.0}s)\n\n{}\n\n{rules_block}\nEvaluate this conversation now. Check EACH rule above.",
            thread.message_count,
            thread.duration_seconds,
            Self::format_transcript(thread),
        );

        let options = GenerateOptions::default();
        match self
            .llm
            .generate_json(Some(EFFICIENCY_JUDGE_PROMPT), &eval_prompt, &efficiency_json_schema(), &options)
            .await
        {
            Ok(result) => Self::parse_result(thread, &result.value, &rules),
            Err(e) => EfficiencyEvaluation {
                thread_id: thread.thread_id.clone(),
                verdict: EfficiencyVerdict::Friction,
                task_completed: false,
                friction_turns: Vec::new(),
                recovery_quality: RecoveryQuality::NotNeeded,
                abandonment_reason: String::new(),
                reasoning: format!("Judge error: {e}"),
                rule_compliance: Vec::new(),
            },
        }
    }

    fn parse_rule_compliance(raw: &[Value], rules: &[&evalengine_core::models::AdversarialRule]) -> Vec<RuleCompliance> {
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

    fn parse_result(thread: &ConversationThread, raw: &Value, rules: &[&evalengine_core::models::AdversarialRule]) -> EfficiencyEvaluation {
        let verdict = match raw["verdict"].as_str().unwrap_or("FRICTION") {
            "EFFICIENT" => EfficiencyVerdict::Efficient,
            "ACCEPTABLE" => EfficiencyVerdict::Acceptable,
            "BROKEN" => EfficiencyVerdict::Broken,
            _ => EfficiencyVerdict::Friction,
        };

        let empty = Vec::new();
        let friction_turns: Vec<FrictionTurn> = raw["friction_turns"]
            .as_array()
            .unwrap_or(&empty)
            .iter()
            .filter_map(|item| {
                let turn = item.get("turn")?.as_i64()?;
                let cause = match item.get("cause")?.as_str()? {
                    "bot" => FrictionCause::Bot,
                    _ => FrictionCause::User,
                };
                let description = item.get("description").and_then(Value::as_str).unwrap_or_default().to_string();
                Some(FrictionTurn { turn, cause, description })
            })
            .collect();

        let recovery_quality = RecoveryQuality::from_raw(raw["recovery_quality"].as_str().unwrap_or("not needed"));
        let raw_compliance = raw["rule_compliance"].as_array().unwrap_or(&empty);
        let rule_compliance = Self::parse_rule_compliance(raw_compliance, rules);

        EfficiencyEvaluation {
            thread_id: thread.thread_id.clone(),
            verdict,
            task_completed: raw["task_completed"].as_bool().unwrap_or(false),
            friction_turns,
            recovery_quality,
            abandonment_reason: raw["abandonment_reason"].as_str().unwrap_or_default().to_string(),
            reasoning: raw["reasoning"].as_str().unwrap_or_default().to_string(),
            rule_compliance,
        }
    }
}
