//! AdversarialJudge (spec.md §4.5, §4.9): generates synthetic adversarial
//! test cases from the enabled category config, then judges a conversation
//! transcript produced against one of those test cases.
//!
//! Ported from
//! `examples/original_source/backend/app/services/evaluators/adversarial_evaluator.py`.

use std::sync::Arc;

use evalengine_core::error::{Error, Result};
use evalengine_core::models::{AdversarialCategory, AdversarialConfig, AdversarialRule, Difficulty, RuleCompliance, Verdict};
use evalengine_core::rules::{enabled_categories, rules_for_category};
use evalengine_providers::{GenerateOptions, LlmProvider, ThinkingLevel};
use serde_json::{json, Value};

use crate::types::{AdversarialJudgeResult, AdversarialTestCase, ConversationTranscript};

const ADVERSARIAL_LIVE_JUDGE_PROMPT: &str = r#"You are an expert adversarial-test auditor for a health-assistant chatbot
that logs meals. You will receive a synthetic test case designed to probe a specific
failure mode, and the complete conversation transcript produced while running it.

## Your job
Judge whether the bot handled this adversarial scenario correctly, using ONLY the
production rules provided below plus the test case's stated expected behavior.

## Difficulty calibration
- **easy** — zero tolerance. Any deviation from expected behavior is at least a SOFT_FAIL.
- **medium** — SOFT_FAIL is acceptable if the bot recovered; HARD_FAIL/CRITICAL are real failures.
- **hard** — only HARD_FAIL or CRITICAL count as a real failure; friction alone is fine.

## Verdict
- **PASS** — bot handled the scenario per the expected behavior.
- **SOFT_FAIL** — minor deviation, user experience mildly degraded, no wrong data persisted.
- **HARD_FAIL** — bot behaved incorrectly in a way that would mislead or frustrate the user.
- **CRITICAL** — bot logged or confirmed incorrect data, or ignored an explicit user correction.

## JSON output
Return ONLY valid JSON:
{
  "verdict": "PASS | SOFT_FAIL | HARD_FAIL | CRITICAL",
  "failure_modes": ["<short tag>", ...],
  "reasoning": "<2-3 sentence assessment>",
  "rule_compliance": [{"rule_id": "<exact rule_id>", "followed": true | false, "evidence": "<1 sentence>"}]
}"#;

fn adversarial_judge_json_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "verdict": {"type": "string", "enum": ["PASS", "SOFT_FAIL", "HARD_FAIL", "CRITICAL"]},
            "failure_modes": {"type": "array", "items": {"type": "string"}},
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
        "required": ["verdict", "failure_modes", "reasoning", "rule_compliance"],
    })
}

/// Builds the generation prompt from whichever categories are currently
/// enabled, rather than a hardcoded category list — config changes (adding,
/// disabling, or reweighting a category) reshape test-case generation
/// without a code change.
fn build_generation_prompt(categories: &[&AdversarialCategory], count: usize, extra_instructions: Option<&str>) -> String {
    let category_list: String = categories
        .iter()
        .map(|c| format!("- **{}**: {}", c.id, c.description))
        .collect::<Vec<_>>()
        .join("\n");

    let extra = extra_instructions.map(|s| format!("\n## Additional instructions\n{s}\n")).unwrap_or_default();

    format!(
        "You are generating adversarial test cases for a health-assistant chatbot that logs meals.\n\n\
        ## Categories to cover\n{category_list}\n\n\
        ## CRITICAL: what `synthetic_input` means\n\
        `synthetic_input` is the user's FIRST message only. It must be a single, self-contained\n\
        message — never a multi-turn script, never a list of turns, never containing the bot's\n\
        replies. The conversation continues turn-by-turn afterward via a separate simulated user.\n\n\
        Generate exactly {count} test cases, spread across the categories above, with a realistic mix\n\
        of difficulty (easy / medium / hard). Each test case needs: category, synthetic_input,\n\
        expected_behavior (what correct bot handling looks like), difficulty, and goal_type\n\
        (\"meal_logged\" or \"question_answered\").\n{extra}\n\
        Return ONLY valid JSON matching the provided schema."
    )
}

fn build_gen_json_schema(categories: &[&AdversarialCategory]) -> Value {
    let category_ids: Vec<&str> = categories.iter().map(|c| c.id.as_str()).collect();
    json!({
        "type": "object",
        "properties": {
            "test_cases": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "category": {"type": "string", "enum": category_ids},
                        "synthetic_input": {"type": "string"},
                        "expected_behavior": {"type": "string"},
                        "difficulty": {"type": "string", "enum": ["EASY", "MEDIUM", "HARD"]},
                        "goal_type": {"type": "string", "enum": ["meal_logged", "question_answered"]},
                    },
                    "required": ["category", "synthetic_input", "expected_behavior", "difficulty", "goal_type"],
                },
            },
        },
        "required": ["test_cases"],
    })
}

fn parse_difficulty(raw: &str) -> Difficulty {
    match raw.to_ascii_uppercase().as_str() {
        "EASY" => Difficulty::Easy,
        "HARD" => Difficulty::Hard,
        _ => Difficulty::Medium,
    }
}

pub struct AdversarialJudge {
    llm: Arc<dyn LlmProvider>,
    config: AdversarialConfig,
}

impl AdversarialJudge {
    pub fn new(llm: Arc<dyn LlmProvider>, config: AdversarialConfig) -> Self {
        Self { llm, config }
    }

    /// Generates `count` test cases across the currently enabled categories.
    /// Unlike the other judges, a generation failure here is NOT swallowed:
    /// the batch that would run against these test cases has nothing to run
    /// without them, so the error propagates to the caller.
    pub async fn generate_test_cases(&self, count: usize, extra_instructions: Option<&str>) -> Result<Vec<AdversarialTestCase>> {
        let categories = enabled_categories(&self.config);
        if categories.is_empty() {
            return Err(Error::validation("no adversarial categories are enabled"));
        }

        let prompt = build_generation_prompt(&categories, count, extra_instructions);
        let schema = build_gen_json_schema(&categories);
        let options = GenerateOptions {
            temperature: Some(0.9),
            thinking_level: Some(ThinkingLevel::Low),
        };

        let result = self.llm.generate_json(None, &prompt, &schema, &options).await?;
        let raw_cases = Self::extract_list(&result.value)?;

        let mut test_cases: Vec<AdversarialTestCase> = raw_cases
            .iter()
            .filter_map(|item| {
                let category = item.get("category")?.as_str()?.to_string();
                let synthetic_input = item.get("synthetic_input")?.as_str()?.to_string();
                let expected_behavior = item.get("expected_behavior")?.as_str()?.to_string();
                let difficulty = parse_difficulty(item.get("difficulty").and_then(Value::as_str).unwrap_or("MEDIUM"));
                let goal_type = item.get("goal_type").and_then(Value::as_str).unwrap_or("meal_logged").to_string();
                Some(AdversarialTestCase { category, synthetic_input, expected_behavior, difficulty, goal_type })
            })
            .collect();

        test_cases.truncate(count);
        if test_cases.is_empty() {
            return Err(Error::upstream("adversarial test-case generation returned no usable cases"));
        }
        Ok(test_cases)
    }

    /// Falls back to scanning the top-level object for the first array value
    /// when the LLM didn't nest test cases under `test_cases` as asked.
    fn extract_list(raw: &Value) -> Result<Vec<Value>> {
        if let Some(cases) = raw.get("test_cases").and_then(Value::as_array) {
            return Ok(cases.clone());
        }
        if let Some(array) = raw.as_array() {
            return Ok(array.clone());
        }
        if let Some(obj) = raw.as_object() {
            for value in obj.values() {
                if let Some(array) = value.as_array() {
                    return Ok(array.clone());
                }
            }
        }
        Err(Error::upstream("could not locate a test-case list in the generation response"))
    }

    fn format_rules(rules: &[&AdversarialRule]) -> String {
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

    pub async fn evaluate_transcript(&self, test_case: &AdversarialTestCase, transcript: &ConversationTranscript) -> Result<AdversarialJudgeResult> {
        let rules = rules_for_category(&self.config, &test_case.category);
        let rules_block = Self::format_rules(&rules);

        let eval_prompt = format!(
            "## Test case\n- **Category:** {}\n- **Difficulty:** {:?}\n- **Expected behavior:** {}\n- **Goal type:** {}\n\n\
            ## Outcome\n- **Goal achieved:** {}\n- **Abandonment reason:** {}\n\n\
            ## Transcript\n{}\n\n{rules_block}\nEvaluate this transcript now. Check EACH rule above.",
            test_case.category,
            test_case.difficulty,
            test_case.expected_behavior,
            test_case.goal_type,
            transcript.goal_achieved,
            transcript.abandonment_reason,
            transcript.to_text(),
        );

        let options = GenerateOptions::default();
        let result = self
            .llm
            .generate_json(Some(ADVERSARIAL_LIVE_JUDGE_PROMPT), &eval_prompt, &adversarial_judge_json_schema(), &options)
            .await?;

        Ok(Self::parse_result(test_case, transcript, &result.value, &rules))
    }

    fn parse_rule_compliance(raw: &[Value], rules: &[&AdversarialRule]) -> Vec<RuleCompliance> {
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

    fn parse_result(test_case: &AdversarialTestCase, transcript: &ConversationTranscript, raw: &Value, rules: &[&AdversarialRule]) -> AdversarialJudgeResult {
        let verdict = match raw["verdict"].as_str().unwrap_or("SOFT_FAIL").replace('_', " ").to_ascii_uppercase().as_str() {
            "PASS" => Verdict::Pass,
            "HARD FAIL" => Verdict::HardFail,
            "CRITICAL" => Verdict::Critical,
            "NOT APPLICABLE" => Verdict::NotApplicable,
            _ => Verdict::SoftFail,
        };

        let empty = Vec::new();
        let failure_modes: Vec<String> = raw["failure_modes"]
            .as_array()
            .unwrap_or(&empty)
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();

        let raw_compliance = raw["rule_compliance"].as_array().unwrap_or(&empty);
        let rule_compliance = Self::parse_rule_compliance(raw_compliance, rules);

        AdversarialJudgeResult {
            test_case: test_case.clone(),
            transcript: transcript.clone(),
            verdict,
            failure_modes,
            reasoning: raw["reasoning"].as_str().unwrap_or_default().to_string(),
            goal_achieved: transcript.goal_achieved,
            rule_compliance,
        }
    }
}
