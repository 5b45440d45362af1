//! Judgment-result domain types (spec.md §4.5, §4.10).
//!
//! These sit between a judge's raw LLM output and the persisted
//! `evalengine_core::models::{ThreadEvaluation, AdversarialEvaluation}` rows:
//! callers serialize one of these into the row's `result` JSON column.
//!
//! Ported from `examples/original_source/backend/app/services/evaluators/models.py`'s
//! `IntentEvaluation`/`CorrectnessEvaluation`/`EfficiencyEvaluation`/
//! `ConversationTurn`/`ConversationTranscript`/`AdversarialTestCase`.

use evalengine_core::models::{Difficulty, RuleCompliance, Verdict};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentEvaluation {
    pub thread_id: String,
    pub message_index: usize,
    pub predicted_intent: String,
    pub predicted_query_type: String,
    pub confidence: f64,
    pub is_correct_intent: bool,
    pub is_correct_query_type: bool,
    pub reasoning: String,
    #[serde(default)]
    pub all_predictions: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectnessEvaluation {
    pub thread_id: String,
    pub message_index: usize,
    pub verdict: Verdict,
    #[serde(default)]
    pub calorie_sanity: Value,
    #[serde(default)]
    pub arithmetic_consistency: Value,
    #[serde(default)]
    pub quantity_coherence: Value,
    pub reasoning: String,
    pub has_image_context: bool,
    pub rule_compliance: Vec<RuleCompliance>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecoveryQuality {
    Good,
    Partial,
    Failed,
    #[serde(rename = "NOT NEEDED")]
    NotNeeded,
}

impl RecoveryQuality {
    pub fn from_raw(raw: &str) -> Self {
        match raw.to_ascii_lowercase().replace(' ', "_").as_str() {
            "good" => Self::Good,
            "partial" => Self::Partial,
            "failed" => Self::Failed,
            _ => Self::NotNeeded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrictionCause {
    User,
    Bot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrictionTurn {
    pub turn: i64,
    pub cause: FrictionCause,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EfficiencyEvaluation {
    pub thread_id: String,
    pub verdict: evalengine_core::models::EfficiencyVerdict,
    pub task_completed: bool,
    #[serde(default)]
    pub friction_turns: Vec<FrictionTurn>,
    pub recovery_quality: RecoveryQuality,
    #[serde(default)]
    pub abandonment_reason: String,
    pub reasoning: String,
    pub rule_compliance: Vec<RuleCompliance>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTurn {
    pub turn_number: i64,
    pub user_message: String,
    pub bot_response: String,
    pub detected_intent: Option<String>,
    pub thread_id: Option<String>,
    pub session_id: Option<String>,
    pub response_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTranscript {
    pub turns: Vec<ConversationTurn>,
    pub goal_achieved: bool,
    pub goal_type: String,
    pub total_turns: i64,
    pub abandonment_reason: String,
}

impl ConversationTranscript {
    pub fn add_turn(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
        self.total_turns = self.turns.len() as i64;
    }

    pub fn to_text(&self) -> String {
        let mut lines = Vec::new();
        for turn in &self.turns {
            lines.push(format!("Turn {}:", turn.turn_number));
            lines.push(format!("  User: {}", turn.user_message));
            lines.push(format!("  Bot: {}", turn.bot_response));
            if let Some(intent) = &turn.detected_intent {
                lines.push(format!("  Intent: {intent}"));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdversarialTestCase {
    pub category: String,
    pub synthetic_input: String,
    pub expected_behavior: String,
    pub difficulty: Difficulty,
    #[serde(default = "default_goal_type")]
    pub goal_type: String,
}

fn default_goal_type() -> String {
    "meal_logged".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdversarialJudgeResult {
    pub test_case: AdversarialTestCase,
    pub transcript: ConversationTranscript,
    pub verdict: Verdict,
    #[serde(default)]
    pub failure_modes: Vec<String>,
    pub reasoning: String,
    pub goal_achieved: bool,
    pub rule_compliance: Vec<RuleCompliance>,
}
