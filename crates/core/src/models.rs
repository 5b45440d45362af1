//! The persisted data model from spec.md §3.
//!
//! Mirrors the teacher's `eval_run.py` / `job.py` SQLAlchemy models (see
//! `examples/original_source/backend/app/models/`) field-for-field, but
//! expressed as plain Rust structs with `sqlx::FromRow` for the row shape
//! and `serde` for the camelCase API shape (spec.md §6: "All JSON responses
//! use camelCase keys").

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// spec.md §3 Job invariant: `queued -> running -> {completed, failed,
/// cancelled}` or `queued -> cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses may never be dispatched or re-cancelled except
    /// idempotently (spec.md §4.1 cancellation protocol).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(crate::error::Error::internal(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// The five handler names from spec.md §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    EvaluateBatch,
    EvaluateAdversarial,
    EvaluateCustom,
    EvaluateCustomBatch,
    EvaluateVoiceRx,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EvaluateBatch => "evaluate-batch",
            Self::EvaluateAdversarial => "evaluate-adversarial",
            Self::EvaluateCustom => "evaluate-custom",
            Self::EvaluateCustomBatch => "evaluate-custom-batch",
            Self::EvaluateVoiceRx => "evaluate-voice-rx",
        }
    }
}

impl FromStr for JobType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "evaluate-batch" => Ok(Self::EvaluateBatch),
            "evaluate-adversarial" => Ok(Self::EvaluateAdversarial),
            "evaluate-custom" => Ok(Self::EvaluateCustom),
            "evaluate-custom-batch" => Ok(Self::EvaluateCustomBatch),
            "evaluate-voice-rx" => Ok(Self::EvaluateVoiceRx),
            other => Err(crate::error::Error::validation(format!(
                "Unknown job type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub current: i64,
    pub total: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluator_id: Option<Uuid>,
}

impl Default for JobProgress {
    fn default() -> Self {
        Self {
            current: 0,
            total: 0,
            message: String::new(),
            run_id: None,
            listing_id: None,
            evaluator_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub user_id: String,
    pub job_type: String,
    pub status: String,
    pub params: serde_json::Value,
    pub progress: JobProgress,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// `csv_content` is stripped from job params in API responses (spec.md
    /// §6); `params` may legitimately carry other large blobs we keep.
    pub fn strip_csv_content(&mut self) {
        if let Some(obj) = self.params.as_object_mut() {
            obj.remove("csv_content");
        }
    }
}

/// spec.md §3: `eval_type ∈ {custom, full_evaluation, human, batch_thread,
/// batch_adversarial}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalType {
    Custom,
    FullEvaluation,
    Human,
    BatchThread,
    BatchAdversarial,
}

impl EvalType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::FullEvaluation => "full_evaluation",
            Self::Human => "human",
            Self::BatchThread => "batch_thread",
            Self::BatchAdversarial => "batch_adversarial",
        }
    }

    /// spec.md §9 open question: the legacy `command` field maps onto
    /// `eval_type` this way. `evaluate-voice-rx` maps to the custom semantic
    /// type since voice-rx runs are per-listing, single-evaluator executions
    /// much like a custom evaluator run.
    pub fn from_legacy_command(command: &str) -> Option<Self> {
        match command {
            "evaluate-batch" => Some(Self::BatchThread),
            "adversarial" => Some(Self::BatchAdversarial),
            "evaluate-voice-rx" => Some(Self::Custom),
            _ => None,
        }
    }
}

impl FromStr for EvalType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "custom" => Ok(Self::Custom),
            "full_evaluation" => Ok(Self::FullEvaluation),
            "human" => Ok(Self::Human),
            "batch_thread" => Ok(Self::BatchThread),
            "batch_adversarial" => Ok(Self::BatchAdversarial),
            other => Err(crate::error::Error::validation(format!(
                "Unknown eval_type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalRun {
    pub id: Uuid,
    pub app_id: String,
    pub user_id: String,
    pub eval_type: String,
    pub listing_id: Option<Uuid>,
    pub session_id: Option<Uuid>,
    pub evaluator_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub status: String,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<f64>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub config: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub summary: Option<serde_json::Value>,
    pub batch_metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl EvalRun {
    /// spec.md §3 invariant: exactly one of `listing_id`/`session_id` is set
    /// for any non-batch run.
    pub fn exactly_one_source(&self) -> bool {
        self.listing_id.is_some() != self.session_id.is_some()
    }
}

/// Shared severity ranking for "worst" aggregation (spec.md §4.5, §8).
/// `NOT APPLICABLE < PASS < SOFT FAIL < HARD FAIL < CRITICAL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    NotApplicable,
    Pass,
    SoftFail,
    HardFail,
    Critical,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotApplicable => "NOT APPLICABLE",
            Self::Pass => "PASS",
            Self::SoftFail => "SOFT FAIL",
            Self::HardFail => "HARD FAIL",
            Self::Critical => "CRITICAL",
        }
    }

    /// The maximum over a ranked severity list (spec.md §8 invariant).
    pub fn worst(items: impl IntoIterator<Item = Self>) -> Self {
        items.into_iter().max().unwrap_or(Self::NotApplicable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EfficiencyVerdict {
    Efficient,
    Acceptable,
    Friction,
    Broken,
}

impl EfficiencyVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Efficient => "EFFICIENT",
            Self::Acceptable => "ACCEPTABLE",
            Self::Friction => "FRICTION",
            Self::Broken => "BROKEN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ThreadEvaluation {
    pub id: i64,
    pub run_id: Uuid,
    pub thread_id: String,
    pub data_file_hash: Option<String>,
    pub intent_accuracy: Option<f64>,
    pub worst_correctness: Option<String>,
    pub efficiency_verdict: Option<String>,
    pub success_status: bool,
    pub result: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AdversarialEvaluation {
    pub id: i64,
    pub run_id: Uuid,
    pub category: Option<String>,
    pub difficulty: Option<String>,
    pub verdict: Option<String>,
    pub goal_achieved: bool,
    pub total_turns: i32,
    pub result: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmMethod {
    Generate,
    GenerateJson,
    GenerateWithAudio,
}

impl LlmMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::GenerateJson => "generate_json",
            Self::GenerateWithAudio => "generate_with_audio",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ApiLog {
    pub id: i64,
    pub run_id: Option<Uuid>,
    pub thread_id: Option<String>,
    pub provider: String,
    pub model: String,
    pub method: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub response: Option<String>,
    pub error: Option<String>,
    pub duration_ms: f64,
    pub tokens_in: Option<i32>,
    pub tokens_out: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// `GET /api/eval-runs/stats/summary` (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EvalRunStatsSummary {
    pub total_runs: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_eval_type: BTreeMap<String, i64>,
}

/// One row of `GET /api/eval-runs/trends?days=N` (spec.md §6): a verdict
/// count for a single calendar day.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DailyVerdictCount {
    pub date: NaiveDate,
    pub verdict: String,
    pub count: i64,
}

/// Caps from spec.md §3: prompt/response truncated to <=50_000 chars,
/// system prompt to <=20_000.
pub const API_LOG_TEXT_LIMIT: usize = 50_000;
pub const API_LOG_SYSTEM_PROMPT_LIMIT: usize = 20_000;

pub fn truncate_chars(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        s.to_string()
    } else {
        s.chars().take(limit).collect()
    }
}

/// Per-rule `{followed, evidence}` record produced by a judge (spec.md
/// §4.5). `fill_missing_rule_coverage` in [`crate::rules`] pads the list to
/// full catalog coverage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCompliance {
    pub rule_id: String,
    pub section: String,
    pub followed: bool,
    #[serde(default)]
    pub evidence: String,
}

/// spec.md §3 `AdversarialConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdversarialCategory {
    pub id: String,
    pub label: String,
    pub description: String,
    pub weight: u32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdversarialRule {
    pub rule_id: String,
    pub section: String,
    pub rule_text: String,
    pub categories: Vec<String>,
}

pub const ADVERSARIAL_CONFIG_CURRENT_VERSION: i32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdversarialConfig {
    pub version: i32,
    pub categories: Vec<AdversarialCategory>,
    pub rules: Vec<AdversarialRule>,
}

impl Default for AdversarialConfig {
    fn default() -> Self {
        Self {
            version: ADVERSARIAL_CONFIG_CURRENT_VERSION,
            categories: Vec::new(),
            rules: Vec::new(),
        }
    }
}

/// The stored LLM credentials/model selection a runner falls back to when
/// a job's params leave `api_key`/`llm_provider` blank (spec.md §6's
/// "Configuration" settings document, `original_source/.../settings_helper.py`'s
/// `get_llm_settings_from_db`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmSettings {
    pub provider: String,
    pub api_key: String,
    pub selected_model: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            api_key: String::new(),
            selected_model: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_correctness_is_max_severity() {
        let worst = Verdict::worst([Verdict::Pass, Verdict::SoftFail, Verdict::NotApplicable]);
        assert_eq!(worst, Verdict::SoftFail);
    }

    #[test]
    fn worst_correctness_empty_is_not_applicable() {
        assert_eq!(Verdict::worst(std::iter::empty()), Verdict::NotApplicable);
    }

    #[test]
    fn eval_run_source_exclusivity() {
        let mut run_template = EvalRun {
            id: Uuid::nil(),
            app_id: "kaira".into(),
            user_id: "u1".into(),
            eval_type: EvalType::Custom.as_str().into(),
            listing_id: None,
            session_id: None,
            evaluator_id: None,
            job_id: None,
            status: RunStatus::Pending.as_str().into(),
            error_message: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            provider: None,
            model: None,
            config: serde_json::json!({}),
            result: None,
            summary: None,
            batch_metadata: None,
            created_at: Utc::now(),
        };
        assert!(!run_template.exactly_one_source());
        run_template.listing_id = Some(Uuid::nil());
        assert!(run_template.exactly_one_source());
        run_template.session_id = Some(Uuid::nil());
        assert!(!run_template.exactly_one_source());
    }

    #[test]
    fn legacy_command_aliases_map_to_eval_type() {
        assert_eq!(
            EvalType::from_legacy_command("evaluate-batch"),
            Some(EvalType::BatchThread)
        );
        assert_eq!(
            EvalType::from_legacy_command("adversarial"),
            Some(EvalType::BatchAdversarial)
        );
        assert_eq!(EvalType::from_legacy_command("unknown"), None);
    }

    #[test]
    fn job_strips_csv_content() {
        let mut job = Job {
            id: Uuid::nil(),
            user_id: "u".into(),
            job_type: JobType::EvaluateBatch.as_str().into(),
            status: JobStatus::Queued.as_str().into(),
            params: serde_json::json!({"csv_content": "a,b,c", "thread_ids": ["t1"]}),
            progress: JobProgress::default(),
            result: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        job.strip_csv_content();
        assert!(job.params.get("csv_content").is_none());
        assert!(job.params.get("thread_ids").is_some());
    }
}
